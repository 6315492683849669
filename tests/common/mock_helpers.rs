//! Mock construction helpers

use sensorgraph_rs::{Result, RpcExecutor};
use std::cell::RefCell;
use std::rc::Rc;

/// One RPC seen by a [`RecordingRpcExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRpc {
    pub address: u8,
    pub rpc_id: u16,
}

/// Answers every RPC with a fixed value and remembers each call
#[derive(Debug, Clone)]
pub struct RecordingRpcExecutor {
    response: i32,
    calls: Rc<RefCell<Vec<RecordedRpc>>>,
}

impl RecordingRpcExecutor {
    /// The executor plus a handle to its call log
    pub fn new(response: i32) -> (Self, Rc<RefCell<Vec<RecordedRpc>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                response,
                calls: Rc::clone(&calls),
            },
            calls,
        )
    }
}

impl RpcExecutor for RecordingRpcExecutor {
    fn execute(&mut self, address: u8, rpc_id: u16, _payload: &[u8]) -> Result<i32> {
        self.calls.borrow_mut().push(RecordedRpc { address, rpc_id });
        Ok(self.response)
    }
}

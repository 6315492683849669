//! RPC dispatch used by `call_rpc` nodes.

use super::slot::SlotIdentifier;
use crate::error::Result;
use std::collections::HashMap;

/// Runs RPCs on behalf of a sensor graph
///
/// Implementations decide how the call reaches a tile; the graph only
/// sees the numeric result or an error.
#[cfg_attr(test, mockall::automock)]
pub trait RpcExecutor {
    fn execute(&mut self, address: u8, rpc_id: u16, payload: &[u8]) -> Result<i32>;
}

/// Accepts every RPC and returns 0
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRpcExecutor;

impl RpcExecutor for NullRpcExecutor {
    fn execute(&mut self, address: u8, rpc_id: u16, _payload: &[u8]) -> Result<i32> {
        tracing::trace!("RPC 0x{:04X} on address {} answered with 0", rpc_id, address);
        Ok(0)
    }
}

/// Returns fixed values for selected RPCs and 0 for everything else
#[derive(Debug, Default, Clone)]
pub struct CannedRpcExecutor {
    responses: HashMap<(u8, u16), i32>,
}

impl CannedRpcExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mock(&mut self, slot: SlotIdentifier, rpc_id: u16, value: i32) {
        self.responses.insert((slot.address(), rpc_id), value);
    }
}

impl RpcExecutor for CannedRpcExecutor {
    fn execute(&mut self, address: u8, rpc_id: u16, _payload: &[u8]) -> Result<i32> {
        Ok(self.responses.get(&(address, rpc_id)).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_responses() {
        let mut rpc = CannedRpcExecutor::new();
        rpc.mock(SlotIdentifier::Slot(1), 0x8000, 12);
        assert_eq!(rpc.execute(11, 0x8000, &[]).unwrap(), 12);
        assert_eq!(rpc.execute(11, 0x8001, &[]).unwrap(), 0);
        assert_eq!(NullRpcExecutor.execute(8, 1, &[]).unwrap(), 0);
    }
}

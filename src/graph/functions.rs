//! Implementations of the processing functions.
//!
//! A function reads the pending data of its inputs and returns the values
//! to push into the node's output stream. The caller consumes everything
//! left pending on the inputs afterwards.

use super::node::{ProcessingFunction, SensorGraphNode};
use super::rpc::RpcExecutor;
use crate::error::{Result, SensorGraphError};
use crate::id::WalkerId;
use crate::storage::SensorLog;
use crate::stream::Reading;

/// Side channel for functions that act outside the node's output stream
pub(crate) struct FunctionContext<'a> {
    pub rpc: Option<&'a mut dyn RpcExecutor>,
    /// Streamer indices marked by `trigger_streamer`
    pub triggered_streamers: Vec<usize>,
}

pub(crate) fn execute(
    node: &SensorGraphNode,
    log: &mut SensorLog,
    ctx: &mut FunctionContext<'_>,
) -> Result<Vec<i32>> {
    let a = node.walker_a;

    match node.function() {
        ProcessingFunction::CopyLatestA => Ok(latest(log, a)?.map(|r| r.value).into_iter().collect()),
        ProcessingFunction::CopyAllA => Ok(drain(log, a)?.iter().map(|r| r.value).collect()),
        ProcessingFunction::AverageA => {
            let readings = drain(log, a)?;
            if readings.is_empty() {
                return Ok(Vec::new());
            }
            let sum: i64 = readings.iter().map(|r| r.value as i64).sum();
            Ok(vec![(sum / readings.len() as i64) as i32])
        }
        ProcessingFunction::SumA => {
            let readings = drain(log, a)?;
            if readings.is_empty() {
                return Ok(Vec::new());
            }
            let sum: i64 = readings.iter().map(|r| r.value as i64).sum();
            Ok(vec![sum as i32])
        }
        ProcessingFunction::CopyCountA => {
            let count = match log.count(a)? {
                0 => return Ok(Vec::new()),
                crate::storage::UNBOUNDED_COUNT => 1,
                count => count,
            };
            Ok(vec![count as i32])
        }
        ProcessingFunction::TriggerStreamer => {
            if let Some(reading) = latest(log, a)? {
                let index = usize::try_from(reading.value).map_err(|_| {
                    SensorGraphError::Data(format!(
                        "trigger_streamer received invalid streamer index {}",
                        reading.value
                    ))
                })?;
                ctx.triggered_streamers.push(index);
            }
            Ok(Vec::new())
        }
        ProcessingFunction::CallRpc => call_rpc(node, log, ctx),
        ProcessingFunction::SubtractAFromB => {
            let b = input_b(node)?;
            match (latest(log, a)?, latest(log, b)?) {
                (Some(a), Some(b)) => Ok(vec![b.value.wrapping_sub(a.value)]),
                _ => Ok(Vec::new()),
            }
        }
    }
}

fn call_rpc(
    node: &SensorGraphNode,
    log: &mut SensorLog,
    ctx: &mut FunctionContext<'_>,
) -> Result<Vec<i32>> {
    let target = match latest(log, input_b(node)?)? {
        Some(reading) => reading.value as u32,
        None => return Ok(Vec::new()),
    };

    let executor = match ctx.rpc.as_deref_mut() {
        Some(executor) => executor,
        None => {
            tracing::trace!("No RPC executor, skipping call_rpc on {}", node.output());
            return Ok(Vec::new());
        }
    };

    let address = u8::try_from(target >> 16).map_err(|_| {
        SensorGraphError::Data(format!("call_rpc target 0x{:08X} has an invalid address", target))
    })?;
    let rpc_id = (target & 0xFFFF) as u16;

    let result = executor
        .execute(address, rpc_id, &[])
        .map_err(|e| e.with_context(format!("RPC 0x{:04X} on address {}", rpc_id, address)))?;
    Ok(vec![result])
}

fn input_b(node: &SensorGraphNode) -> Result<WalkerId> {
    node.walker_b.ok_or_else(|| {
        SensorGraphError::Data(format!(
            "{} requires a second input on node producing {}",
            node.function(),
            node.output()
        ))
    })
}

/// Most recent pending reading, if any
fn latest(log: &mut SensorLog, walker: WalkerId) -> Result<Option<Reading>> {
    if log.count(walker)? == 0 {
        return Ok(None);
    }
    if log.walker_is_buffered(walker)? {
        return Ok(drain(log, walker)?.pop());
    }
    log.peek(walker).map(Some)
}

/// Every pending reading, oldest first; a constant counts as one reading
fn drain(log: &mut SensorLog, walker: WalkerId) -> Result<Vec<Reading>> {
    let count = log.count(walker)?;
    if count == crate::storage::UNBOUNDED_COUNT {
        return Ok(vec![log.peek(walker)?]);
    }

    let mut readings = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        readings.push(log.pop(walker)?);
    }
    Ok(readings)
}

//! The sensor graph: nodes, streamers and the propagation engine.
//!
//! A graph is an ordered list of nodes. Each node watches one or two
//! input streams through walkers, fires when its triggers are satisfied
//! and pushes the result of its processing function into an output
//! stream, which may in turn fire further nodes.

pub mod descriptor;
mod functions;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod known_constants;
pub mod node;
pub mod rpc;
pub mod slot;
pub mod streamer;

pub use descriptor::BINARY_NODE_SIZE;
pub use graph::{GraphParts, MetadataValue, NodeVisit, SensorGraph, TickSource};
pub use node::{
    Combiner, Comparison, InputTrigger, NodeDescriptor, NodeInput, ProcessingFunction,
    SensorGraphNode, TriggerSource,
};
pub use rpc::{CannedRpcExecutor, NullRpcExecutor, RpcExecutor};
pub use slot::SlotIdentifier;
pub use streamer::{DataStreamer, ReportFormat, ReportType, StreamerState, BINARY_STREAMER_SIZE};

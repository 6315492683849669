//! # sensorgraph-rs: sensor graph compiler, optimizer and simulator
//!
//! A sensor graph is a small dataflow program that runs on an embedded
//! controller. Readings arrive on input streams, flow through processing
//! nodes that fire on value or count triggers, and end up in buffered or
//! output streams from which streamers export them.
//!
//! ## Architecture
//!
//! - **stream**: stream identifiers, selectors and readings
//! - **storage**: fixed-capacity storage engine, walkers and the sensor log
//! - **graph**: nodes, streamers and the synchronous propagation engine
//! - **parser**: the sensor graph language and its compiler
//! - **optimizer**: behavior-preserving graph rewrites
//! - **sim**: clock-driven simulator with stimuli, stop conditions and traces
//! - **output**: text and binary renderings of a compiled graph
//!
//! ## Example
//!
//! ```no_run
//! use sensorgraph_rs::{compile_source, optimize, DeviceModel, Simulator};
//!
//! fn main() -> sensorgraph_rs::Result<()> {
//!     let model = DeviceModel::default();
//!     let graph = compile_source(
//!         "every 10 minutes { copy average input 1 => output 1; }",
//!         &model,
//!     )?;
//!     let graph = optimize(&graph)?;
//!
//!     let mut sim = Simulator::new(graph);
//!     sim.stimulus("input 1 = 5")?;
//!     sim.stop_condition("run_time 1 hour")?;
//!     sim.record_trace(&[]);
//!     sim.run()?;
//!     println!("{} readings", sim.trace().map_or(0, |t| t.len()));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod id;
pub mod optimizer;
pub mod output;
pub mod parser;
pub mod sim;
pub mod storage;
pub mod stream;

// Re-export commonly used types
pub use config::{ConfigType, ConfigValue, DeviceModel};
pub use error::{Result, ResultExt, SensorGraphError};
pub use graph::{DataStreamer, NodeDescriptor, RpcExecutor, SensorGraph, SlotIdentifier};
pub use optimizer::{optimize, Optimizer, OptimizerStats, Pass};
pub use output::{render, OutputFormat};
pub use parser::{compile_file, compile_source, parse, parse_file};
pub use sim::{SimulationStimulus, SimulationTrace, Simulator};
pub use storage::{SensorLog, StorageArea, StorageEngine};
pub use stream::{DataStream, DataStreamSelector, Reading, StreamType};

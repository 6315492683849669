//! Simulation of a sensor graph against simulated time.
//!
//! The [`Simulator`] feeds ticks and scheduled [`SimulationStimulus`]
//! values into a graph until a [`StopCondition`] holds, optionally
//! recording a [`SimulationTrace`] of what the graph reported.

pub mod simulator;
pub mod stimulus;
pub mod stop;
pub mod trace;

pub use simulator::Simulator;
pub use stimulus::SimulationStimulus;
pub use stop::{parse_stop_condition, StopCondition, TimeBasedStopCondition};
pub use trace::{SimulationTrace, TraceMetadata};

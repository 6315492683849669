//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use sensorgraph_rs::{compile_source, DeviceModel, Reading, SensorGraph, Simulator};

/// Compile `source` for the default device model
pub fn compile(source: &str) -> SensorGraph {
    compile_source(source, &DeviceModel::default()).expect("program should compile")
}

/// Run `graph` for `run_time` with `stimuli` and return the default trace
pub fn simulate(graph: SensorGraph, stimuli: &[&str], run_time: &str) -> Vec<Reading> {
    let mut sim = Simulator::new(graph);
    sim.load_constants().expect("constants should load");
    sim.record_trace(&[]);
    for stimulus in stimuli {
        sim.stimulus(stimulus).expect("stimulus should parse");
    }
    sim.stop_condition(&format!("run_time {}", run_time))
        .expect("stop condition should parse");
    sim.run().expect("simulation should run");
    sim.take_trace().expect("trace was recorded").readings
}

/// Trace readings without reading ids, which depend on storage history
pub fn observed(readings: &[Reading]) -> Vec<(u32, String, i32)> {
    readings
        .iter()
        .map(|r| (r.raw_time, r.stream.to_string(), r.value))
        .collect()
}

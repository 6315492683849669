//! End-to-end behavior of the propagation engine and the simulator

mod common;

use common::builders::{small_model, GraphBuilder};
use common::mock_helpers::{RecordedRpc, RecordingRpcExecutor};
use sensorgraph_rs::graph::known_constants::CONFIG_FAST_TICK;
use sensorgraph_rs::storage::StorageSnapshot;
use sensorgraph_rs::{
    ConfigType, ConfigValue, DataStream, DataStreamer, Reading, SensorGraph, Simulator,
    SlotIdentifier,
};

fn stream(text: &str) -> DataStream {
    text.parse().unwrap()
}

fn push(graph: &mut SensorGraph, text: &str, value: i32) {
    let stream = stream(text);
    graph
        .process_input(stream, Reading::new(stream, 0, value), None)
        .unwrap();
}

#[test]
fn test_copy_all_waits_for_both_triggers() {
    let mut graph = GraphBuilder::new()
        .node("(input 1 always && input 2 when count >= 1) => unbuffered 1 using copy_all_a")
        .build();

    push(&mut graph, "input 1", 1);
    assert!(graph.sensor_log().inspect_last(&stream("unbuffered 1")).is_none());

    push(&mut graph, "input 2", 1);
    let latest = graph.sensor_log().inspect_last(&stream("unbuffered 1")).unwrap();
    assert_eq!(latest.value, 1);
}

#[test]
fn test_fast_tick_interval_from_config() {
    let mut graph = GraphBuilder::new()
        .node("(system input 3 always) => output 1 using copy_latest_a")
        .build();
    graph.add_config(
        SlotIdentifier::Controller,
        CONFIG_FAST_TICK,
        ConfigValue::integer(ConfigType::UInt32, 2).unwrap(),
    );

    let mut sim = Simulator::new(graph);
    sim.record_trace(&["output 1".parse().unwrap()]);
    sim.stop_condition("run_time 100 seconds").unwrap();
    sim.run().unwrap();

    let trace = sim.trace().unwrap();
    assert_eq!(trace.len(), 50);
    assert!(trace.readings.iter().all(|r| r.raw_time % 2 == 0));
}

#[test]
fn test_fast_tick_change_applies_at_next_tick() {
    let mut graph = GraphBuilder::new()
        .node("(system input 3 always) => output 1 using copy_latest_a")
        .build();
    graph.add_config(
        SlotIdentifier::Controller,
        CONFIG_FAST_TICK,
        ConfigValue::integer(ConfigType::UInt32, 5).unwrap(),
    );

    let mut sim = Simulator::new(graph);
    sim.record_trace(&["output 1".parse().unwrap()]);
    sim.stop_condition("run_time 10 seconds").unwrap();
    sim.run().unwrap();

    sim.graph_mut().add_config(
        SlotIdentifier::Controller,
        CONFIG_FAST_TICK,
        ConfigValue::integer(ConfigType::UInt32, 1).unwrap(),
    );
    sim.run().unwrap();

    let times: Vec<u32> = sim.trace().unwrap().readings.iter().map(|r| r.raw_time).collect();
    let mut expected = vec![5, 10];
    expected.extend(11..=20);
    assert_eq!(times, expected);
}

#[test]
fn test_call_rpc_without_executor_produces_nothing() {
    let mut graph = GraphBuilder::new()
        .node("(input 1 always && constant 1 always) => output 1 using call_rpc")
        .constant("constant 1", (11 << 16) | 0x8000)
        .build();
    graph.load_constants().unwrap();

    push(&mut graph, "input 1", 1);
    push(&mut graph, "input 1", 2);
    assert!(graph.sensor_log().inspect_last(&stream("output 1")).is_none());
    assert!(graph.sensor_log().dump().streaming_data.is_empty());
}

#[test]
fn test_call_rpc_through_simulator_executor() {
    let graph = GraphBuilder::new()
        .node("(input 1 always && constant 1 always) => output 1 using call_rpc")
        .constant("constant 1", (11 << 16) | 0x8000)
        .build();
    let (rpc, calls) = RecordingRpcExecutor::new(7);

    let mut sim = Simulator::new(graph);
    sim.load_constants().unwrap();
    sim.set_rpc_executor(Some(Box::new(rpc)));
    sim.record_trace(&[]);
    sim.stimulus("input 1 = 1").unwrap();
    sim.stop_condition("run_time 1 second").unwrap();
    sim.run().unwrap();

    assert_eq!(
        *calls.borrow(),
        vec![RecordedRpc {
            address: 11,
            rpc_id: 0x8000
        }]
    );
    assert_eq!(sim.trace().unwrap().readings[0].value, 7);

    sim.set_rpc_executor(None);
    sim.step(stream("input 1"), 2).unwrap();
    assert_eq!(sim.trace().unwrap().len(), 1);
}

#[test]
fn test_oversize_restore_leaves_data_unchanged() {
    let mut graph = GraphBuilder::new().model(small_model(4, 4)).build();
    let buffered = stream("buffered 1");
    for value in 0..3 {
        graph
            .sensor_log_mut()
            .push(buffered, Reading::new(buffered, value as u32, value))
            .unwrap();
    }
    let before = graph.sensor_log().dump();

    let snapshot = StorageSnapshot {
        storage_data: (0..5).map(|i| Reading::new(buffered, i, i as i32)).collect(),
        streaming_data: Vec::new(),
    };
    let err = graph.sensor_log_mut().restore(&snapshot).unwrap_err();
    assert!(err.is_argument());
    assert_eq!(graph.sensor_log().dump(), before);
}

#[test]
fn test_storage_full_aborts_only_that_push() {
    let mut graph = GraphBuilder::new()
        .model(small_model(1, 8))
        .node("(input 1 always) => buffered 1 using copy_latest_a")
        .node("(input 1 always) => output 1 using copy_latest_a")
        .build();

    push(&mut graph, "input 1", 1);
    let input = stream("input 1");
    let err = graph
        .process_input(input, Reading::new(input, 0, 2), None)
        .unwrap_err();
    assert!(err.kind().is_storage_full());

    let dump = graph.sensor_log().dump();
    let stored: Vec<i32> = dump.storage_data.iter().map(|r| r.value).collect();
    assert_eq!(stored, vec![1]);

    // The sibling branch still ran in the failing pass
    let streamed: Vec<i32> = dump.streaming_data.iter().map(|r| r.value).collect();
    assert_eq!(streamed, vec![1, 2]);
}

#[test]
fn test_storage_full_keeps_downstream_of_other_branches() {
    let mut graph = GraphBuilder::new()
        .model(small_model(1, 8))
        .node("(input 1 always) => buffered 1 using copy_latest_a")
        .node("(input 1 always) => unbuffered 1 using copy_latest_a")
        .node("(unbuffered 1 always) => output 1 using copy_latest_a")
        .build();

    push(&mut graph, "input 1", 1);
    let input = stream("input 1");
    assert!(graph
        .process_input(input, Reading::new(input, 0, 2), None)
        .is_err());

    let streamed: Vec<i32> = graph
        .sensor_log()
        .dump()
        .streaming_data
        .iter()
        .map(|r| r.value)
        .collect();
    assert_eq!(streamed, vec![1, 2]);
}

#[test]
fn test_check_streamers_is_read_only() {
    let mut graph = GraphBuilder::new()
        .node("(input 1 always) => output 1 using copy_latest_a")
        .streamer(DataStreamer::new(
            "output 1".parse().unwrap(),
            sensorgraph_rs::graph::ReportFormat::HashedList,
            true,
        ))
        .build();

    assert!(graph.check_streamers().is_empty());
    push(&mut graph, "input 1", 5);
    assert_eq!(graph.check_streamers(), vec![0]);
    assert_eq!(graph.check_streamers(), vec![0]);

    let exported = graph.export_streamer(0).unwrap();
    assert_eq!(exported.len(), 1);
    assert!(graph.check_streamers().is_empty());
}

//! Test data builders for creating graphs

use sensorgraph_rs::{DataStreamer, DeviceModel, NodeDescriptor, SensorGraph};

/// Builder for small hand-written graphs
pub struct GraphBuilder {
    model: DeviceModel,
    nodes: Vec<&'static str>,
    constants: Vec<(&'static str, i32)>,
    streamers: Vec<DataStreamer>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            model: DeviceModel::default(),
            nodes: Vec::new(),
            constants: Vec::new(),
            streamers: Vec::new(),
        }
    }

    pub fn model(mut self, model: DeviceModel) -> Self {
        self.model = model;
        self
    }

    pub fn node(mut self, node: &'static str) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn constant(mut self, stream: &'static str, value: i32) -> Self {
        self.constants.push((stream, value));
        self
    }

    pub fn streamer(mut self, streamer: DataStreamer) -> Self {
        self.streamers.push(streamer);
        self
    }

    pub fn build(self) -> SensorGraph {
        let mut graph = SensorGraph::new(self.model);
        for node in self.nodes {
            let descriptor: NodeDescriptor = node.parse().expect("node should parse");
            graph.add_node(descriptor).expect("node should be added");
        }
        for (stream, value) in self.constants {
            graph
                .add_constant(stream.parse().expect("stream should parse"), value)
                .expect("constant should be added");
        }
        for streamer in self.streamers {
            graph.add_streamer(streamer).expect("streamer should be added");
        }
        graph
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Device model with small storage areas
pub fn small_model(storage: u64, streaming: u64) -> DeviceModel {
    DeviceModel {
        max_storage_buffer: storage,
        max_streaming_buffer: streaming,
        ..DeviceModel::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_builder() {
        let graph = GraphBuilder::new()
            .node("(input 1 always) => output 1 using copy_latest_a")
            .constant("constant 1", 5)
            .build();

        assert_eq!(graph.nodes().len(), 1);
        assert_eq!(graph.constants().len(), 1);
    }
}

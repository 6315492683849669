//! The compiled node list and its synchronous propagation engine.

use super::functions::{self, FunctionContext};
use super::known_constants::{
    CONFIG_FAST_TICK, CONFIG_USER_TICK_1, CONFIG_USER_TICK_2, SYSTEM_TICK_INTERVAL,
};
use super::node::{NodeDescriptor, ProcessingFunction, SensorGraphNode};
use super::rpc::RpcExecutor;
use super::slot::SlotIdentifier;
use super::streamer::{DataStreamer, StreamerState};
use crate::config::{ConfigValue, DeviceModel};
use crate::error::{Result, SensorGraphError};
use crate::id::NodeId;
use crate::storage::SensorLog;
use crate::stream::{DataStream, Reading, StreamType};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

/// Value of a `meta` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Integer(i64),
    String(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Integer(value) => write!(f, "{}", value),
            MetadataValue::String(text) => write!(f, "{:?}", text),
        }
    }
}

/// Named tick sources driving time-based logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    System,
    Fast,
    User1,
    User2,
}

impl std::str::FromStr for TickSource {
    type Err = SensorGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" | "normal" => Ok(TickSource::System),
            "fast" => Ok(TickSource::Fast),
            "user1" => Ok(TickSource::User1),
            "user2" => Ok(TickSource::User2),
            other => Err(SensorGraphError::Argument(format!("unknown tick '{}'", other))),
        }
    }
}

/// Graph content independent of runtime state
///
/// Used to rebuild a graph from scratch, for example after optimization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphParts {
    pub nodes: Vec<NodeDescriptor>,
    pub streamers: Vec<DataStreamer>,
    pub constants: BTreeMap<DataStream, i32>,
    pub config: BTreeMap<(SlotIdentifier, u16), ConfigValue>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// One entry produced by [`SensorGraph::iterate_bfs`]
#[derive(Debug)]
pub struct NodeVisit<'a> {
    pub id: NodeId,
    pub node: &'a SensorGraphNode,
    /// Nodes producing a stream this node consumes
    pub upstream: Vec<NodeId>,
    /// Nodes consuming this node's output
    pub downstream: Vec<NodeId>,
}

/// A sensor graph with its live sensor log
#[derive(Debug)]
pub struct SensorGraph {
    model: DeviceModel,
    sensor_log: SensorLog,
    nodes: Vec<SensorGraphNode>,
    streamers: Vec<DataStreamer>,
    streamer_states: Vec<StreamerState>,
    constants: BTreeMap<DataStream, i32>,
    config: BTreeMap<(SlotIdentifier, u16), ConfigValue>,
    metadata: BTreeMap<String, MetadataValue>,
}

impl SensorGraph {
    pub fn new(model: DeviceModel) -> Self {
        let sensor_log = SensorLog::new(&model);
        Self::with_sensor_log(model, sensor_log)
    }

    pub fn with_sensor_log(model: DeviceModel, sensor_log: SensorLog) -> Self {
        Self {
            model,
            sensor_log,
            nodes: Vec::new(),
            streamers: Vec::new(),
            streamer_states: Vec::new(),
            constants: BTreeMap::new(),
            config: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Build a fresh graph holding `parts`
    pub fn from_parts(model: DeviceModel, parts: GraphParts) -> Result<Self> {
        let mut graph = Self::new(model);
        for descriptor in parts.nodes {
            graph.add_node(descriptor)?;
        }
        for streamer in parts.streamers {
            graph.add_streamer(streamer)?;
        }
        graph.constants = parts.constants;
        graph.config = parts.config;
        graph.metadata = parts.metadata;
        Ok(graph)
    }

    pub fn to_parts(&self) -> GraphParts {
        GraphParts {
            nodes: self.nodes.iter().map(|n| n.descriptor.clone()).collect(),
            streamers: self.streamers.clone(),
            constants: self.constants.clone(),
            config: self.config.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn model(&self) -> &DeviceModel {
        &self.model
    }

    pub fn sensor_log(&self) -> &SensorLog {
        &self.sensor_log
    }

    pub fn sensor_log_mut(&mut self) -> &mut SensorLog {
        &mut self.sensor_log
    }

    pub fn nodes(&self) -> &[SensorGraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&SensorGraphNode> {
        self.nodes.get(id.index())
    }

    pub fn streamers(&self) -> &[DataStreamer] {
        &self.streamers
    }

    pub fn constants(&self) -> &BTreeMap<DataStream, i32> {
        &self.constants
    }

    pub fn config(&self) -> &BTreeMap<(SlotIdentifier, u16), ConfigValue> {
        &self.config
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetadataValue> {
        &self.metadata
    }

    /// Add a node, creating walkers for its inputs
    ///
    /// Fails with a data error if the node would close a cycle or exceed
    /// the node limit; the graph is unchanged on error.
    pub fn add_node(&mut self, descriptor: NodeDescriptor) -> Result<NodeId> {
        if self.nodes.len() as u64 >= self.model.max_nodes {
            return Err(SensorGraphError::Data(format!(
                "too many nodes, the device supports at most {}",
                self.model.max_nodes
            )));
        }

        if descriptor.output.stream_type == StreamType::Input {
            return Err(SensorGraphError::Data(format!(
                "node '{}' cannot produce readings in input stream {}",
                descriptor, descriptor.output
            )));
        }

        for input in descriptor.inputs() {
            if input.selector.is_wildcard() {
                return Err(SensorGraphError::Argument(format!(
                    "node '{}' has a wildcard input {}",
                    descriptor, input.selector
                )));
            }
        }

        let needs_b = matches!(
            descriptor.function,
            ProcessingFunction::CallRpc | ProcessingFunction::SubtractAFromB
        );
        if needs_b && descriptor.input_b.is_none() {
            return Err(SensorGraphError::Data(format!(
                "node '{}' needs a second input for {}",
                descriptor, descriptor.function
            )));
        }

        if self.would_create_cycle(&descriptor) {
            return Err(SensorGraphError::Data(format!(
                "node '{}' would create a cycle",
                descriptor
            )));
        }

        let walker_a = self.sensor_log.create_walker(&descriptor.input_a.selector)?;
        let walker_b = match &descriptor.input_b {
            Some(input) => Some(self.sensor_log.create_walker(&input.selector)?),
            None => None,
        };

        let id = NodeId(self.nodes.len() as u32);
        tracing::debug!("Added {} as {}", descriptor, id);
        self.nodes.push(SensorGraphNode {
            descriptor,
            walker_a,
            walker_b,
        });
        Ok(id)
    }

    /// Whether adding `descriptor` closes a path from its output back to one of its inputs
    fn would_create_cycle(&self, descriptor: &NodeDescriptor) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![descriptor.output];

        while let Some(stream) = stack.pop() {
            if descriptor.consumes(&stream) {
                return true;
            }
            if !visited.insert(stream) {
                continue;
            }
            for node in &self.nodes {
                if node.descriptor.consumes(&stream) && !visited.contains(&node.output()) {
                    stack.push(node.output());
                }
            }
        }
        false
    }

    /// Nodes consuming `stream`, in creation order
    pub fn consumers_of(&self, stream: &DataStream) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.descriptor.consumes(stream))
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    /// Nodes producing `stream`, in creation order
    pub fn producers_of(&self, stream: &DataStream) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.output() == *stream)
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    /// Visit every node once, producers before consumers
    ///
    /// Nodes without an in-graph producer come first; within each layer
    /// nodes keep their creation order.
    pub fn iterate_bfs(&self) -> Vec<NodeVisit<'_>> {
        let upstream: Vec<Vec<NodeId>> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                self.nodes
                    .iter()
                    .enumerate()
                    .filter(|(j, producer)| *j != i && node.descriptor.consumes(&producer.output()))
                    .map(|(j, _)| NodeId(j as u32))
                    .collect()
            })
            .collect();

        let downstream: Vec<Vec<NodeId>> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                self.consumers_of(&node.output())
                    .into_iter()
                    .filter(|id| id.index() != i)
                    .collect()
            })
            .collect();

        let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
        let mut frontier: Vec<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut visits = Vec::with_capacity(self.nodes.len());

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for &i in &frontier {
                for consumer in &downstream[i] {
                    let c = consumer.index();
                    in_degree[c] -= 1;
                    if in_degree[c] == 0 {
                        next.push(c);
                    }
                }
                visits.push(NodeVisit {
                    id: NodeId(i as u32),
                    node: &self.nodes[i],
                    upstream: upstream[i].clone(),
                    downstream: downstream[i].clone(),
                });
            }
            next.sort_unstable();
            frontier = next;
        }

        visits
    }

    /// Push an external reading and propagate it until no node fires
    ///
    /// Every reading produced during the pass carries the `raw_time` of
    /// `reading`. Without an RPC executor `call_rpc` nodes produce nothing.
    /// A node that fails only stops its own downstream propagation; the
    /// pass keeps draining and the first error is returned at the end.
    pub fn process_input(
        &mut self,
        stream: DataStream,
        reading: Reading,
        rpc: Option<&mut dyn RpcExecutor>,
    ) -> Result<()> {
        let raw_time = reading.raw_time;
        self.sensor_log.push(stream, reading)?;

        let mut ctx = FunctionContext {
            rpc,
            triggered_streamers: Vec::new(),
        };
        let mut queue: VecDeque<NodeId> = self.consumers_of(&stream).into();
        let mut first_error = None;

        while let Some(id) = queue.pop_front() {
            match self.fire_node(id, raw_time, &mut ctx) {
                Ok(Some(output)) => queue.extend(self.consumers_of(&output)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("{} failed during propagation: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run one node if its trigger holds, returning the stream it wrote to
    fn fire_node(
        &mut self,
        id: NodeId,
        raw_time: u32,
        ctx: &mut FunctionContext<'_>,
    ) -> Result<Option<DataStream>> {
        let node = &self.nodes[id.index()];
        if !node.triggered(&self.sensor_log)? {
            return Ok(None);
        }

        let values = functions::execute(node, &mut self.sensor_log, ctx)?;
        for walker in node.walkers() {
            self.sensor_log.skip_all(walker)?;
        }

        for index in std::mem::take(&mut ctx.triggered_streamers) {
            self.mark_streamer(index)?;
        }

        if values.is_empty() {
            return Ok(None);
        }

        let output = self.nodes[id.index()].output();
        tracing::trace!("{} fired, {} reading(s) into {}", id, values.len(), output);
        for value in values {
            self.sensor_log
                .push(output, Reading::new(output, raw_time, value))?;
        }
        Ok(Some(output))
    }

    pub fn add_constant(&mut self, stream: DataStream, value: i32) -> Result<()> {
        if stream.stream_type != StreamType::Constant {
            return Err(SensorGraphError::Data(format!(
                "cannot initialise non-constant stream {}",
                stream
            )));
        }
        self.constants.insert(stream, value);
        Ok(())
    }

    /// Push every declared constant into the sensor log
    pub fn load_constants(&mut self) -> Result<()> {
        for (stream, value) in &self.constants {
            self.sensor_log
                .push(*stream, Reading::new(*stream, 0, *value))?;
        }
        tracing::debug!("Loaded {} constants", self.constants.len());
        Ok(())
    }

    /// Set a config variable, returning the previous value
    pub fn add_config(
        &mut self,
        slot: SlotIdentifier,
        config_id: u16,
        value: ConfigValue,
    ) -> Option<ConfigValue> {
        self.config.insert((slot, config_id), value)
    }

    pub fn get_config(&self, slot: SlotIdentifier, config_id: u16) -> Option<&ConfigValue> {
        self.config.get(&(slot, config_id))
    }

    pub fn add_metadata(&mut self, name: impl Into<String>, value: MetadataValue) -> Result<()> {
        let name = name.into();
        if self.metadata.contains_key(&name) {
            return Err(SensorGraphError::Data(format!(
                "metadata '{}' declared more than once",
                name
            )));
        }
        self.metadata.insert(name, value);
        Ok(())
    }

    /// Interval of a tick in seconds; 0 means disabled
    pub fn get_tick(&self, name: &str) -> Result<u32> {
        let (config_id, enabled) = match name.parse::<TickSource>()? {
            TickSource::System => return Ok(SYSTEM_TICK_INTERVAL),
            TickSource::Fast => (CONFIG_FAST_TICK, self.model.fast_tick_enabled),
            TickSource::User1 => (CONFIG_USER_TICK_1, self.model.user_ticks_enabled),
            TickSource::User2 => (CONFIG_USER_TICK_2, self.model.user_ticks_enabled),
        };

        if !enabled {
            return Ok(0);
        }

        let interval = self
            .get_config(SlotIdentifier::Controller, config_id)
            .and_then(ConfigValue::as_integer)
            .unwrap_or(0);
        u32::try_from(interval).map_err(|_| {
            SensorGraphError::Data(format!("invalid {} tick interval {}", name, interval))
        })
    }

    /// Register a streamer, returning its index
    pub fn add_streamer(&mut self, streamer: DataStreamer) -> Result<usize> {
        if self.streamers.len() as u64 >= self.model.max_streamers {
            return Err(SensorGraphError::Data(format!(
                "too many streamers, the device supports at most {}",
                self.model.max_streamers
            )));
        }

        let walker = if streamer.selector.is_persisted() {
            None
        } else if streamer.selector.is_wildcard() {
            return Err(SensorGraphError::Data(format!(
                "streamer '{}' selects a wildcard of non-persisted streams",
                streamer
            )));
        } else {
            Some(self.sensor_log.create_walker(&streamer.selector)?)
        };

        let index = self.streamers.len();
        tracing::debug!("Added streamer {}: {}", index, streamer);
        self.streamers.push(streamer);
        self.streamer_states.push(StreamerState {
            walker,
            ..StreamerState::default()
        });
        Ok(index)
    }

    /// Indices of streamers whose trigger policy is satisfied
    ///
    /// Does not modify any state.
    pub fn check_streamers(&self) -> Vec<usize> {
        (0..self.streamers.len())
            .filter(|&index| self.streamer_ready(index, 0))
            .collect()
    }

    fn streamer_ready(&self, index: usize, depth: usize) -> bool {
        let (streamer, state) = match (self.streamers.get(index), self.streamer_states.get(index)) {
            (Some(streamer), Some(state)) => (streamer, state),
            _ => return false,
        };

        if let Some(other) = streamer.with_other {
            if depth < self.streamers.len() && self.streamer_ready(other, depth + 1) {
                return true;
            }
        }

        if streamer.automatic {
            self.streamer_has_data(index)
        } else {
            state.marked
        }
    }

    fn streamer_has_data(&self, index: usize) -> bool {
        let state = &self.streamer_states[index];
        match state.walker {
            Some(walker) => self.sensor_log.count(walker).unwrap_or(0) > 0,
            None => {
                self.sensor_log
                    .count_matching(&self.streamers[index].selector, state.next_reading_id)
                    > 0
            }
        }
    }

    /// Request that a streamer fires
    pub fn mark_streamer(&mut self, index: usize) -> Result<()> {
        let state = self.streamer_states.get_mut(index).ok_or_else(|| {
            SensorGraphError::Argument(format!("no streamer with index {}", index))
        })?;
        state.marked = true;
        Ok(())
    }

    /// Readings a streamer has not exported yet; advances its position
    pub fn export_streamer(&mut self, index: usize) -> Result<Vec<Reading>> {
        let streamer = self.streamers.get(index).ok_or_else(|| {
            SensorGraphError::Argument(format!("no streamer with index {}", index))
        })?;
        let selector = streamer.selector;
        let state = self.streamer_states[index];

        let readings = match state.walker {
            Some(walker) => {
                if self.sensor_log.count(walker)? == 0 {
                    Vec::new()
                } else {
                    let latest = self.sensor_log.peek(walker)?;
                    self.sensor_log.skip_all(walker)?;
                    vec![latest]
                }
            }
            None => self
                .sensor_log
                .matching_readings(&selector, state.next_reading_id),
        };

        let state = &mut self.streamer_states[index];
        state.marked = false;
        if let Some(last_id) = readings.iter().filter_map(|r| r.reading_id).max() {
            state.next_reading_id = last_id + 1;
        }
        tracing::debug!("Streamer {} exported {} readings", index, readings.len());
        Ok(readings)
    }
}

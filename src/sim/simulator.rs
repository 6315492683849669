//! Clock-driven test harness for a sensor graph.

use super::stimulus::SimulationStimulus;
use super::stop::{parse_stop_condition, StopCondition};
use super::trace::SimulationTrace;
use crate::error::{Result, SensorGraphError};
use crate::graph::known_constants::{
    BATTERY_VOLTAGE, FAST_TICK, SIMULATED_BATTERY_VOLTAGE, SYSTEM_TICK, SYSTEM_TICK_INTERVAL,
    USER_TICK_1, USER_TICK_2,
};
use crate::graph::{NullRpcExecutor, RpcExecutor, SensorGraph};
use crate::stream::{DataStream, DataStreamSelector, Reading, SelectorSpec, StreamType};

/// Drives a graph one simulated second at a time
///
/// Each tick injects the stimuli scheduled for it, then the fast and user
/// ticks that are due, then the system tick and battery voltage every
/// ten seconds. Ticks are counted across calls to [`run`](Self::run).
pub struct Simulator {
    graph: SensorGraph,
    rpc: Option<Box<dyn RpcExecutor>>,
    stop_conditions: Vec<Box<dyn StopCondition>>,
    /// Pending stimuli ordered by time, ties in insertion order
    stimuli: Vec<SimulationStimulus>,
    trace: Option<SimulationTrace>,
    tick_count: u64,
    battery_voltage: i32,
}

impl Simulator {
    /// Simulate `graph`; RPCs are accepted and answer 0 until an executor is set
    pub fn new(graph: SensorGraph) -> Self {
        Self {
            graph,
            rpc: Some(Box::new(NullRpcExecutor)),
            stop_conditions: Vec::new(),
            stimuli: Vec::new(),
            trace: None,
            tick_count: 0,
            battery_voltage: SIMULATED_BATTERY_VOLTAGE,
        }
    }

    /// Replace the RPC executor; `None` makes `call_rpc` nodes produce nothing
    pub fn set_rpc_executor(&mut self, rpc: Option<Box<dyn RpcExecutor>>) {
        self.rpc = rpc;
    }

    /// Battery voltage in 16.16 fixed point volts
    pub fn set_battery_voltage(&mut self, value: i32) {
        self.battery_voltage = value;
    }

    pub fn graph(&self) -> &SensorGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SensorGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> SensorGraph {
        self.graph
    }

    /// Seconds simulated so far
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Add a stop condition from text such as `run_time 1 day`
    pub fn stop_condition(&mut self, text: &str) -> Result<()> {
        self.stop_conditions.push(parse_stop_condition(text)?);
        Ok(())
    }

    pub fn add_stop_condition(&mut self, condition: Box<dyn StopCondition>) {
        self.stop_conditions.push(condition);
    }

    /// Schedule a stimulus from text such as `10 minutes: input 1 = 5`
    pub fn stimulus(&mut self, text: &str) -> Result<()> {
        self.add_stimulus(text.parse()?);
        Ok(())
    }

    pub fn add_stimulus(&mut self, stimulus: SimulationStimulus) {
        let index = self.stimuli.partition_point(|s| s.time <= stimulus.time);
        self.stimuli.insert(index, stimulus);
    }

    /// Push every declared constant into the sensor log
    pub fn load_constants(&mut self) -> Result<()> {
        self.graph.load_constants()
    }

    /// Start recording readings pushed into streams matching `selectors`
    ///
    /// With no selectors, records every stream a streamer selects plus
    /// every output stream.
    pub fn record_trace(&mut self, selectors: &[DataStreamSelector]) {
        let selectors = if selectors.is_empty() {
            self.default_trace_selectors()
        } else {
            selectors.to_vec()
        };

        for selector in &selectors {
            self.graph.sensor_log_mut().watch(*selector);
        }
        let mut trace = SimulationTrace::new(selectors);
        trace.metadata.device_model = Some(self.graph.model().name.clone());
        self.trace = Some(trace);
    }

    fn default_trace_selectors(&self) -> Vec<DataStreamSelector> {
        let mut selectors = Vec::new();
        let outputs = DataStreamSelector::all(StreamType::Output, SelectorSpec::Combined);
        for selector in self
            .graph
            .streamers()
            .iter()
            .map(|s| s.selector)
            .chain(std::iter::once(outputs))
        {
            if !selectors.contains(&selector) {
                selectors.push(selector);
            }
        }
        selectors
    }

    pub fn trace(&self) -> Option<&SimulationTrace> {
        self.trace.as_ref()
    }

    pub fn take_trace(&mut self) -> Option<SimulationTrace> {
        self.trace.take()
    }

    /// Inject one reading and run one propagation pass without advancing time
    pub fn step(&mut self, stream: DataStream, value: i32) -> Result<()> {
        self.inject(stream, value)
    }

    /// Simulate until a stop condition holds
    ///
    /// Stop conditions measure relative time from the start of this call;
    /// the tick count continues from previous runs.
    pub fn run(&mut self) -> Result<()> {
        if self.stop_conditions.is_empty() {
            return Err(SensorGraphError::Argument(
                "simulation has no stop condition".to_string(),
            ));
        }

        let start = self.tick_count;
        tracing::info!(
            "Simulating from tick {} until {}",
            start,
            self.stop_conditions
                .iter()
                .map(|c| c.describe())
                .collect::<Vec<_>>()
                .join(" or ")
        );

        if self.should_stop(start) {
            return Ok(());
        }
        self.inject_due_stimuli()?;

        while !self.should_stop(start) {
            let fast = self.graph.get_tick("fast")?;
            let user1 = self.graph.get_tick("user1")?;
            let user2 = self.graph.get_tick("user2")?;

            self.tick_count += 1;
            self.inject_due_stimuli()?;

            let now = self.tick_count;
            let value = tick_value(now);
            for (interval, stream) in [(fast, FAST_TICK), (user1, USER_TICK_1), (user2, USER_TICK_2)] {
                if interval != 0 && now % u64::from(interval) == 0 {
                    self.inject(stream, value)?;
                }
            }

            if now % u64::from(SYSTEM_TICK_INTERVAL) == 0 {
                self.inject(SYSTEM_TICK, value)?;
                self.inject(BATTERY_VOLTAGE, self.battery_voltage)?;
            }
        }

        if let Some(trace) = self.trace.as_mut() {
            trace.metadata.duration = self.tick_count;
        }
        tracing::info!("Simulation stopped at tick {}", self.tick_count);
        Ok(())
    }

    fn should_stop(&self, start: u64) -> bool {
        let relative = self.tick_count - start;
        self.stop_conditions
            .iter()
            .any(|c| c.should_stop(self.tick_count, relative, &self.graph))
    }

    fn inject_due_stimuli(&mut self) -> Result<()> {
        let due = self
            .stimuli
            .partition_point(|s| u64::from(s.time) <= self.tick_count);
        let stimuli: Vec<SimulationStimulus> = self.stimuli.drain(..due).collect();
        for stimulus in stimuli {
            tracing::debug!("Tick {}: {}", self.tick_count, stimulus);
            self.inject(stimulus.stream, stimulus.value)?;
        }
        Ok(())
    }

    fn inject(&mut self, stream: DataStream, value: i32) -> Result<()> {
        let reading = Reading::new(stream, raw_time(self.tick_count), value);
        let rpc: Option<&mut dyn RpcExecutor> = match self.rpc.as_mut() {
            Some(rpc) => Some(rpc.as_mut()),
            None => None,
        };
        let result = self.graph.process_input(stream, reading, rpc);

        let watched = self.graph.sensor_log_mut().take_watched();
        if let Some(trace) = self.trace.as_mut() {
            trace.extend(watched);
        }
        result
    }
}

fn raw_time(tick: u64) -> u32 {
    u32::try_from(tick).unwrap_or(u32::MAX)
}

fn tick_value(tick: u64) -> i32 {
    i32::try_from(tick).unwrap_or(i32::MAX)
}

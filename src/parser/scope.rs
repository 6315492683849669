//! Compile-time scopes deciding which clock and trigger statements use.

use super::allocator::StreamAllocator;
use super::ast::{ClockBasis, Interval};
use crate::error::{Result, SensorGraphError};
use crate::graph::known_constants::{
    FAST_TICK, SYSTEM_TICK, SYSTEM_TICK_INTERVAL, USER_CONNECT, USER_DISCONNECT, USER_TICK_1,
    USER_TICK_2,
};
use crate::graph::{
    Combiner, Comparison, GraphParts, InputTrigger, NodeDescriptor, NodeInput, ProcessingFunction,
    SlotIdentifier, TriggerSource,
};
use crate::stream::{DataStream, StreamType};
use std::collections::HashMap;

/// Everything statements emit into while compiling
#[derive(Debug)]
pub(crate) struct Emitter {
    pub parts: GraphParts,
    pub allocator: StreamAllocator,
    /// Some clock needs a 1 second fast tick
    pub needs_fast_tick: bool,
}

impl Emitter {
    pub fn new(max_node_outputs: u64) -> Self {
        Self {
            parts: GraphParts::default(),
            allocator: StreamAllocator::new(max_node_outputs),
            needs_fast_tick: false,
        }
    }

    pub fn add_node(&mut self, descriptor: NodeDescriptor) {
        tracing::trace!("Emitting {}", descriptor);
        self.parts.nodes.push(descriptor);
    }

    pub fn add_constant(&mut self, stream: DataStream, value: i32) {
        self.parts.constants.insert(stream, value);
    }

    pub fn allocate(&mut self, stream_type: StreamType, attach: bool) -> Result<DataStream> {
        self.allocator.allocate(stream_type, attach)
    }

    pub fn attach(&mut self, stream: DataStream) -> Result<DataStream> {
        self.allocator.attach(stream, &mut self.parts)
    }

    /// `(input trigger) => output using copy_latest_a`
    pub fn copy_latest(&mut self, input: DataStream, trigger: InputTrigger, output: DataStream) {
        self.add_node(NodeDescriptor::single(
            NodeInput::new(input, trigger),
            output,
            ProcessingFunction::CopyLatestA,
        ));
    }
}

/// Tick source a clock interval is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum ClockKind {
    System,
    Fast,
    User1,
    User2,
}

impl ClockKind {
    fn classify(interval: Interval) -> Self {
        match interval.basis {
            ClockBasis::Seconds if interval.count % SYSTEM_TICK_INTERVAL == 0 => ClockKind::System,
            ClockBasis::Seconds => ClockKind::Fast,
            ClockBasis::UserTick1 => ClockKind::User1,
            ClockBasis::UserTick2 => ClockKind::User2,
        }
    }

    fn tick_stream(self) -> DataStream {
        match self {
            ClockKind::System => SYSTEM_TICK,
            ClockKind::Fast => FAST_TICK,
            ClockKind::User1 => USER_TICK_1,
            ClockKind::User2 => USER_TICK_2,
        }
    }

    /// Ticks of this source per interval
    fn ticks(self, interval: Interval) -> u32 {
        match self {
            ClockKind::System => interval.count / SYSTEM_TICK_INTERVAL,
            _ => interval.count,
        }
    }
}

fn count_at_least(reference: u32) -> InputTrigger {
    InputTrigger::when(TriggerSource::Count, Comparison::GreaterEqual, reference)
}

/// Trigger used by streams fed once per clock period
pub(crate) fn count_is_one() -> InputTrigger {
    InputTrigger::when(TriggerSource::Count, Comparison::Equal, 1)
}

#[derive(Debug)]
pub(crate) enum Scope {
    /// Top level: clocks are counter copies of the tick inputs
    Root { clocks: HashMap<ClockKind, DataStream> },
    /// `every` and latch blocks: a stream pushed once per `interval`
    Clock {
        stream: DataStream,
        trigger: InputTrigger,
        interval: Interval,
    },
    /// `on` blocks
    Trigger {
        stream: DataStream,
        trigger: InputTrigger,
    },
    /// `when connected to`: clocks that only run while a user is connected
    GatedClock {
        slot: SlotIdentifier,
        latch: DataStream,
        clocks: HashMap<ClockKind, (DataStream, u32)>,
    },
    Config { slot: SlotIdentifier },
}

impl Scope {
    fn name(&self) -> &'static str {
        match self {
            Scope::Root { .. } => "top level",
            Scope::Clock { .. } => "clock block",
            Scope::Trigger { .. } => "on block",
            Scope::GatedClock { .. } => "when connected block",
            Scope::Config { .. } => "config block",
        }
    }
}

#[derive(Debug)]
pub(crate) struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::Root {
                clocks: HashMap::new(),
            }],
        }
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn top(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    /// Slot of the innermost scope if it is a config block
    pub fn config_slot(&self) -> Option<SlotIdentifier> {
        match self.top() {
            Scope::Config { slot } => Some(*slot),
            _ => None,
        }
    }

    /// A stream and trigger firing once per `interval`
    pub fn clock(&mut self, emitter: &mut Emitter, interval: Interval) -> Result<(DataStream, InputTrigger)> {
        self.clock_at(self.scopes.len() - 1, emitter, interval)
    }

    fn clock_at(
        &mut self,
        index: usize,
        emitter: &mut Emitter,
        interval: Interval,
    ) -> Result<(DataStream, InputTrigger)> {
        let derived = match &self.scopes[index] {
            Scope::Root { .. } => return self.root_clock(index, emitter, interval),
            Scope::GatedClock { .. } => return self.gated_clock(index, emitter, interval),
            Scope::Clock {
                stream,
                interval: own,
                ..
            } if own.basis == interval.basis && interval.count % own.count == 0 => {
                Some((*stream, interval.count / own.count))
            }
            _ => None,
        };

        match derived {
            Some((stream, ticks)) => Ok((emitter.attach(stream)?, count_at_least(ticks))),
            None => self.clock_at(index - 1, emitter, interval),
        }
    }

    fn root_clock(
        &mut self,
        index: usize,
        emitter: &mut Emitter,
        interval: Interval,
    ) -> Result<(DataStream, InputTrigger)> {
        let kind = ClockKind::classify(interval);
        let Scope::Root { clocks } = &mut self.scopes[index] else {
            return Err(SensorGraphError::Internal("root scope expected".to_string()));
        };

        let counter = match clocks.get(&kind) {
            Some(counter) => *counter,
            None => {
                let counter = emitter.allocate(StreamType::Counter, false)?;
                emitter.copy_latest(kind.tick_stream(), InputTrigger::Always, counter);
                clocks.insert(kind, counter);
                counter
            }
        };

        if kind == ClockKind::Fast {
            emitter.needs_fast_tick = true;
        }
        Ok((emitter.attach(counter)?, count_at_least(kind.ticks(interval))))
    }

    fn gated_clock(
        &mut self,
        index: usize,
        emitter: &mut Emitter,
        interval: Interval,
    ) -> Result<(DataStream, InputTrigger)> {
        let kind = ClockKind::classify(interval);
        let (slot, latch, cached) = match &self.scopes[index] {
            Scope::GatedClock {
                slot,
                latch,
                clocks,
            } => (*slot, *latch, clocks.get(&kind).copied()),
            _ => return Err(SensorGraphError::Internal("gated clock scope expected".to_string())),
        };

        if let Some((counter, ratio)) = cached {
            return Ok((emitter.attach(counter)?, count_at_least(interval.count / ratio)));
        }

        let (parent_stream, parent_trigger) = self.clock_at(index - 1, emitter, interval)?;
        let reference = match parent_trigger {
            InputTrigger::Compare {
                source: TriggerSource::Count,
                reference,
                ..
            } if reference > 0 => reference,
            other => {
                return Err(SensorGraphError::Data(format!(
                    "cannot gate clock with trigger '{}', a count trigger is needed",
                    other
                )))
            }
        };
        if interval.count % reference != 0 {
            return Err(SensorGraphError::Data(format!(
                "interval {} is not a multiple of its parent clock",
                interval
            )));
        }
        let ratio = interval.count / reference;

        let counter = emitter.allocate(StreamType::Counter, false)?;
        let latch_input = emitter.attach(latch)?;
        emitter.add_node(NodeDescriptor::dual(
            NodeInput::always(parent_stream),
            Combiner::And,
            NodeInput::new(latch_input, connected_to(slot)),
            counter,
            ProcessingFunction::CopyLatestA,
        ));

        if let Scope::GatedClock { clocks, .. } = &mut self.scopes[index] {
            clocks.insert(kind, (counter, ratio));
        }
        Ok((emitter.attach(counter)?, count_at_least(interval.count / ratio)))
    }

    /// The stream and trigger of the innermost triggering scope
    pub fn trigger_chain(&self, emitter: &mut Emitter) -> Result<(DataStream, InputTrigger)> {
        match self.top() {
            Scope::Clock {
                stream, trigger, ..
            }
            | Scope::Trigger { stream, trigger } => Ok((emitter.attach(*stream)?, *trigger)),
            other => Err(SensorGraphError::Data(format!(
                "statement needs a trigger but is in a {}, use an every, on or when block",
                other.name()
            ))),
        }
    }

    /// Resolve a named event such as `connect`
    pub fn resolve_identifier(&self, name: &str) -> Result<(DataStream, InputTrigger)> {
        for scope in self.scopes.iter().rev() {
            if let Scope::GatedClock { slot, .. } = scope {
                match name {
                    "connect" => return Ok((USER_CONNECT, connected_to(*slot))),
                    "disconnect" => return Ok((USER_DISCONNECT, connected_to(*slot))),
                    _ => {}
                }
            }
        }
        Err(SensorGraphError::Data(format!("unknown identifier '{}'", name)))
    }

    /// Set up the latch tracking whether a user is connected through `slot`
    pub fn gated_clock_scope(emitter: &mut Emitter, slot: SlotIdentifier) -> Result<Scope> {
        let latch = emitter.allocate(StreamType::Constant, false)?;
        emitter.add_constant(latch, 0);
        emitter.copy_latest(USER_CONNECT, connected_to(slot), latch);

        let zero = emitter.allocate(StreamType::Constant, true)?;
        emitter.add_constant(zero, 0);
        emitter.add_node(NodeDescriptor::dual(
            NodeInput::always(zero),
            Combiner::And,
            NodeInput::new(USER_DISCONNECT, connected_to(slot)),
            latch,
            ProcessingFunction::CopyLatestA,
        ));

        Ok(Scope::GatedClock {
            slot,
            latch,
            clocks: HashMap::new(),
        })
    }
}

/// Value trigger matching readings that name `slot`'s address
fn connected_to(slot: SlotIdentifier) -> InputTrigger {
    InputTrigger::when(TriggerSource::Value, Comparison::Equal, u32::from(slot.address()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds(count: u32) -> Interval {
        Interval {
            count,
            basis: ClockBasis::Seconds,
        }
    }

    #[test]
    fn test_root_clocks_are_shared_counters() {
        let mut emitter = Emitter::new(8);
        let mut scopes = ScopeStack::new();

        let (a, trigger_a) = scopes.clock(&mut emitter, seconds(600)).unwrap();
        let (b, trigger_b) = scopes.clock(&mut emitter, seconds(60)).unwrap();
        assert_eq!(a, b);
        assert_eq!(trigger_a.to_string(), "when count >= 60");
        assert_eq!(trigger_b.to_string(), "when count >= 6");
        assert_eq!(emitter.parts.nodes.len(), 1);
        assert_eq!(
            emitter.parts.nodes[0].to_string(),
            format!("(system input 2 always) => {} using copy_latest_a", a)
        );
        assert!(!emitter.needs_fast_tick);

        let (fast, trigger) = scopes.clock(&mut emitter, seconds(5)).unwrap();
        assert_ne!(fast, a);
        assert_eq!(trigger.to_string(), "when count >= 5");
        assert!(emitter.needs_fast_tick);
    }

    #[test]
    fn test_clock_scope_derives_multiples() {
        let mut emitter = Emitter::new(8);
        let mut scopes = ScopeStack::new();
        let stream = emitter.allocate(StreamType::Counter, false).unwrap();
        scopes.push(Scope::Clock {
            stream,
            trigger: count_is_one(),
            interval: seconds(60),
        });

        let (derived, trigger) = scopes.clock(&mut emitter, seconds(600)).unwrap();
        assert_eq!(derived, stream);
        assert_eq!(trigger.to_string(), "when count >= 10");

        let (root, _) = scopes.clock(&mut emitter, seconds(90)).unwrap();
        assert_ne!(root, stream);
    }

    #[test]
    fn test_gated_clock_follows_latch() {
        let mut emitter = Emitter::new(8);
        let mut scopes = ScopeStack::new();
        let gated = ScopeStack::gated_clock_scope(&mut emitter, SlotIdentifier::Controller).unwrap();
        scopes.push(gated);

        let (stream, trigger) = scopes.clock(&mut emitter, seconds(60)).unwrap();
        assert_eq!(trigger.to_string(), "when count >= 6");
        let gate = emitter
            .parts
            .nodes
            .iter()
            .find(|n| n.output == stream)
            .unwrap();
        assert_eq!(gate.combiner, Combiner::And);
        assert_eq!(gate.input_b.unwrap().trigger.to_string(), "when value == 8");

        let (again, trigger) = scopes.clock(&mut emitter, seconds(120)).unwrap();
        assert_eq!(again, stream);
        assert_eq!(trigger.to_string(), "when count >= 12");

        let (connect, trigger) = scopes.resolve_identifier("connect").unwrap();
        assert_eq!(connect, USER_CONNECT);
        assert_eq!(trigger.to_string(), "when value == 8");
    }

    #[test]
    fn test_trigger_chain_needs_trigger_scope() {
        let mut emitter = Emitter::new(8);
        let mut scopes = ScopeStack::new();
        assert!(scopes.trigger_chain(&mut emitter).unwrap_err().is_data());
        assert!(scopes.resolve_identifier("connect").unwrap_err().is_data());

        let stream: DataStream = "input 1".parse().unwrap();
        scopes.push(Scope::Trigger {
            stream,
            trigger: InputTrigger::Always,
        });
        assert_eq!(
            scopes.trigger_chain(&mut emitter).unwrap(),
            (stream, InputTrigger::Always)
        );
    }
}

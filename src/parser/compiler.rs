//! Walks parsed statements and emits the nodes, streamers and config of a graph.

use super::ast::{
    BlockCombiner, BlockHeader, ClockBasis, CopyMode, CopySource, Interval, Literal, Reference, Security,
    Statement, StatementKind, StreamTrigger, StreamerStatement, TriggerClause,
};
use super::scope::{count_is_one, Emitter, Scope, ScopeStack};
use crate::config::{ConfigType, ConfigValue, DeviceModel};
use crate::error::{Result, SensorGraphError};
use crate::graph::known_constants::CONFIG_FAST_TICK;
use crate::graph::{
    Combiner, DataStreamer, GraphParts, InputTrigger, MetadataValue, NodeDescriptor, NodeInput,
    ProcessingFunction, ReportFormat, SensorGraph, SlotIdentifier,
};
use crate::stream::{DataStream, StreamType};
use std::collections::VecDeque;

/// Compile statements into a fresh graph for `model`
pub fn compile(statements: &[Statement], model: &DeviceModel) -> Result<SensorGraph> {
    let parts = compile_parts(statements, model)?;
    SensorGraph::from_parts(model.clone(), parts)
}

/// Compile statements into graph parts without building live state
pub fn compile_parts(statements: &[Statement], model: &DeviceModel) -> Result<GraphParts> {
    let mut compiler = Compiler {
        model,
        emitter: Emitter::new(model.max_node_outputs),
        scopes: ScopeStack::new(),
        triggered_streamers: Vec::new(),
    };

    for statement in statements {
        compiler.statement(statement)?;
    }
    compiler.finish()
}

struct Compiler<'a> {
    model: &'a DeviceModel,
    emitter: Emitter,
    scopes: ScopeStack,
    /// `trigger streamer` targets with their source lines, checked at the end
    triggered_streamers: Vec<(usize, usize)>,
}

fn to_i32(value: i64, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| SensorGraphError::Data(format!("{} {} does not fit in 32 bits", what, value)))
}

impl Compiler<'_> {
    fn statement(&mut self, statement: &Statement) -> Result<()> {
        let in_config = self.scopes.config_slot().is_some();
        if in_config && !matches!(statement.kind, StatementKind::Set { .. }) {
            return Err(SensorGraphError::Data(format!(
                "line {}: only set statements are allowed in a config block, found '{}'",
                statement.line, statement
            )));
        }

        self.execute(statement).map_err(|e| match e {
            SensorGraphError::Syntax { .. } => e,
            e => e.with_context(format!("line {}: '{}'", statement.line, statement)),
        })
    }

    fn execute(&mut self, statement: &Statement) -> Result<()> {
        match &statement.kind {
            StatementKind::Meta { name, value } => self.meta(name, value),
            StatementKind::Require { name, op, value } => {
                let actual = self.model.get(name).ok_or_else(|| {
                    SensorGraphError::Data(format!("unknown device property '{}'", name))
                })?;
                if !op.compare(actual as i64, *value) {
                    return Err(SensorGraphError::Data(format!(
                        "device model '{}' has {} = {}, required {} {}",
                        self.model.name, name, actual, op, value
                    )));
                }
                Ok(())
            }
            StatementKind::Set {
                target,
                value,
                declared_type,
            } => self.set(target, value, *declared_type),
            StatementKind::Call { rpc, slot, output } => self.call(rpc, *slot, *output),
            StatementKind::Streamer(streamer) => self.streamer(streamer),
            StatementKind::Copy {
                mode,
                source,
                output,
            } => self.copy(*mode, source.as_ref(), *output),
            StatementKind::Subtract {
                input,
                output,
                default,
            } => self.subtract(*input, *output, *default),
            StatementKind::TriggerStreamer(index) => {
                let (trigger_stream, trigger) = self.scopes.trigger_chain(&mut self.emitter)?;
                let value = to_i32(*index as i64, "streamer index")?;
                let index_stream = self.emitter.allocate(StreamType::Constant, true)?;
                self.emitter.add_constant(index_stream, value);
                let output = self.emitter.allocate(StreamType::Unbuffered, false)?;
                self.emitter.add_node(NodeDescriptor::dual(
                    NodeInput::always(index_stream),
                    Combiner::And,
                    NodeInput::new(trigger_stream, trigger),
                    output,
                    ProcessingFunction::TriggerStreamer,
                ));
                self.triggered_streamers.push((statement.line, *index));
                Ok(())
            }
            StatementKind::Node(descriptor) => {
                self.emitter.add_node(descriptor.clone());
                Ok(())
            }
            StatementKind::Block { header, body } => {
                let scope = self.open_block(header)?;
                self.scopes.push(scope);
                for child in body {
                    self.statement(child)?;
                }
                self.scopes.pop();
                Ok(())
            }
        }
    }

    fn meta(&mut self, name: &str, value: &Literal) -> Result<()> {
        let value = match value {
            Literal::Number(value) => MetadataValue::Integer(*value),
            Literal::String(text) => MetadataValue::String(text.clone()),
            Literal::Binary(_) => {
                return Err(SensorGraphError::Data(format!(
                    "metadata '{}' cannot be binary",
                    name
                )))
            }
        };
        if self.emitter.parts.metadata.contains_key(name) {
            return Err(SensorGraphError::Data(format!(
                "metadata '{}' declared more than once",
                name
            )));
        }
        self.emitter.parts.metadata.insert(name.to_string(), value);
        Ok(())
    }

    fn set(&mut self, target: &Reference, value: &Literal, declared: Option<ConfigType>) -> Result<()> {
        let slot = self.scopes.config_slot().ok_or_else(|| {
            SensorGraphError::Data("set statements must be inside a config block".to_string())
        })?;
        let config_id = match target {
            Reference::Number(id) => u16::try_from(*id).map_err(|_| {
                SensorGraphError::Data(format!("config variable id {} out of range", id))
            })?,
            Reference::Name(name) => {
                return Err(SensorGraphError::Data(format!(
                    "unknown config variable '{}'",
                    name
                )))
            }
        };

        let value = match (value, declared) {
            (Literal::Number(number), ty) => {
                ConfigValue::integer(ty.unwrap_or(ConfigType::UInt32), *number)?
            }
            (Literal::String(text), None | Some(ConfigType::String)) => {
                ConfigValue::String(text.clone())
            }
            (Literal::Binary(bytes), None | Some(ConfigType::Binary)) => {
                ConfigValue::Binary(bytes.clone())
            }
            (literal, Some(ty)) => {
                return Err(SensorGraphError::Data(format!(
                    "cannot assign {} to a {} config variable",
                    literal, ty
                )))
            }
        };

        if self.emitter.parts.config.contains_key(&(slot, config_id)) {
            return Err(SensorGraphError::Data(format!(
                "config variable 0x{:04X} on {} set more than once",
                config_id, slot
            )));
        }
        self.emitter.parts.config.insert((slot, config_id), value);
        Ok(())
    }

    fn call(&mut self, rpc: &Reference, slot: SlotIdentifier, output: Option<DataStream>) -> Result<()> {
        let rpc_id = match rpc {
            Reference::Number(id) => u16::try_from(*id)
                .map_err(|_| SensorGraphError::Data(format!("rpc id {} out of range", id)))?,
            Reference::Name(name) => {
                return Err(SensorGraphError::Data(format!("unknown rpc '{}'", name)))
            }
        };

        let (trigger_stream, trigger) = self.scopes.trigger_chain(&mut self.emitter)?;
        let target = self.emitter.allocate(StreamType::Constant, true)?;
        self.emitter
            .add_constant(target, (i32::from(slot.address()) << 16) | i32::from(rpc_id));
        let output = match output {
            Some(output) => output,
            None => self.emitter.allocate(StreamType::Unbuffered, false)?,
        };

        self.emitter.add_node(NodeDescriptor::dual(
            NodeInput::new(trigger_stream, trigger),
            Combiner::And,
            NodeInput::always(target),
            output,
            ProcessingFunction::CallRpc,
        ));
        Ok(())
    }

    fn streamer(&mut self, statement: &StreamerStatement) -> Result<()> {
        if statement.realtime && statement.security.is_some() {
            return Err(SensorGraphError::Data(
                "realtime streamers cannot be signed or encrypted".to_string(),
            ));
        }
        if statement.security == Some(Security::Encrypted) {
            return Err(SensorGraphError::Data(
                "encrypted streamers are not supported".to_string(),
            ));
        }

        let format = if statement.realtime {
            ReportFormat::Individual
        } else if statement.security == Some(Security::Signed) {
            ReportFormat::SignedListUserKey
        } else {
            ReportFormat::HashedList
        };
        let automatic = !statement.manual && statement.with_other.is_none();

        let mut streamer = DataStreamer::new(statement.selector, format, automatic);
        streamer.dest = statement.dest.unwrap_or(SlotIdentifier::Controller);
        streamer.with_other = statement.with_other;
        self.emitter.parts.streamers.push(streamer);
        Ok(())
    }

    fn copy(&mut self, mode: CopyMode, source: Option<&CopySource>, output: DataStream) -> Result<()> {
        let function = match mode {
            CopyMode::Latest => ProcessingFunction::CopyLatestA,
            CopyMode::All => ProcessingFunction::CopyAllA,
            CopyMode::Count => ProcessingFunction::CopyCountA,
            CopyMode::Average => ProcessingFunction::AverageA,
        };
        let (trigger_stream, trigger) = self.scopes.trigger_chain(&mut self.emitter)?;
        let triggered = NodeInput::new(trigger_stream, trigger);

        let descriptor = match source {
            None => NodeDescriptor::single(triggered, output, function),
            Some(source) => {
                let input = match source {
                    CopySource::Stream(stream) => self.emitter.attach(*stream)?,
                    CopySource::Constant(value) => {
                        let value = to_i32(*value, "constant")?;
                        let stream = self.emitter.allocate(StreamType::Constant, true)?;
                        self.emitter.add_constant(stream, value);
                        stream
                    }
                };
                NodeDescriptor::dual(
                    NodeInput::always(input),
                    Combiner::And,
                    triggered,
                    output,
                    function,
                )
            }
        };
        self.emitter.add_node(descriptor);
        Ok(())
    }

    fn subtract(&mut self, input: DataStream, output: DataStream, default: Option<i64>) -> Result<()> {
        if input.stream_type != StreamType::Constant {
            return Err(SensorGraphError::Data(format!(
                "can only subtract a constant stream, not {}",
                input
            )));
        }

        if let Some(default) = default {
            if self.emitter.parts.constants.contains_key(&input) {
                return Err(SensorGraphError::Data(format!(
                    "default value for {} set more than once",
                    input
                )));
            }
            let value = to_i32(default, "default")?;
            self.emitter.add_constant(input, value);
        }

        let (trigger_stream, trigger) = self.scopes.trigger_chain(&mut self.emitter)?;
        let input = self.emitter.attach(input)?;
        self.emitter.add_node(NodeDescriptor::dual(
            NodeInput::always(input),
            Combiner::And,
            NodeInput::new(trigger_stream, trigger),
            output,
            ProcessingFunction::SubtractAFromB,
        ));
        Ok(())
    }

    fn open_block(&mut self, header: &BlockHeader) -> Result<Scope> {
        match header {
            BlockHeader::Every(interval) => {
                let (clock, trigger) = self.scopes.clock(&mut self.emitter, *interval)?;
                let stream = self.emitter.allocate(StreamType::Counter, false)?;
                self.emitter.copy_latest(clock, trigger, stream);
                Ok(Scope::Clock {
                    stream,
                    trigger: count_is_one(),
                    interval: *interval,
                })
            }
            BlockHeader::WhenConnected(slot) => ScopeStack::gated_clock_scope(&mut self.emitter, *slot),
            BlockHeader::Latch(latch) => self.latch(latch),
            BlockHeader::Config(slot) => Ok(Scope::Config { slot: *slot }),
            BlockHeader::On { first, second } => {
                let (stream_a, trigger_a) = self.resolve_clause(first)?;
                let Some((combiner, second)) = second else {
                    return Ok(Scope::Trigger {
                        stream: stream_a,
                        trigger: trigger_a,
                    });
                };

                let (stream_b, trigger_b) = self.resolve_clause(second)?;
                let combiner = match combiner {
                    BlockCombiner::And => Combiner::And,
                    BlockCombiner::Or => Combiner::Or,
                };
                let input_a = NodeInput::new(self.emitter.attach(stream_a)?, trigger_a);
                let input_b = NodeInput::new(self.emitter.attach(stream_b)?, trigger_b);
                let stream = self.emitter.allocate(StreamType::Unbuffered, false)?;
                self.emitter.add_node(NodeDescriptor::dual(
                    input_a,
                    combiner,
                    input_b,
                    stream,
                    ProcessingFunction::CopyLatestA,
                ));
                Ok(Scope::Trigger {
                    stream,
                    trigger: InputTrigger::Always,
                })
            }
        }
    }

    /// Gate a one second clock on a stream condition
    fn latch(&mut self, latch: &StreamTrigger) -> Result<Scope> {
        let interval = Interval {
            count: 1,
            basis: ClockBasis::Seconds,
        };
        let stream = self.emitter.allocate(StreamType::Counter, false)?;
        let (clock, clock_trigger) = self.scopes.clock(&mut self.emitter, interval)?;

        self.emitter.add_node(NodeDescriptor::dual(
            NodeInput::new(clock, clock_trigger),
            Combiner::And,
            NodeInput::new(
                latch.stream,
                InputTrigger::when(latch.source, latch.op, latch.reference),
            ),
            stream,
            ProcessingFunction::CopyLatestA,
        ));
        if latch.stream.stream_type == StreamType::Constant {
            self.emitter.parts.constants.entry(latch.stream).or_insert(0);
        }

        Ok(Scope::Clock {
            stream,
            trigger: count_is_one(),
            interval,
        })
    }

    fn resolve_clause(&self, clause: &TriggerClause) -> Result<(DataStream, InputTrigger)> {
        match clause {
            TriggerClause::Stream(stream) => Ok((*stream, InputTrigger::Always)),
            TriggerClause::Condition(condition) => Ok((
                condition.stream,
                InputTrigger::when(condition.source, condition.op, condition.reference),
            )),
            TriggerClause::Named(name) => self.scopes.resolve_identifier(name),
        }
    }

    fn finish(self) -> Result<GraphParts> {
        let Compiler {
            model,
            emitter,
            triggered_streamers,
            ..
        } = self;
        let needs_fast_tick = emitter.needs_fast_tick;
        let mut parts = emitter.parts;

        if needs_fast_tick {
            require_fast_tick(&mut parts, model)?;
        }

        let streamer_count = parts.streamers.len();
        if streamer_count as u64 > model.max_streamers {
            return Err(SensorGraphError::Data(format!(
                "program declares {} streamers, the device supports at most {}",
                streamer_count, model.max_streamers
            )));
        }
        for (index, streamer) in parts.streamers.iter().enumerate() {
            if let Some(other) = streamer.with_other {
                if other >= streamer_count || other == index {
                    return Err(SensorGraphError::Data(format!(
                        "streamer {} triggers with invalid streamer {}",
                        index, other
                    )));
                }
            }
        }
        for (line, index) in triggered_streamers {
            if index >= streamer_count {
                return Err(SensorGraphError::Data(format!(
                    "line {}: trigger streamer {} but only {} streamers are declared",
                    line, index, streamer_count
                )));
            }
        }

        if parts.nodes.len() as u64 > model.max_nodes {
            return Err(SensorGraphError::Data(format!(
                "program needs {} nodes, the device supports at most {}",
                parts.nodes.len(),
                model.max_nodes
            )));
        }

        let undeclared: Vec<DataStream> = parts
            .nodes
            .iter()
            .flat_map(|node| node.inputs())
            .filter_map(|input| input.selector.as_stream())
            .filter(|stream| stream.stream_type == StreamType::Constant)
            .collect();
        for stream in undeclared {
            parts.constants.entry(stream).or_insert(0);
        }

        check_acyclic(&parts.nodes)?;

        tracing::info!(
            "Compiled {} nodes, {} streamers, {} constants",
            parts.nodes.len(),
            parts.streamers.len(),
            parts.constants.len()
        );
        Ok(parts)
    }
}

fn require_fast_tick(parts: &mut GraphParts, model: &DeviceModel) -> Result<()> {
    if !model.fast_tick_enabled {
        return Err(SensorGraphError::Data(format!(
            "program needs a fast tick but device model '{}' has none",
            model.name
        )));
    }

    match parts.config.get(&(SlotIdentifier::Controller, CONFIG_FAST_TICK)) {
        None => {
            parts.config.insert(
                (SlotIdentifier::Controller, CONFIG_FAST_TICK),
                ConfigValue::integer(ConfigType::UInt32, 1)?,
            );
            Ok(())
        }
        Some(value) if value.as_integer() == Some(1) => Ok(()),
        Some(value) => Err(SensorGraphError::Data(format!(
            "program needs a 1 second fast tick but the fast tick is set to {}",
            value
        ))),
    }
}

/// Fail if following outputs into inputs can lead back to the same node
pub fn check_acyclic(nodes: &[NodeDescriptor]) -> Result<()> {
    let consumers: Vec<Vec<usize>> = nodes
        .iter()
        .map(|producer| {
            nodes
                .iter()
                .enumerate()
                .filter(|(_, consumer)| consumer.consumes(&producer.output))
                .map(|(j, _)| j)
                .collect()
        })
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    for targets in &consumers {
        for &j in targets {
            in_degree[j] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = queue.pop_front() {
        visited += 1;
        for &j in &consumers[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                queue.push_back(j);
            }
        }
    }

    if visited < nodes.len() {
        let stuck = in_degree.iter().position(|&d| d > 0).unwrap_or(0);
        return Err(SensorGraphError::Data(format!(
            "node graph has a cycle through '{}' ({} of {} nodes ordered)",
            nodes[stuck],
            visited,
            nodes.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn compile_str(source: &str) -> Result<GraphParts> {
        compile_parts(&parse(source)?, &DeviceModel::default())
    }

    fn node_strings(parts: &GraphParts) -> Vec<String> {
        parts.nodes.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_every_block() {
        let parts = compile_str("every 10 minutes { copy average input 1 => output 1; }").unwrap();
        assert_eq!(
            node_strings(&parts),
            vec![
                "(system input 2 always) => counter 1024 using copy_latest_a",
                "(counter 1024 when count >= 60) => counter 1025 using copy_latest_a",
                "(input 1 always && counter 1025 when count == 1) => output 1 using average_a",
            ]
        );
        assert!(parts.config.is_empty());
    }

    #[test]
    fn test_fast_clock_sets_fast_tick() {
        let parts = compile_str("every 5 seconds { copy input 1 => output 1; }").unwrap();
        assert_eq!(
            parts.nodes[0].to_string(),
            "(system input 3 always) => counter 1024 using copy_latest_a"
        );
        let tick = parts.config.get(&(SlotIdentifier::Controller, CONFIG_FAST_TICK)).unwrap();
        assert_eq!(tick.as_integer(), Some(1));

        let err = compile_str(
            "config controller { set 0x2000 to 2; }\nevery 5 seconds { copy input 1 => output 1; }",
        )
        .unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn test_call_and_constants() {
        let parts = compile_str("on input 5 { call 0x8000 on slot 1 => output 2; }").unwrap();
        assert_eq!(
            node_strings(&parts),
            vec!["(input 5 always && constant 1024 always) => output 2 using call_rpc"]
        );
        assert_eq!(parts.constants.get(&"constant 1024".parse().unwrap()), Some(&((11 << 16) | 0x8000)));

        let parts = compile_str("(input 1 always && constant 7 always) => output 1 using subtract_afromb;").unwrap();
        assert_eq!(parts.constants.get(&"constant 7".parse().unwrap()), Some(&0));
    }

    #[test]
    fn test_on_block_with_two_triggers() {
        let parts =
            compile_str("on value(input 1) > 10 or count(input 2) >= 3 { copy => output 1; }").unwrap();
        assert_eq!(
            node_strings(&parts),
            vec![
                "(input 1 when value > 10 || input 2 when count >= 3) => unbuffered 1024 using copy_latest_a",
                "(unbuffered 1024 always) => output 1 using copy_latest_a",
            ]
        );
    }

    #[test]
    fn test_streamers_and_trigger() {
        let parts = compile_str(
            "manual streamer on all outputs;\nstreamer on output 2 with streamer 0;\non input 1 { trigger streamer 0; }",
        )
        .unwrap();
        assert_eq!(parts.streamers.len(), 2);
        assert!(!parts.streamers[0].automatic);
        assert!(!parts.streamers[1].automatic);
        assert_eq!(parts.streamers[1].with_other, Some(0));
        assert_eq!(parts.nodes[0].function, ProcessingFunction::TriggerStreamer);

        let err = compile_str("on input 1 {\n trigger streamer 2;\n}").unwrap_err();
        assert!(err.is_data());
        assert!(err.to_string().contains("line 2"));

        assert!(compile_str("realtime signed streamer on output 1;").unwrap_err().is_data());
        assert!(compile_str("encrypted streamer on output 1;").unwrap_err().is_data());
        assert!(compile_str("streamer on output 1 with streamer 0;").unwrap_err().is_data());
    }

    #[test]
    fn test_declaration_errors() {
        assert!(compile_str("meta a = 1;\nmeta a = 2;").unwrap_err().is_data());
        assert!(compile_str("set 0x8000 to 1;").unwrap_err().is_data());
        assert!(compile_str("config slot 1 { set 0x8000 to 1; set 0x8000 to 2; }")
            .unwrap_err()
            .is_data());
        assert!(compile_str("config slot 1 { set 0x8000 to 300 as uint8_t; }")
            .unwrap_err()
            .is_data());
        assert!(compile_str("config slot 1 { meta a = 1; }").unwrap_err().is_data());
        assert!(compile_str("copy input 1 => output 1;").unwrap_err().is_data());
        assert!(compile_str("require max_nodes >= 100000;").unwrap_err().is_data());
        assert!(compile_str("require flux_capacitors >= 1;").unwrap_err().is_data());
        assert!(compile_str("require max_nodes >= 8;").is_ok());
        assert!(compile_str("on input 1 { subtract input 2 => output 1; }")
            .unwrap_err()
            .is_data());
        assert!(compile_str("on input 1 { subtract constant 1 => output 1, default 1; subtract constant 1 => output 2, default 2; }")
            .unwrap_err()
            .is_data());
    }

    #[test]
    fn test_cycles_fail_without_partial_graph() {
        let source = "(input 1 always && unbuffered 2 always) => unbuffered 1 using copy_latest_a;\n\
                      (unbuffered 1 always) => unbuffered 2 using copy_latest_a;";
        let err = compile(&parse(source).unwrap(), &DeviceModel::default()).unwrap_err();
        assert!(err.is_data());
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_when_connected_block() {
        let parts = compile_str(
            "when connected to controller {\n on connect { copy 1 => output 1; }\n every 1 minute { copy input 1 => output 2; }\n}",
        )
        .unwrap();
        let nodes = node_strings(&parts);
        assert_eq!(nodes[0], "(system input 1025 when value == 8) => constant 1024 using copy_latest_a");
        assert_eq!(
            nodes[1],
            "(constant 1025 always && system input 1026 when value == 8) => constant 1024 using copy_latest_a"
        );
        assert!(nodes.iter().any(|n| n.contains("constant 1024 when value == 8")));
        assert_eq!(parts.constants.get(&"constant 1024".parse().unwrap()), Some(&0));
    }

    #[test]
    fn test_check_acyclic_accepts_fan_in() {
        let nodes: Vec<NodeDescriptor> = [
            "(input 1 always) => unbuffered 1 using copy_latest_a",
            "(input 2 always) => unbuffered 1 using copy_latest_a",
            "(unbuffered 1 always) => output 1 using copy_latest_a",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
        assert!(check_acyclic(&nodes).is_ok());
    }
}

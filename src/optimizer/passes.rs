//! Individual rewrites over [`GraphParts`].
//!
//! Every pass either changes the parts and returns `true` or leaves them
//! untouched and returns `false`. A pass only fires when the rewritten
//! graph reports the same readings, in the same order, for any stimulus.

use crate::graph::{
    Comparison, GraphParts, InputTrigger, NodeDescriptor, ProcessingFunction, TriggerSource,
};
use crate::stream::{DataStream, DataStreamSelector, StreamType};
use std::collections::{BTreeSet, HashSet};

/// Read-only queries over the node list of a [`GraphParts`]
struct GraphIndex<'a> {
    parts: &'a GraphParts,
}

impl<'a> GraphIndex<'a> {
    fn new(parts: &'a GraphParts) -> Self {
        Self { parts }
    }

    fn nodes(&self) -> &'a [NodeDescriptor] {
        &self.parts.nodes
    }

    fn producers(&self, stream: &DataStream) -> Vec<usize> {
        self.nodes()
            .iter()
            .enumerate()
            .filter(|(_, node)| node.output == *stream)
            .map(|(i, _)| i)
            .collect()
    }

    /// Consumers of `stream` in creation order
    fn consumers(&self, stream: &DataStream) -> Vec<usize> {
        self.nodes()
            .iter()
            .enumerate()
            .filter(|(_, node)| node.consumes(stream))
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether readings of `stream` leave the graph
    fn observable(&self, stream: &DataStream) -> bool {
        stream.is_persisted()
            || self
                .parts
                .streamers
                .iter()
                .any(|streamer| streamer.selector.matches(stream))
    }

    /// Nodes whose execution is visible outside the graph
    fn is_sink(&self, index: usize) -> bool {
        let node = &self.nodes()[index];
        node.function.has_side_effects() || self.observable(&node.output)
    }

    /// Every node downstream of any of `streams`
    fn reachable_from(&self, streams: impl IntoIterator<Item = DataStream>) -> BTreeSet<usize> {
        let mut reached = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<DataStream> = streams.into_iter().collect();

        while let Some(stream) = stack.pop() {
            if !visited.insert(stream) {
                continue;
            }
            for consumer in self.consumers(&stream) {
                if reached.insert(consumer) {
                    stack.push(self.nodes()[consumer].output);
                }
            }
        }
        reached
    }

    /// Streams a node reads; `None` if any input is a wildcard
    fn input_streams(&self, index: usize) -> Option<Vec<DataStream>> {
        self.nodes()[index]
            .inputs()
            .map(|input| input.selector.as_stream())
            .collect()
    }

    fn reads_twice(&self, index: usize, stream: &DataStream) -> bool {
        self.nodes()[index]
            .inputs()
            .filter(|input| input.selector.matches(stream))
            .count()
            > 1
    }
}

/// Triggers that fire on every reading when each reading is consumed at once
fn fires_per_reading(trigger: &InputTrigger) -> bool {
    match *trigger {
        InputTrigger::Always => true,
        InputTrigger::Compare {
            source: TriggerSource::Count,
            op: Comparison::Equal,
            reference: 1,
        } => true,
        InputTrigger::Compare { .. } => false,
    }
}

/// Point every input reading `from` at `to`
fn rewire(parts: &mut GraphParts, from: &DataStream, to: DataStream) {
    for node in &mut parts.nodes {
        if node.input_a.selector.matches(from) {
            node.input_a.selector = DataStreamSelector::from(to);
        }
        if let Some(input) = node.input_b.as_mut() {
            if input.selector.matches(from) {
                input.selector = DataStreamSelector::from(to);
            }
        }
    }
}

/// Drop nodes that cannot reach a streamer, a persisted stream or a side effect
pub(crate) fn remove_dead_code(parts: &mut GraphParts) -> bool {
    let live = {
        let index = GraphIndex::new(parts);
        let nodes = index.nodes();
        let mut live = vec![false; nodes.len()];
        let mut stack: Vec<usize> = (0..nodes.len()).filter(|&i| index.is_sink(i)).collect();
        for &sink in &stack {
            live[sink] = true;
        }

        while let Some(i) = stack.pop() {
            for input in nodes[i].inputs() {
                for (j, producer) in nodes.iter().enumerate() {
                    if !live[j] && input.selector.matches(&producer.output) {
                        live[j] = true;
                        stack.push(j);
                    }
                }
            }
        }
        live
    };

    if live.iter().all(|&keep| keep) {
        return false;
    }

    let mut keep = live.into_iter();
    parts.nodes.retain(|node| {
        let keep = keep.next().unwrap_or(true);
        if !keep {
            tracing::debug!("Removing dead node {}", node);
        }
        keep
    });
    true
}

/// A `copy_latest_a` node that can be bypassed
struct CopyBypass {
    node: usize,
    source: DataStream,
    target: DataStream,
}

fn find_copy_bypass(index: &GraphIndex<'_>, i: usize) -> Option<CopyBypass> {
    let node = &index.nodes()[i];
    if node.function != ProcessingFunction::CopyLatestA
        || node.input_b.is_some()
        || !fires_per_reading(&node.input_a.trigger)
    {
        return None;
    }

    let source = node.input_a.selector.as_stream()?;
    let target = node.output;
    if source.stream_type != target.stream_type
        || target.stream_type == StreamType::Constant
        || target.is_persisted()
        || index.observable(&source)
        || index.observable(&target)
    {
        return None;
    }

    if index.consumers(&source) != [i] || index.producers(&target) != [i] {
        return None;
    }
    let producer = match index.producers(&source)[..] {
        [producer] => producer,
        _ => return None,
    };
    if index.nodes()[producer].function == ProcessingFunction::CopyAllA {
        return None;
    }

    // The producer must run at most once per stimulus
    let roots = index.input_streams(producer)?;
    if roots.iter().any(|root| !index.producers(root).is_empty()) {
        return None;
    }

    let cone = index.reachable_from([target]);
    for &member in &cone {
        if index.reads_twice(member, &target) {
            return None;
        }
        for stream in index.input_streams(member)? {
            if stream == target {
                continue;
            }
            let producers = index.producers(&stream);
            let constant = stream.stream_type == StreamType::Constant && producers.is_empty();
            if !constant && (producers.is_empty() || producers.iter().any(|p| !cone.contains(p))) {
                return None;
            }
        }
    }

    // Nothing else observable may run in the same propagation pass
    let concurrent = index.reachable_from(roots);
    if concurrent
        .iter()
        .any(|&j| j != i && !cone.contains(&j) && index.is_sink(j))
    {
        return None;
    }

    Some(CopyBypass {
        node: i,
        source,
        target,
    })
}

/// Let consumers of a pure copy read the copied stream directly
pub(crate) fn remove_copy_latest(parts: &mut GraphParts) -> bool {
    let bypass = {
        let index = GraphIndex::new(parts);
        (0..parts.nodes.len()).find_map(|i| find_copy_bypass(&index, i))
    };
    let Some(bypass) = bypass else {
        return false;
    };

    tracing::debug!(
        "Bypassing {}, consumers of {} now read {}",
        parts.nodes[bypass.node],
        bypass.target,
        bypass.source
    );
    parts.nodes.remove(bypass.node);
    rewire(parts, &bypass.target, bypass.source);
    true
}

/// `count == 1` on a coalescing stream is the same as `always` for a single-input node
pub(crate) fn convert_count_one_to_always(parts: &mut GraphParts) -> bool {
    let mut changed = false;
    for node in &mut parts.nodes {
        if node.input_b.is_some() {
            continue;
        }
        let coalesces = node.input_a.selector.as_stream().is_some_and(|stream| {
            matches!(stream.stream_type, StreamType::Unbuffered | StreamType::Input)
        });
        let count_one = matches!(
            node.input_a.trigger,
            InputTrigger::Compare {
                source: TriggerSource::Count,
                op: Comparison::Equal,
                reference: 1,
            }
        );
        if coalesces && count_one {
            node.input_a.trigger = InputTrigger::Always;
            changed = true;
        }
    }
    changed
}

/// `copy_all_a` never sees more than one reading on a latched, non-counting stream
pub(crate) fn downgrade_copy_all(parts: &mut GraphParts) -> bool {
    let mut changed = false;
    for node in &mut parts.nodes {
        if node.function != ProcessingFunction::CopyAllA {
            continue;
        }
        let single = node.input_a.selector.as_stream().is_some_and(|stream| {
            matches!(
                stream.stream_type,
                StreamType::Unbuffered | StreamType::Input | StreamType::Constant
            )
        });
        if single {
            node.function = ProcessingFunction::CopyLatestA;
            changed = true;
        }
    }
    changed
}

/// Two identical nodes whose outputs can be served by one of them
struct SharedConsumer {
    kept: DataStream,
    removed: usize,
    removed_output: DataStream,
}

fn find_shared_consumer(
    index: &GraphIndex<'_>,
    first: usize,
    max_node_outputs: u64,
) -> Option<SharedConsumer> {
    let nodes = index.nodes();
    let a = &nodes[first];
    if a.input_b.is_some() || a.output.stream_type == StreamType::Constant {
        return None;
    }
    let input = a.input_a.selector.as_stream()?;

    // Both nodes must sit next to each other in the propagation queue
    let consumers = index.consumers(&input);
    let position = consumers.iter().position(|&c| c == first)?;
    let second = *consumers.get(position + 1)?;
    let b = &nodes[second];

    let same_work = b.input_b.is_none()
        && b.input_a == a.input_a
        && b.function == a.function
        && b.output != a.output
        && b.output.stream_type == a.output.stream_type;
    if !same_work {
        return None;
    }

    for output in [&a.output, &b.output] {
        if index.observable(output) || index.producers(output).len() != 1 {
            return None;
        }
    }

    let first_consumers = index.consumers(&a.output);
    let second_consumers = index.consumers(&b.output);
    if first_consumers.iter().any(|c| second_consumers.contains(c)) {
        return None;
    }
    if (first_consumers.len() + second_consumers.len()) as u64 > max_node_outputs {
        return None;
    }
    // Merged consumers are queued in creation order
    if let (Some(last), Some(earliest)) = (first_consumers.iter().max(), second_consumers.iter().min()) {
        if last > earliest {
            return None;
        }
    }

    Some(SharedConsumer {
        kept: a.output,
        removed: second,
        removed_output: b.output,
    })
}

/// Merge duplicate nodes fed by the same tick, keeping the first one
pub(crate) fn merge_shared_tick_consumers(parts: &mut GraphParts, max_node_outputs: u64) -> bool {
    let shared = {
        let index = GraphIndex::new(parts);
        (0..parts.nodes.len()).find_map(|i| find_shared_consumer(&index, i, max_node_outputs))
    };
    let Some(shared) = shared else {
        return false;
    };

    tracing::debug!(
        "Merging {} into {}",
        parts.nodes[shared.removed],
        shared.kept
    );
    parts.nodes.remove(shared.removed);
    rewire(parts, &shared.removed_output, shared.kept);
    true
}

/// Forget initial values of constants nothing reads
pub(crate) fn remove_constants(parts: &mut GraphParts) -> bool {
    let unused: Vec<DataStream> = {
        let index = GraphIndex::new(parts);
        parts
            .constants
            .keys()
            .filter(|stream| index.consumers(stream).is_empty() && !index.observable(stream))
            .copied()
            .collect()
    };

    for stream in &unused {
        tracing::debug!("Removing unused constant {}", stream);
        parts.constants.remove(stream);
    }
    !unused.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DataStreamer, ReportFormat};

    fn parts(nodes: &[&str]) -> GraphParts {
        GraphParts {
            nodes: nodes.iter().map(|text| text.parse().unwrap()).collect(),
            ..GraphParts::default()
        }
    }

    fn texts(parts: &GraphParts) -> Vec<String> {
        parts.nodes.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_dead_chain_removed() {
        let mut graph = parts(&[
            "(input 1 always) => unbuffered 1 using copy_latest_a",
            "(unbuffered 1 always) => unbuffered 2 using copy_latest_a",
            "(input 2 always) => output 1 using copy_latest_a",
        ]);
        assert!(remove_dead_code(&mut graph));
        assert_eq!(
            texts(&graph),
            vec!["(input 2 always) => output 1 using copy_latest_a"]
        );
        assert!(!remove_dead_code(&mut graph));
    }

    #[test]
    fn test_streamed_and_side_effect_nodes_are_live() {
        let mut graph = parts(&[
            "(input 1 always) => unbuffered 1 using copy_latest_a",
            "(constant 1 always && input 2 always) => unbuffered 2 using trigger_streamer",
        ]);
        graph.streamers.push(DataStreamer::new(
            "unbuffered 1".parse().unwrap(),
            ReportFormat::Individual,
            true,
        ));
        assert!(!remove_dead_code(&mut graph));
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn test_copy_bypassed_when_isolated() {
        let mut graph = parts(&[
            "(input 1 always) => unbuffered 1 using copy_latest_a",
            "(unbuffered 1 always) => unbuffered 2 using copy_latest_a",
            "(unbuffered 2 when value > 3) => output 1 using copy_latest_a",
        ]);
        assert!(remove_copy_latest(&mut graph));
        assert_eq!(
            texts(&graph),
            vec![
                "(input 1 always) => unbuffered 1 using copy_latest_a",
                "(unbuffered 1 when value > 3) => output 1 using copy_latest_a",
            ]
        );
    }

    #[test]
    fn test_copy_kept_when_sibling_branch_is_observable() {
        let mut graph = parts(&[
            "(input 1 always) => unbuffered 1 using copy_latest_a",
            "(unbuffered 1 always) => unbuffered 2 using copy_latest_a",
            "(unbuffered 2 always) => output 1 using copy_latest_a",
            "(input 1 always) => output 2 using copy_latest_a",
        ]);
        assert!(!remove_copy_latest(&mut graph));
    }

    #[test]
    fn test_copy_kept_for_counting_trigger() {
        let mut graph = parts(&[
            "(input 1 always) => counter 1 using copy_latest_a",
            "(counter 1 when count >= 2) => counter 2 using copy_latest_a",
            "(counter 2 always) => output 1 using copy_count_a",
        ]);
        assert!(!remove_copy_latest(&mut graph));
    }

    #[test]
    fn test_count_one_on_unbuffered_becomes_always() {
        let mut graph = parts(&[
            "(unbuffered 1 when count == 1) => output 1 using copy_latest_a",
            "(counter 1 when count == 1) => output 2 using copy_latest_a",
        ]);
        assert!(convert_count_one_to_always(&mut graph));
        assert_eq!(
            texts(&graph),
            vec![
                "(unbuffered 1 always) => output 1 using copy_latest_a",
                "(counter 1 when count == 1) => output 2 using copy_latest_a",
            ]
        );
        assert!(!convert_count_one_to_always(&mut graph));
    }

    #[test]
    fn test_copy_all_downgraded_only_on_latched_streams() {
        let mut graph = parts(&[
            "(constant 1 always) => constant 2 using copy_all_a",
            "(buffered 1 always) => output 1 using copy_all_a",
            "(counter 1 always) => output 2 using copy_all_a",
        ]);
        assert!(downgrade_copy_all(&mut graph));
        assert_eq!(graph.nodes[0].function, ProcessingFunction::CopyLatestA);
        assert_eq!(graph.nodes[1].function, ProcessingFunction::CopyAllA);
        assert_eq!(graph.nodes[2].function, ProcessingFunction::CopyAllA);
    }

    #[test]
    fn test_identical_tick_consumers_merged() {
        let mut graph = parts(&[
            "(system input 2 always) => counter 1024 using copy_latest_a",
            "(counter 1024 when count >= 60) => counter 1025 using copy_latest_a",
            "(counter 1024 when count >= 60) => counter 1026 using copy_latest_a",
            "(counter 1025 when count == 1) => output 1 using copy_latest_a",
            "(counter 1026 when count == 1) => output 2 using copy_latest_a",
        ]);
        assert!(merge_shared_tick_consumers(&mut graph, 4));
        assert_eq!(
            texts(&graph),
            vec![
                "(system input 2 always) => counter 1024 using copy_latest_a",
                "(counter 1024 when count >= 60) => counter 1025 using copy_latest_a",
                "(counter 1025 when count == 1) => output 1 using copy_latest_a",
                "(counter 1025 when count == 1) => output 2 using copy_latest_a",
            ]
        );
        assert!(!merge_shared_tick_consumers(&mut graph, 4));
    }

    #[test]
    fn test_merge_respects_output_limit() {
        let mut graph = parts(&[
            "(counter 1 when count >= 60) => counter 2 using copy_latest_a",
            "(counter 1 when count >= 60) => counter 3 using copy_latest_a",
            "(counter 2 always) => output 1 using copy_latest_a",
            "(counter 3 always) => output 2 using copy_latest_a",
        ]);
        assert!(!merge_shared_tick_consumers(&mut graph, 1));
    }

    #[test]
    fn test_unused_constants_removed() {
        let mut graph = parts(&["(constant 1 always) => output 1 using copy_latest_a"]);
        graph.constants.insert("constant 1".parse().unwrap(), 5);
        graph.constants.insert("constant 2".parse().unwrap(), 7);
        assert!(remove_constants(&mut graph));
        assert_eq!(graph.constants.len(), 1);
        assert!(!remove_constants(&mut graph));
    }
}

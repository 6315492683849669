//! Graph optimizer.
//!
//! Runs a fixed list of rewrites over the parts of a compiled graph until
//! none of them changes anything. The optimized graph reports the same
//! readings as the input graph for any sequence of stimuli.

mod passes;

use crate::config::DeviceModel;
use crate::error::{Result, SensorGraphError};
use crate::graph::{GraphParts, SensorGraph};
use std::collections::BTreeMap;
use std::fmt;

/// Upper bound on full rounds over every pass
pub const MAX_OPTIMIZER_ROUNDS: usize = 256;

/// The rewrites applied by [`Optimizer`], in application order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pass {
    RemoveDeadCode,
    RemoveCopyLatest,
    ConvertCountOneToAlways,
    DowngradeCopyAll,
    MergeSharedTickConsumers,
    RemoveConstants,
}

impl Pass {
    pub const ALL: [Pass; 6] = [
        Pass::RemoveDeadCode,
        Pass::RemoveCopyLatest,
        Pass::ConvertCountOneToAlways,
        Pass::DowngradeCopyAll,
        Pass::MergeSharedTickConsumers,
        Pass::RemoveConstants,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pass::RemoveDeadCode => "remove-dead-code",
            Pass::RemoveCopyLatest => "remove-copy-latest",
            Pass::ConvertCountOneToAlways => "convert-count-one-to-always",
            Pass::DowngradeCopyAll => "downgrade-copy-all",
            Pass::MergeSharedTickConsumers => "merge-shared-tick-consumers",
            Pass::RemoveConstants => "remove-constants",
        }
    }

    /// Apply once; `true` if the parts changed
    fn apply(self, parts: &mut GraphParts, model: &DeviceModel) -> bool {
        match self {
            Pass::RemoveDeadCode => passes::remove_dead_code(parts),
            Pass::RemoveCopyLatest => passes::remove_copy_latest(parts),
            Pass::ConvertCountOneToAlways => passes::convert_count_one_to_always(parts),
            Pass::DowngradeCopyAll => passes::downgrade_copy_all(parts),
            Pass::MergeSharedTickConsumers => {
                passes::merge_shared_tick_consumers(parts, model.max_node_outputs)
            }
            Pass::RemoveConstants => passes::remove_constants(parts),
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What an optimizer run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizerStats {
    pub nodes_before: usize,
    pub nodes_after: usize,
    /// Full rounds over every pass, including the final unchanged one
    pub rounds: usize,
    /// Successful applications per pass
    pub applied: BTreeMap<Pass, usize>,
}

/// Runs the enabled passes to a fixed point
#[derive(Debug, Clone)]
pub struct Optimizer {
    model: DeviceModel,
    passes: Vec<Pass>,
}

impl Optimizer {
    pub fn new(model: DeviceModel) -> Self {
        Self {
            model,
            passes: Pass::ALL.to_vec(),
        }
    }

    /// Skip one pass
    pub fn without(mut self, pass: Pass) -> Self {
        self.passes.retain(|p| *p != pass);
        self
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Rewrite `parts` in place
    pub fn optimize_parts(&self, parts: &mut GraphParts) -> Result<OptimizerStats> {
        let mut stats = OptimizerStats {
            nodes_before: parts.nodes.len(),
            ..OptimizerStats::default()
        };

        loop {
            if stats.rounds >= MAX_OPTIMIZER_ROUNDS {
                return Err(SensorGraphError::Internal(format!(
                    "optimizer did not settle after {} rounds",
                    MAX_OPTIMIZER_ROUNDS
                )));
            }
            stats.rounds += 1;

            let mut changed = false;
            for &pass in &self.passes {
                while pass.apply(parts, &self.model) {
                    *stats.applied.entry(pass).or_insert(0) += 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        stats.nodes_after = parts.nodes.len();
        tracing::info!(
            "Optimizer: {} -> {} nodes in {} round(s)",
            stats.nodes_before,
            stats.nodes_after,
            stats.rounds
        );
        for (pass, count) in &stats.applied {
            tracing::debug!("  {}: applied {} time(s)", pass, count);
        }
        Ok(stats)
    }

    /// Build a fresh, optimized copy of `graph`
    ///
    /// Runtime state such as sensor log contents is not carried over.
    pub fn optimize(&self, graph: &SensorGraph) -> Result<SensorGraph> {
        let mut parts = graph.to_parts();
        self.optimize_parts(&mut parts)?;
        SensorGraph::from_parts(self.model.clone(), parts)
            .map_err(|e| e.with_context("rebuilding optimized graph"))
    }
}

/// Optimize `graph` with every pass enabled
pub fn optimize(graph: &SensorGraph) -> Result<SensorGraph> {
    Optimizer::new(graph.model().clone()).optimize(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile_source;

    const PROGRAM: &str = r#"
        every 10 minutes {
            copy average input 1 => output 1;
        }
        every 10 minutes {
            copy count input 2 => output 2;
        }
        on input 3 {
            copy => unbuffered 5;
        }
    "#;

    #[test]
    fn test_optimizer_shrinks_compiled_program() {
        let model = DeviceModel::default();
        let graph = compile_source(PROGRAM, &model).unwrap();
        let optimized = optimize(&graph).unwrap();

        assert!(optimized.nodes().len() < graph.nodes().len());
        assert!(optimized
            .nodes()
            .iter()
            .all(|node| node.output().to_string() != "unbuffered 5"));
        assert_eq!(optimized.streamers(), graph.streamers());
    }

    #[test]
    fn test_optimizer_is_idempotent() {
        let model = DeviceModel::default();
        let graph = compile_source(PROGRAM, &model).unwrap();
        let optimizer = Optimizer::new(model);

        let mut once = graph.to_parts();
        optimizer.optimize_parts(&mut once).unwrap();
        let mut twice = once.clone();
        let stats = optimizer.optimize_parts(&mut twice).unwrap();

        assert_eq!(once, twice);
        assert_eq!(stats.rounds, 1);
        assert!(stats.applied.is_empty());
    }

    #[test]
    fn test_disabled_pass_is_skipped() {
        let model = DeviceModel::default();
        let graph = compile_source(PROGRAM, &model).unwrap();
        let optimizer = Optimizer::new(model).without(Pass::RemoveDeadCode);
        assert!(!optimizer.passes().contains(&Pass::RemoveDeadCode));

        let mut parts = graph.to_parts();
        let stats = optimizer.optimize_parts(&mut parts).unwrap();
        assert!(!stats.applied.contains_key(&Pass::RemoveDeadCode));
        assert!(parts
            .nodes
            .iter()
            .any(|node| node.output.to_string() == "unbuffered 5"));
    }
}

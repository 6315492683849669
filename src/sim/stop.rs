//! Conditions that end a simulation run.

use crate::error::{Result, SensorGraphError};
use crate::graph::SensorGraph;
use crate::parser::{lexer::parse_number, time_unit_seconds};

/// Decides when [`Simulator::run`](super::Simulator::run) returns
#[cfg_attr(test, mockall::automock)]
pub trait StopCondition {
    /// `abs_seconds` counts from the first run, `rel_seconds` from the current one
    fn should_stop(&self, abs_seconds: u64, rel_seconds: u64, graph: &SensorGraph) -> bool;

    fn describe(&self) -> String;
}

/// Stop after a fixed simulated time per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBasedStopCondition {
    pub max_time: u64,
}

impl TimeBasedStopCondition {
    pub fn new(max_time: u64) -> Self {
        Self { max_time }
    }

    /// Parse `run_time <N> <unit>`
    pub fn parse(text: &str) -> Option<Self> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let ["run_time", count, unit] = words.as_slice() else {
            return None;
        };
        let count = u64::try_from(parse_number(count)?).ok()?;
        let unit = u64::from(time_unit_seconds(unit)?);
        count.checked_mul(unit).map(Self::new)
    }
}

impl StopCondition for TimeBasedStopCondition {
    fn should_stop(&self, _abs_seconds: u64, rel_seconds: u64, _graph: &SensorGraph) -> bool {
        rel_seconds >= self.max_time
    }

    fn describe(&self) -> String {
        format!("run_time {} seconds", self.max_time)
    }
}

/// Parse any known stop condition
pub fn parse_stop_condition(text: &str) -> Result<Box<dyn StopCondition>> {
    if let Some(condition) = TimeBasedStopCondition::parse(text) {
        return Ok(Box::new(condition));
    }
    Err(SensorGraphError::Argument(format!(
        "unknown stop condition '{}'",
        text
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceModel;

    #[test]
    fn test_run_time_units() {
        assert_eq!(TimeBasedStopCondition::parse("run_time 100 seconds").unwrap().max_time, 100);
        assert_eq!(TimeBasedStopCondition::parse("run_time 2 days").unwrap().max_time, 172800);
        assert_eq!(TimeBasedStopCondition::parse("run_time 0x10 minutes").unwrap().max_time, 960);
    }

    #[test]
    fn test_measures_relative_time() {
        let graph = SensorGraph::new(DeviceModel::default());
        let stop = TimeBasedStopCondition::new(10);
        assert!(!stop.should_stop(50, 9, &graph));
        assert!(stop.should_stop(50, 10, &graph));
    }

    #[test]
    fn test_unknown_conditions_rejected() {
        for text in ["run_time 10", "run_time ten seconds", "wall_time 10 seconds", ""] {
            assert!(parse_stop_condition(text).err().unwrap().is_argument(), "{}", text);
        }
    }
}

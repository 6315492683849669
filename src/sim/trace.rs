//! Recorded simulator output.

use crate::error::{Result, ResultExt, SensorGraphError};
use crate::stream::{DataStreamSelector, Reading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// When and how a trace was recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub recorded_at: DateTime<Utc>,
    /// Device model the graph was simulated on
    #[serde(default)]
    pub device_model: Option<String>,
    /// Simulated seconds covered by the trace
    #[serde(default)]
    pub duration: u64,
}

impl Default for TraceMetadata {
    fn default() -> Self {
        Self {
            recorded_at: Utc::now(),
            device_model: None,
            duration: 0,
        }
    }
}

/// Every reading pushed into a watched stream, in push order
///
/// Two traces compare equal when they watched the same selectors and saw
/// the same `(raw_time, stream, value)` sequence; metadata is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationTrace {
    #[serde(default)]
    pub metadata: TraceMetadata,
    pub selectors: Vec<DataStreamSelector>,
    pub readings: Vec<Reading>,
}

impl SimulationTrace {
    pub fn new(selectors: Vec<DataStreamSelector>) -> Self {
        Self {
            metadata: TraceMetadata::default(),
            selectors,
            readings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn extend(&mut self, readings: impl IntoIterator<Item = Reading>) {
        self.readings.extend(readings);
    }

    /// Save as pretty printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(SensorGraphError::from)
            .context(format!("writing trace {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(SensorGraphError::from)
            .context(format!("reading trace {}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(SensorGraphError::from)
            .context(format!("parsing trace {}", path.display()))
    }
}

impl PartialEq for SimulationTrace {
    fn eq(&self, other: &Self) -> bool {
        let key = |r: &Reading| (r.raw_time, r.stream, r.value);
        self.selectors == other.selectors
            && self.readings.len() == other.readings.len()
            && self
                .readings
                .iter()
                .zip(&other.readings)
                .all(|(a, b)| key(a) == key(b))
    }
}

//! Timestamped values flowing through a sensor graph.

use super::DataStream;
use serde::{Deserialize, Serialize};

/// One value pushed into a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Device time in seconds
    pub raw_time: u32,
    pub stream: DataStream,
    pub value: i32,
    /// Sequence number, assigned only when a persisted reading is stored
    #[serde(default)]
    pub reading_id: Option<u32>,
}

impl Reading {
    pub fn new(stream: DataStream, raw_time: u32, value: i32) -> Self {
        Self {
            raw_time,
            stream,
            value,
            reading_id: None,
        }
    }

    /// Copy of this reading retargeted at another stream
    pub fn with_stream(&self, stream: DataStream) -> Self {
        Self {
            stream,
            reading_id: None,
            ..*self
        }
    }
}

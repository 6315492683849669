//! Per-category read cursors over a single stream.
//!
//! The access policy of a walker is fixed when it is created from the type
//! of the stream it resolves to:
//!
//! | Stream type | Policy |
//! |---|---|
//! | counter | latched value plus a pending-push counter |
//! | input, unbuffered | latched value, pending indicator coalesces to 1 |
//! | constant | latched value, never exhausts |
//! | buffered, output | FIFO position inside a storage area |
//!
//! Popping a latched walker consumes a pending notification, not history:
//! every pop returns the same latched value.

use super::engine::StorageArea;
use crate::error::{Result, SensorGraphError};
use crate::stream::{DataStream, Reading, StreamType};

/// Count reported by walkers that never run out of data
pub const UNBOUNDED_COUNT: u32 = u32::MAX;

/// Largest pending count a counter walker can hold
pub const MAX_PENDING_COUNT: u32 = u32::MAX - 1;

/// Category-specific walker state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkerPolicy {
    Counter {
        latest: Option<Reading>,
        pending: u32,
    },
    Unbuffered {
        latest: Option<Reading>,
        pending: bool,
    },
    Constant {
        latest: Reading,
    },
    Buffered {
        area: StorageArea,
        /// Absolute index of the next reading to examine
        position: u64,
    },
}

/// A cursor bound to one concrete stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamWalker {
    pub stream: DataStream,
    pub policy: WalkerPolicy,
}

impl StreamWalker {
    /// Create a walker for a non-persisted stream
    ///
    /// `latest` seeds the latched value; only constant walkers report it as
    /// available data.
    pub(crate) fn latched(stream: DataStream, latest: Option<Reading>) -> Self {
        let policy = match stream.stream_type {
            StreamType::Counter => WalkerPolicy::Counter { latest, pending: 0 },
            StreamType::Constant => WalkerPolicy::Constant {
                latest: latest.unwrap_or_else(|| Reading::new(stream, 0, 0)),
            },
            _ => WalkerPolicy::Unbuffered {
                latest,
                pending: false,
            },
        };
        Self { stream, policy }
    }

    pub(crate) fn buffered(stream: DataStream, area: StorageArea, position: u64) -> Self {
        Self {
            stream,
            policy: WalkerPolicy::Buffered { area, position },
        }
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.policy, WalkerPolicy::Buffered { .. })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.policy, WalkerPolicy::Constant { .. })
    }

    /// Check that a push would be accepted, without modifying anything
    pub(crate) fn check_push(&self) -> Result<()> {
        match &self.policy {
            WalkerPolicy::Counter { pending, .. } if *pending >= MAX_PENDING_COUNT => {
                Err(SensorGraphError::Internal(format!(
                    "pending count overflow on walker for {}",
                    self.stream
                )))
            }
            _ => Ok(()),
        }
    }

    /// Record a pushed reading on a latched walker
    pub(crate) fn push_latched(&mut self, reading: Reading) {
        match &mut self.policy {
            WalkerPolicy::Counter { latest, pending } => {
                *latest = Some(reading);
                *pending += 1;
            }
            WalkerPolicy::Unbuffered { latest, pending } => {
                *latest = Some(reading);
                *pending = true;
            }
            WalkerPolicy::Constant { latest } => *latest = reading,
            WalkerPolicy::Buffered { .. } => {}
        }
    }

    /// Pending count of a latched walker
    pub(crate) fn latched_count(&self) -> u32 {
        match &self.policy {
            WalkerPolicy::Counter { pending, .. } => *pending,
            WalkerPolicy::Unbuffered { pending, .. } => *pending as u32,
            WalkerPolicy::Constant { .. } => UNBOUNDED_COUNT,
            WalkerPolicy::Buffered { .. } => 0,
        }
    }

    /// Latched value if data is pending
    pub(crate) fn latched_peek(&self) -> Result<Reading> {
        let latest = match &self.policy {
            WalkerPolicy::Constant { latest } => return Ok(*latest),
            WalkerPolicy::Counter { latest, .. } | WalkerPolicy::Unbuffered { latest, .. } => {
                *latest
            }
            WalkerPolicy::Buffered { .. } => None,
        };

        match latest {
            Some(reading) if self.latched_count() > 0 => Ok(reading),
            _ => Err(self.empty_error()),
        }
    }

    /// Consume one pending notification and return the latched value
    pub(crate) fn latched_pop(&mut self) -> Result<Reading> {
        let reading = self.latched_peek()?;
        match &mut self.policy {
            WalkerPolicy::Counter { pending, .. } => *pending -= 1,
            WalkerPolicy::Unbuffered { pending, .. } => *pending = false,
            _ => {}
        }
        Ok(reading)
    }

    /// Drop every pending notification
    pub(crate) fn latched_skip_all(&mut self) {
        match &mut self.policy {
            WalkerPolicy::Counter { pending, .. } => *pending = 0,
            WalkerPolicy::Unbuffered { pending, .. } => *pending = false,
            _ => {}
        }
    }

    pub(crate) fn empty_error(&self) -> SensorGraphError {
        SensorGraphError::StreamEmpty(format!("no readings available on {}", self.stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(text: &str) -> DataStream {
        text.parse().unwrap()
    }

    fn push(walker: &mut StreamWalker, value: i32) {
        let reading = Reading::new(walker.stream, 0, value);
        walker.check_push().unwrap();
        walker.push_latched(reading);
    }

    #[test]
    fn test_counter_counts_every_push() {
        let mut walker = StreamWalker::latched(stream("counter 1"), None);
        push(&mut walker, 1);
        push(&mut walker, 2);
        push(&mut walker, 3);

        assert_eq!(walker.latched_count(), 3);
        assert_eq!(walker.latched_pop().unwrap().value, 3);
        assert_eq!(walker.latched_pop().unwrap().value, 3);
        assert_eq!(walker.latched_count(), 1);
    }

    #[test]
    fn test_unbuffered_coalesces() {
        let mut walker = StreamWalker::latched(stream("unbuffered 1"), None);
        push(&mut walker, 1);
        push(&mut walker, 2);
        assert_eq!(walker.latched_count(), 1);
        assert_eq!(walker.latched_pop().unwrap().value, 2);
        assert!(walker.latched_pop().unwrap_err().is_stream_empty());
    }

    #[test]
    fn test_input_uses_unbuffered_policy() {
        let walker = StreamWalker::latched(stream("system input 2"), None);
        assert!(matches!(walker.policy, WalkerPolicy::Unbuffered { .. }));
    }

    #[test]
    fn test_constant_defaults_to_zero() {
        let mut walker = StreamWalker::latched(stream("constant 1"), None);
        assert_eq!(walker.latched_count(), UNBOUNDED_COUNT);
        assert_eq!(walker.latched_pop().unwrap().value, 0);
        push(&mut walker, 7);
        assert_eq!(walker.latched_peek().unwrap().value, 7);
        assert_eq!(walker.latched_pop().unwrap().value, 7);
    }

    #[test]
    fn test_counter_overflow_is_internal_error() {
        let mut walker = StreamWalker::latched(stream("counter 1"), None);
        walker.policy = WalkerPolicy::Counter {
            latest: None,
            pending: MAX_PENDING_COUNT,
        };
        let err = walker.check_push().unwrap_err();
        assert!(matches!(err, SensorGraphError::Internal(_)));
    }
}

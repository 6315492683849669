//! Internal stream allocation for compiled programs.

use crate::error::{Result, SensorGraphError};
use crate::graph::{GraphParts, NodeDescriptor, NodeInput, ProcessingFunction};
use crate::stream::{DataStream, StreamType, INTERNAL_ID_START, WILDCARD_ID};
use std::collections::HashMap;

/// Tracks how many nodes consume each allocated stream
#[derive(Debug, Clone, Copy)]
struct Allocation {
    /// Stream new consumers should attach to
    current: DataStream,
    consumers: u64,
}

/// Hands out internal streams and keeps each under the consumer limit
///
/// When a stream is about to reach `max_node_outputs` consumers it is
/// split: a `copy_all_a` node forwards it into a fresh stream that takes
/// the remaining consumers.
#[derive(Debug)]
pub struct StreamAllocator {
    max_node_outputs: u64,
    next_id: HashMap<StreamType, u16>,
    allocated: HashMap<DataStream, Allocation>,
}

impl StreamAllocator {
    pub fn new(max_node_outputs: u64) -> Self {
        Self {
            max_node_outputs,
            next_id: HashMap::new(),
            allocated: HashMap::new(),
        }
    }

    /// Reserve a new internal stream of `stream_type`
    ///
    /// With `attach` the caller counts as its first consumer.
    pub fn allocate(&mut self, stream_type: StreamType, attach: bool) -> Result<DataStream> {
        let next = self.next_id.entry(stream_type).or_insert(INTERNAL_ID_START);
        if *next >= WILDCARD_ID {
            return Err(SensorGraphError::Data(format!(
                "ran out of internal {} streams",
                stream_type
            )));
        }

        let stream = DataStream::new(stream_type, *next);
        *next += 1;
        self.allocated.insert(
            stream,
            Allocation {
                current: stream,
                consumers: u64::from(attach),
            },
        );
        Ok(stream)
    }

    /// Register one more consumer of `stream`, returning the stream it should read
    ///
    /// User declared streams are returned unchanged.
    pub fn attach(&mut self, stream: DataStream, parts: &mut GraphParts) -> Result<DataStream> {
        let Some(allocation) = self.allocated.get(&stream).copied() else {
            return Ok(stream);
        };

        if allocation.consumers + 1 < self.max_node_outputs {
            self.allocated.insert(
                stream,
                Allocation {
                    consumers: allocation.consumers + 1,
                    ..allocation
                },
            );
            return Ok(allocation.current);
        }

        let split = self.allocate(stream.stream_type, false)?;
        parts.nodes.push(NodeDescriptor::single(
            NodeInput::always(allocation.current),
            split,
            ProcessingFunction::CopyAllA,
        ));
        if let Some(value) = parts.constants.get(&allocation.current).copied() {
            parts.constants.insert(split, value);
        }
        tracing::trace!("Split {} into {}", allocation.current, split);

        self.allocated.remove(&split);
        self.allocated.insert(
            stream,
            Allocation {
                current: split,
                consumers: 1,
            },
        );
        Ok(split)
    }

    /// Whether `stream` was handed out by this allocator
    pub fn is_internal(&self, stream: &DataStream) -> bool {
        self.allocated.contains_key(stream) || self.allocated.values().any(|a| a.current == *stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_internal_range() {
        let mut allocator = StreamAllocator::new(4);
        let a = allocator.allocate(StreamType::Counter, false).unwrap();
        let b = allocator.allocate(StreamType::Counter, false).unwrap();
        let c = allocator.allocate(StreamType::Unbuffered, false).unwrap();
        assert_eq!(a, DataStream::new(StreamType::Counter, 0x400));
        assert_eq!(b, DataStream::new(StreamType::Counter, 0x401));
        assert_eq!(c, DataStream::new(StreamType::Unbuffered, 0x400));
    }

    #[test]
    fn test_attach_splits_at_limit() {
        let mut allocator = StreamAllocator::new(3);
        let mut parts = GraphParts::default();
        let stream = allocator.allocate(StreamType::Constant, true).unwrap();
        parts.constants.insert(stream, 42);

        assert_eq!(allocator.attach(stream, &mut parts).unwrap(), stream);
        assert!(parts.nodes.is_empty());

        let split = allocator.attach(stream, &mut parts).unwrap();
        assert_ne!(split, stream);
        assert_eq!(
            parts.nodes[0].to_string(),
            format!("({} always) => {} using copy_all_a", stream, split)
        );
        assert_eq!(parts.constants.get(&split), Some(&42));
        assert!(allocator.is_internal(&split));

        assert_eq!(allocator.attach(stream, &mut parts).unwrap(), split);
        assert_eq!(parts.nodes.len(), 1);
    }

    #[test]
    fn test_user_streams_pass_through() {
        let mut allocator = StreamAllocator::new(2);
        let mut parts = GraphParts::default();
        let user: DataStream = "input 1".parse().unwrap();
        for _ in 0..5 {
            assert_eq!(allocator.attach(user, &mut parts).unwrap(), user);
        }
        assert!(parts.nodes.is_empty());
    }
}

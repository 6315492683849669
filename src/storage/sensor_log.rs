//! Storage façade owning all live state of one sensor graph.

use super::engine::{InMemoryStorageEngine, ScanCallback, StorageArea, StorageEngine, StorageSnapshot};
use super::walker::{StreamWalker, WalkerPolicy};
use crate::config::DeviceModel;
use crate::error::{Result, SensorGraphError};
use crate::id::WalkerId;
use crate::stream::{DataStream, DataStreamSelector, Reading};
use std::collections::HashMap;

/// Holds every reading pushed into a graph and the walkers reading them
///
/// Ephemeral streams (counter, unbuffered, input, constant) are kept as
/// latched values inside each walker. Persisted streams (buffered, output)
/// are delegated to a [`StorageEngine`].
#[derive(Debug)]
pub struct SensorLog {
    engine: Box<dyn StorageEngine>,
    walkers: Vec<Option<StreamWalker>>,
    last_values: HashMap<DataStream, Reading>,
    watches: Vec<DataStreamSelector>,
    watched: Vec<Reading>,
}

impl SensorLog {
    /// Create a sensor log backed by an in-memory engine sized from `model`
    pub fn new(model: &DeviceModel) -> Self {
        Self::with_engine(Box::new(InMemoryStorageEngine::new(model)))
    }

    pub fn with_engine(engine: Box<dyn StorageEngine>) -> Self {
        Self {
            engine,
            walkers: Vec::new(),
            last_values: HashMap::new(),
            watches: Vec::new(),
            watched: Vec::new(),
        }
    }

    pub fn engine(&self) -> &dyn StorageEngine {
        self.engine.as_ref()
    }

    /// Create a walker bound to the single stream named by `selector`
    pub fn create_walker(&mut self, selector: &DataStreamSelector) -> Result<WalkerId> {
        let stream = selector.as_stream().ok_or_else(|| {
            SensorGraphError::Argument(format!(
                "cannot create a walker for wildcard selector '{}'",
                selector
            ))
        })?;

        let walker = match StorageArea::for_type(stream.stream_type) {
            Some(area) => {
                let end = self.engine.first_index(area) + self.engine.count(area) as u64;
                StreamWalker::buffered(stream, area, end)
            }
            None => StreamWalker::latched(stream, self.last_values.get(&stream).copied()),
        };

        let id = WalkerId(self.walkers.len() as u32);
        self.walkers.push(Some(walker));
        tracing::trace!("Created {:?} on {}", id, stream);
        Ok(id)
    }

    /// Release a walker; its id must not be used afterwards
    pub fn destroy_walker(&mut self, id: WalkerId) -> Result<()> {
        let slot = self.walkers.get_mut(id.index()).ok_or_else(|| unknown_walker(id))?;
        if slot.take().is_none() {
            return Err(unknown_walker(id));
        }
        Ok(())
    }

    /// Borrow a walker as a handle exposing `count`/`peek`/`pop`
    pub fn walker(&mut self, id: WalkerId) -> Result<WalkerHandle<'_>> {
        self.get_walker(id)?;
        Ok(WalkerHandle { log: self, id })
    }

    /// Stream a walker is bound to
    pub fn walker_stream(&self, id: WalkerId) -> Result<DataStream> {
        Ok(self.get_walker(id)?.stream)
    }

    pub fn walker_is_buffered(&self, id: WalkerId) -> Result<bool> {
        Ok(self.get_walker(id)?.is_buffered())
    }

    /// Push a reading into `stream`, routed by the stream's category
    ///
    /// On error nothing is modified.
    pub fn push(&mut self, stream: DataStream, reading: Reading) -> Result<Reading> {
        let reading = Reading { stream, ..reading };

        let stored = if stream.is_persisted() {
            self.engine.push(reading)?
        } else {
            for walker in self.walkers.iter().flatten() {
                if walker.stream == stream {
                    walker.check_push()?;
                }
            }
            for walker in self.walkers.iter_mut().flatten() {
                if walker.stream == stream {
                    walker.push_latched(reading);
                }
            }
            reading
        };

        self.last_values.insert(stream, stored);
        if self.watches.iter().any(|w| w.matches(&stream)) {
            self.watched.push(stored);
        }
        Ok(stored)
    }

    pub fn count(&self, id: WalkerId) -> Result<u32> {
        let walker = self.get_walker(id)?;
        match walker.policy {
            WalkerPolicy::Buffered { area, position } => {
                Ok(self.buffered_count(walker.stream, area, position))
            }
            _ => Ok(walker.latched_count()),
        }
    }

    /// Next value of a walker without consuming it
    pub fn peek(&self, id: WalkerId) -> Result<Reading> {
        let walker = self.get_walker(id)?;
        match walker.policy {
            WalkerPolicy::Buffered { area, position } => self
                .buffered_head(walker.stream, area, position)
                .map(|(_, reading)| reading)
                .ok_or_else(|| walker.empty_error()),
            _ => walker.latched_peek(),
        }
    }

    /// Consume and return the next value of a walker
    pub fn pop(&mut self, id: WalkerId) -> Result<Reading> {
        let walker = self.get_walker(id)?;
        match walker.policy {
            WalkerPolicy::Buffered { area, position } => {
                let (index, reading) = self
                    .buffered_head(walker.stream, area, position)
                    .ok_or_else(|| walker.empty_error())?;
                self.set_position(id, index + 1)?;
                Ok(reading)
            }
            _ => self.get_walker_mut(id)?.latched_pop(),
        }
    }

    /// Consume everything pending on a walker
    pub fn skip_all(&mut self, id: WalkerId) -> Result<()> {
        let walker = self.get_walker(id)?;
        match walker.policy {
            WalkerPolicy::Buffered { area, .. } => {
                let end = self.area_end(area);
                self.set_position(id, end)
            }
            _ => {
                self.get_walker_mut(id)?.latched_skip_all();
                Ok(())
            }
        }
    }

    /// Count persisted readings matching `selector` whose id is at least `offset`
    pub fn count_matching(&self, selector: &DataStreamSelector, offset: u32) -> usize {
        let mut count = 0;
        self.for_each_matching(selector, offset, |_| count += 1);
        count
    }

    /// Persisted readings matching `selector` whose id is at least `offset`, oldest first
    pub fn matching_readings(&self, selector: &DataStreamSelector, offset: u32) -> Vec<Reading> {
        let mut readings = Vec::new();
        self.for_each_matching(selector, offset, |r| readings.push(*r));
        readings.sort_by_key(|r| r.reading_id);
        readings
    }

    pub fn scan(
        &self,
        area: StorageArea,
        callback: &mut ScanCallback<'_>,
        start: usize,
        stop: Option<usize>,
    ) -> Result<usize> {
        self.engine.scan(area, callback, start, stop)
    }

    /// Most recent reading pushed to any stream
    pub fn inspect_last(&self, stream: &DataStream) -> Option<Reading> {
        self.last_values.get(stream).copied()
    }

    /// Record every future push matching `selector`
    pub fn watch(&mut self, selector: DataStreamSelector) {
        self.watches.push(selector);
    }

    /// Drain readings recorded by watches, in push order
    pub fn take_watched(&mut self) -> Vec<Reading> {
        std::mem::take(&mut self.watched)
    }

    /// Drop all readings and reset every walker
    pub fn clear(&mut self) {
        self.engine.clear();
        self.last_values.clear();
        self.watched.clear();
        self.reset_walkers();
        tracing::debug!("Cleared sensor log");
    }

    /// Snapshot of all persisted readings
    pub fn dump(&self) -> StorageSnapshot {
        self.engine.dump()
    }

    /// Replace all persisted readings; on error nothing is modified
    ///
    /// Existing walkers on persisted streams are moved past the restored data.
    pub fn restore(&mut self, snapshot: &StorageSnapshot) -> Result<()> {
        self.engine.restore(snapshot)?;

        self.last_values.retain(|stream, _| !stream.is_persisted());
        for reading in snapshot
            .storage_data
            .iter()
            .chain(snapshot.streaming_data.iter())
        {
            self.last_values.insert(reading.stream, *reading);
        }

        for area in StorageArea::ALL {
            let end = self.area_end(area);
            for walker in self.walkers.iter_mut().flatten() {
                if let WalkerPolicy::Buffered {
                    area: walker_area,
                    position,
                } = &mut walker.policy
                {
                    if *walker_area == area {
                        *position = end;
                    }
                }
            }
        }
        Ok(())
    }

    fn reset_walkers(&mut self) {
        let ends: Vec<(StorageArea, u64)> = StorageArea::ALL
            .iter()
            .map(|area| (*area, self.area_end(*area)))
            .collect();

        for walker in self.walkers.iter_mut().flatten() {
            let stream = walker.stream;
            *walker = match walker.policy {
                WalkerPolicy::Buffered { area, .. } => {
                    let end = ends
                        .iter()
                        .find(|(a, _)| *a == area)
                        .map(|(_, end)| *end)
                        .unwrap_or(0);
                    StreamWalker::buffered(stream, area, end)
                }
                _ => StreamWalker::latched(stream, None),
            };
        }
    }

    fn for_each_matching(
        &self,
        selector: &DataStreamSelector,
        offset: u32,
        mut f: impl FnMut(&Reading),
    ) {
        for area in StorageArea::ALL {
            let covered = crate::stream::StreamType::ALL
                .iter()
                .any(|ty| StorageArea::for_type(*ty) == Some(area) && selector.covers_type(*ty));
            if !covered {
                continue;
            }

            // Scanning a whole area from offset 0 cannot fail.
            let _ = self.engine.scan(
                area,
                &mut |_, reading| {
                    if selector.matches(&reading.stream)
                        && reading.reading_id.unwrap_or(0) >= offset
                    {
                        f(reading);
                    }
                    false
                },
                0,
                None,
            );
        }
    }

    /// Readings of `stream` at or after `position`
    fn buffered_count(&self, stream: DataStream, area: StorageArea, position: u64) -> u32 {
        let Some(start) = self.buffered_start(area, position) else {
            return 0;
        };

        let mut count = 0u32;
        let _ = self.engine.scan(
            area,
            &mut |_, reading| {
                if reading.stream == stream {
                    count += 1;
                }
                false
            },
            start,
            None,
        );
        count
    }

    /// First reading of `stream` at or after `position`, with its index
    fn buffered_head(
        &self,
        stream: DataStream,
        area: StorageArea,
        position: u64,
    ) -> Option<(u64, Reading)> {
        let start = self.buffered_start(area, position)?;
        let first = self.engine.first_index(area);

        let mut head = None;
        let _ = self.engine.scan(
            area,
            &mut |offset, reading| {
                if reading.stream == stream {
                    head = Some((first + offset as u64, *reading));
                    return true;
                }
                false
            },
            start,
            None,
        );
        head
    }

    fn buffered_start(&self, area: StorageArea, position: u64) -> Option<usize> {
        let start = position.saturating_sub(self.engine.first_index(area)) as usize;
        (start < self.engine.count(area)).then_some(start)
    }

    fn area_end(&self, area: StorageArea) -> u64 {
        self.engine.first_index(area) + self.engine.count(area) as u64
    }

    fn set_position(&mut self, id: WalkerId, new_position: u64) -> Result<()> {
        if let WalkerPolicy::Buffered { position, .. } = &mut self.get_walker_mut(id)?.policy {
            *position = new_position;
        }
        Ok(())
    }

    fn get_walker(&self, id: WalkerId) -> Result<&StreamWalker> {
        self.walkers
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| unknown_walker(id))
    }

    fn get_walker_mut(&mut self, id: WalkerId) -> Result<&mut StreamWalker> {
        self.walkers
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| unknown_walker(id))
    }
}

fn unknown_walker(id: WalkerId) -> SensorGraphError {
    SensorGraphError::Argument(format!("unknown walker {:?}", id))
}

/// Borrowed view of one walker inside a [`SensorLog`]
pub struct WalkerHandle<'a> {
    log: &'a mut SensorLog,
    id: WalkerId,
}

impl WalkerHandle<'_> {
    pub fn id(&self) -> WalkerId {
        self.id
    }

    pub fn count(&self) -> Result<u32> {
        self.log.count(self.id)
    }

    pub fn peek(&self) -> Result<Reading> {
        self.log.peek(self.id)
    }

    pub fn pop(&mut self) -> Result<Reading> {
        self.log.pop(self.id)
    }

    pub fn skip_all(&mut self) -> Result<()> {
        self.log.skip_all(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::walker::UNBOUNDED_COUNT;
    use proptest::prelude::*;

    fn stream(text: &str) -> DataStream {
        text.parse().unwrap()
    }

    fn walker_for(log: &mut SensorLog, text: &str) -> WalkerId {
        log.create_walker(&text.parse().unwrap()).unwrap()
    }

    fn push(log: &mut SensorLog, text: &str, value: i32) {
        let s = stream(text);
        log.push(s, Reading::new(s, 0, value)).unwrap();
    }

    #[test]
    fn test_wildcard_walker_rejected() {
        let mut log = SensorLog::new(&DeviceModel::default());
        let err = log.create_walker(&"all outputs".parse().unwrap()).unwrap_err();
        assert!(err.is_argument());
    }

    #[test]
    fn test_buffered_drain_interleaved() {
        let model = DeviceModel {
            max_storage_buffer: 20_000,
            ..DeviceModel::default()
        };
        let mut log = SensorLog::new(&model);
        let id = walker_for(&mut log, "buffered 1");
        for i in 0..8_000 {
            push(&mut log, "buffered 1", i);
            push(&mut log, "buffered 2", -i);
        }

        assert_eq!(log.count(id).unwrap(), 8_000);
        for i in 0..8_000 {
            assert_eq!(log.pop(id).unwrap().value, i);
        }
        assert_eq!(log.count(id).unwrap(), 0);
        assert!(log.peek(id).unwrap_err().is_stream_empty());
    }

    #[test]
    fn test_buffered_walker_is_fifo() {
        let mut log = SensorLog::new(&DeviceModel::default());
        let id = walker_for(&mut log, "buffered 1");
        push(&mut log, "buffered 1", 10);
        push(&mut log, "buffered 2", 99);
        push(&mut log, "buffered 1", 20);

        let mut walker = log.walker(id).unwrap();
        assert_eq!(walker.count().unwrap(), 2);
        assert_eq!(walker.peek().unwrap().value, 10);
        assert_eq!(walker.pop().unwrap().value, 10);
        assert_eq!(walker.pop().unwrap().value, 20);
        assert!(walker.pop().unwrap_err().is_stream_empty());
    }

    #[test]
    fn test_buffered_walker_skips_existing_data() {
        let mut log = SensorLog::new(&DeviceModel::default());
        push(&mut log, "output 1", 1);
        let id = walker_for(&mut log, "output 1");
        assert_eq!(log.count(id).unwrap(), 0);
        push(&mut log, "output 1", 2);
        assert_eq!(log.pop(id).unwrap().value, 2);
    }

    #[test]
    fn test_constant_walker_sees_existing_value() {
        let mut log = SensorLog::new(&DeviceModel::default());
        push(&mut log, "constant 1", 5);
        let id = walker_for(&mut log, "constant 1");
        assert_eq!(log.count(id).unwrap(), UNBOUNDED_COUNT);
        assert_eq!(log.pop(id).unwrap().value, 5);
        assert_eq!(log.pop(id).unwrap().value, 5);
    }

    #[test]
    fn test_counter_overflow_leaves_state_untouched() {
        let mut log = SensorLog::new(&DeviceModel::default());
        let id = walker_for(&mut log, "counter 1");
        if let Some(Some(walker)) = log.walkers.get_mut(id.index()) {
            walker.policy = WalkerPolicy::Counter {
                latest: None,
                pending: crate::storage::walker::MAX_PENDING_COUNT,
            };
        }
        let s = stream("counter 1");
        assert!(log.push(s, Reading::new(s, 0, 1)).is_err());
        assert!(log.inspect_last(&s).is_none());
    }

    #[test]
    fn test_count_matching_with_offset() {
        let mut log = SensorLog::new(&DeviceModel::default());
        push(&mut log, "output 1", 1);
        push(&mut log, "output 2", 2);
        push(&mut log, "buffered 1", 3);

        let all_outputs: DataStreamSelector = "all outputs".parse().unwrap();
        assert_eq!(log.count_matching(&all_outputs, 0), 2);
        assert_eq!(log.count_matching(&all_outputs, 2), 1);
        assert_eq!(log.count_matching(&"all persisted".parse().unwrap(), 0), 3);
        assert_eq!(log.count_matching(&"all counters".parse().unwrap(), 0), 0);
    }

    #[test]
    fn test_restore_moves_walkers_to_end() {
        let mut log = SensorLog::new(&DeviceModel::default());
        let id = walker_for(&mut log, "buffered 1");
        push(&mut log, "buffered 1", 1);
        let snapshot = log.dump();

        log.clear();
        assert_eq!(log.count(id).unwrap(), 0);
        log.restore(&snapshot).unwrap();
        assert_eq!(log.count(id).unwrap(), 0);
        assert_eq!(log.dump(), snapshot);
        assert_eq!(log.inspect_last(&stream("buffered 1")).unwrap().value, 1);
    }

    #[test]
    fn test_watch_records_matching_pushes() {
        let mut log = SensorLog::new(&DeviceModel::default());
        log.watch("all outputs".parse().unwrap());
        push(&mut log, "output 1", 1);
        push(&mut log, "unbuffered 1", 2);
        push(&mut log, "output 2", 3);

        let watched = log.take_watched();
        let values: Vec<i32> = watched.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1, 3]);
        assert!(log.take_watched().is_empty());
    }

    #[test]
    fn test_destroyed_walker_is_unknown() {
        let mut log = SensorLog::new(&DeviceModel::default());
        let id = walker_for(&mut log, "input 1");
        log.destroy_walker(id).unwrap();
        assert!(log.count(id).is_err());
        assert!(log.destroy_walker(id).is_err());
    }

    proptest! {
        #[test]
        fn test_counter_pops_latest_value(values in prop::collection::vec(any::<i32>(), 1..50)) {
            let mut log = SensorLog::new(&DeviceModel::default());
            let id = walker_for(&mut log, "counter 3");
            for value in &values {
                push(&mut log, "counter 3", *value);
            }

            let latest = *values.last().unwrap();
            prop_assert_eq!(log.count(id).unwrap() as usize, values.len());
            for _ in 0..values.len() {
                prop_assert_eq!(log.pop(id).unwrap().value, latest);
            }
            prop_assert_eq!(log.count(id).unwrap(), 0);
            prop_assert!(log.pop(id).unwrap_err().is_stream_empty());
        }

        #[test]
        fn test_unbuffered_count_never_exceeds_one(values in prop::collection::vec(any::<i32>(), 1..20)) {
            let mut log = SensorLog::new(&DeviceModel::default());
            let id = walker_for(&mut log, "unbuffered 4");
            for value in &values {
                push(&mut log, "unbuffered 4", *value);
            }

            prop_assert_eq!(log.count(id).unwrap(), 1);
            prop_assert_eq!(log.pop(id).unwrap().value, *values.last().unwrap());
            prop_assert_eq!(log.count(id).unwrap(), 0);
        }

        #[test]
        fn test_constant_never_exhausts(values in prop::collection::vec(any::<i32>(), 1..20), pops in 1usize..40) {
            let mut log = SensorLog::new(&DeviceModel::default());
            let id = walker_for(&mut log, "constant 2");
            for value in &values {
                push(&mut log, "constant 2", *value);
            }

            for _ in 0..pops {
                prop_assert_eq!(log.pop(id).unwrap().value, *values.last().unwrap());
            }
            prop_assert_eq!(log.count(id).unwrap(), UNBOUNDED_COUNT);
        }

        #[test]
        fn test_buffered_pops_in_push_order(values in prop::collection::vec(any::<i32>(), 0..50)) {
            let mut log = SensorLog::new(&DeviceModel::default());
            let id = walker_for(&mut log, "buffered 5");
            for value in &values {
                push(&mut log, "buffered 5", *value);
            }

            prop_assert_eq!(log.count(id).unwrap() as usize, values.len());
            for value in &values {
                prop_assert_eq!(log.pop(id).unwrap().value, *value);
            }
            prop_assert!(log.pop(id).unwrap_err().is_stream_empty());
        }
    }
}

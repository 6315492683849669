//! Capacity-bounded FIFO storage for persisted readings.
//!
//! Buffered readings live in the `storage` area and output readings in the
//! `streaming` area. Every stored reading receives the next value of a
//! single `reading_id` counter shared by both areas.
//!
//! Each area also tracks how many readings were ever removed from its front
//! so that walkers can hold absolute positions that stay valid across
//! rollover, `clear` and `restore`.

use crate::config::DeviceModel;
use crate::error::{Result, SensorGraphError};
use crate::stream::{Reading, StreamType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// One of the two persisted areas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    /// Buffered readings
    Storage,
    /// Output readings
    Streaming,
}

impl StorageArea {
    pub const ALL: [StorageArea; 2] = [StorageArea::Storage, StorageArea::Streaming];

    /// Area holding readings of this stream type, if it is persisted
    pub fn for_type(stream_type: StreamType) -> Option<Self> {
        match stream_type {
            StreamType::Buffered => Some(StorageArea::Storage),
            StreamType::Output => Some(StorageArea::Streaming),
            _ => None,
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageArea::Storage => write!(f, "storage"),
            StorageArea::Streaming => write!(f, "streaming"),
        }
    }
}

/// Snapshot of both persisted areas, oldest reading first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub storage_data: Vec<Reading>,
    pub streaming_data: Vec<Reading>,
}

impl StorageSnapshot {
    pub fn area(&self, area: StorageArea) -> &[Reading] {
        match area {
            StorageArea::Storage => &self.storage_data,
            StorageArea::Streaming => &self.streaming_data,
        }
    }
}

/// Callback invoked by [`StorageEngine::scan`]; returning `true` stops the scan
pub type ScanCallback<'a> = dyn FnMut(usize, &Reading) -> bool + 'a;

/// A pluggable backend for persisted readings
pub trait StorageEngine: fmt::Debug {
    /// Maximum number of readings an area can hold
    fn capacity(&self, area: StorageArea) -> usize;

    /// Number of readings currently held in an area
    fn count(&self, area: StorageArea) -> usize;

    /// Absolute index of the oldest reading still held in an area
    fn first_index(&self, area: StorageArea) -> u64;

    /// Store a persisted reading, returning it with its assigned `reading_id`
    fn push(&mut self, reading: Reading) -> Result<Reading>;

    /// Reading at `offset` from the oldest reading of an area
    fn get(&self, area: StorageArea, offset: usize) -> Result<Reading>;

    /// Visit readings from `start` to `stop` (inclusive, default last)
    ///
    /// Returns the number of readings visited, including the one that
    /// stopped the scan.
    fn scan(
        &self,
        area: StorageArea,
        callback: &mut ScanCallback<'_>,
        start: usize,
        stop: Option<usize>,
    ) -> Result<usize>;

    /// Drop every stored reading
    fn clear(&mut self);

    fn dump(&self) -> StorageSnapshot;

    /// Replace all stored readings; on error nothing is modified
    fn restore(&mut self, snapshot: &StorageSnapshot) -> Result<()>;
}

#[derive(Debug)]
struct ReadingBuffer {
    readings: VecDeque<Reading>,
    capacity: usize,
    /// Readings ever removed from the front
    removed: u64,
}

impl ReadingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            readings: VecDeque::new(),
            capacity,
            removed: 0,
        }
    }

    fn drop_front(&mut self, count: usize) {
        let count = count.min(self.readings.len());
        self.readings.drain(..count);
        self.removed += count as u64;
    }
}

/// In-memory storage engine sized from a [`DeviceModel`]
#[derive(Debug)]
pub struct InMemoryStorageEngine {
    storage: ReadingBuffer,
    streaming: ReadingBuffer,
    next_id: u32,
    rollover: bool,
    erase_size: usize,
}

impl InMemoryStorageEngine {
    pub fn new(model: &DeviceModel) -> Self {
        Self {
            storage: ReadingBuffer::new(model.max_storage_buffer as usize),
            streaming: ReadingBuffer::new(model.max_streaming_buffer as usize),
            next_id: 1,
            rollover: model.storage_rollover,
            erase_size: model.buffer_erase_size as usize,
        }
    }

    /// The `reading_id` the next stored reading will receive
    pub fn next_reading_id(&self) -> u32 {
        self.next_id
    }

    fn buffer(&self, area: StorageArea) -> &ReadingBuffer {
        match area {
            StorageArea::Storage => &self.storage,
            StorageArea::Streaming => &self.streaming,
        }
    }

    fn buffer_mut(&mut self, area: StorageArea) -> &mut ReadingBuffer {
        match area {
            StorageArea::Storage => &mut self.storage,
            StorageArea::Streaming => &mut self.streaming,
        }
    }

    /// Check one area of a snapshot and work out whether ids must be assigned
    fn validate_area(&self, area: StorageArea, data: &[Reading]) -> Result<bool> {
        let capacity = self.buffer(area).capacity;
        if data.len() > capacity {
            return Err(SensorGraphError::Argument(format!(
                "cannot restore {} readings into the {} area (capacity {})",
                data.len(),
                area,
                capacity
            )));
        }

        if let Some(bad) = data
            .iter()
            .find(|r| StorageArea::for_type(r.stream.stream_type) != Some(area))
        {
            return Err(SensorGraphError::Argument(format!(
                "reading for {} does not belong in the {} area",
                bad.stream, area
            )));
        }

        let with_ids = data.iter().filter(|r| r.reading_id.is_some()).count();
        if with_ids != 0 && with_ids != data.len() {
            return Err(SensorGraphError::Argument(format!(
                "{} area mixes readings with and without reading ids",
                area
            )));
        }

        let increasing = with_ids == 0
            || data
                .windows(2)
                .all(|pair| pair[0].reading_id < pair[1].reading_id);
        if !increasing {
            return Err(SensorGraphError::Argument(format!(
                "reading ids in the {} area are not strictly increasing",
                area
            )));
        }

        Ok(with_ids == 0 && !data.is_empty())
    }
}

impl StorageEngine for InMemoryStorageEngine {
    fn capacity(&self, area: StorageArea) -> usize {
        self.buffer(area).capacity
    }

    fn count(&self, area: StorageArea) -> usize {
        self.buffer(area).readings.len()
    }

    fn first_index(&self, area: StorageArea) -> u64 {
        self.buffer(area).removed
    }

    fn push(&mut self, reading: Reading) -> Result<Reading> {
        let area = StorageArea::for_type(reading.stream.stream_type).ok_or_else(|| {
            SensorGraphError::Argument(format!(
                "stream {} is not stored by the storage engine",
                reading.stream
            ))
        })?;

        let reading_id = self.next_id;
        let next_id = reading_id.checked_add(1).ok_or_else(|| {
            SensorGraphError::Internal("reading id counter overflowed".to_string())
        })?;

        let rollover = self.rollover;
        let erase_size = self.erase_size;
        let buffer = self.buffer_mut(area);
        if buffer.readings.len() >= buffer.capacity {
            if !rollover || buffer.capacity == 0 {
                return Err(SensorGraphError::StorageFull {
                    area,
                    capacity: buffer.capacity,
                });
            }
            tracing::debug!("{} area full, dropping {} oldest readings", area, erase_size);
            buffer.drop_front(erase_size.max(1));
        }

        let stored = Reading {
            reading_id: Some(reading_id),
            ..reading
        };
        buffer.readings.push_back(stored);
        self.next_id = next_id;
        Ok(stored)
    }

    fn get(&self, area: StorageArea, offset: usize) -> Result<Reading> {
        self.buffer(area)
            .readings
            .get(offset)
            .copied()
            .ok_or_else(|| {
                SensorGraphError::Argument(format!(
                    "offset {} out of range for the {} area ({} readings)",
                    offset,
                    area,
                    self.count(area)
                ))
            })
    }

    fn scan(
        &self,
        area: StorageArea,
        callback: &mut ScanCallback<'_>,
        start: usize,
        stop: Option<usize>,
    ) -> Result<usize> {
        let readings = &self.buffer(area).readings;

        if start > readings.len() {
            return Err(SensorGraphError::Argument(format!(
                "scan start {} past the end of the {} area ({} readings)",
                start,
                area,
                readings.len()
            )));
        }

        let end = match stop {
            Some(stop) if stop >= readings.len() => {
                return Err(SensorGraphError::Argument(format!(
                    "scan stop {} past the end of the {} area ({} readings)",
                    stop,
                    area,
                    readings.len()
                )))
            }
            Some(stop) => stop + 1,
            None => readings.len(),
        };

        let mut visited = 0;
        for (offset, reading) in readings.iter().enumerate().take(end).skip(start) {
            visited += 1;
            if callback(offset, reading) {
                break;
            }
        }
        Ok(visited)
    }

    fn clear(&mut self) {
        for area in StorageArea::ALL {
            let buffer = self.buffer_mut(area);
            let len = buffer.readings.len();
            buffer.drop_front(len);
        }
    }

    fn dump(&self) -> StorageSnapshot {
        StorageSnapshot {
            storage_data: self.storage.readings.iter().copied().collect(),
            streaming_data: self.streaming.readings.iter().copied().collect(),
        }
    }

    fn restore(&mut self, snapshot: &StorageSnapshot) -> Result<()> {
        let assign_storage = self.validate_area(StorageArea::Storage, &snapshot.storage_data)?;
        let assign_streaming =
            self.validate_area(StorageArea::Streaming, &snapshot.streaming_data)?;

        let max_id = snapshot
            .storage_data
            .iter()
            .chain(snapshot.streaming_data.iter())
            .filter_map(|r| r.reading_id)
            .max()
            .unwrap_or(0);

        let missing = [
            (assign_storage, snapshot.storage_data.len()),
            (assign_streaming, snapshot.streaming_data.len()),
        ]
        .iter()
        .filter(|(assign, _)| *assign)
        .map(|(_, len)| *len as u64)
        .sum::<u64>();

        if max_id as u64 + missing + 1 > u32::MAX as u64 {
            return Err(SensorGraphError::Argument(
                "restored reading ids exhaust the id space".to_string(),
            ));
        }

        // Validation is complete; nothing below can fail.
        self.clear();
        let mut next_id = max_id + 1;
        for (area, data, assign) in [
            (StorageArea::Storage, &snapshot.storage_data, assign_storage),
            (StorageArea::Streaming, &snapshot.streaming_data, assign_streaming),
        ] {
            let buffer = self.buffer_mut(area);
            for reading in data {
                let mut stored = *reading;
                if assign {
                    stored.reading_id = Some(next_id);
                    next_id += 1;
                }
                buffer.readings.push_back(stored);
            }
        }
        self.next_id = next_id;

        tracing::debug!(
            "Restored {} storage and {} streaming readings",
            snapshot.storage_data.len(),
            snapshot.streaming_data.len()
        );
        Ok(())
    }
}

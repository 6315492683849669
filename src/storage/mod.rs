//! Reading storage: the persisted engine, per-stream walkers and the
//! [`SensorLog`] façade tying them together.

pub mod engine;
pub mod sensor_log;
pub mod walker;

pub use engine::{InMemoryStorageEngine, ScanCallback, StorageArea, StorageEngine, StorageSnapshot};
pub use sensor_log::{SensorLog, WalkerHandle};
pub use walker::{StreamWalker, WalkerPolicy, UNBOUNDED_COUNT};

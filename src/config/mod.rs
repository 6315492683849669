//! Configuration module for sensorgraph-rs
//!
//! This module holds the two kinds of configuration the engine deals with:
//! - [`DeviceModel`]: the read-only capacity/feature table of the target
//!   device, passed explicitly into the storage engine, the compiler, the
//!   optimizer and the simulator
//! - [`ConfigValue`]: typed config variables that a sensor graph assigns to
//!   tiles with `set` statements
//!
//! # Device model files
//!
//! Device models are stored as TOML. Every key is optional and falls back
//! to the defaults below:
//!
//! ```toml
//! max_nodes = 128
//! max_storage_buffer = 16128
//! storage_rollover = false
//! ```

pub mod value;

pub use value::{ConfigType, ConfigValue};

use crate::error::{Result, SensorGraphError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default maximum number of nodes in a graph
pub const DEFAULT_MAX_NODES: u64 = 128;

/// Default maximum number of streamers in a graph
pub const DEFAULT_MAX_STREAMERS: u64 = 8;

/// Default maximum number of node inputs attached to a single stream
pub const DEFAULT_MAX_NODE_OUTPUTS: u64 = 4;

/// Default capacity of the storage (buffered) area
pub const DEFAULT_MAX_STORAGE_BUFFER: u64 = 16128;

/// Default capacity of the streaming (output) area
pub const DEFAULT_MAX_STREAMING_BUFFER: u64 = 48896;

/// Default number of readings dropped at once when an area rolls over
pub const DEFAULT_BUFFER_ERASE_SIZE: u64 = 256;

/// Capacity and feature table of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceModel {
    /// Name of the device model
    pub name: String,
    pub max_nodes: u64,
    pub max_streamers: u64,
    pub max_node_outputs: u64,
    pub max_storage_buffer: u64,
    pub max_streaming_buffer: u64,
    pub buffer_erase_size: u64,
    /// Drop the oldest readings instead of failing when an area is full
    pub storage_rollover: bool,
    pub fast_tick_enabled: bool,
    pub user_ticks_enabled: bool,
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            max_nodes: DEFAULT_MAX_NODES,
            max_streamers: DEFAULT_MAX_STREAMERS,
            max_node_outputs: DEFAULT_MAX_NODE_OUTPUTS,
            max_storage_buffer: DEFAULT_MAX_STORAGE_BUFFER,
            max_streaming_buffer: DEFAULT_MAX_STREAMING_BUFFER,
            buffer_erase_size: DEFAULT_BUFFER_ERASE_SIZE,
            storage_rollover: false,
            fast_tick_enabled: true,
            user_ticks_enabled: true,
        }
    }
}

impl DeviceModel {
    /// Look up a named capacity or feature value
    ///
    /// Boolean features are reported as 0 or 1. Unknown names return `None`.
    pub fn get(&self, name: &str) -> Option<u64> {
        let value = match name {
            "max_nodes" => self.max_nodes,
            "max_streamers" => self.max_streamers,
            "max_node_outputs" => self.max_node_outputs,
            "max_storage_buffer" => self.max_storage_buffer,
            "max_streaming_buffer" => self.max_streaming_buffer,
            "buffer_erase_size" => self.buffer_erase_size,
            "storage_rollover" => self.storage_rollover as u64,
            "fast_tick_enabled" => self.fast_tick_enabled as u64,
            "user_ticks_enabled" => self.user_ticks_enabled as u64,
            _ => return None,
        };
        Some(value)
    }

    /// Load a device model from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SensorGraphError::Config(format!("Failed to read device model {:?}: {}", path, e))
        })?;

        Self::from_toml(&content).map_err(|e| e.with_context(format!("{:?}", path)))
    }

    /// Parse a device model from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let model: DeviceModel = toml::from_str(content)
            .map_err(|e| SensorGraphError::Config(format!("Failed to parse device model: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    /// Save this device model to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            SensorGraphError::Config(format!("Failed to serialize device model: {}", e))
        })?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| SensorGraphError::Config(format!("Failed to write device model: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        if self.max_node_outputs < 2 {
            return Err(SensorGraphError::Config(
                "max_node_outputs must be at least 2".to_string(),
            ));
        }
        if self.storage_rollover && self.buffer_erase_size == 0 {
            return Err(SensorGraphError::Config(
                "buffer_erase_size must be non-zero when storage_rollover is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_model_values() {
        let model = DeviceModel::default();
        assert_eq!(model.get("max_storage_buffer"), Some(16128));
        assert_eq!(model.get("max_streaming_buffer"), Some(48896));
        assert_eq!(model.get("max_node_outputs"), Some(4));
        assert_eq!(model.get("fast_tick_enabled"), Some(1));
        assert_eq!(model.get("no_such_key"), None);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let model = DeviceModel::from_toml("max_storage_buffer = 10\nstorage_rollover = true\n")
            .unwrap();
        assert_eq!(model.max_storage_buffer, 10);
        assert!(model.storage_rollover);
        assert_eq!(model.max_streaming_buffer, DEFAULT_MAX_STREAMING_BUFFER);
    }

    #[test]
    fn test_invalid_model_rejected() {
        assert!(DeviceModel::from_toml("max_node_outputs = 1").is_err());
        assert!(DeviceModel::from_toml("max_nodes = \"many\"").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.toml");

        let model = DeviceModel {
            name: "nrf52".to_string(),
            max_nodes: 32,
            ..Default::default()
        };
        model.save(&path).unwrap();

        let loaded = DeviceModel::load(&path).unwrap();
        assert_eq!(loaded, model);
    }
}

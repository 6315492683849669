//! Error handling for sensorgraph-rs
//!
//! This module defines the error taxonomy shared by every component and a
//! Result alias for use throughout the crate.

use crate::storage::StorageArea;
use thiserror::Error;

/// Main error type for sensor graph operations
#[derive(Error, Debug)]
pub enum SensorGraphError {
    /// Malformed external input (stream text, stimulus text, oversize restore)
    #[error("Argument error: {0}")]
    Argument(String),

    /// Contradictory or incomplete compiled artifact, including cycles
    #[error("Data error: {0}")]
    Data(String),

    /// Grammar violation in sensor graph source
    #[error("Syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// Pop or peek on an exhausted walker
    #[error("Stream empty: {0}")]
    StreamEmpty(String),

    /// Push beyond the configured capacity of a storage area
    #[error("Storage full: {area} area holds at most {capacity} readings")]
    StorageFull { area: StorageArea, capacity: usize },

    /// Invariant violation inside the engine
    #[error("Internal error: {0}")]
    Internal(String),

    /// Errors related to device model loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SensorGraphError>,
    },
}

impl SensorGraphError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SensorGraphError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error with all context layers removed
    pub fn kind(&self) -> &SensorGraphError {
        match self {
            SensorGraphError::WithContext { source, .. } => source.kind(),
            other => other,
        }
    }

    /// Create a syntax error for a 1-based source line
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        SensorGraphError::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn is_argument(&self) -> bool {
        matches!(self.kind(), SensorGraphError::Argument(_))
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind(), SensorGraphError::Data(_))
    }

    pub fn is_stream_empty(&self) -> bool {
        matches!(self.kind(), SensorGraphError::StreamEmpty(_))
    }

    pub fn is_storage_full(&self) -> bool {
        matches!(self.kind(), SensorGraphError::StorageFull { .. })
    }

    /// Line number of a syntax error, if this is one
    pub fn syntax_line(&self) -> Option<usize> {
        match self.kind() {
            SensorGraphError::Syntax { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SensorGraphError {
    fn from(err: serde_json::Error) -> Self {
        SensorGraphError::Serialization(err.to_string())
    }
}

/// Result type alias for sensor graph operations
pub type Result<T> = std::result::Result<T, SensorGraphError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SensorGraphError::Argument("unknown stream type 'foo'".to_string());
        assert_eq!(err.to_string(), "Argument error: unknown stream type 'foo'");
    }

    #[test]
    fn test_error_with_context() {
        let err = SensorGraphError::Data("cycle".to_string());
        let with_ctx = err.with_context("Failed to compile");
        assert!(with_ctx.to_string().contains("Failed to compile"));
        assert!(with_ctx.is_data());
    }

    #[test]
    fn test_syntax_error_carries_line() {
        let err = SensorGraphError::syntax(7, "expected ';'");
        assert!(err.to_string().contains("line 7"));
        assert_eq!(err.with_context("parse").syntax_line(), Some(7));
    }

    #[test]
    fn test_storage_full_display() {
        let err = SensorGraphError::StorageFull {
            area: StorageArea::Streaming,
            capacity: 10,
        };
        assert!(err.to_string().contains("streaming"));
        assert!(err.is_storage_full());
    }
}

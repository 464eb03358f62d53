//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when handling process events.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The event payload failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}

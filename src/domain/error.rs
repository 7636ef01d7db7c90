//! Error taxonomy for the ingestion pipeline

use crate::domain::types::RoomId;
use thiserror::Error;

/// Errors raised while moving events from the bus into the store
#[derive(Debug, Error)]
pub enum IngestError {
    /// Payload did not decode into a typed event; dropped without retry
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    /// Transition for a room outside the configured set; dropped
    #[error("unknown room {0}")]
    UnknownRoom(RoomId),

    /// Bus connection dropped or could not be established
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Every reconnect attempt failed; the link will not retry again
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Event store rejected an append; the event is lost
    #[error("store write failed: {0}")]
    StoreWriteFailure(#[from] StoreError),
}

/// Errors raised by event store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid stored value: {0}")]
    InvalidValue(String),

    #[error("store task failed: {0}")]
    Task(String),
}

impl IngestError {
    pub fn malformed(topic: &str, reason: impl std::fmt::Display) -> Self {
        IngestError::MalformedPayload { topic: topic.to_string(), reason: reason.to_string() }
    }

    /// Errors that drop a single event without affecting the pipeline
    pub fn is_droppable(&self) -> bool {
        matches!(self, IngestError::MalformedPayload { .. } | IngestError::UnknownRoom(_))
    }
}

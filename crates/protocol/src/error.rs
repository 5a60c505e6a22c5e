//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding channel frames and events.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },

    #[error("Unknown direction: {0}")]
    UnknownDirection(String),
}

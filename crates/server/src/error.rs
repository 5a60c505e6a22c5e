//! Session error types.

use thiserror::Error;

/// Errors surfaced to clients as join `{reason}` replies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid player_id")]
    InvalidPlayerId,

    #[error("board full")]
    BoardFull,

    #[error("session closed")]
    Closed,
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("outbound queue closed")]
    OutboundClosed,
}

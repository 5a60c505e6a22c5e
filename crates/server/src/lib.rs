//! Authoritative gridsnake game server library.

pub mod board;
pub mod collision;
pub mod config;
pub mod error;
pub mod player;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConnectionError, SessionError};
pub use server::{
    BoardEvent, Client, ConnectionLimits, Inbound, SessionHandle, SessionRegistry,
    SessionSettings, SocketParams, pump, run, write_frames,
};

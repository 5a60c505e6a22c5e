//! Event definitions for the game channel.
//!
//! This module contains both client->server and server->client events.

mod client;
mod server;

pub use client::*;
pub use server::*;

/// Events a client may push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// Join a topic.
    Join,
    /// Leave a topic.
    ChannelLeave,
    /// Socket keep-alive on the `phoenix` topic.
    Heartbeat,
    /// Start the board.
    Start,
    /// Change direction.
    Move,
    /// Leave the game (sent on page unload).
    Leave,
}

impl ClientEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            ClientEvent::Join => "phx_join",
            ClientEvent::ChannelLeave => "phx_leave",
            ClientEvent::Heartbeat => "heartbeat",
            ClientEvent::Start => "start",
            ClientEvent::Move => "move",
            ClientEvent::Leave => "leave",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "phx_join" => Some(ClientEvent::Join),
            "phx_leave" => Some(ClientEvent::ChannelLeave),
            "heartbeat" => Some(ClientEvent::Heartbeat),
            "start" => Some(ClientEvent::Start),
            "move" => Some(ClientEvent::Move),
            "leave" => Some(ClientEvent::Leave),
            _ => None,
        }
    }
}

/// Events the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// Reply to a pushed event carrying a ref.
    Reply,
    /// Channel crashed on the server.
    Error,
    /// Channel closed by the server.
    Close,
    /// Full board snapshot.
    Update,
    /// Board transitioned to running.
    Started,
}

impl ServerEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            ServerEvent::Reply => "phx_reply",
            ServerEvent::Error => "phx_error",
            ServerEvent::Close => "phx_close",
            ServerEvent::Update => "update",
            ServerEvent::Started => "started",
        }
    }
}

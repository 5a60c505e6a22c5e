//! Client -> Server event parsing.

use serde::Deserialize;
use serde_json::Value;

use super::ClientEvent;
use crate::{Direction, Frame, ProtocolError};

/// Parameters sent with `phx_join`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JoinParams {
    #[serde(default)]
    pub player_id: Option<String>,
}

#[derive(Deserialize)]
struct MovePayload {
    direction: String,
}

/// Parsed client event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    /// `phx_join` with its params.
    Join(JoinParams),
    /// `phx_leave`.
    ChannelLeave,
    /// `heartbeat`.
    Heartbeat,
    /// `start`.
    Start,
    /// `move` with a direction.
    Move { direction: Direction },
    /// `leave`.
    Leave,
}

impl ClientPacket {
    /// Parse the event and payload of a decoded frame.
    pub fn parse(frame: &Frame) -> Result<Self, ProtocolError> {
        let event = ClientEvent::from_name(&frame.event)
            .ok_or_else(|| ProtocolError::UnknownEvent(frame.event.clone()))?;

        match event {
            ClientEvent::Join => {
                // The JS client sends `{}` when no params are given; tolerate null too.
                let params = match &frame.payload {
                    Value::Null => JoinParams::default(),
                    payload => JoinParams::deserialize(payload)
                        .map_err(|e| invalid(event, e.to_string()))?,
                };
                Ok(ClientPacket::Join(params))
            }
            ClientEvent::ChannelLeave => Ok(ClientPacket::ChannelLeave),
            ClientEvent::Heartbeat => Ok(ClientPacket::Heartbeat),
            ClientEvent::Start => Ok(ClientPacket::Start),
            ClientEvent::Move => {
                let payload = MovePayload::deserialize(&frame.payload)
                    .map_err(|e| invalid(event, e.to_string()))?;
                let direction = payload.direction.parse()?;
                Ok(ClientPacket::Move { direction })
            }
            ClientEvent::Leave => Ok(ClientPacket::Leave),
        }
    }
}

fn invalid(event: ClientEvent, reason: String) -> ProtocolError {
    ProtocolError::InvalidPayload {
        event: event.as_str().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_move() {
        let frame = Frame::new("game:b", "move", json!({"direction": "left"}));
        assert_eq!(
            ClientPacket::parse(&frame).unwrap(),
            ClientPacket::Move {
                direction: Direction::Left
            }
        );
    }

    #[test]
    fn test_parse_move_rejects_bad_direction() {
        let frame = Frame::new("game:b", "move", json!({"direction": "north"}));
        assert!(matches!(
            ClientPacket::parse(&frame),
            Err(ProtocolError::UnknownDirection(_))
        ));

        let frame = Frame::new("game:b", "move", json!({}));
        assert!(matches!(
            ClientPacket::parse(&frame),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_parse_join_params() {
        let frame = Frame::new("game:b", "phx_join", json!({"player_id": "player-12"}));
        assert_eq!(
            ClientPacket::parse(&frame).unwrap(),
            ClientPacket::Join(JoinParams {
                player_id: Some("player-12".into())
            })
        );

        let frame = Frame::new("game:b", "phx_join", json!({}));
        assert_eq!(
            ClientPacket::parse(&frame).unwrap(),
            ClientPacket::Join(JoinParams::default())
        );
    }

    #[test]
    fn test_unknown_event() {
        let frame = Frame::new("game:b", "teleport", json!({}));
        assert!(matches!(
            ClientPacket::parse(&frame),
            Err(ProtocolError::UnknownEvent(e)) if e == "teleport"
        ));
    }
}

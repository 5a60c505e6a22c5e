//! Server -> Client frame building.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::ServerEvent;
use crate::{Color, Frame, Point};

/// One snake as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPayload {
    /// Segments, head first.
    pub body: Vec<[i32; 2]>,
    pub color: Color,
}

/// Payload of the `update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub players: BTreeMap<String, PlayerPayload>,
    /// `null` until the board has started.
    pub dot: Option<[i32; 2]>,
    /// `[cols, rows]`.
    pub size: [u32; 2],
}

impl UpdatePayload {
    pub fn dot_point(&self) -> Option<Point> {
        self.dot.map(Point::from_array)
    }
}

/// Ok response for a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub board_id: String,
}

/// Build a `phx_reply` with status `ok` for the given request frame.
pub fn build_reply_ok(request: &Frame, response: Value) -> Frame {
    build_reply(request, "ok", response)
}

/// Build a `phx_reply` with status `error` and a `{reason}` response.
pub fn build_reply_error(request: &Frame, reason: &str) -> Frame {
    build_reply(request, "error", json!({ "reason": reason }))
}

fn build_reply(request: &Frame, status: &str, response: Value) -> Frame {
    Frame::new(
        request.topic.clone(),
        ServerEvent::Reply.as_str(),
        json!({ "status": status, "response": response }),
    )
    .with_join_ref(request.join_ref.clone())
    .with_ref(request.msg_ref.clone())
}

/// Build an `update` push.
pub fn build_update(topic: &str, join_ref: Option<String>, payload: &UpdatePayload) -> Frame {
    // Serializing plain maps, arrays and enums cannot fail.
    let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
    Frame::new(topic, ServerEvent::Update.as_str(), payload).with_join_ref(join_ref)
}

/// Build a `started` push.
pub fn build_started(topic: &str, join_ref: Option<String>) -> Frame {
    Frame::new(topic, ServerEvent::Started.as_str(), json!({})).with_join_ref(join_ref)
}

/// Build a `phx_error` push telling the client its channel crashed.
pub fn build_channel_error(topic: &str, join_ref: Option<String>) -> Frame {
    Frame::new(topic, ServerEvent::Error.as_str(), json!({})).with_join_ref(join_ref)
}

/// Build a `phx_close` push.
pub fn build_channel_close(topic: &str, join_ref: Option<String>) -> Frame {
    Frame::new(topic, ServerEvent::Close.as_str(), json!({})).with_join_ref(join_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_echoes_refs() {
        let request = Frame::new("game:b", "phx_join", json!({}))
            .with_join_ref(Some("1".into()))
            .with_ref(Some("1".into()));
        let reply = build_reply_ok(&request, json!({"board_id": "b"}));
        assert_eq!(
            reply.encode().unwrap(),
            r#"["1","1","game:b","phx_reply",{"response":{"board_id":"b"},"status":"ok"}]"#
        );

        let reply = build_reply_error(&request, "board full");
        assert_eq!(reply.payload["status"], "error");
        assert_eq!(reply.payload["response"]["reason"], "board full");
    }

    #[test]
    fn test_update_shape() {
        let mut players = BTreeMap::new();
        players.insert(
            "player-1".to_string(),
            PlayerPayload {
                body: vec![[3, 4], [2, 4]],
                color: Color::Green,
            },
        );
        let payload = UpdatePayload {
            players,
            dot: Some([7, 1]),
            size: [10, 12],
        };
        let frame = build_update("game:b", Some("5".into()), &payload);
        assert_eq!(frame.event, "update");
        assert_eq!(
            frame.payload,
            json!({
                "players": {"player-1": {"body": [[3, 4], [2, 4]], "color": "green"}},
                "dot": [7, 1],
                "size": [10, 12]
            })
        );
        assert_eq!(payload.dot_point(), Some(Point::new(7, 1)));
    }

    #[test]
    fn test_unstarted_update_has_null_dot() {
        let payload = UpdatePayload {
            players: BTreeMap::new(),
            dot: None,
            size: [10, 10],
        };
        let frame = build_update("game:b", None, &payload);
        assert!(frame.payload["dot"].is_null());
    }
}

//! Channel frame codec.
//!
//! Frames travel as websocket text messages in the Phoenix V2 JSON layout:
//! `[join_ref, ref, topic, event, payload]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// One channel frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Ref of the `phx_join` that opened the channel this frame belongs to.
    pub join_ref: Option<String>,
    /// Ref of this message; replies echo it back.
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

#[derive(Serialize, Deserialize)]
struct WireFrame(Option<String>, Option<String>, String, String, Value);

impl Frame {
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            join_ref: None,
            msg_ref: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    pub fn with_join_ref(mut self, join_ref: Option<String>) -> Self {
        self.join_ref = join_ref;
        self
    }

    pub fn with_ref(mut self, msg_ref: Option<String>) -> Self {
        self.msg_ref = msg_ref;
        self
    }

    /// Decode a frame from a websocket text message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let WireFrame(join_ref, msg_ref, topic, event, payload) = serde_json::from_str(text)?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }

    /// Encode the frame as a websocket text message.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let wire = WireFrame(
            self.join_ref.clone(),
            self.msg_ref.clone(),
            self.topic.clone(),
            self.event.clone(),
            self.payload.clone(),
        );
        Ok(serde_json::to_string(&wire)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join() {
        let frame = Frame::decode(r#"["3","3","game:board-1","phx_join",{"player_id":"player-7"}]"#)
            .unwrap();
        assert_eq!(frame.join_ref.as_deref(), Some("3"));
        assert_eq!(frame.msg_ref.as_deref(), Some("3"));
        assert_eq!(frame.topic, "game:board-1");
        assert_eq!(frame.event, "phx_join");
        assert_eq!(frame.payload["player_id"], "player-7");
    }

    #[test]
    fn test_encode_null_refs() {
        let frame = Frame::new("game:b", "started", json!({}));
        assert_eq!(frame.encode().unwrap(), r#"[null,null,"game:b","started",{}]"#);
    }

    #[test]
    fn test_decode_rejects_short_array() {
        assert!(Frame::decode(r#"["1","1","game:b"]"#).is_err());
        assert!(Frame::decode("not json").is_err());
    }
}

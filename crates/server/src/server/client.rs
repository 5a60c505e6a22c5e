//! Per-connection channel state.
//!
//! A [`Client`] turns decoded frames into session commands and replies. It
//! never writes to the socket directly: every outgoing frame goes through the
//! bounded `outbound` queue, which a separate writer task drains.

use std::collections::HashMap;
use std::net::SocketAddr;

use protocol::packets::{self, ClientPacket, JoinParams, JoinResponse};
use protocol::{Frame, SOCKET_TOPIC, board_id_from_topic};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, SessionError};

use super::game::SessionHandle;
use super::gateway::{BoardEvent, Subscription};
use super::registry::SessionRegistry;

const UNMATCHED_TOPIC: &str = "unmatched topic";

/// One joined `game:<board_id>` channel.
struct JoinedChannel {
    player_id: String,
    join_ref: Option<String>,
    session: SessionHandle,
    forwarder: JoinHandle<()>,
    /// Set once a `leave` event detached the player; the channel keeps
    /// receiving updates until `phx_leave`.
    left: bool,
}

/// State of one websocket connection.
pub struct Client {
    pub id: u64,
    pub addr: SocketAddr,
    /// `player_id` from the socket connect params.
    default_player_id: Option<String>,
    registry: SessionRegistry,
    outbound: mpsc::Sender<Frame>,
    channels: HashMap<String, JoinedChannel>,
}

impl Client {
    pub fn new(
        id: u64,
        addr: SocketAddr,
        default_player_id: Option<String>,
        registry: SessionRegistry,
        outbound: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            id,
            addr,
            default_player_id: default_player_id.filter(|id| !id.trim().is_empty()),
            registry,
            outbound,
            channels: HashMap::new(),
        }
    }

    /// Topics this connection has joined.
    pub fn joined_topics(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Handle one websocket text message. Malformed input is logged and dropped.
    pub async fn handle_text(&mut self, text: &str) -> Result<(), ConnectionError> {
        match Frame::decode(text) {
            Ok(frame) => self.handle_frame(frame).await,
            Err(e) => {
                warn!("Client {}: dropping malformed frame from {}: {}", self.id, self.addr, e);
                Ok(())
            }
        }
    }

    pub async fn handle_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let packet = match ClientPacket::parse(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(
                    "Client {}: dropping {} on {}: {}",
                    self.id, frame.event, frame.topic, e
                );
                return Ok(());
            }
        };

        match packet {
            ClientPacket::Heartbeat if frame.topic == SOCKET_TOPIC => {
                self.send(packets::build_reply_ok(&frame, json!({}))).await
            }
            ClientPacket::Join(params) => self.join(&frame, params).await,
            ClientPacket::ChannelLeave if self.channels.contains_key(&frame.topic) => {
                self.close_channel(&frame.topic).await;
                self.send(packets::build_reply_ok(&frame, json!({}))).await
            }
            ClientPacket::Start => {
                self.forward(&frame, |session, _| async move { session.start().await })
                    .await
            }
            ClientPacket::Move { direction } => {
                self.forward(&frame, move |session, player_id| async move {
                    session.steer(&player_id, direction).await
                })
                .await
            }
            ClientPacket::Leave => {
                if self.channels.get(&frame.topic).is_some_and(|c| c.left) {
                    return Ok(());
                }
                self.forward(&frame, |session, player_id| async move {
                    session.leave(&player_id).await
                })
                .await?;
                if let Some(channel) = self.channels.get_mut(&frame.topic) {
                    channel.left = true;
                }
                Ok(())
            }
            _ => self.reply_unmatched(&frame).await,
        }
    }

    async fn join(&mut self, frame: &Frame, params: JoinParams) -> Result<(), ConnectionError> {
        let Some(board_id) = board_id_from_topic(&frame.topic) else {
            return self.reply_unmatched(frame).await;
        };
        let player_id = params
            .player_id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.default_player_id.clone());
        let Some(player_id) = player_id else {
            let reason = SessionError::InvalidPlayerId.to_string();
            return self.send(packets::build_reply_error(frame, &reason)).await;
        };

        // Joining a topic twice replaces the earlier channel. The old one is
        // detached after the new join so a lone player does not empty the board.
        let previous = self.channels.remove(&frame.topic);
        if let Some(previous) = &previous {
            previous.forwarder.abort();
        }
        let result = self.registry.join(board_id, &player_id).await;
        if let Some(previous) = previous.filter(|p| !p.left) {
            let _ = previous.session.leave(&previous.player_id).await;
        }

        match result {
            Ok((session, joined)) => {
                info!(
                    "Client {}: {} joined {} as {}",
                    self.id, self.addr, frame.topic, player_id
                );
                let response = JoinResponse {
                    board_id: joined.board_id.clone(),
                };
                let response = serde_json::to_value(&response).unwrap_or_else(|_| json!({}));
                self.send(packets::build_reply_ok(frame, response)).await?;

                let forwarder = tokio::spawn(forward_events(
                    joined.events,
                    frame.topic.clone(),
                    frame.join_ref.clone(),
                    self.outbound.clone(),
                ));
                self.channels.insert(
                    frame.topic.clone(),
                    JoinedChannel {
                        player_id,
                        join_ref: frame.join_ref.clone(),
                        session,
                        forwarder,
                        left: false,
                    },
                );
                Ok(())
            }
            Err(e) => {
                debug!("Client {}: join {} refused: {}", self.id, frame.topic, e);
                self.send(packets::build_reply_error(frame, &e.to_string()))
                    .await
            }
        }
    }

    /// Pass a game event to the session behind `frame.topic`.
    async fn forward<F, Fut>(&mut self, frame: &Frame, command: F) -> Result<(), ConnectionError>
    where
        F: FnOnce(SessionHandle, String) -> Fut,
        Fut: Future<Output = Result<(), SessionError>>,
    {
        let Some(channel) = self.channels.get(&frame.topic) else {
            return self.reply_unmatched(frame).await;
        };
        let session = channel.session.clone();
        let player_id = channel.player_id.clone();

        if command(session, player_id).await.is_err() {
            // The session went away under this channel.
            debug!("Client {}: {} is gone, dropping channel", self.id, frame.topic);
            if let Some(channel) = self.channels.remove(&frame.topic) {
                channel.forwarder.abort();
            }
            return self.reply_unmatched(frame).await;
        }
        Ok(())
    }

    async fn close_channel(&mut self, topic: &str) {
        if let Some(channel) = self.channels.remove(topic) {
            channel.forwarder.abort();
            if !channel.left {
                let _ = channel.session.leave(&channel.player_id).await;
            }
            debug!(
                "Client {}: left {} (join_ref {:?})",
                self.id, topic, channel.join_ref
            );
        }
    }

    async fn reply_unmatched(&self, frame: &Frame) -> Result<(), ConnectionError> {
        debug!(
            "Client {}: {} on unjoined topic {}",
            self.id, frame.event, frame.topic
        );
        self.send(packets::build_reply_error(frame, UNMATCHED_TOPIC))
            .await
    }

    async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ConnectionError::OutboundClosed)
    }

    /// Leave every joined channel. Called when the socket goes away.
    pub async fn disconnect(mut self) {
        let topics: Vec<String> = self.channels.keys().cloned().collect();
        for topic in topics {
            self.close_channel(&topic).await;
        }
        info!("Client {}: {} disconnected", self.id, self.addr);
    }
}

/// Copy board events into a connection's outbound queue until the channel ends.
async fn forward_events(
    mut events: Subscription,
    topic: String,
    join_ref: Option<String>,
    outbound: mpsc::Sender<Frame>,
) {
    loop {
        match events.next().await {
            Some(event) => {
                let closed = matches!(event, BoardEvent::Closed);
                if outbound.send(event.to_frame(&topic, join_ref.clone())).await.is_err() || closed {
                    return;
                }
            }
            None => {
                warn!("Board {} went away without closing", events.board_id());
                let _ = outbound
                    .send(packets::build_channel_error(&topic, join_ref))
                    .await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::game::SessionSettings;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::time::timeout;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(SessionSettings {
            cols: 10,
            rows: 10,
            max_players: 2,
            tick_interval: None,
            idle_timeout: None,
            mailbox_capacity: 16,
            broadcast_capacity: 64,
            seed: Some(11),
        })
    }

    fn connect(registry: &SessionRegistry, player_id: Option<&str>) -> (Client, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(64);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let client = Client::new(1, addr, player_id.map(String::from), registry.clone(), tx);
        (client, rx)
    }

    async fn recv(rx: &mut mpsc::Receiver<Frame>) -> Frame {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound closed")
    }

    async fn recv_event(rx: &mut mpsc::Receiver<Frame>, event: &str) -> Frame {
        loop {
            let frame = recv(rx).await;
            if frame.event == event {
                return frame;
            }
        }
    }

    fn join_text(board: &str, player_id: Option<&str>) -> String {
        let params = match player_id {
            Some(id) => json!({ "player_id": id }),
            None => json!({}),
        };
        json!(["1", "1", format!("game:{board}"), "phx_join", params]).to_string()
    }

    #[tokio::test]
    async fn test_heartbeat_reply() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, None);
        client
            .handle_text(r#"[null,"5","phoenix","heartbeat",{}]"#)
            .await
            .unwrap();

        let reply = recv(&mut rx).await;
        assert_eq!(
            reply.encode().unwrap(),
            r#"[null,"5","phoenix","phx_reply",{"response":{},"status":"ok"}]"#
        );
    }

    #[tokio::test]
    async fn test_join_replies_then_pushes_update() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, None);
        client.handle_text(&join_text("b1", Some("alice"))).await.unwrap();

        let reply = recv(&mut rx).await;
        assert_eq!(reply.event, "phx_reply");
        assert_eq!(reply.msg_ref.as_deref(), Some("1"));
        assert_eq!(reply.payload["status"], "ok");
        assert_eq!(reply.payload["response"]["board_id"], "b1");

        let update = recv(&mut rx).await;
        assert_eq!(update.event, "update");
        assert_eq!(update.topic, "game:b1");
        assert_eq!(update.join_ref.as_deref(), Some("1"));
        assert_eq!(update.payload["dot"], Value::Null);
        assert_eq!(update.payload["size"], json!([10, 10]));
        assert!(update.payload["players"]["alice"]["body"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_socket_param_is_fallback_player_id() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, Some("from-socket"));
        client.handle_text(&join_text("b2", None)).await.unwrap();
        assert_eq!(recv(&mut rx).await.payload["status"], "ok");
        let update = recv_event(&mut rx, "update").await;
        assert!(update.payload["players"].get("from-socket").is_some());

        // Join params win over the socket param.
        let (mut other, mut rx) = connect(&registry, Some("ignored"));
        other.handle_text(&join_text("b3", Some("explicit"))).await.unwrap();
        recv(&mut rx).await;
        let update = recv_event(&mut rx, "update").await;
        assert!(update.payload["players"].get("explicit").is_some());
        assert!(update.payload["players"].get("ignored").is_none());
    }

    #[tokio::test]
    async fn test_join_without_player_id_is_refused() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, None);
        client.handle_text(&join_text("b4", None)).await.unwrap();
        let reply = recv(&mut rx).await;
        assert_eq!(reply.payload["status"], "error");
        assert_eq!(reply.payload["response"]["reason"], "invalid player_id");
        assert_eq!(client.joined_topics().count(), 0);
    }

    #[tokio::test]
    async fn test_full_board_refuses_join() {
        let registry = registry();
        let (mut a, _rx_a) = connect(&registry, Some("a"));
        let (mut b, _rx_b) = connect(&registry, Some("b"));
        let (mut c, mut rx_c) = connect(&registry, Some("c"));
        a.handle_text(&join_text("full", None)).await.unwrap();
        b.handle_text(&join_text("full", None)).await.unwrap();
        c.handle_text(&join_text("full", None)).await.unwrap();

        let reply = recv(&mut rx_c).await;
        assert_eq!(reply.payload["status"], "error");
        assert_eq!(reply.payload["response"]["reason"], "board full");
    }

    #[tokio::test]
    async fn test_event_on_unjoined_topic() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, Some("a"));
        client
            .handle_text(r#"["1","2","game:nowhere","start",{}]"#)
            .await
            .unwrap();
        let reply = recv(&mut rx).await;
        assert_eq!(reply.payload["status"], "error");
        assert_eq!(reply.payload["response"]["reason"], "unmatched topic");

        client
            .handle_text(r#"["1","3","lobby","phx_join",{}]"#)
            .await
            .unwrap();
        let reply = recv(&mut rx).await;
        assert_eq!(reply.payload["response"]["reason"], "unmatched topic");
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, Some("a"));
        client.handle_text("not json").await.unwrap();
        client.handle_text(r#"["1","2","game:x","dance",{}]"#).await.unwrap();
        client
            .handle_text(r#"["1","2","game:x","move",{"direction":"sideways"}]"#)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_and_move_reach_session() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, Some("a"));
        client.handle_text(&join_text("play", None)).await.unwrap();
        recv(&mut rx).await;

        client.handle_text(r#"["1","2","game:play","start",{}]"#).await.unwrap();
        recv_event(&mut rx, "started").await;
        let update = recv_event(&mut rx, "update").await;
        assert!(update.payload["dot"].is_array());

        client
            .handle_text(r#"["1","3","game:play","move",{"direction":"left"}]"#)
            .await
            .unwrap();
        let session = registry.get("play").await.unwrap();
        session.tick().await.unwrap();
        assert_eq!(session.snapshot().await.unwrap().ticks, 1);
    }

    #[tokio::test]
    async fn test_phx_leave_replies_and_tears_down() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, Some("a"));
        client.handle_text(&join_text("gone", None)).await.unwrap();
        recv(&mut rx).await;

        client
            .handle_text(r#"["1","4","game:gone","phx_leave",{}]"#)
            .await
            .unwrap();
        let reply = recv_event(&mut rx, "phx_reply").await;
        assert_eq!(reply.payload["status"], "ok");
        assert_eq!(client.joined_topics().count(), 0);

        for _ in 0..100 {
            if registry.get("gone").await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session was not torn down");
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_channel() {
        let registry = registry();
        let (mut watcher, mut watch_rx) = connect(&registry, Some("w"));
        watcher.handle_text(&join_text("shared", None)).await.unwrap();
        recv(&mut watch_rx).await;

        let (mut client, mut rx) = connect(&registry, Some("a"));
        client.handle_text(&join_text("shared", None)).await.unwrap();
        client.handle_text(&join_text("solo", None)).await.unwrap();
        recv(&mut rx).await;
        client.disconnect().await;

        // The other member sees "a" arrive, then vanish from the shared board.
        let has_a = |frame: &Frame| frame.payload["players"].get("a").is_some();
        while !has_a(&recv_event(&mut watch_rx, "update").await) {}
        let update = recv_event(&mut watch_rx, "update").await;
        assert!(!has_a(&update));
        assert!(update.payload["players"].get("w").is_some());

        // "solo" had nobody else and shuts down.
        for _ in 0..100 {
            if registry.get("solo").await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("solo session was not torn down");
    }

    #[tokio::test]
    async fn test_crashed_session_pushes_phx_error() {
        let (tx, mut rx) = mpsc::channel(8);
        let topic = crate::server::gateway::Topic::new("boom", 4);
        let events = topic.subscribe();
        let forwarder = tokio::spawn(forward_events(events, "game:boom".into(), Some("7".into()), tx));
        drop(topic);

        let frame = recv(&mut rx).await;
        assert_eq!(frame.event, "phx_error");
        assert_eq!(frame.join_ref.as_deref(), Some("7"));
        forwarder.await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_close_pushes_phx_close() {
        let (tx, mut rx) = mpsc::channel(8);
        let topic = crate::server::gateway::Topic::new("done", 4);
        let events = topic.subscribe();
        let forwarder = tokio::spawn(forward_events(events, "game:done".into(), None, tx));
        topic.publish(BoardEvent::Closed);

        assert_eq!(recv(&mut rx).await.event, "phx_close");
        forwarder.await.unwrap();
    }

    #[tokio::test]
    async fn test_same_player_on_two_connections() {
        let registry = registry();
        let (mut first, mut rx_first) = connect(&registry, Some("p"));
        let (mut second, mut rx_second) = connect(&registry, Some("p"));
        first.handle_text(&join_text("dup", None)).await.unwrap();
        second.handle_text(&join_text("dup", None)).await.unwrap();
        assert_eq!(recv(&mut rx_first).await.payload["status"], "ok");
        assert_eq!(recv(&mut rx_second).await.payload["status"], "ok");

        first.disconnect().await;

        // The second connection still owns the player and the board.
        second
            .handle_text(r#"["1","2","game:dup","start",{}]"#)
            .await
            .unwrap();
        recv_event(&mut rx_second, "started").await;
        let update = recv_event(&mut rx_second, "update").await;
        assert_eq!(update.payload["players"]["p"]["body"].as_array().unwrap().len(), 1);
        assert!(registry.get("dup").await.is_some());
    }

    #[tokio::test]
    async fn test_rejoin_same_topic_keeps_lone_player() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, Some("p"));
        client.handle_text(&join_text("again", None)).await.unwrap();
        recv(&mut rx).await;
        let before = registry.get("again").await.unwrap().id();

        client.handle_text(&join_text("again", None)).await.unwrap();
        let reply = recv_event(&mut rx, "phx_reply").await;
        assert_eq!(reply.payload["status"], "ok");

        let session = registry.get("again").await.unwrap();
        assert_eq!(session.id(), before);
        assert_eq!(session.snapshot().await.unwrap().members, 1);

        client.disconnect().await;
        for _ in 0..100 {
            if registry.get("again").await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("board outlived its only connection");
    }

    #[tokio::test]
    async fn test_game_leave_then_disconnect_detaches_once() {
        let registry = registry();
        let (mut stayer, mut rx_stayer) = connect(&registry, Some("p"));
        let (mut leaver, mut rx_leaver) = connect(&registry, Some("p"));
        stayer.handle_text(&join_text("once", None)).await.unwrap();
        leaver.handle_text(&join_text("once", None)).await.unwrap();
        recv(&mut rx_stayer).await;
        recv(&mut rx_leaver).await;

        leaver.handle_text(r#"["1","2","game:once","leave",{}]"#).await.unwrap();
        leaver.handle_text(r#"["1","3","game:once","leave",{}]"#).await.unwrap();
        leaver.disconnect().await;

        let session = registry.get("once").await.unwrap();
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.members, 1);
        assert!(snapshot.board.players.contains_key("p"));
    }

    #[tokio::test]
    async fn test_session_panic_reaches_client_as_phx_error() {
        let registry = registry();
        let (mut client, mut rx) = connect(&registry, Some("a"));
        client.handle_text(&join_text("boom", None)).await.unwrap();
        recv(&mut rx).await;

        registry.get("boom").await.unwrap().crash().await.unwrap();
        let frame = recv_event(&mut rx, "phx_error").await;
        assert_eq!(frame.topic, "game:boom");
        assert_eq!(frame.join_ref.as_deref(), Some("1"));

        for _ in 0..100 {
            if registry.get("boom").await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registry.get("boom").await.is_none());

        // The channel is gone along with the session.
        client
            .handle_text(r#"["1","4","game:boom","start",{}]"#)
            .await
            .unwrap();
        let reply = recv_event(&mut rx, "phx_reply").await;
        assert_eq!(reply.payload["response"]["reason"], "unmatched topic");
    }
}

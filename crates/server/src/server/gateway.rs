//! Board topic fan-out.
//!
//! Each board owns one topic. Subscribers get every event in publish order;
//! a subscriber that falls behind skips ahead instead of stalling the board.

use std::sync::Arc;

use protocol::packets::{self, UpdatePayload};
use protocol::Frame;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::debug;

/// Event published to a board topic.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// Full board snapshot.
    Update(Arc<UpdatePayload>),
    /// Board transitioned to running.
    Started,
    /// Session shut down normally (empty or idle).
    Closed,
}

impl BoardEvent {
    /// Frame pushed to a client joined on `topic`.
    pub fn to_frame(&self, topic: &str, join_ref: Option<String>) -> Frame {
        match self {
            BoardEvent::Update(payload) => packets::build_update(topic, join_ref, payload),
            BoardEvent::Started => packets::build_started(topic, join_ref),
            BoardEvent::Closed => packets::build_channel_close(topic, join_ref),
        }
    }
}

/// Publishing side of a board topic.
#[derive(Debug)]
pub struct Topic {
    board_id: String,
    tx: broadcast::Sender<BoardEvent>,
}

impl Topic {
    pub fn new(board_id: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            board_id: board_id.into(),
            tx,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            board_id: self.board_id.clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// Fire-and-forget publish. Returns how many subscribers were reached.
    pub fn publish(&self, event: BoardEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side of a board topic.
#[derive(Debug)]
pub struct Subscription {
    board_id: String,
    rx: broadcast::Receiver<BoardEvent>,
}

impl Subscription {
    /// Next event, or `None` once the session is gone.
    pub async fn next(&mut self) -> Option<BoardEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Subscriber on board {} skipped {} events", self.board_id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event without waiting.
    pub fn try_next(&mut self) -> Option<BoardEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }
}

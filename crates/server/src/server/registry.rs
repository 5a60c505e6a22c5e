//! Board id -> session lookup.
//!
//! Sessions are spawned lazily on first join. Each one runs in its own task
//! with a watcher that drops the registry entry once the task ends, whether it
//! returned normally or panicked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::SessionError;

use super::game::{GameSession, Joined, SessionHandle, SessionSettings, run_session};

/// Attempts made when a session closes between lookup and join.
const JOIN_ATTEMPTS: usize = 3;

struct RegistryInner {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    settings: SessionSettings,
    next_session_id: AtomicU64,
}

/// Shared registry of running sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                settings,
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Return the live session for `board_id`, spawning one if needed.
    ///
    /// Concurrent first calls for the same id all get the same session.
    pub async fn resolve(&self, board_id: &str) -> SessionHandle {
        {
            let sessions = self.inner.sessions.read().await;
            if let Some(handle) = sessions.get(board_id) {
                if !handle.is_closed() {
                    return handle.clone();
                }
            }
        }

        let mut sessions = self.inner.sessions.write().await;
        if let Some(handle) = sessions.get(board_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }
        let handle = self.spawn(board_id);
        sessions.insert(board_id.to_string(), handle.clone());
        handle
    }

    /// Resolve and join, retrying if the session shuts down underneath us.
    pub async fn join(&self, board_id: &str, player_id: &str) -> Result<(SessionHandle, Joined), SessionError> {
        for _ in 0..JOIN_ATTEMPTS {
            let handle = self.resolve(board_id).await;
            match handle.join(player_id).await {
                Ok(joined) => return Ok((handle, joined)),
                Err(SessionError::Closed) => {
                    debug!("Board {}: session {} closed during join, retrying", board_id, handle.id());
                    self.remove(board_id, handle.id()).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(SessionError::Closed)
    }

    /// Drop the entry for `board_id` if it still belongs to `session_id`.
    pub async fn remove(&self, board_id: &str, session_id: u64) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get(board_id) {
            Some(handle) if handle.id() == session_id => {
                sessions.remove(board_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, board_id: &str) -> Option<SessionHandle> {
        self.inner.sessions.read().await.get(board_id).cloned()
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn spawn(&self, board_id: &str) -> SessionHandle {
        let settings = self.inner.settings.clone();
        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(settings.mailbox_capacity);
        let session = GameSession::new(board_id, &settings);
        let task = tokio::spawn(run_session(session, rx, settings));

        let registry = Arc::downgrade(&self.inner);
        let board = board_id.to_string();
        tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!("Board {}: session {} stopped", board, session_id),
                Err(e) if e.is_panic() => {
                    error!("Board {}: session {} crashed: {}", board, session_id, e)
                }
                Err(e) => warn!("Board {}: session {} cancelled: {}", board, session_id, e),
            }
            if let Some(inner) = Weak::upgrade(&registry) {
                SessionRegistry { inner }.remove(&board, session_id).await;
            }
        });

        info!("Board {}: created session {}", board_id, session_id);
        SessionHandle::new(session_id, board_id, tx)
    }
}

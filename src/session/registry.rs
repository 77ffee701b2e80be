//! Registry of open sessions, shared by the connection tasks that add and
//! remove entries and the subscriber that fans out to them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use super::handle::{Session, SessionId};

/// Result of one [`SessionRegistry::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Sessions that accepted the frame.
    pub delivered: usize,
    /// Sessions found closed and removed from the registry.
    pub pruned: usize,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    /// Tracks the map size so counting never takes the lock.
    active_count: AtomicUsize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        if sessions.insert(session.id.clone(), session).is_none() {
            self.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(session_id);
        if removed.is_some() {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `msg` once to every open session.
    ///
    /// Sends happen against a snapshot taken under the read lock; sessions
    /// whose queue turned out to be closed are pruned under the write lock
    /// afterwards. Only sessions this call actually removed count as pruned.
    pub async fn broadcast(&self, msg: &WsMessage) -> FanOut {
        let snapshot: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();

        let mut delivered = 0;
        let mut to_remove = Vec::new();
        for session in &snapshot {
            match session.send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "dropping delivery to closed session");
                    to_remove.push(session.id.clone());
                }
            }
        }
        debug!(recipients = delivered, "broadcast delivered");

        let mut pruned = 0;
        if !to_remove.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &to_remove {
                if sessions.remove(id).is_some() {
                    self.active_count.fetch_sub(1, Ordering::Relaxed);
                    pruned += 1;
                }
            }
        }
        FanOut { delivered, pruned }
    }

    /// Close and drop every session. Used on shutdown.
    pub async fn close_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for session in sessions.values() {
            session.close();
        }
        sessions.clear();
        self.active_count.store(0, Ordering::Relaxed);
        count
    }
}

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::signaling::session::SessionState;

struct SessionEntry {
    connected_at: u64,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub state: SessionState,
    /// Unix seconds.
    pub connected_at: u64,
}

/// Live viewer sessions, for status reporting and kicking viewers.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `cancel` ends the session when fired.
    pub(crate) async fn add(
        &self,
        id: Uuid,
        state: watch::Receiver<SessionState>,
        cancel: CancellationToken,
    ) {
        let connected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let entry = SessionEntry {
            connected_at,
            state,
            cancel,
        };
        self.sessions.write().await.insert(id, entry);
    }

    pub(crate) async fn remove(&self, id: &Uuid) {
        self.sessions.write().await.remove(id);
    }

    /// Ask a session to close. Returns false if it is not registered.
    pub(crate) async fn kick(&self, id: &Uuid) -> bool {
        match self.sessions.read().await.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &Uuid) -> Option<SessionInfo> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| entry.info(*id))
    }

    /// Sessions ordered by connection time, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| entry.info(*id))
            .collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions
    }

    /// Sessions that have not ended yet.
    pub async fn viewers(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| !entry.state.borrow().is_terminal())
            .count()
    }
}

impl SessionEntry {
    fn info(&self, id: Uuid) -> SessionInfo {
        SessionInfo {
            id,
            state: *self.state.borrow(),
            connected_at: self.connected_at,
        }
    }
}

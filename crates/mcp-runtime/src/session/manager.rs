//! Table of live sessions, used for fan-out notifications and listings.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::{Session, SessionSummary};

/// Live sessions keyed by id.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<Session>) {
        let id = session.id().to_string();
        self.sessions.write().await.insert(id.clone(), session);
        tracing::debug!("Session {id} registered");
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            tracing::debug!("Session {id} removed");
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sessions ordered by creation time.
    pub async fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at());
        sessions
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let mut out = Vec::new();
        for session in self.list().await {
            out.push(session.summary().await);
        }
        out
    }

    /// Send a notification to every initialized session.
    ///
    /// Returns how many sessions it was delivered to. Delivery failures are
    /// logged; the failing session's own read loop handles teardown.
    pub async fn broadcast(&self, method: &str, params: Option<Value>) -> usize {
        let mut delivered = 0;
        for session in self.list().await {
            if !session.is_initialized().await {
                continue;
            }
            match session.notify(method, params.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("Failed to notify session {}: {e}", session.id()),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;

    fn session(id: &str) -> Arc<Session> {
        let transport = StreamTransport::new(tokio::io::empty(), tokio::io::sink());
        Arc::new(Session::new(id, Arc::new(transport), vec!["2024-11-05".to_string()]))
    }

    #[tokio::test]
    async fn insert_get_remove() {
        let manager = SessionManager::new();
        manager.insert(session("a")).await;
        manager.insert(session("b")).await;
        assert_eq!(manager.len().await, 2);
        assert!(manager.get("a").await.is_some());
        assert!(manager.remove("a").await.is_some());
        assert!(manager.remove("a").await.is_none());
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn broadcast_skips_uninitialized_sessions() {
        let manager = SessionManager::new();
        manager.insert(session("a")).await;
        assert_eq!(manager.broadcast("notifications/tools/list_changed", None).await, 0);
    }

    #[tokio::test]
    async fn summaries_report_phase() {
        let manager = SessionManager::new();
        manager.insert(session("a")).await;
        let summaries = manager.summaries().await;
        assert_eq!(summaries[0].id, "a");
        assert_eq!(summaries[0].phase, "uninitialized");
    }
}

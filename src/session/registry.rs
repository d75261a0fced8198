//! Owner of every live session, one per project

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ipc::protocol::{ClientId, ProjectId};
use crate::ipc::Transport;

use super::EditingSession;

pub type SessionHandle = Arc<Mutex<EditingSession>>;

/// Creates sessions on first use and drops them on dispose
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ProjectId, SessionHandle>>,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    cache_capacity: usize,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration, cache_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            transport,
            request_timeout,
            cache_capacity,
        }
    }

    /// The project's session, created if it does not exist yet
    pub async fn get_or_create(&self, project_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(project_id.to_string())
            .or_insert_with(|| {
                tracing::info!(project = project_id, "Creating session");
                Arc::new(Mutex::new(EditingSession::new(
                    project_id,
                    self.transport.clone(),
                    self.request_timeout,
                    self.cache_capacity,
                )))
            })
            .clone()
    }

    pub async fn get(&self, project_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(project_id).cloned()
    }

    /// Dispose a project's session and forget it
    pub async fn dispose(&self, project_id: &str) -> bool {
        let Some(session) = self.sessions.lock().await.remove(project_id) else {
            return false;
        };
        let disposed = session.lock().await.dispose();
        disposed
    }

    /// Dispose every session
    pub async fn dispose_all(&self) {
        let sessions: Vec<SessionHandle> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.lock().await.dispose();
        }
    }

    /// Time out stale lookups across all sessions
    pub async fn reap_expired(&self, now: Instant) -> usize {
        let sessions = self.snapshot().await;
        join_all(sessions.iter().map(|s| async move { s.lock().await.reap_expired(now) }))
            .await
            .into_iter()
            .sum()
    }

    /// Cancel a disconnected client's lookups across all sessions
    pub async fn cancel_client(&self, client: ClientId) -> usize {
        let sessions = self.snapshot().await;
        join_all(sessions.iter().map(|s| async move { s.lock().await.cancel_client(client) }))
            .await
            .into_iter()
            .sum()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    async fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.lock().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::MemoryTransport;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(MemoryTransport::new()), Duration::from_secs(30), 16)
    }

    #[tokio::test]
    async fn test_one_session_per_project() {
        let registry = registry();
        let a = registry.get_or_create("p1").await;
        let b = registry.get_or_create("p1").await;
        registry.get_or_create("p2").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_dispose_removes_and_fresh_session_follows() {
        let registry = registry();
        let first = registry.get_or_create("p1").await;
        first.lock().await.toggle_breakpoint("f1", 1);

        assert!(registry.dispose("p1").await);
        assert!(!registry.dispose("p1").await);
        assert!(first.lock().await.is_disposed());
        assert!(registry.get("p1").await.is_none());

        let second = registry.get_or_create("p1").await;
        assert!(second.lock().await.breakpoints().is_empty());
        assert!(!second.lock().await.is_disposed());
    }
}

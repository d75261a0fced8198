//! Process-local offline queue

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::common::Result;

use super::{Envelope, OfflineQueue};

struct UserQueue {
    messages: VecDeque<Envelope>,
    expires_at: Instant,
}

/// In-memory store; expiry runs on the tokio clock
pub struct MemoryQueue {
    users: Mutex<HashMap<String, UserQueue>>,
    retention: Duration,
}

impl MemoryQueue {
    pub fn new(retention: Duration) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Number of messages parked for a user, ignoring expired lists
    pub async fn len(&self, user_id: &str) -> usize {
        let users = self.users.lock().await;
        match users.get(user_id) {
            Some(q) if q.expires_at > Instant::now() => q.messages.len(),
            _ => 0,
        }
    }

    /// Number of per-user lists currently held, expired or not
    pub async fn user_count(&self) -> usize {
        self.users.lock().await.len()
    }
}

#[async_trait]
impl OfflineQueue for MemoryQueue {
    async fn enqueue(&self, user_id: &str, envelope: &Envelope) -> Result<()> {
        let now = Instant::now();
        let mut users = self.users.lock().await;

        // Users who never come back would otherwise keep their lists forever
        let before = users.len();
        users.retain(|_, q| q.expires_at > now);
        if users.len() < before {
            tracing::debug!(purged = before - users.len(), "Dropped expired offline lists");
        }

        let queue = users.entry(user_id.to_string()).or_insert_with(|| UserQueue {
            messages: VecDeque::new(),
            expires_at: now,
        });
        queue.messages.push_back(envelope.clone());
        queue.expires_at = now + self.retention;

        tracing::debug!(user = user_id, queued = queue.messages.len(), "Message parked");
        Ok(())
    }

    async fn drain(&self, user_id: &str) -> Vec<Envelope> {
        let Some(queue) = self.users.lock().await.remove(user_id) else {
            return Vec::new();
        };
        if queue.expires_at <= Instant::now() {
            tracing::debug!(user = user_id, dropped = queue.messages.len(), "Parked messages expired");
            return Vec::new();
        }
        queue.messages.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn kinds(envelopes: &[Envelope]) -> Vec<&str> {
        envelopes.iter().map(|e| e.kind.as_str()).collect()
    }

    #[tokio::test]
    async fn test_drain_is_fifo_and_read_once() {
        let queue = MemoryQueue::new(DAY);
        queue.enqueue("u1", &Envelope::new("x", json!({"type": "x"}))).await.unwrap();
        queue.enqueue("u1", &Envelope::new("y", json!({"type": "y"}))).await.unwrap();

        let drained = queue.drain("u1").await;
        assert_eq!(kinds(&drained), vec!["x", "y"]);
        assert!(queue.drain("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let queue = MemoryQueue::new(DAY);
        queue.enqueue("u1", &Envelope::new("a", json!(1))).await.unwrap();
        queue.enqueue("u2", &Envelope::new("b", json!(2))).await.unwrap();

        assert_eq!(kinds(&queue.drain("u2").await), vec!["b"]);
        assert_eq!(queue.len("u1").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_expires_after_last_append() {
        let queue = MemoryQueue::new(DAY);
        queue.enqueue("u1", &Envelope::new("a", json!(1))).await.unwrap();

        tokio::time::advance(DAY + Duration::from_secs(1)).await;
        assert!(queue.drain("u1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_refreshes_expiry() {
        let queue = MemoryQueue::new(DAY);
        queue.enqueue("u1", &Envelope::new("a", json!(1))).await.unwrap();

        tokio::time::advance(DAY - Duration::from_secs(60)).await;
        queue.enqueue("u1", &Envelope::new("b", json!(2))).await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(kinds(&queue.drain("u1").await), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_after_expiry_starts_fresh() {
        let queue = MemoryQueue::new(DAY);
        queue.enqueue("u1", &Envelope::new("old", json!(1))).await.unwrap();

        tokio::time::advance(DAY * 2).await;
        queue.enqueue("u1", &Envelope::new("new", json!(2))).await.unwrap();
        assert_eq!(kinds(&queue.drain("u1").await), vec!["new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lists_of_absent_users_are_purged() {
        let queue = MemoryQueue::new(DAY);
        for n in 0..1000 {
            let user = format!("user-{}", n);
            queue.enqueue(&user, &Envelope::new("x", json!(n))).await.unwrap();
        }
        assert_eq!(queue.user_count().await, 1000);

        tokio::time::advance(DAY * 3).await;
        queue.enqueue("late", &Envelope::new("y", json!(0))).await.unwrap();

        assert_eq!(queue.user_count().await, 1);
        assert_eq!(queue.len("late").await, 1);
    }
}

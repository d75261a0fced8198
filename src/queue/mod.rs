//! Offline delivery queue
//!
//! Events for a user with no open channel are parked in a per-user FIFO
//! list. The list lives for a fixed retention window after its last append
//! and is handed out whole, exactly once, when the user reconnects.

mod delivery;
mod memory;
mod redis_queue;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::config::{QueueBackend, QueueConfig};
use crate::common::{unix_millis, Result};
use crate::ipc::protocol::ChannelEvent;

pub use delivery::{Delivery, Dispatcher};
pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;

/// A parked message as stored in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch at enqueue time
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: unix_millis(),
        }
    }

    /// Wrap a channel event
    pub fn from_event(event: &ChannelEvent) -> Result<Self> {
        Ok(Self::new(event.name(), serde_json::to_value(event)?))
    }

    /// Unwrap the channel event this envelope carries
    pub fn to_event(&self) -> Result<ChannelEvent> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Durable per-user FIFO store
#[async_trait]
pub trait OfflineQueue: Send + Sync {
    /// Append to the user's list and restart its retention window
    ///
    /// Failures are returned to the caller.
    async fn enqueue(&self, user_id: &str, envelope: &Envelope) -> Result<()>;

    /// Take the user's whole list in insertion order, leaving it empty
    ///
    /// Read failures are logged and yield an empty list.
    async fn drain(&self, user_id: &str) -> Vec<Envelope>;
}

pub type QueueHandle = Arc<dyn OfflineQueue>;

/// Build the configured queue, falling back to memory when redis is unusable
pub fn build_queue(config: &QueueConfig) -> QueueHandle {
    let memory = || -> QueueHandle { Arc::new(MemoryQueue::new(config.retention())) };

    match config.backend {
        QueueBackend::Memory => memory(),
        QueueBackend::Redis => {
            let Some(url) = config.redis_url.as_deref() else {
                tracing::warn!("queue.backend is redis but queue.redis_url is unset; using in-memory queue");
                return memory();
            };
            match RedisQueue::new(url, &config.key_prefix, config.retention()) {
                Ok(queue) => {
                    tracing::info!(prefix = %config.key_prefix, "Using redis offline queue");
                    Arc::new(queue)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to open redis client; using in-memory queue");
                    memory()
                }
            }
        }
    }
}

//! Redis-backed offline queue
//!
//! One list per user under `{prefix}:{user}`. Append and expiry refresh run
//! in one MULTI/EXEC pipeline, as do read and delete, so concurrent hosts
//! never see a half-drained list.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use tokio::sync::OnceCell;

use crate::common::{Error, Result};

use super::{Envelope, OfflineQueue};

pub struct RedisQueue {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    prefix: String,
    retention: Duration,
}

impl RedisQueue {
    /// Open a client; no connection is made until the first operation
    pub fn new(url: &str, prefix: &str, retention: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::QueueBackend(e.to_string()))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            prefix: prefix.to_string(),
            retention,
        })
    }

    fn key(&self, user_id: &str) -> String {
        format!("{}:{}", self.prefix, user_id)
    }

    async fn conn(&self) -> RedisResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_connection_manager())
            .await?;
        Ok(conn.clone())
    }

    async fn push(&self, user_id: &str, envelope: &Envelope) -> RedisResult<()> {
        let payload = serde_json::to_string(envelope).map_err(to_redis_err)?;
        let key = self.key(user_id);
        let ttl = self.retention.as_secs().max(1);

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .rpush(&key, payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn take_all(&self, user_id: &str) -> RedisResult<Vec<String>> {
        let key = self.key(user_id);
        let mut conn = self.conn().await?;
        let (items, _deleted): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .lrange(&key, 0, -1)
            .del(&key)
            .query_async(&mut conn)
            .await?;
        Ok(items)
    }
}

#[async_trait]
impl OfflineQueue for RedisQueue {
    async fn enqueue(&self, user_id: &str, envelope: &Envelope) -> Result<()> {
        self.push(user_id, envelope)
            .await
            .map_err(|e| Error::queue_write(user_id, e))?;
        tracing::debug!(user = user_id, kind = %envelope.kind, "Message parked in redis");
        Ok(())
    }

    async fn drain(&self, user_id: &str) -> Vec<Envelope> {
        let items = match self.take_all(user_id).await {
            Ok(items) => items,
            Err(e) => {
                let e = Error::queue_read(user_id, e);
                tracing::warn!(error = %e, "Offline queue read failed");
                return Vec::new();
            }
        };

        items
            .iter()
            .filter_map(|raw| match serde_json::from_str::<Envelope>(raw) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    tracing::warn!(user = user_id, error = %e, "Skipping malformed parked message");
                    None
                }
            })
            .collect()
    }
}

fn to_redis_err(err: impl std::error::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialize", err.to_string()))
}

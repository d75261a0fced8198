//! Sending path for user-addressed events

use std::sync::Arc;

use crate::common::Result;
use crate::ipc::protocol::ChannelEvent;
use crate::ipc::{Recipient, Transport};

use super::{Envelope, QueueHandle};

/// How a message reached its user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent on an open channel
    Direct,
    /// Parked in the offline queue
    Queued,
}

/// Sends to connected users and parks everything else
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    queue: QueueHandle,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, queue: QueueHandle) -> Self {
        Self { transport, queue }
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    /// Deliver `event` to every channel of `user_id`, or park it
    ///
    /// Only a failure to park is reported.
    pub async fn send_to_user(&self, user_id: &str, event: &ChannelEvent) -> Result<Delivery> {
        let to = Recipient::User(user_id.to_string());

        if self.transport.is_connected(&to) {
            match self.transport.send(&to, event) {
                Ok(()) => return Ok(Delivery::Direct),
                Err(e) => {
                    tracing::debug!(user = user_id, error = %e, "Direct send failed; parking message")
                }
            }
        }

        let envelope = Envelope::from_event(event)?;
        self.queue.enqueue(user_id, &envelope).await?;
        tracing::debug!(user = user_id, event = event.name(), "User offline; message parked");
        Ok(Delivery::Queued)
    }

    /// Hand a reconnecting user everything parked for them
    ///
    /// Messages are sent to `to` in insertion order. If a send fails, that
    /// message and everything after it go back into the queue.
    pub async fn flush_offline(&self, user_id: &str, to: &Recipient) -> usize {
        let parked = self.queue.drain(user_id).await;
        if parked.is_empty() {
            return 0;
        }

        let total = parked.len();
        let mut delivered = 0;
        let mut remaining = parked.into_iter();

        while let Some(envelope) = remaining.next() {
            let event = match envelope.to_event() {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(user = user_id, kind = %envelope.kind, error = %e, "Dropping undeliverable parked message");
                    continue;
                }
            };

            if let Err(e) = self.transport.send(to, &event) {
                tracing::warn!(user = user_id, error = %e, "Flush interrupted; re-parking the rest");
                for envelope in std::iter::once(envelope).chain(remaining) {
                    if let Err(e) = self.queue.enqueue(user_id, &envelope).await {
                        tracing::error!(user = user_id, error = %e, "Lost parked message");
                    }
                }
                break;
            }
            delivered += 1;
        }

        tracing::info!(user = user_id, delivered, total, "Flushed offline messages");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::common::Error;
    use crate::ipc::MemoryTransport;
    use crate::queue::{MemoryQueue, OfflineQueue};

    struct BrokenQueue;

    #[async_trait]
    impl OfflineQueue for BrokenQueue {
        async fn enqueue(&self, user_id: &str, _envelope: &Envelope) -> Result<()> {
            Err(Error::queue_write(user_id, "connection refused"))
        }

        async fn drain(&self, _user_id: &str) -> Vec<Envelope> {
            Vec::new()
        }
    }

    fn message(n: u32) -> ChannelEvent {
        ChannelEvent::DirectMessage {
            to_user: "u1".into(),
            from_user: None,
            body: json!(n),
        }
    }

    fn setup() -> (Arc<MemoryTransport>, Dispatcher) {
        let transport = Arc::new(MemoryTransport::new());
        let queue: QueueHandle = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let dispatcher = Dispatcher::new(transport.clone(), queue);
        (transport, dispatcher)
    }

    #[tokio::test]
    async fn test_connected_user_gets_direct_send() {
        let (transport, dispatcher) = setup();
        let user = Recipient::User("u1".into());
        transport.connect(user.clone());

        assert_eq!(dispatcher.send_to_user("u1", &message(1)).await.unwrap(), Delivery::Direct);
        assert_eq!(transport.sent_to(&user), vec![message(1)]);
        assert!(dispatcher.queue().drain("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_user_is_parked_then_flushed_in_order() {
        let (transport, dispatcher) = setup();
        for n in 1..=3 {
            assert_eq!(dispatcher.send_to_user("u1", &message(n)).await.unwrap(), Delivery::Queued);
        }
        assert!(transport.sent().is_empty());

        let client = Recipient::Client(9);
        transport.connect(client.clone());
        assert_eq!(dispatcher.flush_offline("u1", &client).await, 3);
        assert_eq!(transport.sent_to(&client), vec![message(1), message(2), message(3)]);
        assert_eq!(dispatcher.flush_offline("u1", &client).await, 0);
    }

    #[tokio::test]
    async fn test_failed_flush_reparks_the_rest() {
        let (transport, dispatcher) = setup();
        dispatcher.send_to_user("u1", &message(1)).await.unwrap();
        dispatcher.send_to_user("u1", &message(2)).await.unwrap();

        assert_eq!(dispatcher.flush_offline("u1", &Recipient::Client(9)).await, 0);
        assert!(transport.sent().is_empty());

        let kinds = dispatcher.queue().drain("u1").await;
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0].to_event().unwrap(), message(1));
    }

    #[tokio::test]
    async fn test_park_failure_propagates() {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Dispatcher::new(transport, Arc::new(BrokenQueue));

        let err = dispatcher.send_to_user("u1", &message(1)).await.unwrap_err();
        assert!(matches!(err, Error::QueueWrite { .. }));
    }
}

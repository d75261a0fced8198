//! Connection hub
//!
//! Tracks every live connection and implements [`Transport`] on top of
//! them. Each connection has a writer task fed through an unbounded
//! channel, so sends never block the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::common::{Error, Result};
use crate::ipc::protocol::{ChannelEvent, ClientId, ProjectId, Role, UserId};
use crate::ipc::{Recipient, Transport};

/// Who a connection belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: ClientId,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub role: Role,
}

struct ClientHandle {
    peer: Peer,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl ClientHandle {
    fn matches(&self, to: &Recipient) -> bool {
        let peer = &self.peer;
        match to {
            Recipient::Project(p) => peer.role != Role::Backend && &peer.project_id == p,
            Recipient::Peers(p, except) => {
                peer.role != Role::Backend && &peer.project_id == p && peer.id != *except
            }
            Recipient::User(u) => peer.role == Role::Editor && &peer.user_id == u,
            Recipient::Client(id) => peer.id == *id,
            Recipient::Backend(p) => peer.role == Role::Backend && &peer.project_id == p,
        }
    }
}

#[derive(Default)]
pub struct Hub {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection; events for it arrive on the returned receiver
    pub fn register(
        &self,
        user_id: &str,
        project_id: &str,
        role: Role,
    ) -> (Peer, mpsc::UnboundedReceiver<ChannelEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Peer {
            id,
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            role,
        };

        self.clients.write().insert(
            id,
            ClientHandle {
                peer: peer.clone(),
                tx,
            },
        );
        tracing::info!(client = id, user = user_id, project = project_id, ?role, "Client connected");
        (peer, rx)
    }

    /// Drop a connection; its writer task ends once its queue is flushed
    pub fn unregister(&self, id: ClientId) -> Option<Peer> {
        let handle = self.clients.write().remove(&id)?;
        tracing::info!(client = id, user = %handle.peer.user_id, "Client disconnected");
        Some(handle.peer)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl Transport for Hub {
    fn send(&self, to: &Recipient, event: &ChannelEvent) -> Result<()> {
        let clients = self.clients.read();

        // One backend answers per project: the most recently connected
        if let Recipient::Backend(_) = to {
            let backend = clients
                .values()
                .filter(|c| c.matches(to))
                .max_by_key(|c| c.peer.id)
                .ok_or_else(|| Error::not_connected(to))?;
            return backend
                .tx
                .send(event.clone())
                .map_err(|_| Error::channel_closed(to));
        }

        let mut matched = 0;
        let mut delivered = 0;
        for client in clients.values().filter(|c| c.matches(to)) {
            matched += 1;
            if client.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        match to {
            Recipient::Project(_) | Recipient::Peers(..) => Ok(()),
            _ if matched == 0 => Err(Error::not_connected(to)),
            _ if delivered == 0 => Err(Error::channel_closed(to)),
            _ => Ok(()),
        }
    }

    fn is_connected(&self, to: &Recipient) -> bool {
        match to {
            Recipient::Project(_) | Recipient::Peers(..) => true,
            _ => self.clients.read().values().any(|c| c.matches(to)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_broadcast_reaches_editors_only() {
        let hub = Hub::new();
        let (_, mut editor) = hub.register("u1", "p1", Role::Editor);
        let (_, mut other_project) = hub.register("u2", "p2", Role::Editor);
        let (_, mut backend) = hub.register("agent", "p1", Role::Backend);

        hub.send(&Recipient::Project("p1".into()), &ChannelEvent::DebugStart)
            .unwrap();
        assert_eq!(editor.try_recv().unwrap(), ChannelEvent::DebugStart);
        assert!(other_project.try_recv().is_err());
        assert!(backend.try_recv().is_err());
    }

    #[test]
    fn test_control_connections_never_take_user_messages() {
        let hub = Hub::new();
        let (_, mut control) = hub.register("u1", "p1", Role::Control);
        assert!(!hub.is_connected(&Recipient::User("u1".into())));

        hub.send(&Recipient::Project("p1".into()), &ChannelEvent::DebugStop)
            .unwrap();
        assert_eq!(control.try_recv().unwrap(), ChannelEvent::DebugStop);
    }

    #[test]
    fn test_peers_excludes_origin() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.register("u1", "p1", Role::Editor);
        let (_, mut rx_b) = hub.register("u2", "p1", Role::Editor);

        hub.send(&Recipient::Peers("p1".into(), a.id), &ChannelEvent::DebugStep)
            .unwrap();
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), ChannelEvent::DebugStep);
    }

    #[test]
    fn test_missing_recipients_fail() {
        let hub = Hub::new();
        assert!(matches!(
            hub.send(&Recipient::User("ghost".into()), &ChannelEvent::DebugStart),
            Err(Error::NotConnected { .. })
        ));
        assert!(!hub.is_connected(&Recipient::Backend("p1".into())));
        assert!(hub.is_connected(&Recipient::Project("p1".into())));
    }

    #[test]
    fn test_dropped_receiver_is_channel_closed() {
        let hub = Hub::new();
        let (peer, rx) = hub.register("u1", "p1", Role::Editor);
        drop(rx);
        assert!(matches!(
            hub.send(&Recipient::Client(peer.id), &ChannelEvent::DebugStart),
            Err(Error::ChannelClosed { .. })
        ));
    }

    #[test]
    fn test_unregister() {
        let hub = Hub::new();
        let (peer, _rx) = hub.register("u1", "p1", Role::Editor);
        assert_eq!(hub.len(), 1);
        assert_eq!(hub.unregister(peer.id), Some(peer));
        assert!(hub.is_empty());
        assert!(!hub.is_connected(&Recipient::User("u1".into())));
    }
}

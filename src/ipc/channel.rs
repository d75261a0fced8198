//! Transport channel contract
//!
//! Sessions, the correlator and the dispatcher only ever see this trait. The
//! daemon's connection hub implements it over local sockets; [`MemoryTransport`]
//! implements it in-process.

use std::collections::HashSet;
use std::fmt;

use parking_lot::{Mutex, RwLock};

use crate::common::{Error, Result};

use super::protocol::{ChannelEvent, ClientId, ProjectId, UserId};

/// Addressee of a send
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Every editor connected to a project. Succeeds with nobody listening.
    Project(ProjectId),
    /// Every editor of a project except one connection
    Peers(ProjectId, ClientId),
    /// Every connection of one user
    User(UserId),
    /// A single connection
    Client(ClientId),
    /// The debugging/completion backend serving a project
    Backend(ProjectId),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(p) => write!(f, "project '{}'", p),
            Self::Peers(p, c) => write!(f, "project '{}' except client #{}", p, c),
            Self::User(u) => write!(f, "user '{}'", u),
            Self::Client(c) => write!(f, "client #{}", c),
            Self::Backend(p) => write!(f, "backend of project '{}'", p),
        }
    }
}

/// Duplex event channel as seen from the host
///
/// Delivery is at most once per send; there is no retry and no ordering
/// guarantee across reconnects.
pub trait Transport: Send + Sync {
    /// Send one event, failing when the recipient has no open channel
    fn send(&self, to: &Recipient, event: &ChannelEvent) -> Result<()>;

    /// Whether a send to `to` would currently reach someone
    fn is_connected(&self, to: &Recipient) -> bool;
}

/// In-process transport that records every successful send
#[derive(Debug, Default)]
pub struct MemoryTransport {
    connected: RwLock<HashSet<Recipient>>,
    sent: Mutex<Vec<(Recipient, ChannelEvent)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a recipient as reachable
    pub fn connect(&self, to: Recipient) {
        self.connected.write().insert(to);
    }

    /// Mark a recipient as unreachable
    pub fn disconnect(&self, to: &Recipient) {
        self.connected.write().remove(to);
    }

    /// Everything sent so far, oldest first
    pub fn sent(&self) -> Vec<(Recipient, ChannelEvent)> {
        self.sent.lock().clone()
    }

    /// Events sent to one recipient, oldest first
    pub fn sent_to(&self, to: &Recipient) -> Vec<ChannelEvent> {
        self.sent
            .lock()
            .iter()
            .filter(|(r, _)| r == to)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Drain the send log
    pub fn take_sent(&self) -> Vec<(Recipient, ChannelEvent)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Transport for MemoryTransport {
    fn send(&self, to: &Recipient, event: &ChannelEvent) -> Result<()> {
        if !self.is_connected(to) {
            return Err(Error::not_connected(to));
        }
        self.sent.lock().push((to.clone(), event.clone()));
        Ok(())
    }

    fn is_connected(&self, to: &Recipient) -> bool {
        matches!(to, Recipient::Project(_) | Recipient::Peers(..))
            || self.connected.read().contains(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_broadcast_always_succeeds() {
        let transport = MemoryTransport::new();
        let to = Recipient::Project("demo".into());
        transport.send(&to, &ChannelEvent::DebugStart).unwrap();
        assert_eq!(transport.sent_to(&to), vec![ChannelEvent::DebugStart]);
    }

    #[test]
    fn test_unconnected_user_is_rejected() {
        let transport = MemoryTransport::new();
        let to = Recipient::User("u1".into());
        let err = transport.send(&to, &ChannelEvent::DebugStart).unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
        assert!(transport.sent().is_empty());

        transport.connect(to.clone());
        transport.send(&to, &ChannelEvent::DebugStart).unwrap();
        assert_eq!(transport.take_sent().len(), 1);
        assert!(transport.sent().is_empty());
    }
}

//! Lookup request correlation
//!
//! Every outgoing lookup gets a fresh [`CorrelationId`]; a response resolves
//! exactly the pending entry carrying that id. Identical lookups issued
//! while one is in flight attach to it instead of sending again, and
//! resolved results are kept in a bounded cache.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::ipc::protocol::{
    ChannelEvent, ClientId, CorrelationId, LookupKind, LookupResult, TextPosition,
};
use crate::ipc::{Recipient, Transport};

/// Identity of a lookup for deduplication and caching
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: LookupKind,
    pub position: TextPosition,
}

/// Outcome of [`Correlator::request`]
#[derive(Debug)]
pub enum Reply {
    /// Served from the cache
    Ready(LookupResult),
    /// Resolved when the response (or a failure) arrives
    Waiting(oneshot::Receiver<Result<LookupResult>>),
}

impl Reply {
    /// A reply that has already failed
    pub fn failed(error: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self::Waiting(rx)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Wait for the result
    pub async fn resolve(self) -> Result<LookupResult> {
        match self {
            Self::Ready(result) => Ok(result),
            // Sender dropped without answering: the entry was discarded
            Self::Waiting(rx) => rx.await.unwrap_or(Err(Error::RequestCancelled)),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    owner: Option<ClientId>,
    tx: oneshot::Sender<Result<LookupResult>>,
}

/// A lookup that has been sent and not yet answered
#[derive(Debug)]
pub struct PendingRequest {
    pub correlation_id: CorrelationId,
    pub key: CacheKey,
    pub issued_at: Instant,
    waiters: Vec<Waiter>,
}

impl PendingRequest {
    fn fail_all(self, make_error: impl Fn() -> Error) {
        for waiter in self.waiters {
            let _ = waiter.tx.send(Err(make_error()));
        }
    }
}

/// Resolved lookups, oldest-written evicted first
#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<CacheKey, LookupResult>,
    order: VecDeque<CacheKey>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<&LookupResult> {
        self.entries.get(key)
    }

    /// Store a result; an existing entry for the key is overwritten in place
    pub fn insert(&mut self, key: CacheKey, result: LookupResult) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), result).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Pending-request table plus result cache for one session
#[derive(Debug)]
pub struct Correlator {
    pending: HashMap<CorrelationId, PendingRequest>,
    in_flight: HashMap<CacheKey, CorrelationId>,
    cache: ResultCache,
    timeout: Duration,
}

impl Correlator {
    pub fn new(timeout: Duration, cache_capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            in_flight: HashMap::new(),
            cache: ResultCache::new(cache_capacity),
            timeout,
        }
    }

    /// Issue a lookup to `backend`, or reuse a cached or in-flight one
    ///
    /// A failed send fails the caller immediately; nothing is retried.
    pub fn request(
        &mut self,
        transport: &dyn Transport,
        backend: &Recipient,
        kind: LookupKind,
        position: TextPosition,
        owner: Option<ClientId>,
    ) -> Reply {
        let key = CacheKey { kind, position };

        if let Some(hit) = self.cache.get(&key) {
            tracing::trace!(%kind, position = %key.position, "Lookup served from cache");
            return Reply::Ready(hit.clone());
        }

        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { owner, tx };

        if let Some(pending) = self
            .in_flight
            .get(&key)
            .and_then(|id| self.pending.get_mut(id))
        {
            tracing::debug!(
                correlation_id = %pending.correlation_id,
                %kind,
                "Attaching to in-flight lookup"
            );
            pending.waiters.push(waiter);
            return Reply::Waiting(rx);
        }

        let correlation_id = CorrelationId::new();
        let event = ChannelEvent::lookup_request(kind, correlation_id.clone(), key.position.clone());
        if let Err(e) = transport.send(backend, &event) {
            tracing::warn!(%kind, error = %e, "Failed to send lookup request");
            return Reply::failed(e);
        }

        tracing::debug!(%correlation_id, %kind, position = %key.position, "Lookup issued");
        self.in_flight.insert(key.clone(), correlation_id.clone());
        self.pending.insert(
            correlation_id.clone(),
            PendingRequest {
                correlation_id,
                key,
                issued_at: Instant::now(),
                waiters: vec![waiter],
            },
        );

        Reply::Waiting(rx)
    }

    /// Deliver a response; returns false for unknown, stale or mismatched ids
    pub fn resolve(&mut self, correlation_id: &CorrelationId, result: LookupResult) -> bool {
        let Some(pending) = self.pending.remove(correlation_id) else {
            tracing::debug!(%correlation_id, "Ignoring response for unknown or expired request");
            return false;
        };

        if pending.key.kind != result.kind() {
            tracing::warn!(
                %correlation_id,
                expected = %pending.key.kind,
                got = %result.kind(),
                "Ignoring response of the wrong kind"
            );
            self.pending.insert(correlation_id.clone(), pending);
            return false;
        }

        self.in_flight.remove(&pending.key);
        self.cache.insert(pending.key.clone(), result.clone());

        tracing::debug!(%correlation_id, waiters = pending.waiters.len(), "Lookup resolved");
        for waiter in pending.waiters {
            let _ = waiter.tx.send(Ok(result.clone()));
        }
        true
    }

    /// Fail a pending request the backend reported as failed
    pub fn fail(&mut self, correlation_id: &CorrelationId, message: &str) -> bool {
        let Some(pending) = self.take(correlation_id) else {
            tracing::debug!(%correlation_id, "Ignoring failure for unknown request");
            return false;
        };
        let kind = pending.key.kind.to_string();
        pending.fail_all(|| Error::request_failed(&kind, message));
        true
    }

    /// Fail and forget every request older than the timeout
    pub fn reap_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<CorrelationId> = self
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.issued_at) >= self.timeout)
            .map(|p| p.correlation_id.clone())
            .collect();

        let secs = self.timeout.as_secs();
        for id in &expired {
            if let Some(pending) = self.take(id) {
                tracing::warn!(correlation_id = %id, kind = %pending.key.kind, "Lookup timed out");
                pending.fail_all(|| Error::RequestTimeout(secs));
            }
        }
        expired.len()
    }

    /// Drop every waiter owned by a disconnected client
    ///
    /// Entries left without waiters are removed; a late response for them
    /// is then ignored like any stale response.
    pub fn cancel_owner(&mut self, owner: ClientId) -> usize {
        let mut orphaned = Vec::new();
        for (id, pending) in self.pending.iter_mut() {
            pending
                .waiters
                .retain(|w| w.owner != Some(owner) && !w.tx.is_closed());
            if pending.waiters.is_empty() {
                orphaned.push(id.clone());
            }
        }

        for id in &orphaned {
            self.take(id);
        }
        if !orphaned.is_empty() {
            tracing::debug!(client = owner, dropped = orphaned.len(), "Cancelled orphaned lookups");
        }
        orphaned.len()
    }

    /// Fail everything pending and empty the cache
    pub fn clear(&mut self, make_error: impl Fn() -> Error) {
        self.in_flight.clear();
        for (_, pending) in self.pending.drain() {
            pending.fail_all(&make_error);
        }
        self.cache.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn take(&mut self, correlation_id: &CorrelationId) -> Option<PendingRequest> {
        let pending = self.pending.remove(correlation_id)?;
        self.in_flight.remove(&pending.key);
        Some(pending)
    }
}

//! Coordination Store Contract
//!
//! The trait below is the only surface steward requires from the coordination
//! store. The embedding process injects a concrete client; the crate ships
//! [`super::MemoryCoordinationStore`] for tests and single-process operation.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Result;

/// A lease-backed handle to the coordination store.
///
/// While open, every key registered under it stays alive; once closed or
/// expired, those keys vanish. Exactly one session exists per node process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: u64,
    ttl: Duration,
}

impl Session {
    /// Create a session handle. Called by store implementations only.
    pub fn new(id: u64, ttl: Duration) -> Self {
        Self { id, ttl }
    }

    /// Store-assigned session identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Lease time-to-live granted at open time
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Kind of change observed on a watched key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Key was written
    Put,
    /// Key was deleted (explicitly or via lease revocation)
    Delete,
}

impl std::fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchEventKind::Put => write!(f, "PUT"),
            WatchEventKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single change notification delivered by a prefix watch
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Change kind
    pub kind: WatchEventKind,
    /// Full key the change applies to
    pub key: String,
    /// Key value at the time of the change (empty for deletes)
    pub value: Vec<u8>,
}

/// Contract consumed from the external coordination store.
///
/// Watch and observation streams are delivered over bounded channels; a
/// consumer that stops draining its stream may be dropped by the store, which
/// the consumer sees as its stream ending.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Establish a lease-backed session with the given TTL
    async fn open_session(&self, ttl: Duration) -> Result<Session>;

    /// Revoke the session's lease, removing every key bound to it.
    ///
    /// Must succeed (or be a no-op) even if other operations on the session
    /// previously failed, so shutdown can always run to completion.
    async fn close_session(&self, session: &Session) -> Result<()>;

    /// Contend for leadership under `namespace`, proclaiming `node_id`.
    ///
    /// Blocks until this session is elected. Exactly one campaigner per
    /// namespace holds leadership at a time; the claim is released when the
    /// session resigns, closes, or its lease expires.
    async fn campaign(&self, session: &Session, namespace: &str, node_id: &str) -> Result<()>;

    /// Subscribe to leadership changes under `namespace`.
    ///
    /// Delivers the identity of the current leader immediately (if one
    /// exists), then every subsequent change, in order.
    async fn observe_election(&self, namespace: &str) -> Result<mpsc::Receiver<String>>;

    /// Release leadership held by this session; no-op if it holds none
    async fn resign(&self, session: &Session) -> Result<()>;

    /// Write a key bound to the session's lease
    async fn put(&self, key: &str, value: Vec<u8>, session: &Session) -> Result<()>;

    /// Subscribe to changes on every key under `prefix`
    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>>;
}

//! In-Memory Coordination Store
//!
//! A single-process implementation of the [`CoordinationStore`] contract with
//! full session/lease semantics: lease-bound keys vanish when their session
//! closes or expires, election claims queue campaigners in arrival order, and
//! prefix watchers receive ordered change notifications over bounded channels.
//!
//! Used by every test in the crate and by the standalone `steward start`
//! binary. Multi-node deployments inject a real coordination-store client
//! through the trait instead.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use super::store::{CoordinationStore, Session, WatchEvent, WatchEventKind};
use crate::error::{Error, Result};

/// Capacity of watch and observation channels. A consumer that falls this far
/// behind is dropped and must restart its stream.
const STREAM_CAPACITY: usize = 64;

/// In-memory coordination store
#[derive(Clone, Default)]
pub struct MemoryCoordinationStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_session_id: u64,
    sessions: HashMap<u64, SessionEntry>,
    keys: BTreeMap<String, KeyEntry>,
    watchers: Vec<Watcher>,
    elections: HashMap<String, ElectionSlot>,
}

struct SessionEntry {
    /// Keys bound to this session's lease
    keys: Vec<String>,
}

struct KeyEntry {
    value: Vec<u8>,
    session_id: u64,
}

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<WatchEvent>,
}

#[derive(Default)]
struct ElectionSlot {
    holder: Option<Claim>,
    waiters: VecDeque<Waiter>,
    observers: Vec<mpsc::Sender<String>>,
}

struct Claim {
    session_id: u64,
    node_id: String,
}

struct Waiter {
    session_id: u64,
    node_id: String,
    elected_tx: oneshot::Sender<()>,
}

impl MemoryCoordinationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lease lapse without an explicit close (node crash).
    ///
    /// Identical cleanup to `close_session`: lease-bound keys are deleted,
    /// watchers are notified, and any election claim is handed to the next
    /// live campaigner.
    pub async fn expire_session(&self, session: &Session) {
        let mut inner = self.inner.lock().await;
        inner.revoke_session(session.id());
    }

    /// Expire the session whose lease owns `key`. No-op when the key is
    /// absent. Same cleanup as `expire_session`, for callers that only know
    /// a leased key.
    pub async fn expire_session_owning(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.keys.get(key) {
            let session_id = entry.session_id;
            inner.revoke_session(session_id);
        }
    }

    /// Sever every open watch and observation stream. Consumers see their
    /// streams end, exactly as after a slow-consumer drop, and must
    /// resubscribe.
    pub async fn disconnect_streams(&self) {
        let mut inner = self.inner.lock().await;
        inner.watchers.clear();
        for slot in inner.elections.values_mut() {
            slot.observers.clear();
        }
    }

    /// List keys under a prefix (inspection helper for operators and tests)
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .keys
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Current leader of an election namespace, if any
    pub async fn leader_of(&self, namespace: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .elections
            .get(namespace)
            .and_then(|slot| slot.holder.as_ref().map(|c| c.node_id.clone()))
    }
}

impl Inner {
    /// Deliver a key change to every watcher whose prefix matches.
    /// Watchers with full or closed channels are dropped.
    fn broadcast(&mut self, event: WatchEvent) {
        self.watchers.retain(|watcher| {
            if !event.key.starts_with(&watcher.prefix) {
                return true;
            }
            match watcher.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!(
                        "Dropping watcher on prefix {} (slow or gone)",
                        watcher.prefix
                    );
                    false
                }
            }
        });
    }

    /// Remove a session and everything bound to its lease
    fn revoke_session(&mut self, session_id: u64) {
        let Some(entry) = self.sessions.remove(&session_id) else {
            return;
        };

        // Lease-bound keys vanish, each emitting a delete event
        for key in entry.keys {
            if let Some(existing) = self.keys.get(&key) {
                // A later session may have overwritten the key; leave it alone
                if existing.session_id != session_id {
                    continue;
                }
            }
            if self.keys.remove(&key).is_some() {
                self.broadcast(WatchEvent {
                    kind: WatchEventKind::Delete,
                    key,
                    value: Vec::new(),
                });
            }
        }

        // Release any election claim and drop queued campaigns from this
        // session (their receivers see the drop as an abort)
        let sessions = &self.sessions;
        for slot in self.elections.values_mut() {
            slot.waiters.retain(|w| w.session_id != session_id);
            if slot
                .holder
                .as_ref()
                .map(|c| c.session_id == session_id)
                .unwrap_or(false)
            {
                slot.holder = None;
                promote_next(slot, sessions);
            }
        }
    }
}

/// Hand leadership to the next queued campaigner whose session is still alive
fn promote_next(slot: &mut ElectionSlot, sessions: &HashMap<u64, SessionEntry>) {
    while let Some(waiter) = slot.waiters.pop_front() {
        if !sessions.contains_key(&waiter.session_id) {
            continue;
        }
        // A dropped campaign future cannot be elected; skip to the next
        if waiter.elected_tx.send(()).is_err() {
            continue;
        }
        notify_observers(slot, &waiter.node_id);
        slot.holder = Some(Claim {
            session_id: waiter.session_id,
            node_id: waiter.node_id,
        });
        return;
    }
}

/// Announce a leadership change to every observer of the namespace.
/// Observers with full or closed channels are dropped.
fn notify_observers(slot: &mut ElectionSlot, leader_id: &str) {
    slot.observers
        .retain(|tx| tx.try_send(leader_id.to_string()).is_ok());
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn open_session(&self, ttl: Duration) -> Result<Session> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_session_id;
        inner.next_session_id += 1;
        inner.sessions.insert(id, SessionEntry { keys: Vec::new() });
        tracing::debug!("Opened session {} (ttl: {:?})", id, ttl);
        Ok(Session::new(id, ttl))
    }

    async fn close_session(&self, session: &Session) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.revoke_session(session.id());
        tracing::debug!("Closed session {}", session.id());
        Ok(())
    }

    async fn campaign(&self, session: &Session, namespace: &str, node_id: &str) -> Result<()> {
        let elected_rx = {
            let mut inner = self.inner.lock().await;
            if !inner.sessions.contains_key(&session.id()) {
                return Err(Error::SessionClosed);
            }

            let slot = inner.elections.entry(namespace.to_string()).or_default();
            match &slot.holder {
                None => {
                    slot.holder = Some(Claim {
                        session_id: session.id(),
                        node_id: node_id.to_string(),
                    });
                    notify_observers(slot, node_id);
                    return Ok(());
                }
                Some(claim) if claim.session_id == session.id() => {
                    // Already elected under this session
                    return Ok(());
                }
                Some(_) => {
                    let (tx, rx) = oneshot::channel();
                    slot.waiters.push_back(Waiter {
                        session_id: session.id(),
                        node_id: node_id.to_string(),
                        elected_tx: tx,
                    });
                    rx
                }
            }
        };

        elected_rx.await.map_err(|_| {
            Error::CampaignAborted("session closed while waiting for election".into())
        })
    }

    async fn observe_election(&self, namespace: &str) -> Result<mpsc::Receiver<String>> {
        let mut inner = self.inner.lock().await;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let slot = inner.elections.entry(namespace.to_string()).or_default();
        if let Some(claim) = &slot.holder {
            // New observers learn the current leader right away
            let _ = tx.try_send(claim.node_id.clone());
        }
        slot.observers.push(tx);
        Ok(rx)
    }

    async fn resign(&self, session: &Session) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let sessions_alive = inner.sessions.contains_key(&session.id());
        if !sessions_alive {
            return Err(Error::SessionClosed);
        }

        let Inner {
            elections, sessions, ..
        } = &mut *inner;
        for slot in elections.values_mut() {
            if slot
                .holder
                .as_ref()
                .map(|c| c.session_id == session.id())
                .unwrap_or(false)
            {
                slot.holder = None;
                promote_next(slot, sessions);
            }
        }
        Ok(())
    }

    async fn put(&self, key: &str, value: Vec<u8>, session: &Session) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.sessions.contains_key(&session.id()) {
            return Err(Error::SessionClosed);
        }

        inner.keys.insert(
            key.to_string(),
            KeyEntry {
                value: value.clone(),
                session_id: session.id(),
            },
        );
        if let Some(entry) = inner.sessions.get_mut(&session.id()) {
            entry.keys.push(key.to_string());
        }
        inner.broadcast(WatchEvent {
            kind: WatchEventKind::Put,
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>> {
        let mut inner = self.inner.lock().await;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        inner.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_watch() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();

        let mut watch = store.watch("/app/members").await.unwrap();
        store
            .put("/app/members/client-1", b"{}".to_vec(), &session)
            .await
            .unwrap();

        let event = watch.recv().await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Put);
        assert_eq!(event.key, "/app/members/client-1");
    }

    #[tokio::test]
    async fn test_close_session_deletes_lease_bound_keys() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();

        store
            .put("/app/members/client-1", b"{}".to_vec(), &session)
            .await
            .unwrap();
        let mut watch = store.watch("/app/members").await.unwrap();

        store.close_session(&session).await.unwrap();

        let event = watch.recv().await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Delete);
        assert_eq!(event.key, "/app/members/client-1");
        assert!(store.keys_with_prefix("/app/members").await.is_empty());
    }

    #[tokio::test]
    async fn test_put_on_closed_session_fails() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();
        store.close_session(&session).await.unwrap();

        let result = store.put("/app/k", Vec::new(), &session).await;
        assert!(matches!(result, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_sole_campaigner_wins_immediately() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();

        store
            .campaign(&session, "/app/elections", "client-1")
            .await
            .unwrap();
        assert_eq!(
            store.leader_of("/app/elections").await.as_deref(),
            Some("client-1")
        );
    }

    #[tokio::test]
    async fn test_leadership_hands_over_on_resign() {
        let store = MemoryCoordinationStore::new();
        let s1 = store.open_session(Duration::from_secs(30)).await.unwrap();
        let s2 = store.open_session(Duration::from_secs(30)).await.unwrap();

        store.campaign(&s1, "/app/elections", "client-1").await.unwrap();

        let contender = {
            let store = store.clone();
            let s2 = s2.clone();
            tokio::spawn(async move { store.campaign(&s2, "/app/elections", "client-2").await })
        };
        // Let the contender queue up behind the holder
        tokio::task::yield_now().await;

        store.resign(&s1).await.unwrap();
        contender.await.unwrap().unwrap();

        assert_eq!(
            store.leader_of("/app/elections").await.as_deref(),
            Some("client-2")
        );
    }

    #[tokio::test]
    async fn test_expiry_releases_claim_to_next_waiter() {
        let store = MemoryCoordinationStore::new();
        let s1 = store.open_session(Duration::from_secs(30)).await.unwrap();
        let s2 = store.open_session(Duration::from_secs(30)).await.unwrap();

        store.campaign(&s1, "/app/elections", "client-1").await.unwrap();

        let contender = {
            let store = store.clone();
            let s2 = s2.clone();
            tokio::spawn(async move { store.campaign(&s2, "/app/elections", "client-2").await })
        };
        tokio::task::yield_now().await;

        // Simulated crash of the holder
        store.expire_session(&s1).await;
        contender.await.unwrap().unwrap();

        assert_eq!(
            store.leader_of("/app/elections").await.as_deref(),
            Some("client-2")
        );
    }

    #[tokio::test]
    async fn test_observer_learns_current_leader_on_subscribe() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();
        store
            .campaign(&session, "/app/elections", "client-1")
            .await
            .unwrap();

        let mut observe = store.observe_election("/app/elections").await.unwrap();
        assert_eq!(observe.recv().await.as_deref(), Some("client-1"));
    }

    #[tokio::test]
    async fn test_waiting_campaign_aborts_when_own_session_closes() {
        let store = MemoryCoordinationStore::new();
        let s1 = store.open_session(Duration::from_secs(30)).await.unwrap();
        let s2 = store.open_session(Duration::from_secs(30)).await.unwrap();

        store.campaign(&s1, "/app/elections", "client-1").await.unwrap();

        let contender = {
            let store = store.clone();
            let s2 = s2.clone();
            tokio::spawn(async move { store.campaign(&s2, "/app/elections", "client-2").await })
        };
        tokio::task::yield_now().await;

        store.close_session(&s2).await.unwrap();
        let result = contender.await.unwrap();
        assert!(matches!(result, Err(Error::CampaignAborted(_))));

        // The original holder is unaffected
        assert_eq!(
            store.leader_of("/app/elections").await.as_deref(),
            Some("client-1")
        );
    }
}

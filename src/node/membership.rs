//! Membership Registry
//!
//! Announces this node's presence under a shared member namespace and
//! observes other nodes joining and leaving. Records are bound to the
//! session lease, so crashed nodes disappear on their own once the lease
//! lapses; no explicit deregistration exists.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::coord::{CoordinationStore, Session, WatchEvent, WatchEventKind};
use crate::error::{Error, Result};

/// Descriptor published as this node's membership record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Cluster-unique node identity
    pub id: String,
    /// Advertised address, if the node has one
    #[serde(default)]
    pub address: Option<String>,
    /// When this node process started
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl NodeDescriptor {
    /// Create a descriptor for a node starting now
    pub fn new(id: String, address: Option<String>) -> Self {
        Self {
            id,
            address,
            started_at: chrono::Utc::now(),
        }
    }
}

/// Kind of membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// A member record appeared
    Joined,
    /// A member record vanished (resignation or lease expiry)
    Left,
}

impl std::fmt::Display for MembershipChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipChange::Joined => write!(f, "JOINED"),
            MembershipChange::Left => write!(f, "LEFT"),
        }
    }
}

/// A membership change observed on the member namespace
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    /// What happened
    pub change: MembershipChange,
    /// Which node it happened to
    pub node_id: String,
}

/// Membership registry for a single node
pub struct MembershipRegistry {
    /// This node's descriptor (its identity included)
    descriptor: NodeDescriptor,
    /// Member namespace in the coordination store
    namespace: String,
    /// Coordination store client
    store: Arc<dyn CoordinationStore>,
    /// Session the membership record is bound to
    session: Session,
    /// Shared cancellation context
    cancel: CancellationToken,
    /// Maximum consecutive watch restarts before escalating
    observe_retry_max: u32,
    /// Delay between watch restarts
    observe_retry_delay: Duration,
}

impl MembershipRegistry {
    /// Create a new membership registry bound to an open session
    pub fn new(
        descriptor: NodeDescriptor,
        namespace: String,
        store: Arc<dyn CoordinationStore>,
        session: Session,
        cancel: CancellationToken,
        observe_retry_max: u32,
        observe_retry_delay: Duration,
    ) -> Self {
        Self {
            descriptor,
            namespace,
            store,
            session,
            cancel,
            observe_retry_max,
            observe_retry_delay,
        }
    }

    /// Key this node's membership record lives under
    fn member_key(&self) -> String {
        format!("{}/{}", self.namespace, self.descriptor.id)
    }

    /// Extract a node identity from a member key (`<namespace>/<node_id>`)
    fn extract_member_id<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rest = key
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix('/')?;
        (!rest.is_empty()).then_some(rest)
    }

    /// Write this node's membership record, bound to the session lease.
    ///
    /// The node must not serve without being discoverable, so a failed write
    /// surfaces as a startup failure.
    pub async fn register(&self) -> Result<()> {
        let key = self.member_key();
        let value = serde_json::to_vec(&self.descriptor)?;

        self.store
            .put(&key, value, &self.session)
            .await
            .map_err(|e| Error::Registration(format!("failed to write {}: {}", key, e)))?;

        tracing::info!("Registered membership record at {}", key);
        Ok(())
    }

    /// Watch the member namespace and dispatch join/leave events.
    ///
    /// Events for this node's own identity are suppressed. Keys that do not
    /// match the naming convention are dropped and logged. An ended watch is
    /// restarted against the same session; repeated failures escalate as
    /// `ObservationInterrupted`.
    pub async fn run_observer(&self, events_tx: mpsc::Sender<MembershipEvent>) -> Result<()> {
        let mut failures: u32 = 0;

        loop {
            let mut changes = match self.store.watch(&self.namespace).await {
                Ok(rx) => rx,
                Err(e) => {
                    failures += 1;
                    if failures > self.observe_retry_max {
                        return Err(Error::ObservationInterrupted(format!(
                            "membership watch failed {} times in a row: {}",
                            failures, e
                        )));
                    }
                    tracing::warn!("Failed to start membership watch (attempt {}): {}", failures, e);
                    if !self.pause_before_retry().await {
                        return Ok(());
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    next = changes.recv() => match next {
                        Some(event) => {
                            failures = 0;
                            self.handle_change(event, &events_tx);
                        }
                        None => break,
                    }
                }
            }

            if self.cancel.is_cancelled() {
                return Ok(());
            }

            failures += 1;
            if failures > self.observe_retry_max {
                return Err(Error::ObservationInterrupted(format!(
                    "membership watch stream ended {} times in a row",
                    failures
                )));
            }
            tracing::warn!("Membership watch stream ended, restarting (attempt {})", failures);
            if !self.pause_before_retry().await {
                return Ok(());
            }
        }
    }

    /// Sleep before a watch restart. Returns false when cancelled.
    async fn pause_before_retry(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.observe_retry_delay) => true,
        }
    }

    /// Turn a raw watch event into a membership event, if it is one
    fn handle_change(&self, event: WatchEvent, events_tx: &mpsc::Sender<MembershipEvent>) {
        let Some(member_id) = self.extract_member_id(&event.key) else {
            tracing::warn!(
                "Unable to extract member id on member change event. Key: {:?}",
                event.key
            );
            return;
        };

        // Our own record appearing or vanishing is not news
        if member_id == self.descriptor.id {
            tracing::trace!("Suppressing membership event for self ({})", member_id);
            return;
        }

        let change = match event.kind {
            WatchEventKind::Put => MembershipChange::Joined,
            WatchEventKind::Delete => MembershipChange::Left,
        };

        match change {
            MembershipChange::Joined => {
                tracing::info!("New member joined cluster. Member ID: {}", member_id)
            }
            MembershipChange::Left => {
                tracing::info!("Member left cluster. Member ID: {}", member_id)
            }
        }

        let event = MembershipEvent {
            change,
            node_id: member_id.to_string(),
        };
        // Dispatch is best-effort; a missing or slow consumer drops the
        // notification, never the watch
        if let Err(e) = events_tx.try_send(event) {
            tracing::trace!("Membership event not dispatched: {}", e);
        }
    }
}

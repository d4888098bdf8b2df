//! Election Coordinator
//!
//! Campaigns for leadership under a session-bound election namespace and
//! keeps a locally consistent view of who currently leads. Safety under
//! concurrent campaigns comes from the coordination store's election
//! primitive; this component's job is orchestration around it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::coord::{CoordinationStore, Session};
use crate::error::{Error, Result};

/// Election coordinator for a single node
pub struct ElectionCoordinator {
    /// This node's ID
    node_id: String,
    /// Election namespace in the coordination store
    namespace: String,
    /// Coordination store client
    store: Arc<dyn CoordinationStore>,
    /// Session the election claim is bound to
    session: Session,
    /// Identity of the current leader, as last observed.
    /// Written only by the observation loop, read by everyone else.
    current_leader: RwLock<Option<String>>,
    /// Shared cancellation context for the node's operational lifetime
    cancel: CancellationToken,
    /// Maximum consecutive observation restarts before escalating
    observe_retry_max: u32,
    /// Delay between observation restarts
    observe_retry_delay: Duration,
}

impl ElectionCoordinator {
    /// Create a new election coordinator bound to an open session
    pub fn new(
        node_id: String,
        namespace: String,
        store: Arc<dyn CoordinationStore>,
        session: Session,
        cancel: CancellationToken,
        observe_retry_max: u32,
        observe_retry_delay: Duration,
    ) -> Self {
        Self {
            node_id,
            namespace,
            store,
            session,
            current_leader: RwLock::new(None),
            cancel,
            observe_retry_max,
            observe_retry_delay,
        }
    }

    /// Get this node's ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Contend for leadership, blocking until elected.
    ///
    /// Returns `CampaignAborted` on cancellation or a recoverable store
    /// failure; session loss passes through as-is so the caller escalates
    /// instead of re-campaigning a dead session. No retry happens here, so
    /// store outages stay visible.
    pub async fn campaign(&self) -> Result<()> {
        tracing::info!("{} running for leadership in {}", self.node_id, self.namespace);

        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::CampaignAborted("cancelled".into()))
            }
            result = self.store.campaign(&self.session, &self.namespace, &self.node_id) => {
                match result {
                    Ok(()) => {
                        tracing::info!("{} won the campaign", self.node_id);
                        Ok(())
                    }
                    Err(e) if e.is_fatal() => Err(e),
                    Err(Error::CampaignAborted(reason)) => Err(Error::CampaignAborted(reason)),
                    Err(e) => Err(Error::CampaignAborted(e.to_string())),
                }
            }
        }
    }

    /// Consume leadership-change notifications for as long as the node runs.
    ///
    /// Each notification overwrites the current-leader view under the lock.
    /// An ended stream is restarted against the same session; repeated
    /// failures escalate as `ObservationInterrupted`.
    pub async fn run_observer(&self) -> Result<()> {
        let mut failures: u32 = 0;

        loop {
            let mut notifications = match self.store.observe_election(&self.namespace).await {
                Ok(rx) => rx,
                Err(e) => {
                    failures += 1;
                    if failures > self.observe_retry_max {
                        return Err(Error::ObservationInterrupted(format!(
                            "leadership observation failed {} times in a row: {}",
                            failures, e
                        )));
                    }
                    tracing::warn!(
                        "Failed to start leadership observation (attempt {}): {}",
                        failures,
                        e
                    );
                    if !self.pause_before_retry().await {
                        return Ok(());
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    next = notifications.recv() => match next {
                        Some(leader_id) => {
                            failures = 0;
                            self.apply_leader_change(leader_id).await;
                        }
                        // Stream ended (store dropped us as a slow consumer,
                        // or the backing watch failed); restart it
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
                    "leadership observation stream ended {} times in a row",
                    failures
                )));
            }
            tracing::warn!(
                "Leadership observation stream ended, restarting (attempt {})",
                failures
            );
            if !self.pause_before_retry().await {
                return Ok(());
            }
        }
    }

    /// Sleep before an observation restart. Returns false when cancelled.
    async fn pause_before_retry(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.observe_retry_delay) => true,
        }
    }

    /// Record a leadership change and log acquisitions and losses
    async fn apply_leader_change(&self, leader_id: String) {
        let mut current = self.current_leader.write().await;
        let was_leader = current.as_deref() == Some(self.node_id.as_str());
        let is_leader_now = leader_id == self.node_id;

        if is_leader_now && !was_leader {
            tracing::info!("Leadership acquired by this node ({})", self.node_id);
        } else if was_leader && !is_leader_now {
            tracing::warn!("Leadership lost to {}", leader_id);
        } else if current.as_deref() != Some(leader_id.as_str()) {
            tracing::info!("Leader changed to {}", leader_id);
        }

        *current = Some(leader_id);
    }

    /// Check whether this node currently leads. A cheap snapshot read.
    pub async fn is_leader(&self) -> bool {
        self.current_leader.read().await.as_deref() == Some(self.node_id.as_str())
    }

    /// Identity of the current leader, as last observed
    pub async fn current_leader(&self) -> Option<String> {
        self.current_leader.read().await.clone()
    }

    /// Relinquish leadership if currently held.
    ///
    /// Idempotent: a no-op when not leader. Resignation errors are logged
    /// and swallowed so shutdown always proceeds.
    pub async fn resign(&self) {
        if !self.is_leader().await {
            tracing::debug!("{} is not the leader, nothing to resign", self.node_id);
            return;
        }

        match self.store.resign(&self.session).await {
            Ok(()) => tracing::info!("{} resigned leadership", self.node_id),
            Err(e) => tracing::warn!("Resignation failed ({}), continuing shutdown", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MemoryCoordinationStore;

    fn coordinator(
        store: &MemoryCoordinationStore,
        session: Session,
        node_id: &str,
    ) -> ElectionCoordinator {
        ElectionCoordinator::new(
            node_id.to_string(),
            "/test/elections".to_string(),
            Arc::new(store.clone()),
            session,
            CancellationToken::new(),
            3,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_current_leader_tracks_last_notification() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();
        let election = coordinator(&store, session, "client-1");

        election.apply_leader_change("client-2".to_string()).await;
        election.apply_leader_change("client-1".to_string()).await;
        election.apply_leader_change("client-3".to_string()).await;

        assert_eq!(election.current_leader().await.as_deref(), Some("client-3"));
        assert!(!election.is_leader().await);

        election.apply_leader_change("client-1".to_string()).await;
        assert!(election.is_leader().await);
    }

    #[tokio::test]
    async fn test_sole_campaigner_becomes_leader() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();
        let election = Arc::new(coordinator(&store, session, "client-1"));

        let observer = Arc::clone(&election);
        tokio::spawn(async move {
            let _ = observer.run_observer().await;
        });

        election.campaign().await.unwrap();

        // Wait for the observation loop to deliver the proclamation
        for _ in 0..50 {
            if election.is_leader().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(election.is_leader().await);
        assert_eq!(election.current_leader().await.as_deref(), Some("client-1"));
    }

    #[tokio::test]
    async fn test_resign_is_idempotent_when_not_leader() {
        let store = MemoryCoordinationStore::new();
        let s1 = store.open_session(Duration::from_secs(30)).await.unwrap();
        let s2 = store.open_session(Duration::from_secs(30)).await.unwrap();

        // client-1 holds the claim
        store.campaign(&s1, "/test/elections", "client-1").await.unwrap();

        let election = coordinator(&store, s2, "client-2");
        election.apply_leader_change("client-1".to_string()).await;

        // Resigning without leadership changes nothing
        election.resign().await;
        election.resign().await;

        assert_eq!(
            store.leader_of("/test/elections").await.as_deref(),
            Some("client-1")
        );
        assert_eq!(election.current_leader().await.as_deref(), Some("client-1"));
    }

    #[tokio::test]
    async fn test_campaign_surfaces_session_loss_as_fatal() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();
        store.close_session(&session).await.unwrap();

        let election = coordinator(&store, session, "client-1");
        let err = election.campaign().await.unwrap_err();

        // Session loss must not be dressed up as a recoverable abort
        assert!(matches!(err, Error::SessionClosed));
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_observer_restarts_when_its_stream_ends() {
        let store = MemoryCoordinationStore::new();
        let s1 = store.open_session(Duration::from_secs(30)).await.unwrap();
        let s2 = store.open_session(Duration::from_secs(30)).await.unwrap();
        let s3 = store.open_session(Duration::from_secs(30)).await.unwrap();

        let election = Arc::new(coordinator(&store, s2, "client-2"));
        let observer = Arc::clone(&election);
        tokio::spawn(async move {
            let _ = observer.run_observer().await;
        });

        store.campaign(&s1, "/test/elections", "client-1").await.unwrap();
        for _ in 0..100 {
            if election.current_leader().await.as_deref() == Some("client-1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(election.current_leader().await.as_deref(), Some("client-1"));

        // Sever the stream, then hand leadership on; only a restarted
        // subscription can deliver the new leader
        store.disconnect_streams().await;
        store.resign(&s1).await.unwrap();
        store.campaign(&s3, "/test/elections", "client-3").await.unwrap();

        for _ in 0..100 {
            if election.current_leader().await.as_deref() == Some("client-3") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(election.current_leader().await.as_deref(), Some("client-3"));
    }

    #[tokio::test]
    async fn test_observation_escalates_after_repeated_stream_failures() {
        let store = MemoryCoordinationStore::new();
        let session = store.open_session(Duration::from_secs(30)).await.unwrap();

        // retry_max is 3; the observer may restart three times, the fourth
        // ended stream escalates
        let election = Arc::new(coordinator(&store, session, "client-1"));
        let observer = Arc::clone(&election);
        let handle = tokio::spawn(async move { observer.run_observer().await });

        // Keep severing streams so no restart ever delivers a notification
        let disconnector = {
            let store = store.clone();
            tokio::spawn(async move {
                loop {
                    store.disconnect_streams().await;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
        };

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("observer did not give up")
            .unwrap();
        disconnector.abort();

        assert!(matches!(result, Err(Error::ObservationInterrupted(_))));
    }

    #[tokio::test]
    async fn test_campaign_aborts_on_cancellation() {
        let store = MemoryCoordinationStore::new();
        let s1 = store.open_session(Duration::from_secs(30)).await.unwrap();
        let s2 = store.open_session(Duration::from_secs(30)).await.unwrap();

        store.campaign(&s1, "/test/elections", "client-1").await.unwrap();

        let cancel = CancellationToken::new();
        let election = ElectionCoordinator::new(
            "client-2".to_string(),
            "/test/elections".to_string(),
            Arc::new(store.clone()),
            s2,
            cancel.clone(),
            3,
            Duration::from_millis(10),
        );

        let handle = tokio::spawn(async move { election.campaign().await });
        tokio::task::yield_now().await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::CampaignAborted(_))));
    }
}

//! Node Lifecycle Controller
//!
//! Owns startup/shutdown sequencing: opens the single coordination-store
//! session, registers membership, launches the campaign and observation
//! activities, polls leadership at a fixed interval, and tears everything
//! down in order when termination is requested or an unrecoverable fault
//! surfaces.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::coord::CoordinationStore;
use crate::error::{Error, Result};
use crate::node::{ElectionCoordinator, MembershipEvent, MembershipRegistry, NodeDescriptor};

/// Lifecycle state of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet started
    Created,
    /// Session open, writing the membership record
    Registering,
    /// Registered and campaigning; leadership polled continuously
    Running,
    /// Tearing down: resign, then close the session
    ShuttingDown,
    /// Fully stopped; the session is closed
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "CREATED"),
            LifecycleState::Registering => write!(f, "REGISTERING"),
            LifecycleState::Running => write!(f, "RUNNING"),
            LifecycleState::ShuttingDown => write!(f, "SHUTTING_DOWN"),
            LifecycleState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Tuning knobs for the lifecycle controller
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Session lease TTL
    pub session_ttl: Duration,
    /// Election namespace
    pub election_namespace: String,
    /// Member namespace
    pub member_namespace: String,
    /// Leadership poll interval
    pub poll_interval: Duration,
    /// Base delay before re-attempting an aborted campaign (jitter is added)
    pub campaign_retry_delay: Duration,
    /// Campaign re-attempts before escalating to a session failure
    pub campaign_retry_max: u32,
    /// Delay between observation restarts
    pub observe_retry_delay: Duration,
    /// Consecutive observation restarts before escalating
    pub observe_retry_max: u32,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(30),
            election_namespace: "/steward/elections".to_string(),
            member_namespace: "/steward/members".to_string(),
            poll_interval: Duration::from_secs(1),
            campaign_retry_delay: Duration::from_millis(500),
            campaign_retry_max: 5,
            observe_retry_delay: Duration::from_millis(250),
            observe_retry_max: 5,
        }
    }
}

impl LifecycleOptions {
    /// Build options from the loaded configuration
    pub fn from_config(config: &crate::config::StewardConfig) -> Self {
        Self {
            session_ttl: config.session_ttl(),
            election_namespace: config.election_namespace(),
            member_namespace: config.member_namespace(),
            poll_interval: config.poll_interval(),
            campaign_retry_delay: Duration::from_millis(config.lifecycle.campaign_retry_delay_ms),
            campaign_retry_max: config.lifecycle.campaign_retry_max,
            observe_retry_delay: Duration::from_millis(config.lifecycle.observe_retry_delay_ms),
            observe_retry_max: config.lifecycle.observe_retry_max,
        }
    }
}

/// Lifecycle controller for a single node
pub struct NodeLifecycle {
    /// This node's descriptor
    descriptor: NodeDescriptor,
    /// Tuning
    opts: LifecycleOptions,
    /// Coordination store client, injected at construction
    store: Arc<dyn CoordinationStore>,
    /// Current lifecycle state
    state: RwLock<LifecycleState>,
    /// Election coordinator, available once the session is open
    election: RwLock<Option<Arc<ElectionCoordinator>>>,
    /// Shared cancellation context for every concurrent activity
    cancel: CancellationToken,
    /// Readiness signal; true once Running is reached
    ready_tx: watch::Sender<bool>,
    /// Sender side of the membership event channel
    events_tx: mpsc::Sender<MembershipEvent>,
    /// Receiver side, handed out once to the embedding process
    events_rx: Mutex<Option<mpsc::Receiver<MembershipEvent>>>,
}

impl NodeLifecycle {
    /// Create a lifecycle controller. Nothing touches the store until `run`.
    pub fn new(
        descriptor: NodeDescriptor,
        opts: LifecycleOptions,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(64);

        Self {
            descriptor,
            opts,
            store,
            state: RwLock::new(LifecycleState::Created),
            election: RwLock::new(None),
            cancel: CancellationToken::new(),
            ready_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Get this node's ID
    pub fn node_id(&self) -> &str {
        &self.descriptor.id
    }

    /// Current lifecycle state
    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Subscribe to the readiness signal
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Take the membership event stream. Yields `None` after the first call.
    /// Untaken events are dropped, never buffered against the watch.
    pub async fn take_membership_events(&self) -> Option<mpsc::Receiver<MembershipEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Check whether this node currently leads
    pub async fn is_leader(&self) -> bool {
        match self.election.read().await.as_ref() {
            Some(election) => election.is_leader().await,
            None => false,
        }
    }

    /// Identity of the current leader, as last observed
    pub async fn current_leader(&self) -> Option<String> {
        match self.election.read().await.as_ref() {
            Some(election) => election.current_leader().await,
            None => None,
        }
    }

    /// Request a graceful shutdown. Safe to call from any task, any number
    /// of times.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Termination requested. Resign leadership if possible");
        }
        self.cancel.cancel();
    }

    /// Log and apply a state transition
    async fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.write().await;
        if *state != next {
            tracing::info!("Node {} state: {} -> {}", self.descriptor.id, *state, next);
            *state = next;
        }
    }

    /// Run the node until shutdown.
    ///
    /// Session-open and initial-registration failures are fatal and returned
    /// without entering Running. Once Running, only session-level loss ends
    /// the node; everything else is absorbed and restarted by the owning
    /// activity.
    pub async fn run(&self) -> Result<()> {
        // Created -> Registering: open the one session and bind components
        let session = match self.store.open_session(self.opts.session_ttl).await {
            Ok(session) => session,
            Err(e) => {
                let err = Error::Session(format!("failed to open session: {}", e));
                tracing::error!("{}", err);
                self.set_state(LifecycleState::Stopped).await;
                return Err(err);
            }
        };
        tracing::info!(
            "Session {} opened (ttl: {:?})",
            session.id(),
            session.ttl()
        );

        let election = Arc::new(ElectionCoordinator::new(
            self.descriptor.id.clone(),
            self.opts.election_namespace.clone(),
            Arc::clone(&self.store),
            session.clone(),
            self.cancel.clone(),
            self.opts.observe_retry_max,
            self.opts.observe_retry_delay,
        ));
        let registry = Arc::new(MembershipRegistry::new(
            self.descriptor.clone(),
            self.opts.member_namespace.clone(),
            Arc::clone(&self.store),
            session.clone(),
            self.cancel.clone(),
            self.opts.observe_retry_max,
            self.opts.observe_retry_delay,
        ));
        *self.election.write().await = Some(Arc::clone(&election));

        self.set_state(LifecycleState::Registering).await;
        if let Err(e) = registry.register().await {
            tracing::error!("Startup registration failed: {}", e);
            // The session close must not be skipped, even on a failed start
            if let Err(close_err) = self.store.close_session(&session).await {
                tracing::warn!("Session close after failed registration failed: {}", close_err);
            }
            self.set_state(LifecycleState::Stopped).await;
            return Err(e);
        }

        // Activities report unrecoverable faults here; the first one wins
        let (fault_tx, mut fault_rx) = mpsc::channel::<Error>(8);

        // Leadership-change observation
        {
            let election = Arc::clone(&election);
            let fault_tx = fault_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = election.run_observer().await {
                    let _ = fault_tx.send(e).await;
                }
            });
        }

        // Campaign loop: re-attempt aborted campaigns with jittered backoff,
        // escalating to a session failure after repeated aborts. Fatal
        // errors (session loss) skip the retries and fault immediately.
        {
            let election = Arc::clone(&election);
            let fault_tx = fault_tx.clone();
            let cancel = self.cancel.clone();
            let retry_delay = self.opts.campaign_retry_delay;
            let retry_max = self.opts.campaign_retry_max;
            tokio::spawn(async move {
                let mut attempts: u32 = 0;
                loop {
                    match election.campaign().await {
                        Ok(()) => {
                            // Elected; the claim is held until resignation or
                            // session loss ends it
                            cancel.cancelled().await;
                            break;
                        }
                        Err(_) if cancel.is_cancelled() => break,
                        Err(e) if e.is_fatal() => {
                            let _ = fault_tx.send(e).await;
                            break;
                        }
                        Err(e) => {
                            attempts += 1;
                            if attempts > retry_max {
                                let _ = fault_tx
                                    .send(Error::Session(format!(
                                        "campaign aborted {} times in a row: {}",
                                        attempts, e
                                    )))
                                    .await;
                                break;
                            }
                            tracing::warn!(
                                "{} (re-campaigning, attempt {}/{})",
                                e,
                                attempts,
                                retry_max
                            );
                            let jitter = rand::thread_rng()
                                .gen_range(0..=retry_delay.as_millis() as u64);
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(
                                    retry_delay + Duration::from_millis(jitter)) => {}
                            }
                        }
                    }
                }
            });
        }

        // Membership observation
        {
            let registry = Arc::clone(&registry);
            let fault_tx = fault_tx.clone();
            let events_tx = self.events_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = registry.run_observer(events_tx).await {
                    let _ = fault_tx.send(e).await;
                }
            });
        }

        // Registering -> Running
        self.set_state(LifecycleState::Running).await;
        let _ = self.ready_tx.send(true);

        let mut ticker = tokio::time::interval(self.opts.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let run_error = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break None,
                Some(err) = fault_rx.recv() => {
                    tracing::error!("Unrecoverable fault: {}", err);
                    break Some(err);
                }
                _ = ticker.tick() => {
                    if election.is_leader().await {
                        tracing::debug!("{} holding leadership", self.descriptor.id);
                    }
                }
            }
        };

        // Running -> ShuttingDown: resign (if leader), then always close the
        // session so every leased record is released
        self.set_state(LifecycleState::ShuttingDown).await;
        let _ = self.ready_tx.send(false);
        self.cancel.cancel();

        election.resign().await;
        match self.store.close_session(&session).await {
            Ok(()) => tracing::info!(
                "Session {} closed, leased records released",
                session.id()
            ),
            Err(e) => tracing::warn!("Session close failed: {}", e),
        }

        self.set_state(LifecycleState::Stopped).await;
        match run_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MemoryCoordinationStore;
    use crate::node::MembershipChange;

    fn test_options() -> LifecycleOptions {
        LifecycleOptions {
            session_ttl: Duration::from_secs(30),
            election_namespace: "/test/elections".to_string(),
            member_namespace: "/test/members".to_string(),
            poll_interval: Duration::from_millis(50),
            campaign_retry_delay: Duration::from_millis(20),
            campaign_retry_max: 3,
            observe_retry_delay: Duration::from_millis(10),
            observe_retry_max: 3,
        }
    }

    fn test_node(store: &MemoryCoordinationStore, id: &str) -> Arc<NodeLifecycle> {
        Arc::new(NodeLifecycle::new(
            NodeDescriptor::new(id.to_string(), None),
            test_options(),
            Arc::new(store.clone()),
        ))
    }

    async fn start(node: &Arc<NodeLifecycle>) -> tokio::task::JoinHandle<Result<()>> {
        let runner = Arc::clone(node);
        let handle = tokio::spawn(async move { runner.run().await });

        let mut ready = node.readiness();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !*ready.borrow() {
                ready.changed().await.unwrap();
            }
        })
        .await
        .expect("node did not become ready");
        handle
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if check().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_sole_node_becomes_leader_and_stops_cleanly() {
        let store = MemoryCoordinationStore::new();
        let node = test_node(&store, "client-1");

        let handle = start(&node).await;
        wait_for(|| node.is_leader()).await;
        assert_eq!(node.current_leader().await.as_deref(), Some("client-1"));
        assert_eq!(
            store.keys_with_prefix("/test/members/client-1").await.len(),
            1
        );

        node.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(node.state().await, LifecycleState::Stopped);

        // Closing the session released both the claim and the record
        assert!(store.keys_with_prefix("/test/members").await.is_empty());
        assert_eq!(store.leader_of("/test/elections").await, None);
    }

    #[tokio::test]
    async fn test_leadership_hands_over_when_leader_resigns() {
        let store = MemoryCoordinationStore::new();
        let node1 = test_node(&store, "client-1");
        let node2 = test_node(&store, "client-2");

        let handle1 = start(&node1).await;
        wait_for(|| node1.is_leader()).await;

        let handle2 = start(&node2).await;
        // client-2 campaigns but stays a follower while client-1 holds on
        wait_for(|| async {
            node2.current_leader().await.as_deref() == Some("client-1")
        })
        .await;
        assert!(!node2.is_leader().await);

        node1.shutdown();
        handle1.await.unwrap().unwrap();

        wait_for(|| node2.is_leader()).await;
        assert_eq!(node2.current_leader().await.as_deref(), Some("client-2"));

        node2.shutdown();
        handle2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_membership_events_reach_the_embedder() {
        let store = MemoryCoordinationStore::new();
        let node1 = test_node(&store, "client-1");
        let node2 = test_node(&store, "client-2");

        let mut events = node1.take_membership_events().await.unwrap();
        assert!(node1.take_membership_events().await.is_none());

        let handle1 = start(&node1).await;
        let handle2 = start(&node2).await;

        let joined = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(joined.change, MembershipChange::Joined);
        assert_eq!(joined.node_id, "client-2");

        node2.shutdown();
        handle2.await.unwrap().unwrap();

        let left = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(left.change, MembershipChange::Left);
        assert_eq!(left.node_id, "client-2");

        node1.shutdown();
        handle1.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_crashed_leader_is_replaced() {
        let store = MemoryCoordinationStore::new();
        let s1 = store.open_session(Duration::from_secs(5)).await.unwrap();

        // A raw campaigner standing in for a node that will crash
        store
            .campaign(&s1, "/test/elections", "client-1")
            .await
            .unwrap();
        store
            .put("/test/members/client-1", b"{}".to_vec(), &s1)
            .await
            .unwrap();

        let node2 = test_node(&store, "client-2");
        let handle2 = start(&node2).await;
        wait_for(|| async {
            node2.current_leader().await.as_deref() == Some("client-1")
        })
        .await;

        // Simulated crash: lease lapses with no explicit shutdown
        store.expire_session(&s1).await;

        wait_for(|| node2.is_leader()).await;
        assert!(store.keys_with_prefix("/test/members/client-1").await.is_empty());

        node2.shutdown();
        handle2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_session_loss_stops_the_node_with_a_fatal_error() {
        let store = MemoryCoordinationStore::new();
        let s1 = store.open_session(Duration::from_secs(30)).await.unwrap();

        // A raw campaigner holds the claim so the node stays a queued follower
        store
            .campaign(&s1, "/test/elections", "client-1")
            .await
            .unwrap();

        let node2 = test_node(&store, "client-2");
        let handle2 = start(&node2).await;
        wait_for(|| async {
            node2.current_leader().await.as_deref() == Some("client-1")
        })
        .await;

        // The node's session is the lease behind its membership record;
        // expiring it aborts the queued campaign, and the re-campaign must
        // fault immediately rather than retry a dead session
        store.expire_session_owning("/test/members/client-2").await;

        let result = tokio::time::timeout(Duration::from_secs(2), handle2)
            .await
            .expect("node did not stop on session loss")
            .unwrap();
        let err = result.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(node2.state().await, LifecycleState::Stopped);

        // The raw holder is unaffected
        assert_eq!(
            store.leader_of("/test/elections").await.as_deref(),
            Some("client-1")
        );
    }

    #[tokio::test]
    async fn test_follower_shutdown_does_not_disturb_the_leader() {
        let store = MemoryCoordinationStore::new();
        let node1 = test_node(&store, "client-1");
        let node2 = test_node(&store, "client-2");

        let handle1 = start(&node1).await;
        wait_for(|| node1.is_leader()).await;
        let handle2 = start(&node2).await;
        wait_for(|| async {
            node2.current_leader().await.as_deref() == Some("client-1")
        })
        .await;

        // Resign on a non-leader is a logged no-op; the claim stays put
        node2.shutdown();
        handle2.await.unwrap().unwrap();

        assert!(node1.is_leader().await);
        assert_eq!(
            store.leader_of("/test/elections").await.as_deref(),
            Some("client-1")
        );

        node1.shutdown();
        handle1.await.unwrap().unwrap();
    }
}

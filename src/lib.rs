//! Steward - Cluster Node Agent
//!
//! A cluster node agent that participates in leader election and maintains a
//! live view of cluster membership, coordinating solely through a shared,
//! strongly-consistent external coordination store (sessions/leases,
//! key-value, watches, and an election primitive).
//!
//! # Architecture
//!
//! Each node opens exactly one lease-backed session against the coordination
//! store. The election coordinator campaigns for leadership under that
//! session; the membership registry announces the node under a shared member
//! namespace bound to the same lease and watches it for join/leave events;
//! the lifecycle controller sequences startup and shutdown around them.
//! Closing the session releases the election claim and the membership record
//! in one stroke, which is also what makes crash cleanup automatic: a dead
//! node's records vanish when its lease expires.
//!
//! # Features
//!
//! - Session-bound leader election with idempotent resignation
//! - Lease-backed membership with automatic crash cleanup
//! - Join/leave observation with self-event suppression
//! - Graceful shutdown sequencing under a single cancellation context
//! - HTTP API for readiness, status, and remote shutdown
//! - Pluggable coordination-store backend behind an async trait

pub mod api;
pub mod config;
pub mod coord;
pub mod error;
pub mod node;

pub use config::StewardConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::StewardConfig;
    pub use crate::coord::{CoordinationStore, MemoryCoordinationStore, Session};
    pub use crate::error::{Error, Result};
    pub use crate::node::{
        ElectionCoordinator, LifecycleOptions, LifecycleState, MembershipChange,
        MembershipEvent, MembershipRegistry, NodeDescriptor, NodeLifecycle,
    };
}

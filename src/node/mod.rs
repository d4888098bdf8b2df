//! Node Orchestration Module
//!
//! The election/membership core: campaigning for leadership, tracking
//! leadership changes, announcing this node's presence, observing peers
//! joining and leaving, and sequencing startup/shutdown around a single
//! coordination-store session.

mod election;
mod lifecycle;
mod membership;

pub use election::ElectionCoordinator;
pub use lifecycle::{LifecycleOptions, LifecycleState, NodeLifecycle};
pub use membership::{MembershipChange, MembershipEvent, MembershipRegistry, NodeDescriptor};

//! Coordination Store Module
//!
//! Defines the contract steward consumes from an external, strongly-consistent
//! coordination store (sessions/leases, key-value, watches, and an election
//! primitive), plus an in-memory implementation used by tests and by
//! single-process deployments.

mod memory;
mod store;

pub use memory::MemoryCoordinationStore;
pub use store::{CoordinationStore, Session, WatchEvent, WatchEventKind};

//! Cluster State - Coordination Layer for Clustered Application Nodes
//!
//! Lets the nodes of a clustered application agree on a leader, on which
//! worker processes are operational cluster-wide, and on running the same
//! software version within the same named cluster, and reacts when nodes
//! leave.
//!
//! # Architecture
//!
//! No consensus protocol and no transport live here. Everything runs on a
//! group-communication substrate ([`substrate::GroupSubstrate`]) offering
//! membership events, a replicated map, locks and atomic registers. Leader
//! election and consistency checks are first-writer-wins claims on set-once
//! registers guarded by the register's lock.
//!
//! # Features
//!
//! - Single-shot leader election
//! - Cluster-wide operational process registry with listeners
//! - Version and cluster name consistency checks at join time
//! - Departure handling: processes switched off, application state purged
//! - In-process substrate for tests and local simulation

pub mod config;
pub mod error;
pub mod node;
pub mod process;
pub mod substrate;
pub mod state;
pub mod client;
pub mod coordinator;

pub use config::ClusterStateConfig;
pub use coordinator::ClusterCoordinator;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::ClusterClient;
    pub use crate::config::ClusterStateConfig;
    pub use crate::coordinator::ClusterCoordinator;
    pub use crate::error::{Error, Result};
    pub use crate::node::{Member, NodeId, NodeRole};
    pub use crate::process::{ClusterProcess, ProcessId};
    pub use crate::state::OperationalListener;
    pub use crate::substrate::{GroupConnector, GroupSubstrate, MemoryGroup};
}

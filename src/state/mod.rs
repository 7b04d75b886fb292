//! State Management Module
//!
//! Cluster-wide coordination state: set-once registers, the operational
//! process registry, leader election, peer consistency checks and membership
//! watching.

pub mod register;
mod registry;
pub mod election;
mod consistency;
mod membership;

pub use register::SetOnceRegister;
pub use registry::{OperationalListener, ProcessRegistry};
pub use election::LeaderElector;
pub use consistency::ConsistencyGuard;
pub use membership::MembershipWatcher;

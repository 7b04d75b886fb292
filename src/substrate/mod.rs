//! Group Communication Substrate
//!
//! The coordination layer does not implement a transport. It runs on top of a
//! group-communication substrate providing membership events, a replicated
//! map, distributed locks, atomic registers and replicated sets. This module
//! defines that contract; [`memory`] provides an in-process implementation.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::node::{Address, Member, NodeAttributes, NodeId};
use crate::process::ClusterProcess;

pub use memory::{MemoryEndpoint, MemoryGroup};

/// Name of the substrate group every node joins
pub const GROUP_NAME: &str = "clusterstate";

/// Name of the replicated map holding operational flags
pub const OPERATIONAL_PROCESSES: &str = "OPERATIONAL_PROCESSES";

/// Name of the replicated set holding connected client ids
pub const LOCAL_MEMBER_UUIDS: &str = "LOCAL_MEMBER_UUIDS";

/// Cluster-wide set-once registers, each with a lock of the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKey {
    Leader,
    Version,
    ClusterName,
}

impl RegisterKey {
    pub fn name(&self) -> &'static str {
        match self {
            RegisterKey::Leader => "LEADER",
            RegisterKey::Version => "VERSION",
            RegisterKey::ClusterName => "CLUSTER_NAME",
        }
    }
}

impl std::fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Held distributed lock. The lock is released when the guard is dropped.
pub struct LockGuard {
    _inner: Box<dyn std::any::Any + Send + Sync>,
}

impl LockGuard {
    pub fn new<G: Send + Sync + 'static>(inner: G) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

/// Membership change observed by a member
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    /// A member joined; `members` is the membership after the join
    Added { member: Member, members: Vec<Member> },
    /// A member left or was lost; `members` is the remaining membership
    Removed { member: Member, members: Vec<Member> },
    /// A member changed one of its published attributes
    AttributeChanged { member: Member },
}

/// Change to an entry of the operational-process map
#[derive(Debug, Clone)]
pub enum EntryEvent {
    Added {
        key: ClusterProcess,
        value: bool,
    },
    Updated {
        key: ClusterProcess,
        old_value: bool,
        value: bool,
    },
    Removed {
        key: ClusterProcess,
        old_value: bool,
    },
    Evicted {
        key: ClusterProcess,
    },
    Cleared,
}

/// Lightweight client connecting to or leaving a member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected(String),
    Disconnected(String),
}

/// Everything a substrate pushes to one member
#[derive(Debug, Clone)]
pub enum SubstrateEvent {
    Membership(MembershipEvent),
    Entry(EntryEvent),
    Client(ClientEvent),
}

/// Static settings used to join a group
#[derive(Debug, Clone)]
pub struct JoinSettings {
    /// Substrate group to join
    pub group_name: String,
    /// First port to try
    pub port: u16,
    /// Number of consecutive ports tried when `port` is taken
    pub port_try_count: u16,
    /// Interfaces to bind (empty = loopback)
    pub interfaces: Vec<String>,
    /// Static peer list; no broadcast or multicast discovery
    pub peers: Vec<Address>,
    /// Attributes published to the other members
    pub attributes: NodeAttributes,
}

/// Joins a group and returns the local endpoint
#[async_trait]
pub trait GroupConnector: Send + Sync {
    async fn join(&self, settings: JoinSettings) -> Result<Arc<dyn GroupSubstrate>>;
}

/// Joined endpoint of a group-communication substrate.
///
/// Once the endpoint has left the group every operation fails with
/// [`crate::Error::ShuttingDown`].
#[async_trait]
pub trait GroupSubstrate: Send + Sync {
    /// This member
    fn local_member(&self) -> &Member;

    /// Name of the joined group
    fn group_name(&self) -> &str;

    /// Current members, including the local one
    async fn members(&self) -> Result<Vec<Member>>;

    /// Cluster-wide clock in milliseconds since the Unix epoch
    async fn cluster_time(&self) -> Result<i64>;

    async fn put_process(&self, key: ClusterProcess, operational: bool) -> Result<()>;

    async fn remove_process(&self, key: &ClusterProcess) -> Result<Option<bool>>;

    /// Snapshot of the operational-process map
    async fn processes(&self) -> Result<Vec<(ClusterProcess, bool)>>;

    async fn read_register(&self, key: RegisterKey) -> Result<Option<String>>;

    async fn write_register(&self, key: RegisterKey, value: String) -> Result<()>;

    async fn clear_register(&self, key: RegisterKey) -> Result<()>;

    /// Acquire the cluster-wide lock called `name`, waiting without timeout.
    /// Each register is guarded by the lock named after it.
    async fn lock(&self, name: &str) -> Result<LockGuard>;

    /// Add `value` to a replicated set, returning whether it was absent
    async fn add_to_set(&self, set: &str, value: String) -> Result<bool>;

    /// Remove `value` from a replicated set, returning whether it was present
    async fn remove_from_set(&self, set: &str, value: &str) -> Result<bool>;

    async fn set_members(&self, set: &str) -> Result<Vec<String>>;

    /// Take the event stream of this member. Can only be taken once.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<SubstrateEvent>>;

    /// Leave the group
    async fn shutdown(&self) -> Result<()>;

    /// Convenience accessor for the local member id
    fn local_id(&self) -> &NodeId {
        &self.local_member().id
    }
}

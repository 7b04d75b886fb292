//! Cluster Client
//!
//! Narrow view over the joined substrate handed to in-node collaborators that
//! need cluster identity, time or locks without owning the coordinator.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{Member, NodeId};
use crate::substrate::{GroupSubstrate, LockGuard, LOCAL_MEMBER_UUIDS};

/// Read-mostly handle on the cluster
#[derive(Clone)]
pub struct ClusterClient {
    substrate: Arc<dyn GroupSubstrate>,
}

impl ClusterClient {
    pub fn new(substrate: Arc<dyn GroupSubstrate>) -> Self {
        Self { substrate }
    }

    /// Id of the local member
    pub fn uuid(&self) -> &NodeId {
        self.substrate.local_id()
    }

    /// Ids of every member plus every client connected to a member
    pub async fn member_uuids(&self) -> Result<BTreeSet<String>> {
        let mut uuids: BTreeSet<String> = self
            .substrate
            .set_members(LOCAL_MEMBER_UUIDS)
            .await?
            .into_iter()
            .collect();
        uuids.extend(
            self.substrate
                .members()
                .await?
                .into_iter()
                .map(|m| m.id.to_string()),
        );
        Ok(uuids)
    }

    /// Look a member up by id
    pub async fn member(&self, id: &NodeId) -> Result<Member> {
        self.substrate
            .members()
            .await?
            .into_iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| Error::NotFound(format!("member {}", id)))
    }

    /// Acquire a cluster-wide lock by name. Released when the guard drops.
    pub async fn lock(&self, name: &str) -> Result<LockGuard> {
        self.substrate.lock(name).await
    }

    /// Current content of a replicated set
    pub async fn set(&self, name: &str) -> Result<Vec<String>> {
        self.substrate.set_members(name).await
    }

    /// Cluster clock in milliseconds since the Unix epoch
    pub async fn cluster_time(&self) -> Result<i64> {
        self.substrate.cluster_time().await
    }
}

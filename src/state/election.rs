//! Leader Election
//!
//! Single-shot, first-writer-wins election over the `LEADER` register. There
//! is no term, lease or failover: the leader stays leader until the register
//! is purged because no application node is left.

use std::sync::Arc;

use crate::error::Result;
use crate::node::NodeId;
use crate::state::register::SetOnceRegister;
use crate::substrate::{GroupSubstrate, RegisterKey};

/// Elects the cluster leader
pub struct LeaderElector {
    substrate: Arc<dyn GroupSubstrate>,
    register: SetOnceRegister,
}

impl LeaderElector {
    pub fn new(substrate: Arc<dyn GroupSubstrate>) -> Self {
        Self {
            register: SetOnceRegister::new(Arc::clone(&substrate), RegisterKey::Leader),
            substrate,
        }
    }

    /// Try to become leader.
    ///
    /// Returns true for exactly one caller across the cluster until the
    /// register is cleared; every later call, the winner's included, returns
    /// false.
    pub async fn try_lock_leader(&self) -> Result<bool> {
        let local_id = self.substrate.local_id();
        let won = self.register.try_claim(local_id.as_str()).await?;

        if won {
            tracing::info!("Node {} elected as cluster leader", local_id);
        } else {
            tracing::debug!("Leader already elected, node {} stays follower", local_id);
        }

        Ok(won)
    }

    /// Id stored in the leader register
    pub async fn leader_id(&self) -> Result<Option<NodeId>> {
        Ok(self.register.get().await?.map(NodeId::from))
    }

    /// `hostname (ips)` of the leader, if it is set and still a member
    pub async fn leader_host_name(&self) -> Option<String> {
        let leader_id = match self.leader_id().await {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("Unable to read leader register: {}", e);
                return None;
            }
        };

        match self.substrate.members().await {
            Ok(members) => members
                .iter()
                .find(|m| m.id == leader_id)
                .map(|m| m.display_name()),
            Err(e) => {
                tracing::debug!("Unable to list members: {}", e);
                None
            }
        }
    }
}

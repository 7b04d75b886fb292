//! Cluster Membership Watcher
//!
//! Reacts to peers leaving the group: their processes are flagged as no
//! longer operational, and once no application node remains the leader and
//! version registers are purged so the next application node to join can
//! claim them again.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::node::{Member, NodeId};
use crate::state::register::SetOnceRegister;
use crate::substrate::{
    ClientEvent, GroupSubstrate, MembershipEvent, RegisterKey, LOCAL_MEMBER_UUIDS,
};

/// Watches membership and client connections of the local member
pub struct MembershipWatcher {
    substrate: Arc<dyn GroupSubstrate>,
    leader: SetOnceRegister,
    version: SetOnceRegister,
    /// Clients connected to this member
    local_clients: RwLock<BTreeSet<String>>,
}

impl MembershipWatcher {
    pub fn new(substrate: Arc<dyn GroupSubstrate>) -> Self {
        Self {
            leader: SetOnceRegister::new(Arc::clone(&substrate), RegisterKey::Leader),
            version: SetOnceRegister::new(Arc::clone(&substrate), RegisterKey::Version),
            substrate,
            local_clients: RwLock::new(BTreeSet::new()),
        }
    }

    /// Handle a membership change
    pub async fn on_membership_event(&self, event: &MembershipEvent) -> Result<()> {
        match event {
            MembershipEvent::Added { member, .. } => {
                tracing::debug!("Member {} ({}) joined", member.id, member.display_name());
                Ok(())
            }
            MembershipEvent::Removed { member, members } => {
                self.on_member_removed(member, members).await
            }
            MembershipEvent::AttributeChanged { .. } => Ok(()),
        }
    }

    async fn on_member_removed(&self, departed: &Member, remaining: &[Member]) -> Result<()> {
        tracing::info!(
            "Member {} ({}) left the cluster",
            departed.id,
            departed.display_name()
        );

        let invalidated = self.invalidate_processes(&departed.id).await?;
        if invalidated > 0 {
            tracing::info!(
                "{} process(es) of member {} no longer operational",
                invalidated,
                departed.id
            );
        }

        if !remaining.iter().any(Member::is_application) {
            self.purge_application_state().await?;
        }
        Ok(())
    }

    /// Flag every process of `node_id` as not operational. Entries are kept.
    async fn invalidate_processes(&self, node_id: &NodeId) -> Result<usize> {
        let mut invalidated = 0;
        for (key, operational) in self.substrate.processes().await? {
            if &key.node_id != node_id {
                continue;
            }
            tracing::debug!("Set node process off for [{}]", key);
            if operational {
                invalidated += 1;
            }
            self.substrate.put_process(key, false).await?;
        }
        Ok(invalidated)
    }

    async fn purge_application_state(&self) -> Result<()> {
        tracing::info!(
            "No more application nodes, clearing cluster information about application nodes"
        );
        self.leader.clear().await?;
        self.version.clear().await?;
        Ok(())
    }

    /// Track a client connecting to or leaving this member
    pub async fn on_client_event(&self, event: &ClientEvent) -> Result<()> {
        match event {
            ClientEvent::Connected(id) => {
                self.substrate
                    .add_to_set(LOCAL_MEMBER_UUIDS, id.clone())
                    .await?;
                self.local_clients.write().await.insert(id.clone());
                tracing::debug!("Client {} connected", id);
            }
            ClientEvent::Disconnected(id) => {
                self.local_clients.write().await.remove(id);
                self.substrate.remove_from_set(LOCAL_MEMBER_UUIDS, id).await?;
                tracing::debug!("Client {} disconnected", id);
            }
        }
        Ok(())
    }

    /// Clients currently connected to this member
    pub async fn local_clients(&self) -> Vec<String> {
        self.local_clients.read().await.iter().cloned().collect()
    }
}

//! In-Process Group Substrate
//!
//! Every endpoint joined to the same [`MemoryGroup`] shares one replicated
//! state, so replication is immediate. Events are pushed to each endpoint's
//! channel while the group lock is held: a single endpoint observes changes in
//! the order they were applied.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{
    ClientEvent, EntryEvent, GroupConnector, GroupSubstrate, JoinSettings, LockGuard,
    MembershipEvent, RegisterKey, SubstrateEvent, OPERATIONAL_PROCESSES,
};
use crate::error::{Error, Result};
use crate::node::{Address, Member, NodeId};
use crate::process::ClusterProcess;

/// Host used when no interface is configured
const LOOPBACK: &str = "127.0.0.1";

/// Replicated state of one group
#[derive(Default)]
struct GroupState {
    /// Members in join order
    members: Vec<Member>,
    /// Event channel of each member
    channels: HashMap<NodeId, mpsc::UnboundedSender<SubstrateEvent>>,
    processes: HashMap<ClusterProcess, bool>,
    registers: HashMap<RegisterKey, String>,
    locks: HashMap<String, Arc<Mutex<()>>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl GroupState {
    /// Send an event to every member
    fn broadcast(&self, event: SubstrateEvent) {
        for tx in self.channels.values() {
            // A member whose dispatcher is gone just misses the event
            let _ = tx.send(event.clone());
        }
    }

    fn is_bound(&self, address: &Address) -> bool {
        self.members.iter().any(|m| &m.address == address)
    }

    /// Remove a member and tell the others. Returns false if it was not a member.
    fn depart(&mut self, id: &NodeId) -> bool {
        let Some(pos) = self.members.iter().position(|m| &m.id == id) else {
            return false;
        };
        let member = self.members.remove(pos);
        self.channels.remove(id);

        tracing::info!(
            "Member {} ({}) left the group, {} remaining",
            member.id,
            member.address,
            self.members.len()
        );

        if self.members.is_empty() {
            // Nothing survives the last member
            self.processes.clear();
            self.registers.clear();
            self.sets.clear();
            return true;
        }

        self.broadcast(SubstrateEvent::Membership(MembershipEvent::Removed {
            member,
            members: self.members.clone(),
        }));
        true
    }
}

/// In-process group. Cloning yields another handle to the same group.
#[derive(Clone)]
pub struct MemoryGroup {
    name: String,
    state: Arc<Mutex<GroupState>>,
}

impl MemoryGroup {
    /// Create an empty group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(GroupState::default())),
        }
    }

    /// Join the group and return the concrete endpoint
    pub async fn join_endpoint(&self, settings: JoinSettings) -> Result<MemoryEndpoint> {
        if settings.group_name != self.name {
            return Err(Error::Substrate(format!(
                "cannot join group '{}' through group '{}'",
                settings.group_name, self.name
            )));
        }

        let host = settings
            .interfaces
            .first()
            .cloned()
            .unwrap_or_else(|| LOOPBACK.to_string());

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;

        let tries = settings.port_try_count.max(1);
        let address = (0..tries)
            .filter_map(|offset| settings.port.checked_add(offset))
            .map(|port| Address::new(host.clone(), port))
            .find(|address| !state.is_bound(address))
            .ok_or_else(|| {
                Error::Substrate(format!(
                    "no free port on {} in range {}..{}",
                    host,
                    settings.port,
                    settings.port.saturating_add(tries)
                ))
            })?;

        let member = Member {
            id: NodeId::random(),
            address,
            attributes: settings.attributes,
        };

        state.members.push(member.clone());
        state.broadcast(SubstrateEvent::Membership(MembershipEvent::Added {
            member: member.clone(),
            members: state.members.clone(),
        }));
        state.channels.insert(member.id.clone(), tx);

        tracing::info!(
            "Member {} joined group {} on {} ({} static peers configured)",
            member.id,
            self.name,
            member.address,
            settings.peers.len()
        );

        Ok(MemoryEndpoint {
            local: member,
            group_name: self.name.clone(),
            state: Arc::clone(&self.state),
            events: Mutex::new(Some(rx)),
            active: AtomicBool::new(true),
        })
    }

    /// Number of current members
    pub async fn size(&self) -> usize {
        self.state.lock().await.members.len()
    }

    /// Connect a lightweight client to `member`, returning the client id
    pub async fn connect_client(&self, member: &NodeId) -> Result<String> {
        let client_id = uuid::Uuid::new_v4().to_string();
        self.send_client_event(member, ClientEvent::Connected(client_id.clone()))
            .await?;
        Ok(client_id)
    }

    /// Disconnect a client previously connected to `member`
    pub async fn disconnect_client(&self, member: &NodeId, client_id: &str) -> Result<()> {
        self.send_client_event(member, ClientEvent::Disconnected(client_id.to_string()))
            .await
    }

    async fn send_client_event(&self, member: &NodeId, event: ClientEvent) -> Result<()> {
        let state = self.state.lock().await;
        let tx = state
            .channels
            .get(member)
            .ok_or_else(|| Error::NotFound(format!("member {}", member)))?;
        tx.send(SubstrateEvent::Client(event))
            .map_err(|_| Error::Substrate(format!("member {} stopped listening", member)))
    }
}

#[async_trait]
impl GroupConnector for MemoryGroup {
    async fn join(&self, settings: JoinSettings) -> Result<Arc<dyn GroupSubstrate>> {
        let endpoint = self.join_endpoint(settings).await?;
        Ok(Arc::new(endpoint))
    }
}

/// One member's view of a [`MemoryGroup`]
pub struct MemoryEndpoint {
    local: Member,
    group_name: String,
    state: Arc<Mutex<GroupState>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<SubstrateEvent>>>,
    active: AtomicBool,
}

impl MemoryEndpoint {
    fn ensure_active(&self) -> Result<()> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Drop out of the group without any cleanup, as a killed process would
    pub async fn crash(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::warn!("Member {} lost", self.local.id);
            self.state.lock().await.depart(&self.local.id);
        }
    }
}

#[async_trait]
impl GroupSubstrate for MemoryEndpoint {
    fn local_member(&self) -> &Member {
        &self.local
    }

    fn group_name(&self) -> &str {
        &self.group_name
    }

    async fn members(&self) -> Result<Vec<Member>> {
        self.ensure_active()?;
        Ok(self.state.lock().await.members.clone())
    }

    async fn cluster_time(&self) -> Result<i64> {
        self.ensure_active()?;
        Ok(chrono::Utc::now().timestamp_millis())
    }

    async fn put_process(&self, key: ClusterProcess, operational: bool) -> Result<()> {
        self.ensure_active()?;
        let mut state = self.state.lock().await;
        let event = match state.processes.insert(key.clone(), operational) {
            None => EntryEvent::Added {
                key,
                value: operational,
            },
            Some(old_value) => EntryEvent::Updated {
                key,
                old_value,
                value: operational,
            },
        };
        tracing::trace!("{} <- {:?}", OPERATIONAL_PROCESSES, event);
        state.broadcast(SubstrateEvent::Entry(event));
        Ok(())
    }

    async fn remove_process(&self, key: &ClusterProcess) -> Result<Option<bool>> {
        self.ensure_active()?;
        let mut state = self.state.lock().await;
        let removed = state.processes.remove(key);
        if let Some(old_value) = removed {
            state.broadcast(SubstrateEvent::Entry(EntryEvent::Removed {
                key: key.clone(),
                old_value,
            }));
        }
        Ok(removed)
    }

    async fn processes(&self) -> Result<Vec<(ClusterProcess, bool)>> {
        self.ensure_active()?;
        let state = self.state.lock().await;
        Ok(state
            .processes
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    async fn read_register(&self, key: RegisterKey) -> Result<Option<String>> {
        self.ensure_active()?;
        Ok(self.state.lock().await.registers.get(&key).cloned())
    }

    async fn write_register(&self, key: RegisterKey, value: String) -> Result<()> {
        self.ensure_active()?;
        self.state.lock().await.registers.insert(key, value);
        Ok(())
    }

    async fn clear_register(&self, key: RegisterKey) -> Result<()> {
        self.ensure_active()?;
        self.state.lock().await.registers.remove(&key);
        Ok(())
    }

    async fn lock(&self, name: &str) -> Result<LockGuard> {
        self.ensure_active()?;
        let mutex = {
            let mut state = self.state.lock().await;
            Arc::clone(state.locks.entry(name.to_string()).or_default())
        };
        // Wait outside the group lock so the holder can keep working
        let guard = mutex.lock_owned().await;
        Ok(LockGuard::new(guard))
    }

    async fn add_to_set(&self, set: &str, value: String) -> Result<bool> {
        self.ensure_active()?;
        let mut state = self.state.lock().await;
        Ok(state.sets.entry(set.to_string()).or_default().insert(value))
    }

    async fn remove_from_set(&self, set: &str, value: &str) -> Result<bool> {
        self.ensure_active()?;
        let mut state = self.state.lock().await;
        Ok(state
            .sets
            .get_mut(set)
            .map(|values| values.remove(value))
            .unwrap_or(false))
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        self.ensure_active()?;
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(set)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<SubstrateEvent>> {
        self.ensure_active()?;
        self.events
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Substrate("event stream already taken".into()))
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        self.state.lock().await.depart(&self.local.id);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::future::Future;
    use std::time::Duration;

    use super::*;
    use crate::node::{NodeAttributes, NodeRole};
    use crate::substrate::GROUP_NAME;

    pub(crate) fn settings(name: &str, role: NodeRole) -> JoinSettings {
        JoinSettings {
            group_name: GROUP_NAME.to_string(),
            port: 9003,
            port_try_count: 10,
            interfaces: Vec::new(),
            peers: vec![Address::new(LOOPBACK, 9003)],
            attributes: NodeAttributes {
                hostname: format!("{}-host", name),
                ip_addresses: LOOPBACK.to_string(),
                node_name: name.to_string(),
                role,
            },
        }
    }

    pub(crate) async fn join(
        group: &MemoryGroup,
        name: &str,
        role: NodeRole,
    ) -> Arc<MemoryEndpoint> {
        Arc::new(group.join_endpoint(settings(name, role)).await.unwrap())
    }

    /// Poll `check` until it holds or about two seconds have passed
    pub(crate) async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

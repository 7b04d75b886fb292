//! Cluster Coordinator
//!
//! Facade joining the substrate and wiring the process registry, leader
//! election, consistency checks and membership watching together. Substrate
//! events are consumed by a single dispatcher task per coordinator, which is
//! where listeners get called.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::client::ClusterClient;
use crate::config::ClusterStateConfig;
use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::process::ProcessId;
use crate::state::{
    ConsistencyGuard, LeaderElector, MembershipWatcher, OperationalListener, ProcessRegistry,
};
use crate::substrate::{GroupConnector, GroupSubstrate, SubstrateEvent};

/// Handle on this node's participation in the cluster
pub struct ClusterCoordinator {
    substrate: Arc<dyn GroupSubstrate>,
    registry: Arc<ProcessRegistry>,
    elector: LeaderElector,
    guard: ConsistencyGuard,
    watcher: Arc<MembershipWatcher>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterCoordinator {
    /// Join the cluster described by `config` through `connector`
    pub async fn create<C>(config: &ClusterStateConfig, connector: &C) -> Result<Self>
    where
        C: GroupConnector + ?Sized,
    {
        config.validate()?;
        let settings = config.join_settings()?;
        tracing::info!(
            "Joining cluster {} as {} ({}) with {} static peer(s)",
            config.cluster.name,
            config.node.name,
            config.node.role,
            settings.peers.len()
        );
        let substrate = connector.join(settings).await?;
        Self::attach(substrate).await
    }

    /// Build a coordinator over an already joined substrate endpoint
    pub async fn attach(substrate: Arc<dyn GroupSubstrate>) -> Result<Self> {
        let events = substrate.subscribe().await?;

        let registry = Arc::new(ProcessRegistry::new(Arc::clone(&substrate)));
        let watcher = Arc::new(MembershipWatcher::new(Arc::clone(&substrate)));
        let dispatcher = tokio::spawn(dispatch(
            events,
            Arc::clone(&registry),
            Arc::clone(&watcher),
        ));

        Ok(Self {
            elector: LeaderElector::new(Arc::clone(&substrate)),
            guard: ConsistencyGuard::new(Arc::clone(&substrate)),
            substrate,
            registry,
            watcher,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Register a callback notified when a process becomes operational anywhere
    pub async fn add_listener<L>(&self, listener: L)
    where
        L: OperationalListener + 'static,
    {
        self.registry.add_listener(Arc::new(listener)).await;
    }

    pub async fn is_operational(&self, process_id: ProcessId) -> bool {
        self.registry.is_operational(process_id).await
    }

    pub async fn set_operational(&self, process_id: ProcessId) -> Result<()> {
        self.registry.set_operational(process_id).await
    }

    pub async fn try_lock_leader(&self) -> Result<bool> {
        self.elector.try_lock_leader().await
    }

    pub async fn leader_host_name(&self) -> Option<String> {
        self.elector.leader_host_name().await
    }

    pub async fn register_version(&self, version: &str) -> Result<()> {
        self.guard.register_version(version).await
    }

    /// Version registered in the cluster, if any
    pub async fn version(&self) -> Option<String> {
        self.guard.version().await.unwrap_or_else(|e| {
            tracing::debug!("Unable to read cluster version: {}", e);
            None
        })
    }

    pub async fn register_cluster_name(&self, name: &str) -> Result<()> {
        self.guard.register_cluster_name(name).await
    }

    /// Other members, formatted as `hostname (ips)`
    pub async fn members(&self) -> Vec<String> {
        let local_id = self.substrate.local_id();
        match self.substrate.members().await {
            Ok(members) => members
                .iter()
                .filter(|m| &m.id != local_id)
                .map(|m| m.display_name())
                .collect(),
            Err(e) => {
                tracing::debug!("Unable to list members: {}", e);
                Vec::new()
            }
        }
    }

    /// `host:port` this node is bound to
    pub fn local_endpoint(&self) -> String {
        self.substrate.local_member().address.to_string()
    }

    /// Name of the substrate group
    pub fn name(&self) -> &str {
        self.substrate.group_name()
    }

    pub fn local_uuid(&self) -> &NodeId {
        self.substrate.local_id()
    }

    /// Clients connected to this node
    pub async fn local_clients(&self) -> Vec<String> {
        self.watcher.local_clients().await
    }

    pub fn client(&self) -> ClusterClient {
        ClusterClient::new(Arc::clone(&self.substrate))
    }

    /// Leave the cluster.
    ///
    /// Stops event delivery, removes this node's own process entries and
    /// leaves the substrate. Safe to call more than once and after the
    /// substrate is already gone.
    pub async fn close(&self) {
        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            dispatcher.abort();
        }
        self.registry.clear_listeners().await;

        if let Err(e) = self.leave().await {
            if e.is_shutdown() {
                // Already closed, typically by a shutdown hook
                tracing::debug!("Unable to close cluster membership: {}", e);
            } else {
                tracing::warn!("Error while leaving the cluster: {}", e);
            }
        }
    }

    async fn leave(&self) -> Result<()> {
        let removed = self.registry.remove_local_entries().await?;
        tracing::debug!("Removed {} local process entries", removed);
        self.substrate.shutdown().await?;
        tracing::info!("Node {} left the cluster", self.substrate.local_id());
        Ok(())
    }
}

/// Route substrate events until the stream ends
async fn dispatch(
    mut events: mpsc::UnboundedReceiver<SubstrateEvent>,
    registry: Arc<ProcessRegistry>,
    watcher: Arc<MembershipWatcher>,
) {
    while let Some(event) = events.recv().await {
        let result = match &event {
            SubstrateEvent::Entry(entry) => {
                registry.on_entry_event(entry).await;
                Ok(())
            }
            SubstrateEvent::Membership(membership) => {
                watcher.on_membership_event(membership).await
            }
            SubstrateEvent::Client(client) => watcher.on_client_event(client).await,
        };

        match result {
            Ok(()) => {}
            Err(Error::ShuttingDown) => {
                tracing::debug!("Substrate shut down while handling {:?}", event);
                break;
            }
            Err(e) => tracing::warn!("Failed to handle cluster event {:?}: {}", event, e),
        }
    }
    tracing::debug!("Cluster event dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::node::NodeRole;
    use crate::substrate::memory::testing::{eventually, join};
    use crate::substrate::{MemoryEndpoint, MemoryGroup, GROUP_NAME};

    struct Node {
        endpoint: Arc<MemoryEndpoint>,
        coordinator: ClusterCoordinator,
    }

    async fn node(group: &MemoryGroup, name: &str, role: NodeRole) -> Node {
        let endpoint = join(group, name, role).await;
        let coordinator = ClusterCoordinator::attach(endpoint.clone()).await.unwrap();
        Node {
            endpoint,
            coordinator,
        }
    }

    fn config(name: &str, role: NodeRole) -> ClusterStateConfig {
        let mut config = ClusterStateConfig::sample(name, role);
        config.node.host = Some(format!("{}-host", name));
        config.cluster.name = "production".to_string();
        config
    }

    #[tokio::test]
    async fn test_create_from_config() {
        let group = MemoryGroup::new(GROUP_NAME);
        let a = ClusterCoordinator::create(&config("a", NodeRole::Application), &group)
            .await
            .unwrap();
        let b = ClusterCoordinator::create(&config("b", NodeRole::Search), &group)
            .await
            .unwrap();

        assert_eq!(a.name(), GROUP_NAME);
        assert_eq!(a.local_endpoint(), "127.0.0.1:9003");
        assert_eq!(b.local_endpoint(), "127.0.0.1:9004");
        assert_eq!(a.members().await, vec!["b-host (127.0.0.1)".to_string()]);
        assert_eq!(b.members().await, vec!["a-host (127.0.0.1)".to_string()]);
        assert_ne!(a.local_uuid(), b.local_uuid());

        a.close().await;
        b.close().await;
        assert_eq!(group.size().await, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_config() {
        let group = MemoryGroup::new(GROUP_NAME);
        let mut bad = config("a", NodeRole::Application);
        bad.cluster.hosts.clear();
        let err = ClusterCoordinator::create(&bad, &group).await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(group.size().await, 0);
    }

    #[tokio::test]
    async fn test_listener_fires_on_every_node() {
        let group = MemoryGroup::new(GROUP_NAME);
        let a = node(&group, "a", NodeRole::Application).await;
        let b = node(&group, "b", NodeRole::Application).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        b.coordinator
            .add_listener(move |p: ProcessId| sink.lock().unwrap().push(p))
            .await;

        assert!(!b.coordinator.is_operational(ProcessId::Web).await);
        a.coordinator.set_operational(ProcessId::Web).await.unwrap();
        assert!(b.coordinator.is_operational(ProcessId::Web).await);
        // Repeating the call is not a new transition
        a.coordinator.set_operational(ProcessId::Web).await.unwrap();
        b.coordinator.set_operational(ProcessId::Web).await.unwrap();

        assert!(eventually(|| async { seen.lock().unwrap().len() >= 2 }).await);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![ProcessId::Web, ProcessId::Web]);
    }

    #[tokio::test]
    async fn test_owner_departure_turns_process_off() {
        let group = MemoryGroup::new(GROUP_NAME);
        let a = node(&group, "a", NodeRole::Application).await;
        let b = node(&group, "b", NodeRole::Application).await;
        let c = node(&group, "c", NodeRole::Search).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        a.coordinator
            .add_listener(move |p: ProcessId| sink.lock().unwrap().push(p))
            .await;

        b.coordinator.set_operational(ProcessId::ComputeEngine).await.unwrap();
        assert!(a.coordinator.is_operational(ProcessId::ComputeEngine).await);

        // Another node leaving changes nothing
        c.endpoint.crash().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(a.coordinator.is_operational(ProcessId::ComputeEngine).await);

        b.endpoint.crash().await;
        assert!(eventually(|| async {
            !a.coordinator.is_operational(ProcessId::ComputeEngine).await
        })
        .await);

        // The entry is kept, flagged off, and the listener never saw the flip
        let entries = a.coordinator.registry.snapshot().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(&entries[0].0.node_id, b.endpoint.local_id());
        assert!(!entries[0].1);
        assert_eq!(*seen.lock().unwrap(), vec![ProcessId::ComputeEngine]);
    }

    #[tokio::test]
    async fn test_last_application_node_departure_allows_new_election() {
        let group = MemoryGroup::new(GROUP_NAME);
        let app = node(&group, "app", NodeRole::Application).await;
        let search = node(&group, "search", NodeRole::Search).await;

        assert!(app.coordinator.try_lock_leader().await.unwrap());
        app.coordinator.register_version("1.0").await.unwrap();
        app.coordinator.register_cluster_name("production").await.unwrap();
        assert_eq!(
            search.coordinator.leader_host_name().await.as_deref(),
            Some("app-host (127.0.0.1)")
        );
        assert!(!search.coordinator.try_lock_leader().await.unwrap());

        app.endpoint.crash().await;
        assert!(eventually(|| async {
            search.coordinator.version().await.is_none()
                && search.coordinator.elector.leader_id().await.unwrap().is_none()
        })
        .await);
        assert_eq!(search.coordinator.leader_host_name().await, None);

        // A new application node can take over the singleton duties
        let next = node(&group, "next", NodeRole::Application).await;
        next.coordinator.register_version("1.1").await.unwrap();
        assert!(next.coordinator.try_lock_leader().await.unwrap());
        // The cluster name survives
        assert!(next.coordinator.register_cluster_name("other").await.is_err());
    }

    #[tokio::test]
    async fn test_search_departure_keeps_leader() {
        let group = MemoryGroup::new(GROUP_NAME);
        let app = node(&group, "app", NodeRole::Application).await;
        let search = node(&group, "search", NodeRole::Search).await;

        assert!(app.coordinator.try_lock_leader().await.unwrap());
        search.coordinator.set_operational(ProcessId::Search).await.unwrap();

        search.endpoint.crash().await;
        assert!(eventually(|| async {
            !app.coordinator.is_operational(ProcessId::Search).await
        })
        .await);

        assert!(app.coordinator.leader_host_name().await.is_some());
        // Stale entry of the departed search node is still there
        assert_eq!(app.coordinator.registry.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let group = MemoryGroup::new(GROUP_NAME);
        let a = node(&group, "a", NodeRole::Application).await;
        let b = node(&group, "b", NodeRole::Application).await;

        a.coordinator.add_listener(|_: ProcessId| {}).await;
        a.coordinator.set_operational(ProcessId::Web).await.unwrap();
        a.coordinator.close().await;
        a.coordinator.close().await;

        assert_eq!(a.coordinator.registry.listener_count().await, 0);
        // Own entries are removed on close, not flagged off
        assert!(b.coordinator.registry.snapshot().await.unwrap().is_empty());
        assert!(a.coordinator.members().await.is_empty());
        assert!(!a.coordinator.is_operational(ProcessId::Web).await);

        // Substrate already gone before close
        b.endpoint.crash().await;
        b.coordinator.close().await;
        assert_eq!(group.size().await, 0);
    }

    #[tokio::test]
    async fn test_client_connections_tracked() {
        let group = MemoryGroup::new(GROUP_NAME);
        let a = node(&group, "a", NodeRole::Application).await;
        let b = node(&group, "b", NodeRole::Application).await;

        let client_id = group.connect_client(a.endpoint.local_id()).await.unwrap();
        assert!(eventually(|| async { a.coordinator.local_clients().await.len() == 1 }).await);
        let uuids = b.coordinator.client().member_uuids().await.unwrap();
        assert!(uuids.contains(&client_id));
        assert!(b.coordinator.local_clients().await.is_empty());

        group
            .disconnect_client(a.endpoint.local_id(), &client_id)
            .await
            .unwrap();
        assert!(eventually(|| async { a.coordinator.local_clients().await.is_empty() }).await);
    }
}

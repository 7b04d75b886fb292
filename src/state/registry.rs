//! Operational Process Registry
//!
//! Tracks which (node, process) pairs are operational, backed by the
//! replicated map of the substrate, and notifies listeners when a process
//! becomes operational anywhere in the cluster.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::process::{ClusterProcess, ProcessId};
use crate::substrate::{EntryEvent, GroupSubstrate};

/// Callback notified when a process becomes operational on some node.
///
/// Invoked on the event-delivery task: implementations must not block.
pub trait OperationalListener: Send + Sync {
    fn on_operational(&self, process_id: ProcessId);
}

impl<F> OperationalListener for F
where
    F: Fn(ProcessId) + Send + Sync,
{
    fn on_operational(&self, process_id: ProcessId) {
        self(process_id)
    }
}

/// Cluster-wide registry of operational processes
pub struct ProcessRegistry {
    substrate: Arc<dyn GroupSubstrate>,
    listeners: RwLock<Vec<Arc<dyn OperationalListener>>>,
}

impl ProcessRegistry {
    pub fn new(substrate: Arc<dyn GroupSubstrate>) -> Self {
        Self {
            substrate,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener. Listeners are called in registration order.
    pub async fn add_listener(&self, listener: Arc<dyn OperationalListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Drop every listener
    pub async fn clear_listeners(&self) {
        self.listeners.write().await.clear();
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Mark `process_id` operational on this node
    pub async fn set_operational(&self, process_id: ProcessId) -> Result<()> {
        let key = ClusterProcess::new(self.substrate.local_id().clone(), process_id);
        tracing::debug!("Setting process {} operational", key);
        self.substrate.put_process(key, true).await
    }

    /// Whether any node reports `process_id` as operational.
    ///
    /// Always reads the replicated map; a substrate failure reads as `false`.
    pub async fn is_operational(&self, process_id: ProcessId) -> bool {
        match self.substrate.processes().await {
            Ok(entries) => entries
                .iter()
                .any(|(key, operational)| key.process_id == process_id && *operational),
            Err(e) => {
                tracing::debug!("Unable to read operational processes: {}", e);
                false
            }
        }
    }

    /// Every entry of the replicated map
    pub async fn snapshot(&self) -> Result<Vec<(ClusterProcess, bool)>> {
        let mut entries = self.substrate.processes().await?;
        entries.sort();
        Ok(entries)
    }

    /// Remove this node's own entries, returning how many were removed
    pub async fn remove_local_entries(&self) -> Result<usize> {
        let local_id = self.substrate.local_id().clone();
        let mut removed = 0;
        for (key, _) in self.substrate.processes().await? {
            if key.node_id == local_id && self.substrate.remove_process(&key).await?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Route a map event. Only transitions to `true` reach the listeners.
    pub async fn on_entry_event(&self, event: &EntryEvent) {
        let became_operational = match event {
            EntryEvent::Added { key, value: true } => Some(key),
            EntryEvent::Updated {
                key,
                old_value: false,
                value: true,
            } => Some(key),
            EntryEvent::Added { .. }
            | EntryEvent::Updated { .. }
            | EntryEvent::Removed { .. }
            | EntryEvent::Evicted { .. }
            | EntryEvent::Cleared => None,
        };

        if let Some(key) = became_operational {
            tracing::debug!("Process {} is operational", key);
            self.notify(key.process_id).await;
        }
    }

    async fn notify(&self, process_id: ProcessId) {
        // Clone so a listener may register another listener without deadlocking
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            listener.on_operational(process_id);
        }
    }
}

//! Worker Processes
//!
//! The closed set of worker roles a node can host, and the replicated key
//! identifying one of them on one node.

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Worker role hosted inside a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessId {
    /// The node's supervising application process
    App,
    /// Search engine process
    Search,
    /// Web server process
    Web,
    /// Compute engine (background task) process
    ComputeEngine,
}

impl ProcessId {
    pub const ALL: [ProcessId; 4] = [
        ProcessId::App,
        ProcessId::Search,
        ProcessId::Web,
        ProcessId::ComputeEngine,
    ];

    /// Stable short key of the process
    pub fn key(&self) -> &'static str {
        match self {
            ProcessId::App => "app",
            ProcessId::Search => "search",
            ProcessId::Web => "web",
            ProcessId::ComputeEngine => "ce",
        }
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Key of the replicated operational-process map
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterProcess {
    pub node_id: NodeId,
    pub process_id: ProcessId,
}

impl ClusterProcess {
    pub fn new(node_id: NodeId, process_id: ProcessId) -> Self {
        Self {
            node_id,
            process_id,
        }
    }
}

impl std::fmt::Display for ClusterProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node_id, self.process_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_keys() {
        let keys: Vec<_> = ProcessId::ALL.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["app", "search", "web", "ce"]);
        assert_eq!(ProcessId::ComputeEngine.to_string(), "ce");
    }
}

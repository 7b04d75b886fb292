//! Cluster State Error Types

use thiserror::Error;

/// Result type alias for cluster coordination operations
pub type Result<T> = std::result::Result<T, Error>;

/// Cluster coordination error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Consistency errors
    #[error("The local version {local} is not the same as the cluster {cluster}")]
    VersionMismatch { local: String, cluster: String },

    #[error("This node has a cluster name [{local}], which does not match [{cluster}] from the cluster")]
    ClusterNameMismatch { local: String, cluster: String },

    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Substrate errors
    #[error("Group substrate error: {0}")]
    Substrate(String),

    #[error("Shutdown in progress")]
    ShuttingDown,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error must abort the node's participation in the cluster
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::VersionMismatch { .. } | Error::ClusterNameMismatch { .. }
        )
    }

    /// Check if this error comes from a substrate that is already gone
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_messages_name_both_values() {
        let err = Error::ClusterNameMismatch {
            local: "foo".to_string(),
            cluster: "bar".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("[foo]"));
        assert!(msg.contains("[bar]"));
        assert!(err.is_fatal());

        let err = Error::VersionMismatch {
            local: "2.1".to_string(),
            cluster: "2.0".to_string(),
        };
        assert_eq!(err.to_string(), "The local version 2.1 is not the same as the cluster 2.0");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_kinds() {
        assert!(Error::ShuttingDown.is_shutdown());
        assert!(!Error::ShuttingDown.is_fatal());
        assert!(!Error::NotFound("member x".into()).is_shutdown());
    }
}

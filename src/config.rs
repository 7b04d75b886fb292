//! Cluster State Configuration
//!
//! This module provides configuration structures for a node joining the
//! cluster. Discovery is static: the peer list comes from configuration only.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::node::{Address, NodeAttributes, NodeRole};
use crate::substrate::{JoinSettings, GROUP_NAME};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStateConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster configuration
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Display name of the node
    pub name: String,

    /// Role tag published to peers
    #[serde(default = "default_role")]
    pub role: NodeRole,

    /// Host name published to peers (defaults to $HOSTNAME, then localhost)
    #[serde(default)]
    pub host: Option<String>,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name every peer must share
    pub name: String,

    /// Port used for cluster communication
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of consecutive ports tried when `port` is taken
    #[serde(default = "default_port_try_count")]
    pub port_try_count: u16,

    /// Network interfaces to bind (empty = loopback)
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// Static list of peer hosts (`host` or `host:port`)
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_role() -> NodeRole {
    NodeRole::Application
}

fn default_port() -> u16 {
    9003
}

fn default_port_try_count() -> u16 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ClusterStateConfig {
    /// Starter configuration for a single local node
    pub fn sample(node_name: &str, role: NodeRole) -> Self {
        Self {
            node: NodeConfig {
                name: node_name.to_string(),
                role,
                host: None,
            },
            cluster: ClusterConfig {
                name: "default".to_string(),
                port: default_port(),
                port_try_count: default_port_try_count(),
                interfaces: Vec::new(),
                hosts: vec![format!("127.0.0.1:{}", default_port())],
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ClusterStateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file
    pub fn write_to(&self, path: &std::path::Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.name.trim().is_empty() {
            return Err(crate::Error::Config("node.name cannot be empty".into()));
        }

        if self.cluster.name.trim().is_empty() {
            return Err(crate::Error::Config("cluster.name cannot be empty".into()));
        }

        if self.cluster.port == 0 {
            return Err(crate::Error::Config("cluster.port cannot be 0".into()));
        }

        if self.cluster.hosts.is_empty() {
            return Err(crate::Error::Config(
                "cluster.hosts must list at least one peer".into(),
            ));
        }

        if matches!(self.logging.format.as_str(), "pretty" | "json") {
            self.peer_addresses().map(|_| ())
        } else {
            Err(crate::Error::Config(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )))
        }
    }

    /// Static peer addresses, with the cluster port applied where missing
    pub fn peer_addresses(&self) -> crate::Result<Vec<Address>> {
        self.cluster
            .hosts
            .iter()
            .map(|host| Address::parse(host, self.cluster.port))
            .collect()
    }

    /// Host name published to peers
    pub fn hostname(&self) -> String {
        self.node
            .host
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Attributes published to peers
    pub fn attributes(&self) -> NodeAttributes {
        let ip_addresses = if self.cluster.interfaces.is_empty() {
            "127.0.0.1".to_string()
        } else {
            self.cluster.interfaces.join(",")
        };

        NodeAttributes {
            hostname: self.hostname(),
            ip_addresses,
            node_name: self.node.name.clone(),
            role: self.node.role,
        }
    }

    /// Settings used to join the substrate group
    pub fn join_settings(&self) -> crate::Result<JoinSettings> {
        Ok(JoinSettings {
            group_name: GROUP_NAME.to_string(),
            port: self.cluster.port,
            port_try_count: self.cluster.port_try_count,
            interfaces: self.cluster.interfaces.clone(),
            peers: self.peer_addresses()?,
            attributes: self.attributes(),
        })
    }

    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        PathBuf::from("clusterstate.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
[node]
name = "app-1"
role = "application"
host = "app-1.internal"

[cluster]
name = "production"
port = 9003
interfaces = ["10.0.0.5"]
hosts = ["10.0.0.5:9003", "10.0.0.6"]

[logging]
level = "debug"
format = "json"
"#;

    #[test]
    fn test_parse_config() {
        let config = ClusterStateConfig::from_str(TOML).unwrap();
        assert_eq!(config.node.name, "app-1");
        assert_eq!(config.node.role, NodeRole::Application);
        assert_eq!(config.cluster.port_try_count, 10);
        assert_eq!(
            config.peer_addresses().unwrap(),
            vec![Address::new("10.0.0.5", 9003), Address::new("10.0.0.6", 9003)]
        );

        let attributes = config.attributes();
        assert_eq!(attributes.hostname, "app-1.internal");
        assert_eq!(attributes.ip_addresses, "10.0.0.5");

        let settings = config.join_settings().unwrap();
        assert_eq!(settings.group_name, GROUP_NAME);
        assert_eq!(settings.interfaces, vec!["10.0.0.5".to_string()]);
    }

    #[test]
    fn test_defaults() {
        let config = ClusterStateConfig::from_str(
            r#"
[node]
name = "search-1"
role = "search"

[cluster]
name = "production"
hosts = ["localhost"]
"#,
        )
        .unwrap();
        assert_eq!(config.cluster.port, 9003);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.attributes().role, NodeRole::Search);
        assert_eq!(config.attributes().ip_addresses, "127.0.0.1");
    }

    #[test]
    fn test_validation() {
        let mut config = ClusterStateConfig::sample("n", NodeRole::Application);
        assert!(config.validate().is_ok());

        config.cluster.hosts.clear();
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        config.cluster.hosts.push("node-2:notaport".into());
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = ClusterStateConfig::sample("n", NodeRole::Application);
        config.cluster.name = " ".into();
        assert!(config.validate().is_err());

        let mut config = ClusterStateConfig::sample("n", NodeRole::Application);
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());

        assert!(matches!(
            ClusterStateConfig::from_str("[node]\nname = 1"),
            Err(crate::Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ClusterStateConfig::default_path());
        let config = ClusterStateConfig::sample("app-7", NodeRole::Search);
        config.write_to(&path).unwrap();

        let loaded = ClusterStateConfig::from_file(&path).unwrap();
        assert_eq!(loaded.node.name, "app-7");
        assert_eq!(loaded.node.role, NodeRole::Search);
        assert_eq!(loaded.cluster.hosts, config.cluster.hosts);
    }
}

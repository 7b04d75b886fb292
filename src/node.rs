//! Node Identity and Attributes
//!
//! Types describing a running instance as seen by its peers.

use serde::{Deserialize, Serialize};

/// Opaque unique identifier of a running node.
///
/// Generated at join time and never persisted: a restarted node is a new
/// member as far as the cluster is concerned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh random identifier
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Role tag carried by every member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Node runs the application processes and holds singleton duties
    Application,
    /// Node only runs the search process
    Search,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Application => write!(f, "application"),
            NodeRole::Search => write!(f, "search"),
        }
    }
}

/// Host and port a member is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`, using `default_port`
    /// when the port is missing. IPv6 hosts must be bracketed.
    pub fn parse(value: &str, default_port: u16) -> crate::Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(crate::Error::Config("empty host in peer list".into()));
        }

        let (host, port) = match value.strip_prefix('[') {
            Some(rest) => {
                let (host, tail) = rest.split_once(']').ok_or_else(|| {
                    crate::Error::Config(format!("unclosed '[' in peer address '{}'", value))
                })?;
                match tail {
                    "" => (host, None),
                    _ => match tail.strip_prefix(':') {
                        Some(port) => (host, Some(port)),
                        None => {
                            return Err(crate::Error::Config(format!(
                                "unexpected '{}' after host in peer address '{}'",
                                tail, value
                            )))
                        }
                    },
                }
            }
            None => match value.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => {
                    return Err(crate::Error::Config(format!(
                        "IPv6 peer address '{}' must be written as [host]:port",
                        value
                    )))
                }
                Some((host, port)) => (host, Some(port)),
                None => (value, None),
            },
        };

        if host.is_empty() {
            return Err(crate::Error::Config(format!(
                "missing host in peer address '{}'",
                value
            )));
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|e| {
                crate::Error::Config(format!("invalid port in peer address '{}': {}", value, e))
            })?,
            None => default_port,
        };
        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Attributes a node publishes to its peers when joining
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributes {
    /// Host name of the machine running the node
    pub hostname: String,
    /// Comma separated IP addresses of the node
    pub ip_addresses: String,
    /// Display name of the node
    pub node_name: String,
    /// Role tag
    pub role: NodeRole,
}

/// A member of the group as reported by the substrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub address: Address,
    pub attributes: NodeAttributes,
}

impl Member {
    /// Human readable form used in member listings: `hostname (ips)`
    pub fn display_name(&self) -> String {
        format!(
            "{} ({})",
            self.attributes.hostname, self.attributes.ip_addresses
        )
    }

    pub fn is_application(&self) -> bool {
        self.attributes.role == NodeRole::Application
    }
}

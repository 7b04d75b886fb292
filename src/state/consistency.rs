//! Peer Consistency Checks
//!
//! Every node must run the same software version and belong to the same named
//! cluster. The first node to join writes its values; every later node
//! compares its own against them and refuses to continue on mismatch.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::state::register::SetOnceRegister;
use crate::substrate::{GroupSubstrate, RegisterKey};

/// Enforces identical version and cluster name across peers
pub struct ConsistencyGuard {
    version: SetOnceRegister,
    cluster_name: SetOnceRegister,
}

impl ConsistencyGuard {
    pub fn new(substrate: Arc<dyn GroupSubstrate>) -> Self {
        Self {
            version: SetOnceRegister::new(Arc::clone(&substrate), RegisterKey::Version),
            cluster_name: SetOnceRegister::new(substrate, RegisterKey::ClusterName),
        }
    }

    /// Register the local software version, failing if the cluster runs another one
    pub async fn register_version(&self, expected: &str) -> Result<()> {
        let cluster = claim_and_read(&self.version, expected).await?;
        if cluster != expected {
            return Err(Error::VersionMismatch {
                local: expected.to_string(),
                cluster,
            });
        }
        tracing::info!("Software version {} registered in cluster", expected);
        Ok(())
    }

    /// Register the local cluster name, failing if the cluster has another one
    pub async fn register_cluster_name(&self, expected: &str) -> Result<()> {
        let cluster = claim_and_read(&self.cluster_name, expected).await?;
        if cluster != expected {
            return Err(Error::ClusterNameMismatch {
                local: expected.to_string(),
                cluster,
            });
        }
        tracing::info!("Cluster name [{}] registered", expected);
        Ok(())
    }

    /// Version currently registered in the cluster
    pub async fn version(&self) -> Result<Option<String>> {
        self.version.get().await
    }
}

/// Claim `register` with `value` and return what the cluster holds afterwards
async fn claim_and_read(register: &SetOnceRegister, value: &str) -> Result<String> {
    loop {
        register.try_claim(value).await?;
        match register.get().await? {
            Some(current) => return Ok(current),
            None => {
                // Purged by a departure between the claim and the read
                tracing::debug!(
                    "Register {} cleared while registering, retrying",
                    register.key()
                );
            }
        }
    }
}

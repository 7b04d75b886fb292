//! Set-Once Registers
//!
//! A named cluster-wide cell that only the first writer fills. Mutation always
//! happens under the register's dedicated lock; reads do not lock.

use std::sync::Arc;

use crate::error::Result;
use crate::substrate::{GroupSubstrate, RegisterKey};

/// Single-writer-wins distributed cell
#[derive(Clone)]
pub struct SetOnceRegister {
    substrate: Arc<dyn GroupSubstrate>,
    key: RegisterKey,
}

impl SetOnceRegister {
    pub fn new(substrate: Arc<dyn GroupSubstrate>, key: RegisterKey) -> Self {
        Self { substrate, key }
    }

    pub fn key(&self) -> RegisterKey {
        self.key
    }

    /// Current value, if any
    pub async fn get(&self) -> Result<Option<String>> {
        self.substrate.read_register(self.key).await
    }

    /// Write `value` if the register is empty.
    ///
    /// Returns true only for the call that performed the write. The value is
    /// read again under the lock since another node may have won between the
    /// first read and the lock being granted.
    pub async fn try_claim(&self, value: &str) -> Result<bool> {
        if self.get().await?.is_some() {
            return Ok(false);
        }

        let _guard = self.substrate.lock(self.key.name()).await?;
        if self.get().await?.is_some() {
            return Ok(false);
        }

        self.substrate
            .write_register(self.key, value.to_string())
            .await?;
        Ok(true)
    }

    /// Empty the register so it can be claimed again
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.substrate.lock(self.key.name()).await?;
        self.substrate.clear_register(self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRole;
    use crate::substrate::memory::testing::join;
    use crate::substrate::{MemoryGroup, GROUP_NAME};

    #[tokio::test]
    async fn test_first_claim_wins() {
        let group = MemoryGroup::new(GROUP_NAME);
        let a = join(&group, "a", NodeRole::Application).await;
        let b = join(&group, "b", NodeRole::Application).await;

        let on_a = SetOnceRegister::new(a, RegisterKey::Version);
        let on_b = SetOnceRegister::new(b, RegisterKey::Version);

        assert!(on_a.try_claim("1.0").await.unwrap());
        assert!(!on_b.try_claim("2.0").await.unwrap());
        assert!(!on_a.try_claim("1.0").await.unwrap());
        assert_eq!(on_b.get().await.unwrap().as_deref(), Some("1.0"));

        on_b.clear().await.unwrap();
        assert_eq!(on_a.get().await.unwrap(), None);
        assert!(on_b.try_claim("2.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_is_released_on_every_path() {
        let group = MemoryGroup::new(GROUP_NAME);
        let a = join(&group, "a", NodeRole::Application).await;
        let register = SetOnceRegister::new(a.clone(), RegisterKey::Leader);

        assert!(register.try_claim("x").await.unwrap());
        register.clear().await.unwrap();

        // The lock must be free again, otherwise this would hang
        let guard = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            a.lock(RegisterKey::Leader.name()),
        )
        .await;
        assert!(guard.is_ok());
    }
}

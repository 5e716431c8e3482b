//! Session identity: the Ed25519 keypair plus its transport DHT key.
//!
//! The secret lives in the credential vault; in memory it is held behind an
//! `Arc` and wiped when the last reference drops.

use std::sync::Arc;

use parking_lot::RwLock;

use hv_crypto::{IdentityKeyPair, PublicKeyBytes};
use hv_store::CredentialVault;

use crate::error::CoreError;
use crate::transport::Transport;

struct Loaded {
    keypair: Arc<IdentityKeyPair>,
    dht_key: Option<String>,
}

pub struct IdentityManager {
    vault: CredentialVault,
    current: RwLock<Option<Loaded>>,
}

impl IdentityManager {
    pub fn new(vault: CredentialVault) -> Self {
        Self {
            vault,
            current: RwLock::new(None),
        }
    }

    /// Recover the identity from the vault. `Ok(None)` when none was created.
    pub fn load(&self) -> Result<Option<PublicKeyBytes>, CoreError> {
        let Some(secret) = self.vault.identity_secret()? else {
            return Ok(None);
        };
        let keypair = IdentityKeyPair::from_bytes(&secret)?;
        let public = keypair.public;
        let dht_key = self.vault.identity_dht_key()?;
        *self.current.write() = Some(Loaded {
            keypair: Arc::new(keypair),
            dht_key,
        });
        tracing::debug!(event = "identity_loaded", fingerprint = %public.fingerprint());
        Ok(Some(public))
    }

    /// Generate a new identity, register it with the transport and persist
    /// it. Refuses to overwrite an existing one.
    pub async fn create(&self, transport: &dyn Transport) -> Result<PublicKeyBytes, CoreError> {
        if self.vault.identity_secret()?.is_some() {
            return Err(CoreError::state("identity already exists"));
        }
        let keypair = IdentityKeyPair::generate();
        let dht_key = transport.create_identity().await?;

        self.vault.set_identity_secret(keypair.secret_bytes())?;
        self.vault.set_identity_dht_key(&dht_key)?;

        let public = keypair.public;
        *self.current.write() = Some(Loaded {
            keypair: Arc::new(keypair),
            dht_key: Some(dht_key),
        });
        tracing::info!(event = "identity_created", fingerprint = %public.fingerprint());
        Ok(public)
    }

    pub async fn load_or_create(&self, transport: &dyn Transport) -> Result<PublicKeyBytes, CoreError> {
        match self.load()? {
            Some(public) => Ok(public),
            None => self.create(transport).await,
        }
    }

    pub fn current(&self) -> Result<Arc<IdentityKeyPair>, CoreError> {
        self.current
            .read()
            .as_ref()
            .map(|l| l.keypair.clone())
            .ok_or_else(|| CoreError::state("no identity loaded"))
    }

    pub fn public_key(&self) -> Option<PublicKeyBytes> {
        self.current.read().as_ref().map(|l| l.keypair.public)
    }

    pub fn dht_key(&self) -> Option<String> {
        self.current.read().as_ref().and_then(|l| l.dht_key.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Drop the in-memory identity.
    pub fn forget(&self) {
        self.current.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryHub, MemoryTransport};

    #[tokio::test]
    async fn create_then_reload_from_vault() {
        let vault = CredentialVault::in_memory();
        let transport = MemoryTransport::new(MemoryHub::new());

        let manager = IdentityManager::new(vault.clone());
        assert!(manager.load().unwrap().is_none());
        let public = manager.create(&transport).await.unwrap();
        assert!(manager.dht_key().is_some());

        let fresh = IdentityManager::new(vault);
        assert_eq!(fresh.load().unwrap(), Some(public));
        assert_eq!(fresh.current().unwrap().public, public);
        assert_eq!(fresh.dht_key(), manager.dht_key());
    }

    #[tokio::test]
    async fn create_refuses_to_overwrite() {
        let vault = CredentialVault::in_memory();
        let transport = MemoryTransport::new(MemoryHub::new());
        let manager = IdentityManager::new(vault);

        let first = manager.load_or_create(&transport).await.unwrap();
        assert!(matches!(
            manager.create(&transport).await,
            Err(CoreError::State(_))
        ));
        assert_eq!(manager.load_or_create(&transport).await.unwrap(), first);
    }

    #[tokio::test]
    async fn forget_clears_memory_only() {
        let vault = CredentialVault::in_memory();
        let transport = MemoryTransport::new(MemoryHub::new());
        let manager = IdentityManager::new(vault);
        manager.create(&transport).await.unwrap();

        manager.forget();
        assert!(!manager.is_loaded());
        assert!(manager.current().is_err());
        assert!(manager.load().unwrap().is_some());
    }
}

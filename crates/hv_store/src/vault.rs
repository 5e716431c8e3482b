//! Credential vault: small secrets kept outside the database.
//!
//! `SecretBackend` is the narrow seam to the platform secret store.
//! `KeyringBackend` talks to the OS keyring; `MemoryBackend` keeps entries in
//! process memory (tests, ephemeral sessions). `CredentialVault` layers typed
//! accessors for the fixed set of slots Haven uses.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use keyring::Entry;
use parking_lot::{Mutex, RwLock};
use zeroize::Zeroizing;

use hv_crypto::KdfParams;

use crate::error::VaultError;

pub trait SecretBackend: Send + Sync {
    fn write(&self, key: &str, value: &[u8]) -> Result<(), VaultError>;
    fn read(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, VaultError>;
    /// Deleting an absent entry is not an error.
    fn delete(&self, key: &str) -> Result<(), VaultError>;
    /// Attempt every entry; report the first failure after trying the rest.
    fn delete_all(&self) -> Result<(), VaultError>;
}

// ── In-memory backend ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SecretBackend for MemoryBackend {
    fn write(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        self.entries
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, VaultError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn delete_all(&self) -> Result<(), VaultError> {
        self.entries.write().clear();
        Ok(())
    }
}

// ── OS keyring backend ───────────────────────────────────────────────────────

const INDEX_KEY: &str = "__index";

/// Platform keyring. Values are base64 encoded; an index entry lists every
/// key written so `delete_all` can enumerate them.
pub struct KeyringBackend {
    service: String,
    index_lock: Mutex<()>,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, VaultError> {
        Entry::new(&self.service, key).map_err(|e| VaultError::Backend(format!("keyring init: {e}")))
    }

    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        match self.entry(key)?.get_password() {
            Ok(v) => Ok(Some(v)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::Backend(format!("load {key}: {e}"))),
        }
    }

    fn remove(&self, key: &str) -> Result<(), VaultError> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(VaultError::Backend(format!("delete {key}: {e}"))),
        }
    }

    fn load_index(&self) -> Result<BTreeSet<String>, VaultError> {
        match self.get(INDEX_KEY)? {
            Some(json) => serde_json::from_str(&json).map_err(|e| VaultError::Corrupt {
                slot: INDEX_KEY,
                reason: e.to_string(),
            }),
            None => Ok(BTreeSet::new()),
        }
    }

    fn save_index(&self, index: &BTreeSet<String>) -> Result<(), VaultError> {
        let json = serde_json::to_string(index).map_err(|e| VaultError::Backend(e.to_string()))?;
        self.entry(INDEX_KEY)?
            .set_password(&json)
            .map_err(|e| VaultError::Backend(format!("store index: {e}")))
    }
}

impl SecretBackend for KeyringBackend {
    fn write(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        let _guard = self.index_lock.lock();
        let encoded = Zeroizing::new(STANDARD.encode(value));
        self.entry(key)?
            .set_password(&encoded)
            .map_err(|e| VaultError::Backend(format!("store {key}: {e}")))?;

        let mut index = self.load_index()?;
        if index.insert(key.to_string()) {
            self.save_index(&index)?;
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, VaultError> {
        let Some(encoded) = self.get(key)?.map(Zeroizing::new) else {
            return Ok(None);
        };
        let decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| VaultError::Backend(format!("decode {key}: {e}")))?;
        Ok(Some(Zeroizing::new(decoded)))
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        let _guard = self.index_lock.lock();
        self.remove(key)?;
        let mut index = self.load_index()?;
        if index.remove(key) {
            self.save_index(&index)?;
        }
        Ok(())
    }

    fn delete_all(&self) -> Result<(), VaultError> {
        let _guard = self.index_lock.lock();
        let index = self.load_index().unwrap_or_default();
        let mut first_err = None;
        for key in index.iter().map(String::as_str).chain(VaultSlot::ALL.iter().map(|s| s.key())) {
            if let Err(e) = self.remove(key) {
                tracing::warn!(event = "vault_delete_failed", key = %key, error = %e);
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.remove(INDEX_KEY) {
            first_err.get_or_insert(e);
        }
        first_err.map_or(Ok(()), Err)
    }
}

// ── Typed vault ──────────────────────────────────────────────────────────────

/// Fixed slots. Keys are stable on-disk names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultSlot {
    MasterSalt,
    KdfParams,
    PinHash,
    DuressPinHash,
    RealDbKey,
    DecoyDbKey,
    IdentitySecret,
    IdentityDhtKey,
}

impl VaultSlot {
    pub const ALL: [VaultSlot; 8] = [
        VaultSlot::MasterSalt,
        VaultSlot::KdfParams,
        VaultSlot::PinHash,
        VaultSlot::DuressPinHash,
        VaultSlot::RealDbKey,
        VaultSlot::DecoyDbKey,
        VaultSlot::IdentitySecret,
        VaultSlot::IdentityDhtKey,
    ];

    pub fn key(self) -> &'static str {
        match self {
            VaultSlot::MasterSalt => "haven.master_salt",
            VaultSlot::KdfParams => "haven.kdf_params",
            VaultSlot::PinHash => "haven.pin_hash",
            VaultSlot::DuressPinHash => "haven.duress_pin_hash",
            VaultSlot::RealDbKey => "haven.real_db_key",
            VaultSlot::DecoyDbKey => "haven.decoy_db_key",
            VaultSlot::IdentitySecret => "haven.identity_secret",
            VaultSlot::IdentityDhtKey => "haven.identity_dht_key",
        }
    }
}

/// Shared vault handle. Cheap to clone.
#[derive(Clone)]
pub struct CredentialVault {
    backend: Arc<dyn SecretBackend>,
}

impl CredentialVault {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn read(&self, slot: VaultSlot) -> Result<Option<Zeroizing<Vec<u8>>>, VaultError> {
        self.backend.read(slot.key())
    }

    pub fn write(&self, slot: VaultSlot, value: &[u8]) -> Result<(), VaultError> {
        self.backend.write(slot.key(), value)
    }

    pub fn delete(&self, slot: VaultSlot) -> Result<(), VaultError> {
        self.backend.delete(slot.key())
    }

    pub fn delete_all(&self) -> Result<(), VaultError> {
        self.backend.delete_all()
    }

    pub fn contains(&self, slot: VaultSlot) -> Result<bool, VaultError> {
        Ok(self.read(slot)?.is_some())
    }

    pub fn master_salt(&self) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(self.read(VaultSlot::MasterSalt)?.map(|v| v.to_vec()))
    }

    pub fn set_master_salt(&self, salt: &[u8]) -> Result<(), VaultError> {
        self.write(VaultSlot::MasterSalt, salt)
    }

    pub fn kdf_params(&self) -> Result<Option<KdfParams>, VaultError> {
        self.read(VaultSlot::KdfParams)?
            .map(|raw| {
                serde_json::from_slice(&raw).map_err(|e| VaultError::Corrupt {
                    slot: VaultSlot::KdfParams.key(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn set_kdf_params(&self, params: &KdfParams) -> Result<(), VaultError> {
        let json = serde_json::to_vec(params).map_err(|e| VaultError::Backend(e.to_string()))?;
        self.write(VaultSlot::KdfParams, &json)
    }

    pub fn pin_hash(&self) -> Result<Option<[u8; 32]>, VaultError> {
        self.read_array(VaultSlot::PinHash)
    }

    pub fn set_pin_hash(&self, hash: &[u8; 32]) -> Result<(), VaultError> {
        self.write(VaultSlot::PinHash, hash)
    }

    pub fn duress_pin_hash(&self) -> Result<Option<[u8; 32]>, VaultError> {
        self.read_array(VaultSlot::DuressPinHash)
    }

    pub fn set_duress_pin_hash(&self, hash: &[u8; 32]) -> Result<(), VaultError> {
        self.write(VaultSlot::DuressPinHash, hash)
    }

    /// Real store key, wrapped under the real PIN key.
    pub fn wrapped_real_db_key(&self) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(self.read(VaultSlot::RealDbKey)?.map(|v| v.to_vec()))
    }

    pub fn set_wrapped_real_db_key(&self, wrapped: &[u8]) -> Result<(), VaultError> {
        self.write(VaultSlot::RealDbKey, wrapped)
    }

    /// Decoy store key, wrapped under the duress PIN key.
    pub fn wrapped_decoy_db_key(&self) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(self.read(VaultSlot::DecoyDbKey)?.map(|v| v.to_vec()))
    }

    pub fn set_wrapped_decoy_db_key(&self, wrapped: &[u8]) -> Result<(), VaultError> {
        self.write(VaultSlot::DecoyDbKey, wrapped)
    }

    pub fn identity_secret(&self) -> Result<Option<Zeroizing<Vec<u8>>>, VaultError> {
        self.read(VaultSlot::IdentitySecret)
    }

    pub fn set_identity_secret(&self, secret: &[u8]) -> Result<(), VaultError> {
        self.write(VaultSlot::IdentitySecret, secret)
    }

    pub fn identity_dht_key(&self) -> Result<Option<String>, VaultError> {
        self.read(VaultSlot::IdentityDhtKey)?
            .map(|raw| {
                String::from_utf8(raw.to_vec()).map_err(|e| VaultError::Corrupt {
                    slot: VaultSlot::IdentityDhtKey.key(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn set_identity_dht_key(&self, dht_key: &str) -> Result<(), VaultError> {
        self.write(VaultSlot::IdentityDhtKey, dht_key.as_bytes())
    }

    fn read_array(&self, slot: VaultSlot) -> Result<Option<[u8; 32]>, VaultError> {
        self.read(slot)?
            .map(|raw| {
                <[u8; 32]>::try_from(raw.as_slice()).map_err(|_| VaultError::Corrupt {
                    slot: slot.key(),
                    reason: format!("expected 32 bytes, found {}", raw.len()),
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_roundtrip() {
        let vault = CredentialVault::in_memory();

        assert!(vault.master_salt().unwrap().is_none());
        assert!(vault.kdf_params().unwrap().is_none());

        vault.set_master_salt(&[1u8; 16]).unwrap();
        vault.set_kdf_params(&KdfParams::CONSTRAINED).unwrap();
        vault.set_pin_hash(&[2u8; 32]).unwrap();
        vault.set_duress_pin_hash(&[3u8; 32]).unwrap();
        vault.set_wrapped_real_db_key(&[4u8; 60]).unwrap();
        vault.set_wrapped_decoy_db_key(&[5u8; 60]).unwrap();
        vault.set_identity_secret(&[6u8; 32]).unwrap();
        vault.set_identity_dht_key("dht-abc").unwrap();

        assert_eq!(vault.master_salt().unwrap().unwrap(), vec![1u8; 16]);
        assert_eq!(vault.kdf_params().unwrap(), Some(KdfParams::CONSTRAINED));
        assert_eq!(vault.pin_hash().unwrap(), Some([2u8; 32]));
        assert_eq!(vault.duress_pin_hash().unwrap(), Some([3u8; 32]));
        assert_eq!(vault.wrapped_real_db_key().unwrap().unwrap(), vec![4u8; 60]);
        assert_eq!(vault.wrapped_decoy_db_key().unwrap().unwrap(), vec![5u8; 60]);
        assert_eq!(vault.identity_secret().unwrap().unwrap().as_slice(), &[6u8; 32]);
        assert_eq!(vault.identity_dht_key().unwrap().as_deref(), Some("dht-abc"));
    }

    #[test]
    fn wrong_length_hash_is_corrupt() {
        let vault = CredentialVault::in_memory();
        vault.write(VaultSlot::PinHash, &[0u8; 5]).unwrap();
        assert!(matches!(
            vault.pin_hash(),
            Err(VaultError::Corrupt { slot: "haven.pin_hash", .. })
        ));
    }

    #[test]
    fn delete_all_empties_memory_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let vault = CredentialVault::new(backend.clone());
        vault.set_master_salt(&[1u8; 16]).unwrap();
        vault.set_identity_secret(&[9u8; 32]).unwrap();

        vault.delete(VaultSlot::MasterSalt).unwrap();
        assert_eq!(backend.keys(), vec!["haven.identity_secret".to_string()]);

        vault.delete_all().unwrap();
        assert!(backend.keys().is_empty());
        // absent entries delete cleanly
        vault.delete(VaultSlot::PinHash).unwrap();
    }

    #[test]
    fn slot_keys_are_unique() {
        let keys: BTreeSet<_> = VaultSlot::ALL.iter().map(|s| s.key()).collect();
        assert_eq!(keys.len(), VaultSlot::ALL.len());
    }
}

//! PIN onboarding, classification and the vault half of panic wipe.
//!
//! One master salt serves both PINs. Each PIN key (Argon2id over the salt)
//! yields two subkeys: one keys the HMAC verifier stored in the vault, the
//! other wraps that PIN's store key. Store keys are random and stable, so a
//! PIN change only re-wraps.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use hv_crypto::{aead, kdf, mac, KdfParams, PinKey};
use hv_store::{CredentialVault, StoreKey, StoreName};

use crate::config::SecuritySettings;
use crate::duress::WipeReport;
use crate::error::CoreError;
use crate::mode::ModeState;

const VERIFIER_SUBKEY: &[u8] = b"haven-pin-verifier";
const VERIFIER_MESSAGE: &[u8] = b"haven-pin-verifier-v1";
const WRAP_SUBKEY: &[u8] = b"haven-store-wrap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPhase {
    Uninitialized,
    Initialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinClass {
    Real,
    Duress,
    Invalid,
}

/// Proof of a successful PIN check: which store to open and its key.
/// Only `SecurityManager::authenticate` builds one.
pub struct AuthGrant {
    store: StoreName,
    key: StoreKey,
}

impl AuthGrant {
    pub fn store_name(&self) -> StoreName {
        self.store
    }

    pub(crate) fn into_parts(self) -> (StoreName, StoreKey) {
        (self.store, self.key)
    }
}

impl std::fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthGrant([redacted])")
    }
}

pub struct SecurityManager {
    vault: CredentialVault,
    settings: SecuritySettings,
    modes: Arc<ModeState>,
}

struct Classified {
    class: PinClass,
    key: Option<PinKey>,
}

impl SecurityManager {
    pub fn new(vault: CredentialVault, settings: SecuritySettings, modes: Arc<ModeState>) -> Self {
        Self {
            vault,
            settings,
            modes,
        }
    }

    pub fn is_initialized(&self) -> Result<bool, CoreError> {
        Ok(self.vault.master_salt()?.is_some())
    }

    pub fn phase(&self) -> Result<SecurityPhase, CoreError> {
        Ok(if self.is_initialized()? {
            SecurityPhase::Initialized
        } else {
            SecurityPhase::Uninitialized
        })
    }

    pub fn has_duress_pin(&self) -> Result<bool, CoreError> {
        Ok(self.vault.duress_pin_hash()?.is_some())
    }

    pub async fn initialize_with_pin(
        &self,
        pin: &str,
        duress_pin: Option<&str>,
    ) -> Result<(), CoreError> {
        self.check_pin_length(pin)?;
        if let Some(duress) = duress_pin {
            self.check_pin_length(duress)?;
            if duress == pin {
                return Err(CoreError::validation("duress PIN must differ from PIN"));
            }
        }
        if self.is_initialized()? {
            return Err(CoreError::state("already initialized"));
        }

        let salt = kdf::generate_salt();
        let params = self.settings.kdf_profile.params();

        let real_key = derive_pin_key(pin, &salt, params).await?;
        let real_store_key = StoreKey::generate();
        let real_wrapped = wrap_store_key(&real_key, &real_store_key)?;
        let real_verifier = verifier(&real_key)?;

        let decoy = match duress_pin {
            Some(duress) => {
                let duress_key = derive_pin_key(duress, &salt, params).await?;
                let decoy_store_key = StoreKey::generate();
                Some((
                    verifier(&duress_key)?,
                    wrap_store_key(&duress_key, &decoy_store_key)?,
                ))
            }
            None => None,
        };

        self.vault.set_kdf_params(&params)?;
        self.vault.set_pin_hash(&real_verifier)?;
        self.vault.set_wrapped_real_db_key(&real_wrapped)?;
        if let Some((duress_verifier, decoy_wrapped)) = &decoy {
            self.vault.set_duress_pin_hash(duress_verifier)?;
            self.vault.set_wrapped_decoy_db_key(decoy_wrapped)?;
        }
        // Written last: `is_initialized` keys off the salt.
        self.vault.set_master_salt(&salt)?;

        tracing::info!(event = "security_initialized", duress_configured = decoy.is_some());
        Ok(())
    }

    pub async fn verify_pin(&self, pin: &str) -> Result<PinClass, CoreError> {
        Ok(self.classify(pin).await?.class)
    }

    pub async fn authenticate(&self, pin: &str) -> Result<AuthGrant, CoreError> {
        let Classified { class, key } = self.classify(pin).await?;
        let (store, wrapped) = match class {
            PinClass::Real => (StoreName::Real, self.vault.wrapped_real_db_key()?),
            PinClass::Duress => (StoreName::Decoy, self.vault.wrapped_decoy_db_key()?),
            PinClass::Invalid => {
                tracing::warn!(event = "auth_failed");
                return Err(CoreError::Authentication);
            }
        };
        let key = key.ok_or(CoreError::Authentication)?;
        let wrapped = wrapped.ok_or_else(|| CoreError::state("store key missing from vault"))?;
        let store_key = unwrap_store_key(&key, &wrapped)?;

        tracing::info!(event = "auth_succeeded");
        Ok(AuthGrant {
            store,
            key: store_key,
        })
    }

    pub async fn change_pin(&self, old_pin: &str, new_pin: &str) -> Result<(), CoreError> {
        self.check_pin_length(new_pin)?;
        if self.modes.is_duress() {
            return Err(CoreError::state("PIN change unavailable"));
        }

        let Classified { class, key } = self.classify(old_pin).await?;
        let old_key = match (class, key) {
            (PinClass::Real, Some(key)) => key,
            (PinClass::Duress, _) => return Err(CoreError::state("PIN change unavailable")),
            _ => {
                tracing::warn!(event = "pin_change_rejected");
                return Err(CoreError::Authentication);
            }
        };

        let salt = self
            .vault
            .master_salt()?
            .ok_or_else(|| CoreError::state("not initialized"))?;
        let params = self.vault.kdf_params()?.unwrap_or_default();
        let new_key = derive_pin_key(new_pin, &salt, params).await?;
        let new_verifier = verifier(&new_key)?;

        if let Some(duress_hash) = self.vault.duress_pin_hash()? {
            if mac::verify(&new_verifier_key(&new_key)?[..], VERIFIER_MESSAGE, &duress_hash).is_ok() {
                return Err(CoreError::validation("new PIN must differ from duress PIN"));
            }
        }

        let old_wrapped = self
            .vault
            .wrapped_real_db_key()?
            .ok_or_else(|| CoreError::state("store key missing from vault"))?;
        let store_key = unwrap_store_key(&old_key, &old_wrapped)?;
        let new_wrapped = wrap_store_key(&new_key, &store_key)?;

        self.vault.set_wrapped_real_db_key(&new_wrapped)?;
        if let Err(e) = self.vault.set_pin_hash(&new_verifier) {
            // Keep the old PIN usable rather than stranding the store key.
            if let Err(rollback) = self.vault.set_wrapped_real_db_key(&old_wrapped) {
                tracing::error!(event = "pin_change_rollback_failed", error = %rollback);
            }
            return Err(e.into());
        }

        tracing::info!(event = "pin_changed");
        Ok(())
    }

    /// Vault side of panic wipe: keep only what duress login needs (salt,
    /// kdf params, duress verifier, wrapped decoy key) and delete the rest.
    pub fn panic(&self) -> WipeReport {
        let mut report = WipeReport::default();

        let salt = report.record("vault_snapshot_salt", self.vault.master_salt()).flatten();
        let params = report.record("vault_snapshot_kdf", self.vault.kdf_params()).flatten();
        let duress_hash = report
            .record("vault_snapshot_duress_hash", self.vault.duress_pin_hash())
            .flatten();
        let decoy_wrapped = report
            .record("vault_snapshot_decoy_key", self.vault.wrapped_decoy_db_key())
            .flatten();

        report.record("vault_delete_all", self.vault.delete_all());

        if let Some(hash) = duress_hash {
            if let Some(params) = params {
                report.record("vault_restore_kdf", self.vault.set_kdf_params(&params));
            }
            report.record("vault_restore_duress_hash", self.vault.set_duress_pin_hash(&hash));
            if let Some(wrapped) = decoy_wrapped {
                report.record("vault_restore_decoy_key", self.vault.set_wrapped_decoy_db_key(&wrapped));
            }
            if let Some(salt) = salt {
                report.record("vault_restore_salt", self.vault.set_master_salt(&salt));
            }
        }

        report
    }

    async fn classify(&self, pin: &str) -> Result<Classified, CoreError> {
        let Some(salt) = self.vault.master_salt()? else {
            return Ok(Classified {
                class: PinClass::Invalid,
                key: None,
            });
        };
        let params = self.vault.kdf_params()?.unwrap_or_default();
        let key = derive_pin_key(pin, &salt, params).await?;
        let verifier_key = new_verifier_key(&key)?;

        let matches = |hash: Option<[u8; 32]>| {
            hash.is_some_and(|h| mac::verify(&verifier_key[..], VERIFIER_MESSAGE, &h).is_ok())
        };
        // Both comparisons always run.
        let is_real = matches(self.vault.pin_hash()?);
        let is_duress = matches(self.vault.duress_pin_hash()?);

        let class = match (is_real, is_duress) {
            (true, _) => PinClass::Real,
            (false, true) => PinClass::Duress,
            (false, false) => PinClass::Invalid,
        };
        Ok(Classified {
            class,
            key: (class != PinClass::Invalid).then_some(key),
        })
    }

    fn check_pin_length(&self, pin: &str) -> Result<(), CoreError> {
        if pin.chars().count() < self.settings.min_pin_length {
            return Err(CoreError::validation(format!(
                "PIN must be at least {} characters",
                self.settings.min_pin_length
            )));
        }
        Ok(())
    }
}

/// Argon2id off the async workers.
async fn derive_pin_key(pin: &str, salt: &[u8], params: KdfParams) -> Result<PinKey, CoreError> {
    let pin = Zeroizing::new(pin.as_bytes().to_vec());
    let salt = salt.to_vec();
    tokio::task::spawn_blocking(move || kdf::derive_key(&pin, &salt, &params))
        .await
        .map_err(|e| CoreError::state(format!("key derivation task failed: {e}")))?
        .map_err(CoreError::from)
}

fn new_verifier_key(key: &PinKey) -> Result<Zeroizing<[u8; 32]>, CoreError> {
    Ok(key.subkey(VERIFIER_SUBKEY)?)
}

fn verifier(key: &PinKey) -> Result<[u8; 32], CoreError> {
    Ok(mac::sign(&new_verifier_key(key)?[..], VERIFIER_MESSAGE)?)
}

fn wrap_store_key(pin_key: &PinKey, store_key: &StoreKey) -> Result<Vec<u8>, CoreError> {
    let wrapping = pin_key.subkey(WRAP_SUBKEY)?;
    Ok(aead::wrap_key(&wrapping, store_key.as_bytes())?)
}

fn unwrap_store_key(pin_key: &PinKey, wrapped: &[u8]) -> Result<StoreKey, CoreError> {
    let wrapping = pin_key.subkey(WRAP_SUBKEY)?;
    let raw = aead::unwrap_key(&wrapping, wrapped)?;
    Ok(StoreKey::from_bytes(*raw))
}

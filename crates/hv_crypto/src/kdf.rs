//! Key derivation functions
//!
//! `derive_key`: Argon2id, turns a PIN plus the master salt into the 32-byte
//!   key that wraps a store key and seeds the PIN verifier.
//!
//! `hkdf_expand`: HKDF-SHA256, used for subkeys and the message key schedule.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::agreement::SharedSecret;
use crate::error::CryptoError;

pub const SALT_LEN: usize = 16;

// ── Argon2id ─────────────────────────────────────────────────────────────────

/// Argon2id cost parameters. Recorded next to the salt when a PIN is set so
/// the same (password, salt) always re-derives the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// Desktop-class devices: 64 MiB, 3 passes, 1 lane.
    pub const INTERACTIVE: KdfParams = KdfParams {
        memory_kib: 64 * 1024,
        iterations: 3,
        parallelism: 1,
    };

    /// Memory-constrained devices: 19 MiB, 2 passes, 1 lane.
    pub const CONSTRAINED: KdfParams = KdfParams {
        memory_kib: 19 * 1024,
        iterations: 2,
        parallelism: 1,
    };

    fn to_argon2(self) -> Result<Params, CryptoError> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, Some(32))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::INTERACTIVE
    }
}

/// 32-byte key derived from a PIN. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct PinKey([u8; 32]);

impl PinKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Domain-separated subkey (e.g. the store-key wrapping key).
    pub fn subkey(&self, label: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let mut out = Zeroizing::new([0u8; 32]);
        hkdf_expand(&self.0, Some(b"haven-pin-key-v1"), label, &mut out[..])?;
        Ok(out)
    }
}

/// Derive a key from `password` and `salt` with Argon2id.
pub fn derive_key(password: &[u8], salt: &[u8], params: &KdfParams) -> Result<PinKey, CryptoError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(PinKey(output))
}

/// Fresh random salt. Not secret; stored in the vault next to the verifiers.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

// ── HKDF-SHA256 ──────────────────────────────────────────────────────────────

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

// ── Message key schedule ─────────────────────────────────────────────────────

/// Per-message key. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct MessageKey([u8; 32]);

impl MessageKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// How message keys are obtained from a contact's shared secret.
///
/// The id travels on the wire with every message. `StaticV1` expands the
/// long-lived shared secret per message id; a ratcheting schedule gets a new
/// id rather than a new wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySchedule {
    StaticV1,
}

impl KeySchedule {
    pub const CURRENT: KeySchedule = KeySchedule::StaticV1;

    pub fn id(self) -> u8 {
        match self {
            KeySchedule::StaticV1 => 1,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, CryptoError> {
        match id {
            1 => Ok(KeySchedule::StaticV1),
            other => Err(CryptoError::UnsupportedKeySchedule(other)),
        }
    }

    pub fn message_key(self, shared: &SharedSecret, context: &[u8]) -> Result<MessageKey, CryptoError> {
        match self {
            KeySchedule::StaticV1 => {
                let mut info = Vec::with_capacity(13 + context.len());
                info.extend_from_slice(b"haven-msg-v1\x00");
                info.extend_from_slice(context);
                let mut mk = [0u8; 32];
                hkdf_expand(shared.as_bytes(), Some(b"haven-schedule"), &info, &mut mk)?;
                Ok(MessageKey(mk))
            }
        }
    }
}

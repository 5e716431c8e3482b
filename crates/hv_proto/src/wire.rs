//! Encrypted message: what the transport carries.
//!
//! The transport sees:
//!   - message_id    (random UUID, used for dedup and as key-schedule context)
//!   - sender_id     (sender identity public key, base64url)
//!   - recipient_id  (recipient identity public key, base64url)
//!   - timestamp
//!   - ciphertext / nonce / tag (opaque)
//!
//! Message type, content and ephemeral flags live inside the ciphertext.
//! Every header field is bound into the AEAD associated data, so altering any
//! of them fails authentication exactly like a corrupted tag.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hv_crypto::aead::{Sealed, NONCE_LEN, TAG_LEN};
use hv_crypto::KeySchedule;

use crate::error::ProtoError;

pub const WIRE_VERSION: u8 = 1;

/// Upper bound on an encoded message, kept under the transport's frame limit.
pub const MAX_WIRE_BYTES: usize = 96 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub version: u8,
    /// `KeySchedule` id used to derive the message key.
    pub key_schedule: u8,
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub timestamp: DateTime<Utc>,
    /// base64url
    pub ciphertext: String,
    /// base64url, 12 bytes
    pub nonce: String,
    /// base64url, 16 bytes
    pub tag: String,
}

/// Header fields fixed before encryption (they form the AAD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireHeader {
    pub key_schedule: KeySchedule,
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub timestamp: DateTime<Utc>,
}

impl WireHeader {
    /// Canonical associated data: NUL-separated fields behind a label.
    pub fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(64 + self.sender_id.len() + self.recipient_id.len());
        aad.extend_from_slice(b"haven-wire-v1\x00");
        aad.push(WIRE_VERSION);
        aad.push(self.key_schedule.id());
        for field in [&self.message_id, &self.sender_id, &self.recipient_id] {
            aad.extend_from_slice(field.as_bytes());
            aad.push(0);
        }
        aad.extend_from_slice(&self.timestamp.timestamp_millis().to_le_bytes());
        aad
    }
}

impl EncryptedMessage {
    pub fn from_sealed(header: WireHeader, sealed: &Sealed) -> Self {
        Self {
            version: WIRE_VERSION,
            key_schedule: header.key_schedule.id(),
            message_id: header.message_id,
            sender_id: header.sender_id,
            recipient_id: header.recipient_id,
            timestamp: header.timestamp,
            ciphertext: URL_SAFE_NO_PAD.encode(&sealed.ciphertext),
            nonce: URL_SAFE_NO_PAD.encode(sealed.nonce),
            tag: URL_SAFE_NO_PAD.encode(sealed.tag),
        }
    }

    pub fn header(&self) -> Result<WireHeader, ProtoError> {
        Ok(WireHeader {
            key_schedule: KeySchedule::from_id(self.key_schedule)?,
            message_id: self.message_id.clone(),
            sender_id: self.sender_id.clone(),
            recipient_id: self.recipient_id.clone(),
            timestamp: self.timestamp,
        })
    }

    /// Decode the binary fields back into a `Sealed`.
    pub fn sealed(&self) -> Result<Sealed, ProtoError> {
        let ciphertext = URL_SAFE_NO_PAD.decode(&self.ciphertext)?;
        let nonce: [u8; NONCE_LEN] = URL_SAFE_NO_PAD
            .decode(&self.nonce)?
            .try_into()
            .map_err(|_| ProtoError::Malformed("nonce"))?;
        let tag: [u8; TAG_LEN] = URL_SAFE_NO_PAD
            .decode(&self.tag)?
            .try_into()
            .map_err(|_| ProtoError::Malformed("tag"))?;
        Ok(Sealed { ciphertext, nonce, tag })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_WIRE_BYTES {
            return Err(ProtoError::TooLarge { size: bytes.len(), limit: MAX_WIRE_BYTES });
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        if bytes.len() > MAX_WIRE_BYTES {
            return Err(ProtoError::TooLarge { size: bytes.len(), limit: MAX_WIRE_BYTES });
        }
        let msg: EncryptedMessage = serde_json::from_slice(bytes)?;
        if msg.version != WIRE_VERSION {
            return Err(ProtoError::UnsupportedVersion(msg.version));
        }
        Ok(msg)
    }
}

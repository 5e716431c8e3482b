//! Domain records persisted in a `Store`.

use chrono::{DateTime, TimeZone, Utc};
use hv_crypto::{PublicKeyBytes, SafetyNumber};
use hv_proto::{MessageType, RouteHandle};

use crate::error::StoreError;

pub const MAX_TRUST_LEVEL: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub route: RouteHandle,
    pub public_key: PublicKeyBytes,
    /// Derived from both identity keys, never user-supplied.
    pub safety_number: SafetyNumber,
    pub verified: bool,
    pub trust_level: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub contact_id: String,
    pub content: String,
    /// base64url identity public key of the author.
    pub sender_id: String,
    pub recipient_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_sent: bool,
    pub is_delivered: bool,
    pub is_read: bool,
    pub is_ephemeral: bool,
    pub ephemeral_duration_seconds: Option<u32>,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Ephemeral messages must carry a positive lifetime.
    pub fn validate(&self) -> Result<(), StoreError> {
        match (self.is_ephemeral, self.ephemeral_duration_seconds) {
            (true, Some(secs)) if secs > 0 => Ok(()),
            (true, _) => Err(StoreError::Invalid(
                "ephemeral message requires a positive duration".into(),
            )),
            (false, Some(_)) => Err(StoreError::Invalid(
                "duration set on a non-ephemeral message".into(),
            )),
            (false, None) => Ok(()),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if !self.is_ephemeral {
            return None;
        }
        self.ephemeral_duration_seconds
            .map(|secs| self.created_at + chrono::Duration::seconds(i64::from(secs)))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

/// Current time at the millisecond precision rows are persisted with.
pub fn now() -> DateTime<Utc> {
    let ms = Utc::now().timestamp_millis();
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

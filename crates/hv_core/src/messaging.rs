//! Message engine: outbound sealing with bounded retry, inbound
//! authentication, status flags and ephemeral expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use hv_crypto::{aead, derive_shared_secret, KeySchedule, PublicKeyBytes, SharedSecret};
use hv_proto::wire::WireHeader;
use hv_proto::{EncryptedMessage, InnerPayload, MessageType, MAX_CONTENT_BYTES};
use hv_store::models::{from_millis, now, to_millis};
use hv_store::{Contact, InboundOutcome, Message, Store};

use crate::config::MessagingSettings;
use crate::error::CoreError;
use crate::identity::IdentityManager;
use crate::mode::ModeState;
use crate::transport::{Transport, TransportError};

const EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub contact_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub ephemeral_seconds: Option<u32>,
}

impl SendRequest {
    pub fn text(contact_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            content: content.into(),
            message_type: MessageType::Text,
            ephemeral_seconds: None,
        }
    }

    pub fn ephemeral(mut self, seconds: u32) -> Self {
        self.ephemeral_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Received(Message),
    Expired { ids: Vec<String> },
}

pub struct MessageEngine {
    modes: Arc<ModeState>,
    identity: Arc<IdentityManager>,
    transport: Arc<dyn Transport>,
    settings: MessagingSettings,
    events: broadcast::Sender<MessageEvent>,
}

impl MessageEngine {
    pub fn new(
        modes: Arc<ModeState>,
        identity: Arc<IdentityManager>,
        transport: Arc<dyn Transport>,
        settings: MessagingSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            modes,
            identity,
            transport,
            settings,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MessageEvent> {
        self.events.subscribe()
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    pub async fn send_message(&self, request: SendRequest) -> Result<Message, CoreError> {
        if request.content.len() > MAX_CONTENT_BYTES {
            return Err(CoreError::validation(format!(
                "content is {} bytes, limit is {MAX_CONTENT_BYTES}",
                request.content.len()
            )));
        }
        if request.ephemeral_seconds == Some(0) {
            return Err(CoreError::validation("ephemeral duration must be positive"));
        }

        let store = self.modes.active_store()?;
        let identity = self.identity.current()?;
        let contact = self.require_contact(&store, &request.contact_id).await?;

        let at = now();
        let mut message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            contact_id: contact.id.clone(),
            content: request.content,
            sender_id: identity.public.to_b64(),
            recipient_id: contact.public_key.to_b64(),
            timestamp: at,
            is_sent: false,
            is_delivered: false,
            is_read: true,
            is_ephemeral: request.ephemeral_seconds.is_some(),
            ephemeral_duration_seconds: request.ephemeral_seconds,
            message_type: request.message_type,
            created_at: at,
        };
        message.validate()?;

        let shared = derive_shared_secret(&identity, &contact.public_key)?;
        let wire = seal(&message, &shared)?;

        tracing::info!(
            event = "send_message_start",
            message_id = %message.id,
            contact_id = %contact.id,
            size = wire.len()
        );

        match self.transmit(&contact, &wire, &message.id).await {
            Ok(()) => {
                message.is_sent = true;
                store.insert_message(&message).await?;
                tracing::info!(event = "send_message_ok", message_id = %message.id);
                Ok(message)
            }
            Err(source) => {
                if let Err(e) = store.insert_message(&message).await {
                    tracing::error!(
                        event = "send_failed_persist_error",
                        message_id = %message.id,
                        error = %e
                    );
                }
                tracing::warn!(
                    event = "send_message_failed",
                    message_id = %message.id,
                    error = %source
                );
                Err(CoreError::SendFailed {
                    message: Box::new(message),
                    source,
                })
            }
        }
    }

    async fn transmit(
        &self,
        contact: &Contact,
        wire: &[u8],
        message_id: &str,
    ) -> Result<(), TransportError> {
        let attempts = self.settings.send_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.send_message(&contact.route, wire).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.settings.backoff_for(attempt);
                    tracing::debug!(
                        event = "send_retry",
                        message_id = %message_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Authenticate and store a message from `contact_id`, sealed under
    /// `shared`. Nothing is stored unless the tag verifies.
    pub async fn receive_message(
        &self,
        contact_id: &str,
        bytes: &[u8],
        shared: &SharedSecret,
    ) -> Result<Message, CoreError> {
        let store = self.modes.active_store()?;
        let contact = self.require_contact(&store, contact_id).await?;
        let wire = EncryptedMessage::from_bytes(bytes).map_err(|e| {
            tracing::warn!(event = "inbound_rejected", reason = "malformed", error = %e);
            e
        })?;
        self.accept(&store, &contact, &wire, shared).await
    }

    /// Inbound path for raw transport payloads. Unknown senders and anything
    /// that fails to decode or authenticate are logged and dropped.
    pub async fn ingest(&self, bytes: &[u8]) -> Result<Option<Message>, CoreError> {
        let wire = match EncryptedMessage::from_bytes(bytes) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(event = "inbound_rejected", reason = "malformed", error = %e);
                return Ok(None);
            }
        };
        let sender = match PublicKeyBytes::from_b64(&wire.sender_id) {
            Ok(pk) => pk,
            Err(_) => {
                tracing::warn!(event = "inbound_rejected", reason = "bad_sender_key");
                return Ok(None);
            }
        };

        let store = self.modes.active_store()?;
        let Some(contact) = store.find_contact_by_public_key(&sender).await? else {
            tracing::debug!(event = "inbound_dropped", reason = "unknown_sender");
            return Ok(None);
        };
        let identity = self.identity.current()?;
        let shared = derive_shared_secret(&identity, &contact.public_key)?;

        match self.accept(&store, &contact, &wire, &shared).await {
            Ok(message) => Ok(Some(message)),
            Err(CoreError::Crypto(_) | CoreError::Proto(_) | CoreError::Validation(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn accept(
        &self,
        store: &Store,
        contact: &Contact,
        wire: &EncryptedMessage,
        shared: &SharedSecret,
    ) -> Result<Message, CoreError> {
        let header = wire.header()?;
        if header.sender_id != contact.public_key.to_b64() {
            tracing::warn!(
                event = "inbound_rejected",
                reason = "sender_mismatch",
                contact_id = %contact.id,
                message_id = %header.message_id
            );
            return Err(CoreError::validation("sender does not match contact"));
        }
        if let Some(me) = self.identity.public_key() {
            if header.recipient_id != me.to_b64() {
                tracing::warn!(
                    event = "inbound_rejected",
                    reason = "wrong_recipient",
                    message_id = %header.message_id
                );
                return Err(CoreError::validation("message addressed to another identity"));
            }
        }

        let sealed = wire.sealed()?;
        let plaintext = aead::decrypt_message(
            &sealed,
            shared,
            header.key_schedule,
            header.message_id.as_bytes(),
            &header.aad(),
        )
        .map_err(|e| {
            tracing::warn!(
                event = "inbound_rejected",
                reason = "authentication_failed",
                contact_id = %contact.id,
                message_id = %header.message_id
            );
            CoreError::Crypto(e)
        })?;
        let payload = InnerPayload::decode(&plaintext)?;

        let message = Message {
            id: header.message_id.clone(),
            contact_id: contact.id.clone(),
            content: payload.content,
            sender_id: header.sender_id,
            recipient_id: header.recipient_id,
            timestamp: from_millis(to_millis(header.timestamp))?,
            is_sent: false,
            is_delivered: true,
            is_read: false,
            is_ephemeral: payload.ephemeral_seconds.is_some(),
            ephemeral_duration_seconds: payload.ephemeral_seconds,
            message_type: payload.message_type,
            created_at: now(),
        };

        match store.record_inbound(&message).await? {
            InboundOutcome::Inserted => {}
            InboundOutcome::Duplicate(existing) => {
                tracing::debug!(event = "inbound_duplicate", message_id = %message.id);
                return Ok(existing);
            }
            InboundOutcome::Replayed => {
                tracing::warn!(
                    event = "inbound_rejected",
                    reason = "replay",
                    contact_id = %contact.id,
                    message_id = %message.id
                );
                return Err(CoreError::validation("message id already used"));
            }
        }

        tracing::info!(
            event = "message_received",
            message_id = %message.id,
            contact_id = %contact.id
        );
        let _ = self.events.send(MessageEvent::Received(message.clone()));
        Ok(message)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub async fn cleanup_ephemeral_messages(&self) -> Result<u64, CoreError> {
        self.cleanup_expired_at(Utc::now()).await
    }

    /// Delete ephemeral rows with `now >= created_at + duration` from the
    /// active store. The inactive store is left alone until it is selected.
    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<u64, CoreError> {
        let ids = self.modes.active_store()?.delete_expired(now).await?;
        let removed = ids.len() as u64;
        if !ids.is_empty() {
            tracing::debug!(event = "ephemeral_expired", count = ids.len());
            let _ = self.events.send(MessageEvent::Expired { ids });
        }
        Ok(removed)
    }

    pub async fn get_messages(&self, contact_id: &str) -> Result<Vec<Message>, CoreError> {
        Ok(self.modes.active_store()?.list_messages(contact_id).await?)
    }

    pub async fn mark_as_read(&self, message_id: &str) -> Result<bool, CoreError> {
        Ok(self.modes.active_store()?.mark_message_read(message_id).await?)
    }

    pub async fn mark_all_as_read(&self, contact_id: Option<&str>) -> Result<u64, CoreError> {
        Ok(self.modes.active_store()?.mark_all_read(contact_id).await?)
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<bool, CoreError> {
        Ok(self.modes.active_store()?.delete_message(message_id).await?)
    }

    pub async fn delete_all_messages(&self, contact_id: Option<&str>) -> Result<u64, CoreError> {
        Ok(self.modes.active_store()?.delete_messages(contact_id).await?)
    }

    pub async fn get_unread_count(&self, contact_id: Option<&str>) -> Result<u64, CoreError> {
        Ok(self.modes.active_store()?.unread_count(contact_id).await?)
    }

    async fn require_contact(&self, store: &Store, contact_id: &str) -> Result<Contact, CoreError> {
        store
            .get_contact(contact_id)
            .await?
            .ok_or_else(|| CoreError::validation(format!("unknown contact {contact_id}")))
    }
}

/// Pad, encrypt and frame a message for the wire.
fn seal(message: &Message, shared: &SharedSecret) -> Result<Vec<u8>, CoreError> {
    let header = WireHeader {
        key_schedule: KeySchedule::CURRENT,
        message_id: message.id.clone(),
        sender_id: message.sender_id.clone(),
        recipient_id: message.recipient_id.clone(),
        timestamp: message.timestamp,
    };
    let padded = InnerPayload {
        content: message.content.clone(),
        message_type: message.message_type,
        ephemeral_seconds: message.ephemeral_duration_seconds,
    }
    .encode()?;
    let sealed = aead::encrypt_message(
        &padded,
        shared,
        header.key_schedule,
        header.message_id.as_bytes(),
        &header.aad(),
    )?;
    Ok(EncryptedMessage::from_sealed(header, &sealed).to_bytes()?)
}

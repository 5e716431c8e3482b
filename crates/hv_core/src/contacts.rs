//! Contact bootstrap and verification.

use std::sync::Arc;

use hv_crypto::safety::generate_safety_number;
use hv_proto::ContactExchange;
use hv_store::models::now;
use hv_store::{Contact, MAX_TRUST_LEVEL};

use crate::error::CoreError;
use crate::identity::IdentityManager;
use crate::mode::ModeState;
use crate::transport::Transport;

const MAX_NAME_CHARS: usize = 64;
const VERIFIED_TRUST_FLOOR: u8 = 2;

pub struct ContactManager {
    modes: Arc<ModeState>,
    identity: Arc<IdentityManager>,
    transport: Arc<dyn Transport>,
}

impl ContactManager {
    pub fn new(
        modes: Arc<ModeState>,
        identity: Arc<IdentityManager>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            modes,
            identity,
            transport,
        }
    }

    /// Signed bootstrap payload for handing to a peer (QR, paste, DHT).
    pub async fn create_exchange(&self, name: &str) -> Result<ContactExchange, CoreError> {
        let name = validate_name(name)?;
        let identity = self.identity.current()?;
        let route = self.transport.create_private_route().await?;
        Ok(ContactExchange::create(&identity, &name, &route))
    }

    pub async fn add_from_exchange(&self, exchange: &ContactExchange) -> Result<Contact, CoreError> {
        let (public_key, route) = exchange.verify().map_err(|e| {
            tracing::warn!(event = "exchange_rejected", reason = "bad_signature", error = %e);
            e
        })?;
        let name = validate_name(&exchange.name)?;
        let identity = self.identity.current()?;
        if public_key == identity.public {
            return Err(CoreError::validation("cannot add own identity as a contact"));
        }

        let store = self.modes.active_store()?;
        if store.find_contact_by_public_key(&public_key).await?.is_some() {
            return Err(CoreError::validation("contact already exists"));
        }

        let at = now();
        let contact = Contact {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            route,
            public_key,
            safety_number: generate_safety_number(&identity.public, &public_key),
            verified: false,
            trust_level: 0,
            created_at: at,
            updated_at: at,
        };
        store.insert_contact(&contact).await?;
        tracing::info!(event = "contact_added", contact_id = %contact.id);
        Ok(contact)
    }

    /// Record out-of-band safety number confirmation.
    pub async fn verify_contact(&self, id: &str) -> Result<Contact, CoreError> {
        self.update(id, |c| {
            c.verified = true;
            c.trust_level = c.trust_level.max(VERIFIED_TRUST_FLOOR);
        })
        .await
    }

    pub async fn set_trust_level(&self, id: &str, level: u8) -> Result<Contact, CoreError> {
        if level > MAX_TRUST_LEVEL {
            return Err(CoreError::validation(format!(
                "trust level must be 0..={MAX_TRUST_LEVEL}"
            )));
        }
        self.update(id, |c| c.trust_level = level).await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<Contact, CoreError> {
        let name = validate_name(name)?;
        self.update(id, |c| c.name = name).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Contact>, CoreError> {
        Ok(self.modes.active_store()?.get_contact(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Contact>, CoreError> {
        Ok(self.modes.active_store()?.list_contacts().await?)
    }

    /// Remove a contact and its conversation.
    pub async fn delete(&self, id: &str) -> Result<bool, CoreError> {
        let deleted = self.modes.active_store()?.delete_contact(id).await?;
        if deleted {
            tracing::info!(event = "contact_deleted", contact_id = %id);
        }
        Ok(deleted)
    }

    /// Publish a fresh exchange payload under this identity's DHT key.
    pub async fn publish_exchange(&self, name: &str) -> Result<ContactExchange, CoreError> {
        let dht_key = self
            .identity
            .dht_key()
            .ok_or_else(|| CoreError::state("identity has no DHT key"))?;
        let exchange = self.create_exchange(name).await?;
        self.transport
            .dht_set(&dht_key, exchange.to_json()?.as_bytes())
            .await?;
        tracing::info!(event = "exchange_published");
        Ok(exchange)
    }

    /// Fetch and verify an exchange payload published under `dht_key`.
    pub async fn lookup_exchange(&self, dht_key: &str) -> Result<Option<ContactExchange>, CoreError> {
        let Some(raw) = self.transport.dht_get(dht_key).await? else {
            return Ok(None);
        };
        let json = std::str::from_utf8(&raw)
            .map_err(|_| CoreError::validation("exchange record is not utf-8"))?;
        let exchange = ContactExchange::from_json(json)?;
        exchange.verify()?;
        Ok(Some(exchange))
    }

    async fn update<F>(&self, id: &str, apply: F) -> Result<Contact, CoreError>
    where
        F: FnOnce(&mut Contact),
    {
        let store = self.modes.active_store()?;
        let mut contact = store
            .get_contact(id)
            .await?
            .ok_or_else(|| CoreError::validation(format!("unknown contact {id}")))?;
        apply(&mut contact);
        contact.updated_at = now();
        store.update_contact(&contact).await?;
        Ok(contact)
    }
}

fn validate_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation("name must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(CoreError::validation(format!(
            "name longer than {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

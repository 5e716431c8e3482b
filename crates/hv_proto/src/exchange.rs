//! Contact exchange payload: the only thing ever shown as a QR code or
//! pasted by hand to bootstrap a contact.
//!
//! It carries no secret material: a display name, the identity public key,
//! a private route blob the peer can reach us on, and a timestamp. The
//! payload is signed with the identity key so a relayed or DHT-fetched copy
//! cannot be altered without the recipient noticing.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hv_crypto::{IdentityKeyPair, PublicKeyBytes};

use crate::error::ProtoError;

/// Opaque private-route blob handed out by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteHandle(pub Vec<u8>);

impl RouteHandle {
    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, ProtoError> {
        Ok(Self(URL_SAFE_NO_PAD.decode(s)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactExchange {
    pub exchange_id: String,
    pub name: String,
    /// Identity public key, base64url.
    pub public_key: String,
    /// Private route, base64url.
    pub route: String,
    pub timestamp: DateTime<Utc>,
    /// Ed25519 signature over the canonical form of the fields above.
    pub signature: String,
}

impl ContactExchange {
    pub fn create(identity: &IdentityKeyPair, name: &str, route: &RouteHandle) -> Self {
        let mut exchange = ContactExchange {
            exchange_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            public_key: identity.public.to_b64(),
            route: route.to_b64(),
            timestamp: Utc::now(),
            signature: String::new(),
        };
        exchange.signature = URL_SAFE_NO_PAD.encode(identity.sign(&exchange.canonical_bytes()));
        exchange
    }

    /// Check the signature and return the decoded identity key and route.
    pub fn verify(&self) -> Result<(PublicKeyBytes, RouteHandle), ProtoError> {
        let public = PublicKeyBytes::from_b64(&self.public_key)?;
        let sig = URL_SAFE_NO_PAD.decode(&self.signature)?;
        IdentityKeyPair::verify(&public, &self.canonical_bytes(), &sig)?;
        Ok((public, RouteHandle::from_b64(&self.route)?))
    }

    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(s)?)
    }

    // Field order is fixed; `json!` sorts keys alphabetically.
    fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::json!({
            "exchange_id": self.exchange_id,
            "name": self.name,
            "public_key": self.public_key,
            "route": self.route,
            "timestamp": self.timestamp.timestamp_millis(),
            "version": 1,
        })
        .to_string()
        .into_bytes()
    }
}

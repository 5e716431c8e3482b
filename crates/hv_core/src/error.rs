use thiserror::Error;

use hv_crypto::CryptoError;
use hv_proto::ProtoError;
use hv_store::{Message, StoreError, VaultError};

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed")]
    Authentication,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The message was persisted with `is_sent = false`.
    #[error("Send failed for message {}: {source}", message.id)]
    SendFailed {
        message: Box<Message>,
        #[source]
        source: TransportError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        CoreError::State(msg.into())
    }
}

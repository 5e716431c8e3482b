use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    /// The key-check row did not decrypt: this is not the key the store was
    /// created with.
    #[error("Store key rejected")]
    WrongKey,

    #[error("Crypto error: {0}")]
    Crypto(#[from] hv_crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Proto(#[from] hv_proto::ProtoError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Secret backend error: {0}")]
    Backend(String),

    #[error("Corrupt vault entry {slot}: {reason}")]
    Corrupt { slot: &'static str, reason: String },
}

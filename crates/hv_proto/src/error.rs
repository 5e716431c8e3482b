use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Payload too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("Unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid padding: {0}")]
    InvalidPadding(String),

    #[error("Malformed field: {0}")]
    Malformed(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(#[from] hv_crypto::CryptoError),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Tag mismatch on decryption: forged, corrupted or wrong key.
    #[error("authentication failed (tag mismatch)")]
    AuthenticationFailed,

    #[error("nonce generation failed: randomness source unavailable")]
    NonceGenerationFailed,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Unsupported key schedule: {0}")]
    UnsupportedKeySchedule(u8),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

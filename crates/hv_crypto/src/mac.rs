//! HMAC-SHA256 tags.
//!
//! `verify` goes through `Mac::verify_slice`, which compares in constant
//! time. Used for PIN verifiers so a mismatch leaks nothing about how close
//! a guess was.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

pub const TAG_LEN: usize = 32;

pub fn sign(key: &[u8], data: &[u8]) -> Result<[u8; TAG_LEN], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(data);
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

pub fn verify(key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(data);
    mac.verify_slice(tag).map_err(|_| CryptoError::SignatureVerification)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_own_tag() {
        let tag = sign(b"key", b"data").unwrap();
        assert!(verify(b"key", b"data", &tag).is_ok());
    }

    #[test]
    fn verify_rejects_other_key_or_truncation() {
        let tag = sign(b"key", b"data").unwrap();
        assert!(verify(b"other", b"data", &tag).is_err());
        assert!(verify(b"key", b"data", &tag[..16]).is_err());
    }
}

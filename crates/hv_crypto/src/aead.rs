//! Authenticated Encryption with Associated Data
//!
//! Uses ChaCha20-Poly1305 (96-bit nonce, 128-bit tag). Key size: 32 bytes.
//! Every call draws a fresh random nonce from the OS RNG; nothing here keeps
//! a counter, so restarts can never replay a nonce under the same key.
//!
//! Two output shapes:
//! - [`Sealed`] keeps ciphertext, nonce and tag apart (wire messages).
//! - "combined" bytes `[ nonce (12) | ciphertext | tag (16) ]` for values at
//!   rest and wrapped keys.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::agreement::SharedSecret;
use crate::error::CryptoError;
use crate::kdf::KeySchedule;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const WRAP_AAD: &[u8] = b"haven-key-wrap";

/// Ciphertext with its detached nonce and authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Draw a fresh 96-bit nonce.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| CryptoError::NonceGenerationFailed)?;
    Ok(nonce)
}

/// Encrypt `plaintext` under a 32-byte key. `aad` is authenticated but not
/// encrypted.
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = generate_nonce()?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut buffer)
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok(Sealed { ciphertext: buffer, nonce, tag: tag_bytes })
}

/// Decrypt and authenticate. Any mismatch is `AuthenticationFailed`.
pub fn decrypt(
    key: &[u8; KEY_LEN],
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            buffer.as_mut_slice(),
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(buffer)
}

// ── Message level ────────────────────────────────────────────────────────────

/// Seal a message under the key the schedule derives from `shared` for
/// `context` (the message id).
pub fn encrypt_message(
    plaintext: &[u8],
    shared: &SharedSecret,
    schedule: KeySchedule,
    context: &[u8],
    aad: &[u8],
) -> Result<Sealed, CryptoError> {
    let mk = schedule.message_key(shared, context)?;
    encrypt(mk.as_bytes(), plaintext, aad)
}

pub fn decrypt_message(
    sealed: &Sealed,
    shared: &SharedSecret,
    schedule: KeySchedule,
    context: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mk = schedule.message_key(shared, context)?;
    decrypt(mk.as_bytes(), &sealed.ciphertext, &sealed.nonce, &sealed.tag, aad)
}

// ── Combined form ────────────────────────────────────────────────────────────

/// Encrypt into `nonce || ciphertext || tag`.
pub fn encrypt_combined(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let sealed = encrypt(key, plaintext, aad)?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.ciphertext.len() + TAG_LEN);
    out.extend_from_slice(&sealed.nonce);
    out.extend_from_slice(&sealed.ciphertext);
    out.extend_from_slice(&sealed.tag);
    Ok(out)
}

pub fn decrypt_combined(key: &[u8; KEY_LEN], data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    let (nonce, rest) = data.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

    let mut nonce_arr = [0u8; NONCE_LEN];
    nonce_arr.copy_from_slice(nonce);
    let mut tag_arr = [0u8; TAG_LEN];
    tag_arr.copy_from_slice(tag);
    decrypt(key, ciphertext, &nonce_arr, &tag_arr, aad)
}

/// Encrypt a 32-byte key with another 32-byte wrapping key.
pub fn wrap_key(wrapping_key: &[u8; KEY_LEN], key_to_wrap: &[u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    encrypt_combined(wrapping_key, key_to_wrap, WRAP_AAD)
}

/// Decrypt a wrapped key. A wrong wrapping key surfaces as
/// `AuthenticationFailed`.
pub fn unwrap_key(wrapping_key: &[u8; KEY_LEN], wrapped: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let plaintext = decrypt_combined(wrapping_key, wrapped, WRAP_AAD)?;
    if plaintext.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey("unwrapped key has wrong length".into()));
    }
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(&plaintext);
    Ok(out)
}

/// Fresh random 32-byte key (store keys, test secrets).
pub fn generate_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn decrypt_inverts_encrypt() {
        let key = generate_key();
        let sealed = encrypt(&key, b"meet at the usual place", b"hdr").unwrap();
        assert_ne!(sealed.ciphertext, b"meet at the usual place");
        let pt = decrypt(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag, b"hdr").unwrap();
        assert_eq!(pt.as_slice(), b"meet at the usual place");
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let key = generate_key();
        let sealed = encrypt(&key, b"", b"").unwrap();
        assert!(sealed.ciphertext.is_empty());
        let pt = decrypt(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag, b"").unwrap();
        assert!(pt.is_empty());
    }

    #[test]
    fn thousand_nonces_are_distinct() {
        let key = generate_key();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let sealed = encrypt(&key, b"x", b"").unwrap();
            assert!(seen.insert(sealed.nonce), "nonce reused");
        }
    }

    #[test]
    fn flipped_tag_bit_fails_authentication() {
        let key = generate_key();
        let mut sealed = encrypt(&key, b"payload", b"").unwrap();
        sealed.tag[0] ^= 0x01;
        let err = decrypt(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag, b"").unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn mismatched_aad_fails_authentication() {
        let key = generate_key();
        let sealed = encrypt(&key, b"payload", b"alice->bob").unwrap();
        let err = decrypt(&key, &sealed.ciphertext, &sealed.nonce, &sealed.tag, b"alice->eve").unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let key = generate_key();
        let other = generate_key();
        let sealed = encrypt(&key, b"payload", b"").unwrap();
        assert!(decrypt(&other, &sealed.ciphertext, &sealed.nonce, &sealed.tag, b"").is_err());
    }

    #[test]
    fn combined_form_rejects_truncation() {
        let key = generate_key();
        let data = encrypt_combined(&key, b"value", b"col").unwrap();
        assert_eq!(decrypt_combined(&key, &data, b"col").unwrap().as_slice(), b"value");
        assert!(decrypt_combined(&key, &data[..NONCE_LEN + 3], b"col").is_err());
    }

    #[test]
    fn wrapped_key_needs_the_wrapping_key() {
        let wrapping = generate_key();
        let inner = generate_key();
        let wrapped = wrap_key(&wrapping, &inner).unwrap();
        assert_eq!(*unwrap_key(&wrapping, &wrapped).unwrap(), *inner);

        let wrong = generate_key();
        assert!(matches!(
            unwrap_key(&wrong, &wrapped),
            Err(CryptoError::AuthenticationFailed)
        ));
    }
}

//! Shared secret agreement between two identities.
//!
//!   dh     = X25519(my_secret, their_public)
//!   shared = HKDF-SHA256(dh, salt = "haven-agreement-v1",
//!                        info = min(pub_a, pub_b) || max(pub_a, pub_b))
//!
//! The public keys are sorted before binding, so both correspondents derive
//! the same secret regardless of who runs the computation.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::identity::{IdentityKeyPair, PublicKeyBytes};
use crate::kdf::hkdf_expand;

/// 32-byte secret shared with one contact. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

pub fn derive_shared_secret(
    mine: &IdentityKeyPair,
    theirs: &PublicKeyBytes,
) -> Result<SharedSecret, CryptoError> {
    let their_x = theirs.to_x25519()?;
    let dh = mine.to_x25519_secret().diffie_hellman(&their_x);
    if !dh.was_contributory() {
        return Err(CryptoError::InvalidKey("low-order public key".into()));
    }

    let (lo, hi) = if mine.public <= *theirs {
        (&mine.public, theirs)
    } else {
        (theirs, &mine.public)
    };
    let mut info = Vec::with_capacity(64);
    info.extend_from_slice(lo.as_bytes());
    info.extend_from_slice(hi.as_bytes());

    let mut out = [0u8; 32];
    hkdf_expand(dh.as_bytes(), Some(b"haven-agreement-v1"), &info, &mut out)?;
    let shared = SharedSecret(out);
    out.zeroize();
    Ok(shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_secret() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let ab = derive_shared_secret(&alice, &bob.public).unwrap();
        let ba = derive_shared_secret(&bob, &alice.public).unwrap();
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn third_party_derives_something_else() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let eve = IdentityKeyPair::generate();
        let ab = derive_shared_secret(&alice, &bob.public).unwrap();
        let eb = derive_shared_secret(&eve, &bob.public).unwrap();
        assert_ne!(ab.as_bytes(), eb.as_bytes());
    }

    #[test]
    fn identity_point_is_rejected() {
        let alice = IdentityKeyPair::generate();
        // Compressed Edwards identity (0, 1) maps to a low-order Montgomery point.
        let mut identity = [0u8; 32];
        identity[0] = 1;
        let err = derive_shared_secret(&alice, &PublicKeyBytes(identity)).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }
}

//! hv_crypto - Haven cryptographic primitives
//!
//! # Design principles
//! - No custom crypto; every primitive comes from an audited RustCrypto /
//!   dalek crate.
//! - Secret material is zeroized on drop.
//! - Public APIs hand out newtypes so keys of different roles cannot be
//!   swapped by accident.
//!
//! # Module layout
//! - `aead`       : ChaCha20-Poly1305 message sealing + key wrapping
//! - `kdf`        : Argon2id PIN keys, HKDF expansion, message key schedule
//! - `identity`   : long-term Ed25519 identity keys and signatures
//! - `agreement`  : X25519 shared secrets between two identities
//! - `safety`     : 6-digit safety numbers for out-of-band verification
//! - `mac`        : HMAC-SHA256 tags with constant-time verification
//! - `error`      : unified error type

pub mod aead;
pub mod agreement;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod mac;
pub mod safety;

pub use aead::Sealed;
pub use agreement::{derive_shared_secret, SharedSecret};
pub use error::CryptoError;
pub use identity::{IdentityKeyPair, PublicKeyBytes};
pub use kdf::{KdfParams, KeySchedule, PinKey};
pub use safety::SafetyNumber;

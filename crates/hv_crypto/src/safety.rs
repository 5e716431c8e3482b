//! Safety numbers: a 6-digit code both correspondents read aloud or compare
//! side by side to confirm they hold each other's real identity key.
//!
//! The two keys are sorted before hashing, so the code does not depend on
//! who computes it. Six decimal digits are a human aid, not a security
//! boundary; collisions are acceptable.

use serde::{Deserialize, Serialize};

use crate::identity::PublicKeyBytes;

pub const SAFETY_NUMBER_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SafetyNumber(String);

impl SafetyNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a stored code (e.g. read back from the database).
    pub fn parse(code: &str) -> Option<Self> {
        (code.len() == SAFETY_NUMBER_DIGITS && code.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self(code.to_string()))
    }
}

impl std::fmt::Display for SafetyNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn generate_safety_number(a: &PublicKeyBytes, b: &PublicKeyBytes) -> SafetyNumber {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"haven-safety-v1\x00");
    hasher.update(lo.as_bytes());
    hasher.update(hi.as_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    let value = u64::from_le_bytes(head) % 1_000_000;
    SafetyNumber(format!("{value:06}"))
}

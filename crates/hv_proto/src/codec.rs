//! Inner payload codec: what sits inside the AEAD ciphertext.
//!
//! # Body
//! Fixed header then the raw UTF-8 content, so the body never grows past
//! `BODY_HEADER_LEN + content.len()`:
//!
//! `[ kind: u8 | flags: u8 | ephemeral_seconds: u32 LE | content ]`
//!
//! # Padding
//! The body is padded to a size bucket before encryption so the transport
//! only ever sees a handful of ciphertext lengths.
//!
//! Format: [ body_len: u32 LE | body | random fill ]
//!
//! Buckets (bytes): 256, 1024, 4096, 16384, 65536. A body that does not fit
//! the largest bucket is sent unpadded, at most `MAX_PADDED_BYTES`.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Maximum plaintext content per message.
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;

const BODY_HEADER_LEN: usize = 6;
const FLAG_EPHEMERAL: u8 = 0b0000_0001;

/// Largest encoded payload: length prefix, header and maximum content.
pub const MAX_PADDED_BYTES: usize = 4 + BODY_HEADER_LEN + MAX_CONTENT_BYTES;

const BUCKET_SIZES: &[usize] = &[256, 1024, 4096, 16384, 65536];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }

    fn code(self) -> u8 {
        match self {
            MessageType::Text => 0,
            MessageType::Image => 1,
            MessageType::File => 2,
            MessageType::System => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MessageType::Text),
            1 => Some(MessageType::Image),
            2 => Some(MessageType::File),
            3 => Some(MessageType::System),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            "file" => Some(MessageType::File),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }
}

/// Decrypted message body plus the flags the recipient needs to store it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerPayload {
    pub content: String,
    pub message_type: MessageType,
    pub ephemeral_seconds: Option<u32>,
}

impl InnerPayload {
    /// Encode and pad. Rejects content above `MAX_CONTENT_BYTES`.
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        check_content_len(self.content.len())?;
        let mut body = Vec::with_capacity(BODY_HEADER_LEN + self.content.len());
        body.push(self.message_type.code());
        body.push(if self.ephemeral_seconds.is_some() { FLAG_EPHEMERAL } else { 0 });
        body.extend_from_slice(&self.ephemeral_seconds.unwrap_or(0).to_le_bytes());
        body.extend_from_slice(self.content.as_bytes());
        Ok(pad_to_bucket(&body))
    }

    pub fn decode(padded: &[u8]) -> Result<Self, ProtoError> {
        let body = unpad(padded)?;
        if body.len() < BODY_HEADER_LEN {
            return Err(ProtoError::Malformed("payload header"));
        }
        let (header, content) = body.split_at(BODY_HEADER_LEN);
        check_content_len(content.len())?;

        let message_type =
            MessageType::from_code(header[0]).ok_or(ProtoError::Malformed("message_type"))?;
        let flags = header[1];
        if flags & !FLAG_EPHEMERAL != 0 {
            return Err(ProtoError::Malformed("flags"));
        }
        let seconds = u32::from_le_bytes([header[2], header[3], header[4], header[5]]);
        let ephemeral_seconds = match (flags & FLAG_EPHEMERAL != 0, seconds) {
            (true, 0) => return Err(ProtoError::Malformed("ephemeral_seconds")),
            (true, s) => Some(s),
            (false, _) => None,
        };
        let content =
            String::from_utf8(content.to_vec()).map_err(|_| ProtoError::Malformed("content"))?;

        Ok(Self {
            content,
            message_type,
            ephemeral_seconds,
        })
    }
}

fn check_content_len(len: usize) -> Result<(), ProtoError> {
    if len > MAX_CONTENT_BYTES {
        return Err(ProtoError::TooLarge {
            size: len,
            limit: MAX_CONTENT_BYTES,
        });
    }
    Ok(())
}

/// Pad to the next bucket boundary (or not at all past the largest bucket).
pub fn pad_to_bucket(plaintext: &[u8]) -> Vec<u8> {
    let needed = 4 + plaintext.len();
    let target = BUCKET_SIZES
        .iter()
        .copied()
        .find(|&b| b >= needed)
        .unwrap_or(needed);

    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
    out.extend_from_slice(plaintext);
    // Random rather than zero fill so the padding does not compress away.
    let mut fill = vec![0u8; target - out.len()];
    OsRng.fill_bytes(&mut fill);
    out.extend_from_slice(&fill);
    out
}

pub fn unpad(padded: &[u8]) -> Result<&[u8], ProtoError> {
    let Some(prefix) = padded.get(..4) else {
        return Err(ProtoError::InvalidPadding("too short for length prefix".into()));
    };
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    padded.get(4..4 + len).ok_or_else(|| {
        ProtoError::InvalidPadding(format!(
            "length prefix {len} exceeds padded size {}",
            padded.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> InnerPayload {
        InnerPayload {
            content: content.to_string(),
            message_type: MessageType::Text,
            ephemeral_seconds: None,
        }
    }

    #[test]
    fn short_message_lands_in_smallest_bucket() {
        let encoded = text("hello").encode().unwrap();
        assert_eq!(encoded.len(), 256);
        assert_eq!(InnerPayload::decode(&encoded).unwrap(), text("hello"));
    }

    #[test]
    fn bucket_grows_with_payload() {
        let encoded = text(&"x".repeat(5000)).encode().unwrap();
        assert_eq!(encoded.len(), 16384);
    }

    #[test]
    fn content_cap_is_enforced() {
        let err = text(&"x".repeat(MAX_CONTENT_BYTES + 1)).encode().unwrap_err();
        assert!(matches!(err, ProtoError::TooLarge { .. }));
        // Exactly at the cap still encodes (unpadded past the top bucket).
        assert!(text(&"x".repeat(MAX_CONTENT_BYTES)).encode().is_ok());
    }

    #[test]
    fn zero_ephemeral_duration_is_rejected() {
        let mut body = vec![0u8, FLAG_EPHEMERAL];
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(b"gone");
        assert!(matches!(
            InnerPayload::decode(&pad_to_bucket(&body)),
            Err(ProtoError::Malformed("ephemeral_seconds"))
        ));
    }

    #[test]
    fn escape_heavy_content_does_not_grow() {
        let payload = text(&"\n\"\u{1}".repeat(MAX_CONTENT_BYTES / 3));
        let encoded = payload.encode().unwrap();
        assert!(encoded.len() <= MAX_PADDED_BYTES);
        assert_eq!(InnerPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn ephemeral_and_type_survive() {
        let payload = InnerPayload {
            content: "photo".into(),
            message_type: MessageType::Image,
            ephemeral_seconds: Some(90),
        };
        assert_eq!(InnerPayload::decode(&payload.encode().unwrap()).unwrap(), payload);
    }

    #[test]
    fn bad_header_bytes_are_malformed() {
        let mut body = vec![9u8, 0];
        body.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            InnerPayload::decode(&pad_to_bucket(&body)),
            Err(ProtoError::Malformed("message_type"))
        ));
        assert!(matches!(
            InnerPayload::decode(&pad_to_bucket(&[0, 0, 0])),
            Err(ProtoError::Malformed("payload header"))
        ));
        let mut body = vec![0u8, 0];
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&[0xff, 0xfe]);
        assert!(matches!(
            InnerPayload::decode(&pad_to_bucket(&body)),
            Err(ProtoError::Malformed("content"))
        ));
    }

    #[test]
    fn unpad_rejects_lying_prefix() {
        let mut padded = pad_to_bucket(b"abc");
        padded[..4].copy_from_slice(&10_000u32.to_le_bytes());
        assert!(unpad(&padded).is_err());
        assert!(unpad(&[1, 2]).is_err());
    }

    #[test]
    fn message_type_strings_roundtrip() {
        for t in [MessageType::Text, MessageType::Image, MessageType::File, MessageType::System] {
            assert_eq!(MessageType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MessageType::parse("video"), None);
    }
}

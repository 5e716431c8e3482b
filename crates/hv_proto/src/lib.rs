//! hv_proto - Wire types and serialisation for Haven
//!
//! Everything here is plain data plus (de)serialisation; keys are only
//! touched through `hv_crypto` newtypes. On-wire types are JSON with
//! base64url binary fields and carry a version byte.
//!
//! # Modules
//! - `wire`     : `EncryptedMessage`, what the transport carries
//! - `codec`    : inner plaintext payload, padding buckets, size caps
//! - `exchange` : signed contact bootstrap payload and route handles
//! - `error`    : unified error type

pub mod codec;
pub mod error;
pub mod exchange;
pub mod wire;

pub use codec::{InnerPayload, MessageType, MAX_CONTENT_BYTES, MAX_PADDED_BYTES};
pub use error::ProtoError;
pub use exchange::{ContactExchange, RouteHandle};
pub use wire::{EncryptedMessage, MAX_WIRE_BYTES, WIRE_VERSION};

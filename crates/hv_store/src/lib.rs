//! hv_store - Encrypted local storage for Haven
//!
//! - `db`       : SQLite store handle (one file per named instance), column
//!                encryption, key check, secure destruction
//! - `contacts` : contact queries on `Store`
//! - `messages` : message queries on `Store`
//! - `models`   : domain records and their invariants
//! - `vault`    : credential vault over a platform secret backend
//! - `error`    : store and vault error types

pub mod contacts;
pub mod db;
pub mod error;
pub mod messages;
pub mod models;
pub mod vault;

pub use db::{shred_database, Store, StoreKey, StoreName};
pub use error::{StoreError, VaultError};
pub use messages::InboundOutcome;
pub use models::{Contact, Message, MAX_TRUST_LEVEL};
pub use vault::{CredentialVault, KeyringBackend, MemoryBackend, SecretBackend, VaultSlot};

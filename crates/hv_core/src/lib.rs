//! hv_core - Haven security and messaging orchestration
//!
//! Components are built once by `Session::open` and share state through
//! explicit handles:
//!
//! - `security`  : PIN onboarding and classification, `AuthGrant`, vault wipe
//! - `duress`    : store activation, duress switching, decoy data, panic wipe
//! - `mode`      : `ModeState`, the (mode, active store) pair
//! - `identity`  : session identity keypair and DHT key
//! - `messaging` : send with retry, inbound authentication, ephemeral expiry
//! - `contacts`  : exchange payloads, safety numbers, trust levels
//! - `transport` : overlay network seam and the in-memory implementation
//! - `tasks`     : poll and sweep loops
//! - `config`    : `HavenSettings`

pub mod config;
pub mod contacts;
pub mod duress;
pub mod error;
pub mod identity;
pub mod messaging;
pub mod mode;
pub mod security;
pub mod session;
pub mod tasks;
pub mod transport;

pub use config::{DecoySettings, HavenSettings, KdfProfile, MessagingSettings, SecuritySettings};
pub use contacts::ContactManager;
pub use duress::{DuressController, WipeFailure, WipeReport};
pub use error::CoreError;
pub use identity::IdentityManager;
pub use messaging::{MessageEngine, MessageEvent, SendRequest};
pub use mode::{Mode, ModeState};
pub use security::{AuthGrant, PinClass, SecurityManager, SecurityPhase};
pub use session::Session;
pub use tasks::BackgroundTasks;
pub use transport::{ConnectionState, MemoryHub, MemoryTransport, Transport, TransportError};

//! Shared harness: peers on one in-memory hub, each with its own data dir
//! and in-memory vault, onboarded with PIN 1234 and duress PIN 9999.

#![allow(dead_code)]

use std::sync::Arc;

use hv_core::{HavenSettings, MemoryHub, MemoryTransport, Session, Transport};
use hv_store::{Contact, CredentialVault, MemoryBackend};
use tempfile::TempDir;

pub const PIN: &str = "1234";
pub const DURESS_PIN: &str = "9999";

pub struct Peer {
    pub session: Session,
    pub transport: Arc<MemoryTransport>,
    pub vault: CredentialVault,
    pub backend: Arc<MemoryBackend>,
    pub dir: TempDir,
}

/// Onboarded and unlocked into the real store, background loops stopped so
/// tests drive inbound delivery by hand.
pub async fn peer(hub: &Arc<MemoryHub>) -> Peer {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let vault = CredentialVault::new(backend.clone());
    let transport = Arc::new(MemoryTransport::connected(hub.clone()));

    let session = Session::open(
        dir.path(),
        HavenSettings::for_tests(),
        vault.clone(),
        transport.clone(),
    )
    .unwrap();
    session
        .security()
        .initialize_with_pin(PIN, Some(DURESS_PIN))
        .await
        .unwrap();
    session.unlock(PIN).await.unwrap();
    session.stop_tasks().await;

    Peer {
        session,
        transport,
        vault,
        backend,
        dir,
    }
}

/// Exchange payloads both ways. Returns (b as seen by a, a as seen by b).
pub async fn befriend(a: &Peer, b: &Peer) -> (Contact, Contact) {
    let ex_a = a.session.contacts().create_exchange("Alice").await.unwrap();
    let ex_b = b.session.contacts().create_exchange("Bob").await.unwrap();
    let b_in_a = a.session.contacts().add_from_exchange(&ex_b).await.unwrap();
    let a_in_b = b.session.contacts().add_from_exchange(&ex_a).await.unwrap();
    (b_in_a, a_in_b)
}

/// Drain `peer`'s inbox through `ingest`, returning how many were accepted.
pub async fn deliver(peer: &Peer) -> usize {
    let mut accepted = 0;
    for payload in peer.transport.poll_inbound().await.unwrap() {
        if peer.session.messages().ingest(&payload).await.unwrap().is_some() {
            accepted += 1;
        }
    }
    accepted
}

//! Store activation, duress switching, decoy population and panic wipe.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};

use hv_crypto::{kdf, safety::generate_safety_number, IdentityKeyPair};
use hv_proto::{MessageType, RouteHandle};
use hv_store::{models::now, shred_database, Contact, Message, Store, StoreName};

use crate::config::DecoySettings;
use crate::error::CoreError;
use crate::identity::IdentityManager;
use crate::mode::{Mode, ModeState};
use crate::security::{AuthGrant, SecurityManager};

const DECOY_NAMES: &[&str] = &["Mum", "Sam (work)", "Priya", "Dentist", "Jonas", "Book club"];
const DECOY_LINES: &[&str] = &[
    "Are we still on for Saturday?",
    "Running 10 minutes late, sorry",
    "Can you pick up milk on the way back?",
    "Thanks! See you then",
    "Did you see the match last night?",
    "Reminder: appointment moved to Thursday 3pm",
    "Sounds good to me",
    "Happy birthday!!",
];

// ── Wipe report ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeFailure {
    pub step: &'static str,
    pub error: String,
}

/// Outcome of a best-effort wipe: every step is attempted regardless of
/// earlier failures.
#[derive(Debug, Clone, Default)]
pub struct WipeReport {
    pub completed: Vec<&'static str>,
    pub failures: Vec<WipeFailure>,
}

impl WipeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record<T, E: std::fmt::Display>(
        &mut self,
        step: &'static str,
        result: Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(v) => {
                self.completed.push(step);
                Some(v)
            }
            Err(e) => {
                tracing::error!(event = "wipe_step_failed", step = step, error = %e);
                self.failures.push(WipeFailure {
                    step,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    pub(crate) fn merge(&mut self, other: WipeReport) {
        self.completed.extend(other.completed);
        self.failures.extend(other.failures);
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

pub struct DuressController {
    modes: Arc<ModeState>,
    security: Arc<SecurityManager>,
    identity: Arc<IdentityManager>,
    data_dir: PathBuf,
    decoy: DecoySettings,
}

impl DuressController {
    pub fn new(
        modes: Arc<ModeState>,
        security: Arc<SecurityManager>,
        identity: Arc<IdentityManager>,
        data_dir: PathBuf,
        decoy: DecoySettings,
    ) -> Self {
        Self {
            modes,
            security,
            identity,
            data_dir,
            decoy,
        }
    }

    /// Open the store the grant unlocks (if not open already) and select its
    /// mode.
    pub async fn enter(&self, grant: AuthGrant) -> Result<Mode, CoreError> {
        let _switch = self.modes.switch_lock().lock().await;
        let (name, key) = grant.into_parts();

        if self.modes.is_open(name) {
            self.modes.set_mode(Mode::for_store(name));
        } else {
            let store = Store::open_in(&self.data_dir, name, key).await?;
            if let Some(stale) = self.modes.install_and_select(store) {
                stale.close().await;
            }
        }
        self.expire_selected().await;
        // Never log the mode.
        tracing::info!(event = "session_unlocked");
        Ok(Mode::for_store(name))
    }

    pub async fn activate_duress_mode(&self) -> Result<(), CoreError> {
        self.switch_to(Mode::Duress).await
    }

    pub async fn deactivate_duress_mode(&self) -> Result<(), CoreError> {
        self.switch_to(Mode::Real).await
    }

    async fn switch_to(&self, mode: Mode) -> Result<(), CoreError> {
        let _switch = self.modes.switch_lock().lock().await;
        if !self.modes.is_open(mode.store_name()) {
            return Err(CoreError::state(format!("{} store is not open", mode.store_name())));
        }
        self.modes.set_mode(mode);
        self.expire_selected().await;
        Ok(())
    }

    /// Catch up on ephemeral expiry for the store that just became active.
    /// Sweeps never touch the inactive store, so it may have fallen behind.
    async fn expire_selected(&self) {
        let Ok(store) = self.modes.active_store() else {
            return;
        };
        match store.delete_expired(Utc::now()).await {
            Ok(ids) if !ids.is_empty() => {
                tracing::debug!(event = "ephemeral_catch_up", count = ids.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(event = "ephemeral_catch_up_failed", error = %e),
        }
    }

    /// Populate the decoy store with plausible contacts and messages. Ids are
    /// deterministic and rows are upserted, so repeated calls add nothing.
    /// Returns the number of rows written.
    pub async fn generate_decoy_data(&self) -> Result<usize, CoreError> {
        let _switch = self.modes.switch_lock().lock().await;
        let store = self
            .modes
            .store(StoreName::Decoy)
            .ok_or_else(|| CoreError::state("decoy store is not open"))?;

        let prior = self.modes.mode();
        if prior != Mode::Duress {
            self.modes.set_mode(Mode::Duress);
        }
        let result = self.populate_decoy(&store).await;
        if prior != Mode::Duress {
            self.modes.set_mode(prior);
        }

        let written = result?;
        tracing::debug!(event = "decoy_populated", rows = written);
        Ok(written)
    }

    async fn populate_decoy(&self, store: &Store) -> Result<usize, CoreError> {
        let me = match self.identity.public_key() {
            Some(pk) => pk,
            None => decoy_keypair(u64::MAX)?.public,
        };
        let me_b64 = me.to_b64();
        let base = now();
        let mut written = 0;

        for i in 0..self.decoy.contact_count {
            let them = decoy_keypair(i as u64)?.public;
            let them_b64 = them.to_b64();
            let contact_id = format!("decoy-contact-{i}");
            let created = base - Duration::days(30 + i as i64);

            let contact = Contact {
                id: contact_id.clone(),
                name: DECOY_NAMES[i % DECOY_NAMES.len()].to_string(),
                route: RouteHandle(them.as_bytes()[..16].to_vec()),
                public_key: them,
                safety_number: generate_safety_number(&me, &them),
                verified: i % 2 == 0,
                trust_level: if i % 2 == 0 { 2 } else { 1 },
                created_at: created,
                updated_at: created,
            };
            if store.insert_contact_if_absent(&contact).await? {
                written += 1;
            }

            for j in 0..self.decoy.messages_per_contact {
                let incoming = j % 2 == 0;
                let at = base - Duration::hours((i * 24 + (self.decoy.messages_per_contact - j)) as i64);
                let (sender_id, recipient_id) = if incoming {
                    (them_b64.clone(), me_b64.clone())
                } else {
                    (me_b64.clone(), them_b64.clone())
                };
                let message = Message {
                    id: format!("decoy-msg-{i}-{j}"),
                    contact_id: contact_id.clone(),
                    content: DECOY_LINES[(i + j) % DECOY_LINES.len()].to_string(),
                    sender_id,
                    recipient_id,
                    timestamp: at,
                    is_sent: !incoming,
                    is_delivered: incoming,
                    is_read: true,
                    is_ephemeral: false,
                    ephemeral_duration_seconds: None,
                    message_type: MessageType::Text,
                    created_at: at,
                };
                if store.insert_message_if_absent(&message).await? {
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    /// Emergency wipe. Forces Duress, destroys the real store, strips the
    /// vault to decoy material and forgets the identity. Never stops early.
    pub async fn panic_wipe(&self) -> WipeReport {
        let _switch = self.modes.switch_lock().lock().await;
        tracing::warn!(event = "panic_wipe_started");
        let mut report = WipeReport::default();

        let real = self.modes.force_duress_detach_real();
        report.completed.push("mode_forced_duress");

        match real {
            Some(store) => {
                report.record("real_store_destroyed", store.destroy().await);
            }
            None => {
                let path = self.data_dir.join(StoreName::Real.file_name());
                report.record("real_store_destroyed", shred_database(&path).await);
            }
        }

        report.merge(self.security.panic());

        self.identity.forget();
        report.completed.push("identity_forgotten");

        if !self.modes.is_duress() {
            self.modes.set_mode(Mode::Duress);
        }

        tracing::warn!(
            event = "panic_wipe_finished",
            steps = report.completed.len(),
            failures = report.failures.len()
        );
        report
    }

    /// Close every open store and forget the identity.
    pub async fn lock(&self) {
        let _switch = self.modes.switch_lock().lock().await;
        for store in self.modes.detach_all() {
            store.close().await;
        }
        self.identity.forget();
        tracing::info!(event = "session_locked");
    }
}

/// Deterministic synthetic identity for decoy contact `index`.
fn decoy_keypair(index: u64) -> Result<IdentityKeyPair, CoreError> {
    let mut seed = [0u8; 32];
    kdf::hkdf_expand(b"haven-decoy-contact", None, &index.to_le_bytes(), &mut seed)?;
    Ok(IdentityKeyPair::from_bytes(&seed)?)
}

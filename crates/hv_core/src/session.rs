//! Session: builds every component once and wires them together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use hv_store::CredentialVault;

use crate::config::HavenSettings;
use crate::contacts::ContactManager;
use crate::duress::{DuressController, WipeReport};
use crate::error::CoreError;
use crate::identity::IdentityManager;
use crate::messaging::MessageEngine;
use crate::mode::{Mode, ModeState};
use crate::security::SecurityManager;
use crate::tasks::BackgroundTasks;
use crate::transport::Transport;

pub struct Session {
    data_dir: PathBuf,
    settings: HavenSettings,
    modes: Arc<ModeState>,
    identity: Arc<IdentityManager>,
    security: Arc<SecurityManager>,
    duress: DuressController,
    messages: Arc<MessageEngine>,
    contacts: ContactManager,
    transport: Arc<dyn Transport>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl Session {
    pub fn open(
        data_dir: &Path,
        settings: HavenSettings,
        vault: CredentialVault,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        std::fs::create_dir_all(data_dir).map_err(|e| {
            CoreError::Settings(format!("create data dir {}: {e}", data_dir.display()))
        })?;

        let modes = Arc::new(ModeState::new());
        let identity = Arc::new(IdentityManager::new(vault.clone()));
        let security = Arc::new(SecurityManager::new(
            vault,
            settings.security.clone(),
            modes.clone(),
        ));
        let duress = DuressController::new(
            modes.clone(),
            security.clone(),
            identity.clone(),
            data_dir.to_path_buf(),
            settings.decoy.clone(),
        );
        let messages = Arc::new(MessageEngine::new(
            modes.clone(),
            identity.clone(),
            transport.clone(),
            settings.messaging.clone(),
        ));
        let contacts = ContactManager::new(modes.clone(), identity.clone(), transport.clone());

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            settings,
            modes,
            identity,
            security,
            duress,
            messages,
            contacts,
            transport,
            tasks: Mutex::new(None),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &HavenSettings {
        &self.settings
    }

    pub fn modes(&self) -> &Arc<ModeState> {
        &self.modes
    }

    pub fn identity(&self) -> &IdentityManager {
        &self.identity
    }

    pub fn security(&self) -> &SecurityManager {
        &self.security
    }

    pub fn duress(&self) -> &DuressController {
        &self.duress
    }

    pub fn messages(&self) -> &Arc<MessageEngine> {
        &self.messages
    }

    pub fn contacts(&self) -> &ContactManager {
        &self.contacts
    }

    /// Authenticate, open the matching store, load (or create) the identity
    /// and start the background loops.
    pub async fn unlock(&self, pin: &str) -> Result<Mode, CoreError> {
        let grant = self.security.authenticate(pin).await?;
        let mode = self.duress.enter(grant).await?;
        self.identity.load_or_create(self.transport.as_ref()).await?;
        self.start_tasks();
        Ok(mode)
    }

    pub fn start_tasks(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_none() {
            *tasks = Some(BackgroundTasks::spawn(
                self.messages.clone(),
                self.transport.clone(),
                &self.settings.messaging,
            ));
        }
    }

    pub async fn stop_tasks(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }
    }

    /// Stop background work, close stores and forget the identity.
    pub async fn lock(&self) {
        self.stop_tasks().await;
        self.duress.lock().await;
    }

    pub async fn panic(&self) -> WipeReport {
        self.duress.panic_wipe().await
    }

    pub async fn close(self) {
        self.lock().await;
    }
}

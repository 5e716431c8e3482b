//! Process-wide mode and the store it selects.
//!
//! The mode flag and the open store handles sit behind one `RwLock`, so a
//! reader always gets a (mode, store) pair that belonged together. The lock
//! is only held for in-memory swaps. Multi-step transitions (enter, duress
//! toggles, decoy generation, panic wipe) serialise on `switch_lock`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use hv_store::{Store, StoreName};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Real,
    Duress,
}

impl Mode {
    pub fn store_name(self) -> StoreName {
        match self {
            Mode::Real => StoreName::Real,
            Mode::Duress => StoreName::Decoy,
        }
    }

    pub fn for_store(name: StoreName) -> Self {
        match name {
            StoreName::Real => Mode::Real,
            StoreName::Decoy => Mode::Duress,
        }
    }
}

struct Slots {
    mode: Mode,
    real: Option<Store>,
    decoy: Option<Store>,
}

impl Slots {
    fn slot(&mut self, name: StoreName) -> &mut Option<Store> {
        match name {
            StoreName::Real => &mut self.real,
            StoreName::Decoy => &mut self.decoy,
        }
    }

    fn get(&self, name: StoreName) -> Option<&Store> {
        match name {
            StoreName::Real => self.real.as_ref(),
            StoreName::Decoy => self.decoy.as_ref(),
        }
    }
}

pub struct ModeState {
    slots: RwLock<Slots>,
    switch_lock: tokio::sync::Mutex<()>,
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeState {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                mode: Mode::Real,
                real: None,
                decoy: None,
            }),
            switch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.slots.read().mode
    }

    pub fn is_duress(&self) -> bool {
        self.mode() == Mode::Duress
    }

    pub fn is_open(&self, name: StoreName) -> bool {
        self.slots.read().get(name).is_some()
    }

    /// Snapshot of the store the current mode selects.
    pub fn active_store(&self) -> Result<Store, CoreError> {
        let slots = self.slots.read();
        slots
            .get(slots.mode.store_name())
            .cloned()
            .ok_or_else(|| CoreError::state("session is locked"))
    }

    pub(crate) fn switch_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.switch_lock
    }

    pub(crate) fn store(&self, name: StoreName) -> Option<Store> {
        self.slots.read().get(name).cloned()
    }

    /// Install `store` under its own name and select its mode in one step.
    /// Returns whatever handle it replaced.
    pub(crate) fn install_and_select(&self, store: Store) -> Option<Store> {
        let name = store.name();
        let mut slots = self.slots.write();
        let previous = slots.slot(name).replace(store);
        slots.mode = Mode::for_store(name);
        previous
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        self.slots.write().mode = mode;
    }

    /// Force `Duress` and take the real store out in one step.
    pub(crate) fn force_duress_detach_real(&self) -> Option<Store> {
        let mut slots = self.slots.write();
        slots.mode = Mode::Duress;
        slots.real.take()
    }

    /// Take every store out; the mode is left as it was.
    pub(crate) fn detach_all(&self) -> Vec<Store> {
        let mut slots = self.slots.write();
        [slots.real.take(), slots.decoy.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hv_store::StoreKey;

    #[test]
    fn mode_maps_to_store() {
        assert_eq!(Mode::Real.store_name(), StoreName::Real);
        assert_eq!(Mode::Duress.store_name(), StoreName::Decoy);
        assert_eq!(Mode::for_store(StoreName::Decoy), Mode::Duress);
    }

    #[tokio::test]
    async fn active_store_follows_mode() {
        let dir = tempfile::tempdir().unwrap();
        let state = ModeState::new();
        assert!(state.active_store().is_err());

        let real = Store::open_in(dir.path(), StoreName::Real, StoreKey::generate()).await.unwrap();
        let decoy = Store::open_in(dir.path(), StoreName::Decoy, StoreKey::generate()).await.unwrap();

        state.install_and_select(decoy);
        assert_eq!(state.mode(), Mode::Duress);
        state.install_and_select(real);
        assert_eq!(state.mode(), Mode::Real);
        assert_eq!(state.active_store().unwrap().name(), StoreName::Real);

        state.set_mode(Mode::Duress);
        assert_eq!(state.active_store().unwrap().name(), StoreName::Decoy);
        assert!(state.is_open(StoreName::Real));

        let detached = state.force_duress_detach_real().unwrap();
        assert_eq!(detached.name(), StoreName::Real);
        assert!(!state.is_open(StoreName::Real));
        assert!(state.is_duress());
    }
}

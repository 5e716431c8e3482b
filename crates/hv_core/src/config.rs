use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hv_crypto::KdfParams;

use crate::error::CoreError;

pub const SETTINGS_FILE: &str = "settings.json";

/// Argon2id cost profile. The concrete parameters are fixed constants and are
/// recorded in the vault at onboarding; later profile changes only affect new
/// installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KdfProfile {
    #[default]
    Interactive,
    Constrained,
}

impl KdfProfile {
    pub fn params(self) -> KdfParams {
        match self {
            KdfProfile::Interactive => KdfParams::INTERACTIVE,
            KdfProfile::Constrained => KdfParams::CONSTRAINED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub min_pin_length: usize,
    pub kdf_profile: KdfProfile,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            min_pin_length: 4,
            kdf_profile: KdfProfile::Interactive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    pub send_attempts: u32,
    pub retry_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub inbound_queue_capacity: usize,
}

impl MessagingSettings {
    /// Delay before retry number `attempt` (1-based): backoff doubles each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1u64 << shift))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            send_attempts: 3,
            retry_backoff_ms: 250,
            poll_interval_ms: 1_000,
            sweep_interval_ms: 30_000,
            inbound_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoySettings {
    pub contact_count: usize,
    pub messages_per_contact: usize,
}

impl Default for DecoySettings {
    fn default() -> Self {
        Self {
            contact_count: 3,
            messages_per_contact: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HavenSettings {
    pub security: SecuritySettings,
    pub messaging: MessagingSettings,
    pub decoy: DecoySettings,
}

impl HavenSettings {
    /// Load `settings.json` from `dir`; a missing file yields defaults.
    pub fn load(dir: &Path) -> Result<Self, CoreError> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)
            .map_err(|e| CoreError::Settings(format!("read {}: {e}", path.display())))?;
        let settings: Self = serde_json::from_str(&data)
            .map_err(|e| CoreError::Settings(format!("parse {}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, dir: &Path) -> Result<(), CoreError> {
        let path = dir.join(SETTINGS_FILE);
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Settings(e.to_string()))?;
        std::fs::write(&path, data)
            .map_err(|e| CoreError::Settings(format!("write {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.security.min_pin_length < 4 {
            return Err(CoreError::Settings("min_pin_length must be at least 4".into()));
        }
        if self.messaging.send_attempts == 0 {
            return Err(CoreError::Settings("send_attempts must be at least 1".into()));
        }
        if self.messaging.inbound_queue_capacity == 0 {
            return Err(CoreError::Settings("inbound_queue_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Fast Argon2 and short timers for tests.
    pub fn for_tests() -> Self {
        Self {
            security: SecuritySettings {
                min_pin_length: 4,
                kdf_profile: KdfProfile::Constrained,
            },
            messaging: MessagingSettings {
                send_attempts: 3,
                retry_backoff_ms: 5,
                poll_interval_ms: 20,
                sweep_interval_ms: 20,
                inbound_queue_capacity: 16,
            },
            decoy: DecoySettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = HavenSettings::default();
        assert_eq!(s.security.min_pin_length, 4);
        assert_eq!(s.security.kdf_profile.params(), KdfParams::INTERACTIVE);
        assert_eq!(s.messaging.send_attempts, 3);
        assert_eq!(s.messaging.retry_backoff_ms, 250);
    }

    #[test]
    fn backoff_doubles() {
        let m = MessagingSettings::default();
        assert_eq!(m.backoff_for(1), Duration::from_millis(250));
        assert_eq!(m.backoff_for(2), Duration::from_millis(500));
        assert_eq!(m.backoff_for(3), Duration::from_millis(1000));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{ "messaging": { "send_attempts": 5 } }"#,
        )
        .unwrap();

        let s = HavenSettings::load(dir.path()).unwrap();
        assert_eq!(s.messaging.send_attempts, 5);
        assert_eq!(s.messaging.retry_backoff_ms, 250);
        assert_eq!(s.security.min_pin_length, 4);
    }

    #[test]
    fn missing_file_is_default_and_bad_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(HavenSettings::load(dir.path()).unwrap().messaging.send_attempts, 3);

        let mut s = HavenSettings::default();
        s.security.min_pin_length = 2;
        s.save(dir.path()).unwrap();
        assert!(matches!(
            HavenSettings::load(dir.path()),
            Err(CoreError::Settings(_))
        ));
    }
}

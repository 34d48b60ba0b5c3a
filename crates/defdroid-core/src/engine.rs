//! Defense-engine configuration endpoint.
//!
//! The guardians themselves live outside this crate. They are configured
//! through a [`DefenseEngine`]: read one [`DefenseSettings`] snapshot, write
//! one typed [`SettingUpdate`] at a time. [`GlobalSettingsEngine`] stores
//! those fields as `defense_*` keys in a [`GlobalSettings`] table, which is
//! how the platform side persists them too.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{GlobalSettings, StoreError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("settings store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine rejected update: {0}")]
    Rejected(String),
}

/// A resource guardian that can be enabled and tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Guardian {
    Wakelock,
    Location,
    Alarm,
    Sensor,
    Network,
    Storage,
    Notification,
    Cpu,
    Bluetooth,
}

impl Guardian {
    pub const ALL: [Guardian; 9] = [
        Guardian::Wakelock,
        Guardian::Location,
        Guardian::Alarm,
        Guardian::Sensor,
        Guardian::Network,
        Guardian::Storage,
        Guardian::Notification,
        Guardian::Cpu,
        Guardian::Bluetooth,
    ];

    /// Lowercase identifier used in storage keys.
    pub fn name(self) -> &'static str {
        match self {
            Self::Wakelock => "wakelock",
            Self::Location => "location",
            Self::Alarm => "alarm",
            Self::Sensor => "sensor",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Notification => "notification",
            Self::Cpu => "cpu",
            Self::Bluetooth => "bluetooth",
        }
    }
}

/// Tuning of a single guardian. Fields a guardian has no knob for keep
/// their defaults and are never shown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardianSettings {
    pub enabled: bool,
    pub checker_frequency_ms: i64,
    pub duration_throttle_ms: i64,
    pub rate_limit: f32,
}

impl Default for GuardianSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            checker_frequency_ms: 5 * MILLIS_PER_MINUTE,
            duration_throttle_ms: 10 * MILLIS_PER_MINUTE,
            rate_limit: 60.0,
        }
    }
}

pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;
pub const BYTES_PER_MB: i64 = 1024 * 1024;

/// Snapshot of everything the engine can be configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefenseSettings {
    pub service_enabled: bool,
    /// Serialized whitelist (see [`crate::whitelist::encode_whitelist`]).
    pub white_list: String,
    pub rate_limit_window_ms: i64,
    pub gc_window_ms: i64,
    pub wakelock: GuardianSettings,
    pub location: GuardianSettings,
    pub alarm: GuardianSettings,
    pub sensor: GuardianSettings,
    pub network: GuardianSettings,
    pub storage: GuardianSettings,
    pub notification: GuardianSettings,
    pub cpu: GuardianSettings,
    pub bluetooth: GuardianSettings,
    pub network_data_limit_bytes: i64,
    pub network_max_badness: i32,
}

impl Default for DefenseSettings {
    fn default() -> Self {
        Self {
            service_enabled: true,
            white_list: String::new(),
            rate_limit_window_ms: 60 * MILLIS_PER_MINUTE,
            gc_window_ms: 30 * MILLIS_PER_MINUTE,
            wakelock: GuardianSettings::default(),
            location: GuardianSettings::default(),
            alarm: GuardianSettings::default(),
            sensor: GuardianSettings::default(),
            network: GuardianSettings::default(),
            storage: GuardianSettings::default(),
            notification: GuardianSettings::default(),
            cpu: GuardianSettings::default(),
            bluetooth: GuardianSettings::default(),
            network_data_limit_bytes: 50 * BYTES_PER_MB,
            network_max_badness: 10,
        }
    }
}

impl DefenseSettings {
    pub fn guardian(&self, guardian: Guardian) -> &GuardianSettings {
        match guardian {
            Guardian::Wakelock => &self.wakelock,
            Guardian::Location => &self.location,
            Guardian::Alarm => &self.alarm,
            Guardian::Sensor => &self.sensor,
            Guardian::Network => &self.network,
            Guardian::Storage => &self.storage,
            Guardian::Notification => &self.notification,
            Guardian::Cpu => &self.cpu,
            Guardian::Bluetooth => &self.bluetooth,
        }
    }

    pub fn guardian_mut(&mut self, guardian: Guardian) -> &mut GuardianSettings {
        match guardian {
            Guardian::Wakelock => &mut self.wakelock,
            Guardian::Location => &mut self.location,
            Guardian::Alarm => &mut self.alarm,
            Guardian::Sensor => &mut self.sensor,
            Guardian::Network => &mut self.network,
            Guardian::Storage => &mut self.storage,
            Guardian::Notification => &mut self.notification,
            Guardian::Cpu => &mut self.cpu,
            Guardian::Bluetooth => &mut self.bluetooth,
        }
    }

    pub fn apply(&mut self, update: &SettingUpdate) {
        match update {
            SettingUpdate::ServiceEnabled(v) => self.service_enabled = *v,
            SettingUpdate::WhiteList(v) => self.white_list = v.clone(),
            SettingUpdate::RateLimitWindow(ms) => self.rate_limit_window_ms = *ms,
            SettingUpdate::GcWindow(ms) => self.gc_window_ms = *ms,
            SettingUpdate::GuardianEnabled(g, v) => self.guardian_mut(*g).enabled = *v,
            SettingUpdate::CheckerFrequency(g, ms) => {
                self.guardian_mut(*g).checker_frequency_ms = *ms
            }
            SettingUpdate::DurationThrottle(g, ms) => {
                self.guardian_mut(*g).duration_throttle_ms = *ms
            }
            SettingUpdate::RateLimit(g, v) => self.guardian_mut(*g).rate_limit = *v,
            SettingUpdate::NetworkDataLimit(bytes) => self.network_data_limit_bytes = *bytes,
            SettingUpdate::NetworkMaxBadness(v) => self.network_max_badness = *v,
        }
    }
}

/// One field write to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingUpdate {
    ServiceEnabled(bool),
    WhiteList(String),
    RateLimitWindow(i64),
    GcWindow(i64),
    GuardianEnabled(Guardian, bool),
    CheckerFrequency(Guardian, i64),
    DurationThrottle(Guardian, i64),
    RateLimit(Guardian, f32),
    NetworkDataLimit(i64),
    NetworkMaxBadness(i32),
}

impl SettingUpdate {
    /// Storage key written by [`GlobalSettingsEngine`].
    pub fn storage_key(&self) -> String {
        match self {
            Self::ServiceEnabled(_) => "defense_service_enabled".to_string(),
            Self::WhiteList(_) => "defense_whitelist".to_string(),
            Self::RateLimitWindow(_) => "defense_rate_limit_window".to_string(),
            Self::GcWindow(_) => "defense_gc_window".to_string(),
            Self::GuardianEnabled(g, _) => format!("defense_{}_enabled", g.name()),
            Self::CheckerFrequency(g, _) => format!("defense_{}_checker_frequency", g.name()),
            Self::DurationThrottle(g, _) => format!("defense_{}_duration_throttle", g.name()),
            Self::RateLimit(g, _) => format!("defense_{}_rate_limit", g.name()),
            Self::NetworkDataLimit(_) => "defense_network_data_limit".to_string(),
            Self::NetworkMaxBadness(_) => "defense_network_max_badness".to_string(),
        }
    }

    fn storage_value(&self) -> String {
        match self {
            Self::ServiceEnabled(v) | Self::GuardianEnabled(_, v) => v.to_string(),
            Self::WhiteList(v) => v.clone(),
            Self::RateLimitWindow(v)
            | Self::GcWindow(v)
            | Self::CheckerFrequency(_, v)
            | Self::DurationThrottle(_, v)
            | Self::NetworkDataLimit(v) => v.to_string(),
            Self::RateLimit(_, v) => v.to_string(),
            Self::NetworkMaxBadness(v) => v.to_string(),
        }
    }
}

/// Configuration endpoint of the defense engine.
pub trait DefenseEngine: Send + Sync {
    fn read_settings(&self) -> Result<DefenseSettings, EngineError>;

    fn write(&self, update: &SettingUpdate) -> Result<(), EngineError>;

    /// Hand the engine a serialized whitelist.
    fn write_white_list(&self, serialized: &str) -> Result<(), EngineError> {
        self.write(&SettingUpdate::WhiteList(serialized.to_string()))
    }
}

impl<T: DefenseEngine + ?Sized> DefenseEngine for std::sync::Arc<T> {
    fn read_settings(&self) -> Result<DefenseSettings, EngineError> {
        (**self).read_settings()
    }

    fn write(&self, update: &SettingUpdate) -> Result<(), EngineError> {
        (**self).write(update)
    }
}

/// [`DefenseEngine`] persisted as `defense_*` keys of a [`GlobalSettings`]
/// table. Missing or unparsable keys read back as defaults.
pub struct GlobalSettingsEngine<G> {
    settings: G,
}

impl<G: GlobalSettings> GlobalSettingsEngine<G> {
    pub fn new(settings: G) -> Self {
        Self { settings }
    }

    pub fn into_inner(self) -> G {
        self.settings
    }

    fn read_parsed<T: std::str::FromStr>(&self, key: &str, into: &mut T) -> Result<(), StoreError> {
        if let Some(raw) = self.settings.get_string(key)? {
            match raw.parse() {
                Ok(v) => *into = v,
                Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable defense setting"),
            }
        }
        Ok(())
    }
}

impl<G: GlobalSettings> DefenseEngine for GlobalSettingsEngine<G> {
    fn read_settings(&self) -> Result<DefenseSettings, EngineError> {
        let mut s = DefenseSettings::default();
        self.read_parsed("defense_service_enabled", &mut s.service_enabled)?;
        if let Some(list) = self.settings.get_string("defense_whitelist")? {
            s.white_list = list;
        }
        self.read_parsed("defense_rate_limit_window", &mut s.rate_limit_window_ms)?;
        self.read_parsed("defense_gc_window", &mut s.gc_window_ms)?;
        for g in Guardian::ALL {
            let name = g.name();
            let slot = s.guardian_mut(g);
            self.read_parsed(&format!("defense_{name}_enabled"), &mut slot.enabled)?;
            self.read_parsed(
                &format!("defense_{name}_checker_frequency"),
                &mut slot.checker_frequency_ms,
            )?;
            self.read_parsed(
                &format!("defense_{name}_duration_throttle"),
                &mut slot.duration_throttle_ms,
            )?;
            self.read_parsed(&format!("defense_{name}_rate_limit"), &mut slot.rate_limit)?;
        }
        self.read_parsed("defense_network_data_limit", &mut s.network_data_limit_bytes)?;
        self.read_parsed("defense_network_max_badness", &mut s.network_max_badness)?;
        Ok(s)
    }

    fn write(&self, update: &SettingUpdate) -> Result<(), EngineError> {
        let key = update.storage_key();
        tracing::trace!(key = %key, "writing defense setting");
        self.settings.put_string(&key, &update.storage_value())?;
        Ok(())
    }
}

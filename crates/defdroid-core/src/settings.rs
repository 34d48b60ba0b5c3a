//! DefDroid settings screen.
//!
//! Every preference on the screen is a [`SettingKey`]. Its [`SettingKind`]
//! decides how the widget value is parsed, which [`SettingUpdate`] is sent
//! to the engine, and how the summary line reads.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::CoreError;
use crate::engine::{
    BYTES_PER_MB, DefenseEngine, DefenseSettings, Guardian, MILLIS_PER_MINUTE, SettingUpdate,
};
use crate::store::WhitelistStore;
use crate::whitelist::decode_whitelist;

/// Summaries longer than this are cut and suffixed with `...`.
pub const MAX_SUMMARY_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unknown setting key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// A preference on the settings screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    ServiceEnabled,
    RateLimitWindow,
    GcWindow,
    GuardianEnabled(Guardian),
    CheckerFrequency(Guardian),
    DurationCutoff(Guardian),
    RateLimit(Guardian),
    NetworkDataLimit,
    NetworkMaxBadness,
}

/// How a preference's value is edited and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    /// Checkbox.
    Toggle,
    /// List of minute choices, stored in milliseconds.
    Frequency,
    /// Free-form minutes, stored in milliseconds.
    DurationCutoff,
    /// Free-form float.
    RateLimit,
    /// Free-form megabytes, stored in bytes.
    DataLimit,
    /// Free-form integer.
    Integer,
}

impl SettingKey {
    /// Every preference, in screen order.
    pub const ALL: [SettingKey; 25] = [
        SettingKey::ServiceEnabled,
        SettingKey::RateLimitWindow,
        SettingKey::GcWindow,
        SettingKey::GuardianEnabled(Guardian::Wakelock),
        SettingKey::GuardianEnabled(Guardian::Location),
        SettingKey::GuardianEnabled(Guardian::Alarm),
        SettingKey::GuardianEnabled(Guardian::Sensor),
        SettingKey::GuardianEnabled(Guardian::Network),
        SettingKey::GuardianEnabled(Guardian::Storage),
        SettingKey::GuardianEnabled(Guardian::Notification),
        SettingKey::GuardianEnabled(Guardian::Cpu),
        SettingKey::GuardianEnabled(Guardian::Bluetooth),
        SettingKey::CheckerFrequency(Guardian::Wakelock),
        SettingKey::DurationCutoff(Guardian::Wakelock),
        SettingKey::RateLimit(Guardian::Wakelock),
        SettingKey::CheckerFrequency(Guardian::Location),
        SettingKey::DurationCutoff(Guardian::Location),
        SettingKey::RateLimit(Guardian::Location),
        SettingKey::CheckerFrequency(Guardian::Alarm),
        SettingKey::RateLimit(Guardian::Alarm),
        SettingKey::CheckerFrequency(Guardian::Sensor),
        SettingKey::RateLimit(Guardian::Sensor),
        SettingKey::CheckerFrequency(Guardian::Network),
        SettingKey::NetworkDataLimit,
        SettingKey::NetworkMaxBadness,
    ];

    pub fn kind(self) -> SettingKind {
        match self {
            Self::ServiceEnabled | Self::GuardianEnabled(_) => SettingKind::Toggle,
            Self::RateLimitWindow | Self::GcWindow | Self::CheckerFrequency(_) => {
                SettingKind::Frequency
            }
            Self::DurationCutoff(_) => SettingKind::DurationCutoff,
            Self::RateLimit(_) => SettingKind::RateLimit,
            Self::NetworkDataLimit => SettingKind::DataLimit,
            Self::NetworkMaxBadness => SettingKind::Integer,
        }
    }

    /// Preference key as used by the screen's layout.
    pub fn as_key(self) -> String {
        match self {
            Self::ServiceEnabled => "defense_mode".to_string(),
            Self::RateLimitWindow => "rate_limit_window".to_string(),
            Self::GcWindow => "gc_window".to_string(),
            Self::GuardianEnabled(g) => format!("enable_{}_guardian", pref_prefix(g)),
            Self::CheckerFrequency(g) => format!("{}_checker_frequency", pref_prefix(g)),
            Self::DurationCutoff(g) => format!("{}_duration_cutoff", pref_prefix(g)),
            Self::RateLimit(g) => format!("{}_rate_limit", pref_prefix(g)),
            Self::NetworkDataLimit => "network_data_limit".to_string(),
            Self::NetworkMaxBadness => "network_max_badness".to_string(),
        }
    }
}

/// The location guardian's preferences are keyed `gps_*`.
fn pref_prefix(guardian: Guardian) -> &'static str {
    match guardian {
        Guardian::Location => "gps",
        g => g.name(),
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_key() == s)
            .ok_or_else(|| SettingsError::UnknownKey(s.to_string()))
    }
}

/// A widget value: checkbox state or entered/selected text.
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceValue {
    Bool(bool),
    Text(String),
}

impl PreferenceValue {
    fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Text(t) => t.clone(),
        }
    }
}

/// One list choice: stored value (minutes) and display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyChoice {
    pub value: String,
    pub label: String,
}

impl FrequencyChoice {
    pub fn new(value: &str, label: &str) -> Self {
        Self {
            value: value.to_string(),
            label: label.to_string(),
        }
    }
}

/// Display strings of the screen.
#[derive(Debug, Clone)]
pub struct SettingsLabels {
    pub duration_cutoff_unit: String,
    pub rate_limit_unit: String,
    pub data_unit: String,
    pub frequency_choices: Vec<FrequencyChoice>,
}

impl Default for SettingsLabels {
    fn default() -> Self {
        Self {
            duration_cutoff_unit: "min".to_string(),
            rate_limit_unit: "per window".to_string(),
            data_unit: "MB".to_string(),
            frequency_choices: vec![
                FrequencyChoice::new("0.5", "30 seconds"),
                FrequencyChoice::new("1", "1 minute"),
                FrequencyChoice::new("2", "2 minutes"),
                FrequencyChoice::new("5", "5 minutes"),
                FrequencyChoice::new("10", "10 minutes"),
                FrequencyChoice::new("15", "15 minutes"),
                FrequencyChoice::new("30", "30 minutes"),
                FrequencyChoice::new("60", "1 hour"),
                FrequencyChoice::new("120", "2 hours"),
                FrequencyChoice::new("360", "6 hours"),
                FrequencyChoice::new("1440", "1 day"),
            ],
        }
    }
}

impl SettingsLabels {
    fn choice_label(&self, value: &str) -> Option<&str> {
        self.frequency_choices
            .iter()
            .find(|c| c.value == value)
            .map(|c| c.label.as_str())
    }
}

/// Render `value` with at most two decimals, trailing zeros trimmed.
pub fn format_decimal(value: f64) -> String {
    let s = format!("{value:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_string() } else { s.to_string() }
}

fn millis_to_minutes(ms: i64) -> String {
    format_decimal(ms as f64 / MILLIS_PER_MINUTE as f64)
}

fn bytes_to_mb(bytes: i64) -> String {
    format_decimal(bytes as f64 / BYTES_PER_MB as f64)
}

/// Cut `summary` to [`MAX_SUMMARY_LEN`] characters plus `...`.
pub fn truncate_summary(summary: &str) -> String {
    if summary.chars().count() > MAX_SUMMARY_LEN {
        let head: String = summary.chars().take(MAX_SUMMARY_LEN).collect();
        format!("{head}...")
    } else {
        summary.to_string()
    }
}

/// Parse a widget value into the engine update for `key`.
pub fn parse_change(key: SettingKey, value: &PreferenceValue) -> Result<SettingUpdate, SettingsError> {
    let invalid = || SettingsError::InvalidValue {
        key: key.as_key(),
        value: value.as_text(),
    };

    let text = value.as_text();
    let scaled = |factor: i64| -> Result<i64, SettingsError> {
        let v: f64 = text.trim().parse().map_err(|_| invalid())?;
        let scaled = v * factor as f64;
        if !v.is_finite() || v < 0.0 || scaled >= i64::MAX as f64 {
            return Err(invalid());
        }
        Ok(scaled as i64)
    };

    let update = match key {
        SettingKey::ServiceEnabled | SettingKey::GuardianEnabled(_) => {
            let on = match value {
                PreferenceValue::Bool(b) => *b,
                PreferenceValue::Text(t) => t.trim().parse().map_err(|_| invalid())?,
            };
            match key {
                SettingKey::GuardianEnabled(g) => SettingUpdate::GuardianEnabled(g, on),
                _ => SettingUpdate::ServiceEnabled(on),
            }
        }
        SettingKey::RateLimitWindow => SettingUpdate::RateLimitWindow(scaled(MILLIS_PER_MINUTE)?),
        SettingKey::GcWindow => SettingUpdate::GcWindow(scaled(MILLIS_PER_MINUTE)?),
        SettingKey::CheckerFrequency(g) => {
            SettingUpdate::CheckerFrequency(g, scaled(MILLIS_PER_MINUTE)?)
        }
        SettingKey::DurationCutoff(g) => {
            SettingUpdate::DurationThrottle(g, scaled(MILLIS_PER_MINUTE)?)
        }
        SettingKey::RateLimit(g) => {
            let v: f32 = text.trim().parse().map_err(|_| invalid())?;
            if !v.is_finite() || v < 0.0 {
                return Err(invalid());
            }
            SettingUpdate::RateLimit(g, v)
        }
        SettingKey::NetworkDataLimit => SettingUpdate::NetworkDataLimit(scaled(BYTES_PER_MB)?),
        SettingKey::NetworkMaxBadness => {
            let v: i32 = text.trim().parse().map_err(|_| invalid())?;
            if v < 0 {
                return Err(invalid());
            }
            SettingUpdate::NetworkMaxBadness(v)
        }
    };
    Ok(update)
}

/// Widget value of `key` in an engine snapshot.
pub fn current_value(settings: &DefenseSettings, key: SettingKey) -> PreferenceValue {
    match key {
        SettingKey::ServiceEnabled => PreferenceValue::Bool(settings.service_enabled),
        SettingKey::GuardianEnabled(g) => PreferenceValue::Bool(settings.guardian(g).enabled),
        SettingKey::RateLimitWindow => {
            PreferenceValue::Text(millis_to_minutes(settings.rate_limit_window_ms))
        }
        SettingKey::GcWindow => PreferenceValue::Text(millis_to_minutes(settings.gc_window_ms)),
        SettingKey::CheckerFrequency(g) => {
            PreferenceValue::Text(millis_to_minutes(settings.guardian(g).checker_frequency_ms))
        }
        SettingKey::DurationCutoff(g) => {
            PreferenceValue::Text(millis_to_minutes(settings.guardian(g).duration_throttle_ms))
        }
        SettingKey::RateLimit(g) => {
            PreferenceValue::Text(format_decimal(settings.guardian(g).rate_limit as f64))
        }
        SettingKey::NetworkDataLimit => {
            PreferenceValue::Text(bytes_to_mb(settings.network_data_limit_bytes))
        }
        SettingKey::NetworkMaxBadness => {
            PreferenceValue::Text(settings.network_max_badness.to_string())
        }
    }
}

/// Displayed state of one preference.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceState {
    pub key: SettingKey,
    /// `None` for a list whose stored value matches none of its choices.
    pub value: Option<PreferenceValue>,
    pub summary: Option<String>,
}

/// The settings screen: mirrors engine settings into widgets and sends
/// widget edits back, one field per change.
pub struct SettingsScreen<E, W> {
    engine: E,
    whitelist_store: W,
    labels: SettingsLabels,
    states: Vec<PreferenceState>,
}

impl<E: DefenseEngine, W: WhitelistStore> SettingsScreen<E, W> {
    pub fn new(engine: E, whitelist_store: W) -> Self {
        Self::with_labels(engine, whitelist_store, SettingsLabels::default())
    }

    pub fn with_labels(engine: E, whitelist_store: W, labels: SettingsLabels) -> Self {
        let states = SettingKey::ALL
            .into_iter()
            .map(|key| PreferenceState {
                key,
                value: None,
                summary: None,
            })
            .collect();
        Self {
            engine,
            whitelist_store,
            labels,
            states,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn preferences(&self) -> &[PreferenceState] {
        &self.states
    }

    pub fn preference(&self, key: SettingKey) -> Option<&PreferenceState> {
        self.states.iter().find(|s| s.key == key)
    }

    /// Pull the engine snapshot into every widget and copy the engine's
    /// whitelist into the local whitelist store.
    pub fn sync(&mut self) -> Result<&[PreferenceState], CoreError> {
        let settings = self.engine.read_settings()?;
        self.whitelist_store
            .write_whitelist(&decode_whitelist(&settings.white_list))?;

        for state in &mut self.states {
            let value = current_value(&settings, state.key);
            let (value, summary) = widget_state(&self.labels, state.key, value);
            state.value = value;
            state.summary = summary;
        }
        tracing::debug!("settings synced with engine");
        Ok(&self.states)
    }

    /// Handle an edit of preference `key`. Returns `Ok(false)` for a key the
    /// screen does not know.
    pub fn on_preference_change(
        &mut self,
        key: &str,
        value: PreferenceValue,
    ) -> Result<bool, CoreError> {
        let Ok(setting) = key.parse::<SettingKey>() else {
            tracing::debug!(key, "unrecognized preference change");
            return Ok(false);
        };
        tracing::debug!(key, value = ?value, "preference changed");

        let update = parse_change(setting, &value)?;
        let (value, summary) = widget_state(&self.labels, setting, value);
        if let Some(state) = self.states.iter_mut().find(|s| s.key == setting) {
            state.value = value;
            state.summary = summary;
        }
        self.engine.write(&update)?;
        Ok(true)
    }
}

fn widget_state(
    labels: &SettingsLabels,
    key: SettingKey,
    value: PreferenceValue,
) -> (Option<PreferenceValue>, Option<String>) {
    let text = value.as_text();
    let text = text.trim();
    match key.kind() {
        SettingKind::Toggle => (Some(value), None),
        SettingKind::Frequency => match labels.choice_label(text) {
            Some(label) => (Some(value.clone()), Some(label.to_string())),
            None => (None, None),
        },
        SettingKind::DurationCutoff => {
            let summary = truncate_summary(&format!("{text} {}", labels.duration_cutoff_unit));
            (Some(value), Some(summary))
        }
        SettingKind::RateLimit => {
            let summary = truncate_summary(&format!("{text} {}", labels.rate_limit_unit));
            (Some(value), Some(summary))
        }
        SettingKind::DataLimit => {
            let summary = truncate_summary(&format!("{text} {}", labels.data_unit));
            (Some(value), Some(summary))
        }
        SettingKind::Integer => {
            let summary = truncate_summary(text);
            (Some(value), Some(summary))
        }
    }
}

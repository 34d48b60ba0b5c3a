//! Demographic survey screen. Answers are written straight to global
//! settings under `phonelab_*` keys.

use std::fmt;
use std::str::FromStr;

use crate::CoreError;
use crate::settings::{PreferenceValue, SettingsError};
use crate::store::GlobalSettings;

/// Stored and displayed in place of a blank list answer.
pub const UNKNOWN_ANSWER: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurveyKey {
    Age,
    Gender,
    HaveLaptop,
    HaveDesktop,
    HaveAnotherPhone,
}

impl SurveyKey {
    pub const ALL: [SurveyKey; 5] = [
        SurveyKey::Age,
        SurveyKey::Gender,
        SurveyKey::HaveLaptop,
        SurveyKey::HaveDesktop,
        SurveyKey::HaveAnotherPhone,
    ];

    /// Preference key on the survey screen.
    pub fn as_key(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Gender => "gender",
            Self::HaveLaptop => "have_laptop",
            Self::HaveDesktop => "have_desktop",
            Self::HaveAnotherPhone => "have_another_phone",
        }
    }

    /// Global-settings key the answer is written to.
    pub fn global_key(self) -> &'static str {
        match self {
            Self::Age => "phonelab_age",
            Self::Gender => "phonelab_gender",
            Self::HaveLaptop => "phonelab_laptop",
            Self::HaveDesktop => "phonelab_desktop",
            Self::HaveAnotherPhone => "phonelab_another_phone",
        }
    }

    /// List answers (age, gender) as opposed to checkboxes.
    pub fn is_list(self) -> bool {
        matches!(self, Self::Age | Self::Gender)
    }
}

impl fmt::Display for SurveyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for SurveyKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_key() == s)
            .ok_or_else(|| SettingsError::UnknownKey(s.to_string()))
    }
}

/// Current age and gender summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveySummary {
    pub age: String,
    pub gender: String,
}

fn list_answer(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        UNKNOWN_ANSWER.to_string()
    } else {
        raw.to_string()
    }
}

pub struct SurveyScreen<G> {
    settings: G,
}

impl<G: GlobalSettings> SurveyScreen<G> {
    pub fn new(settings: G) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &G {
        &self.settings
    }

    /// Persist an answer. Returns `Ok(false)` only for a key the survey does
    /// not have.
    pub fn on_preference_change(
        &self,
        key: &str,
        value: PreferenceValue,
    ) -> Result<bool, CoreError> {
        let Ok(survey_key) = key.parse::<SurveyKey>() else {
            tracing::debug!(key, "unrecognized survey key");
            return Ok(false);
        };

        let stored = if survey_key.is_list() {
            match value {
                PreferenceValue::Text(t) => list_answer(&t),
                PreferenceValue::Bool(b) => b.to_string(),
            }
        } else {
            match value {
                PreferenceValue::Bool(b) => b.to_string(),
                PreferenceValue::Text(t) => {
                    let b: bool = t.trim().parse().map_err(|_| SettingsError::InvalidValue {
                        key: key.to_string(),
                        value: t.clone(),
                    })?;
                    b.to_string()
                }
            }
        };

        tracing::debug!(key = survey_key.global_key(), value = %stored, "survey answer");
        self.settings.put_string(survey_key.global_key(), &stored)?;
        Ok(true)
    }

    /// Stored answer for a checkbox, `false` when unanswered.
    pub fn checked(&self, key: SurveyKey) -> Result<bool, CoreError> {
        Ok(self
            .settings
            .get_string(key.global_key())?
            .is_some_and(|v| v == "true"))
    }

    pub fn update_state(&self) -> Result<SurveySummary, CoreError> {
        let read = |key: SurveyKey| -> Result<String, CoreError> {
            Ok(list_answer(
                &self.settings.get_string(key.global_key())?.unwrap_or_default(),
            ))
        };
        Ok(SurveySummary {
            age: read(SurveyKey::Age)?,
            gender: read(SurveyKey::Gender)?,
        })
    }
}

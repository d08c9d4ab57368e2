use crate::errors::{AppError, AppResult};
use crate::models::{DataSourceInstanceSettings, DataSourceSettings};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const API_KEY_FIELD: &str = "apiKey";

/// Where the credential stands within one editing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretState {
    Unset,
    PendingValue,
    Saved,
}

/// The only credential view an editing surface receives. A stored key is
/// reported through `is_configured` and never echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretInputView {
    pub is_configured: bool,
    pub value: String,
}

impl From<&DataSourceSettings> for SecretInputView {
    fn from(settings: &DataSourceSettings) -> Self {
        Self {
            is_configured: is_configured(settings),
            value: pending_key(settings).unwrap_or_default().to_string(),
        }
    }
}

/// A key made only of whitespace counts as no key at all.
pub fn is_blank_key(value: &str) -> bool {
    value.trim().is_empty()
}

pub fn is_configured(settings: &DataSourceSettings) -> bool {
    settings.secure_json_fields.api_key
}

fn pending_key(settings: &DataSourceSettings) -> Option<&str> {
    settings
        .secure_json_data
        .api_key
        .as_deref()
        .filter(|value| !is_blank_key(value))
}

pub fn apply_key_change(settings: DataSourceSettings, value: &str) -> DataSourceSettings {
    let mut next = settings;
    next.secure_json_data.api_key = Some(value.to_string());
    next
}

pub fn reset_key(settings: DataSourceSettings) -> DataSourceSettings {
    let mut next = settings;
    next.secure_json_fields.api_key = false;
    next.secure_json_data.api_key = Some(String::new());
    next
}

pub fn secret_state(settings: &DataSourceSettings) -> SecretState {
    if pending_key(settings).is_some() {
        SecretState::PendingValue
    } else if is_configured(settings) {
        SecretState::Saved
    } else {
        SecretState::Unset
    }
}

/// Gate for "save & test": some credential must be usable before any
/// upstream call is attempted.
pub fn validate_for_save_and_test(settings: &DataSourceSettings) -> AppResult<()> {
    match secret_state(settings) {
        SecretState::Unset => Err(AppError::MissingCredential),
        SecretState::PendingValue | SecretState::Saved => Ok(()),
    }
}

// ─── Backend Settings ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginOptions {}

#[derive(Clone, Default)]
pub struct SecretPluginSettings {
    pub api_key: String,
}

impl fmt::Debug for SecretPluginSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretPluginSettings")
            .field("api_key_set", &!self.api_key.is_empty())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PluginSettings {
    pub options: PluginOptions,
    pub secrets: SecretPluginSettings,
}

impl PluginSettings {
    pub fn load(instance: &DataSourceInstanceSettings) -> AppResult<Self> {
        let options = match &instance.json_data {
            Some(value) if !value.is_null() => serde_json::from_value::<PluginOptions>(value.clone())
                .map_err(|error| {
                    AppError::Config(format!("could not unmarshal PluginSettings json: {}", error))
                })?,
            _ => PluginOptions::default(),
        };

        let api_key = instance
            .decrypted_secure_json_data
            .get(API_KEY_FIELD)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            options,
            secrets: SecretPluginSettings { api_key },
        })
    }

    pub fn require_api_key(&self) -> AppResult<&str> {
        if is_blank_key(&self.secrets.api_key) {
            return Err(AppError::MissingCredential);
        }
        Ok(self.secrets.api_key.trim())
    }
}

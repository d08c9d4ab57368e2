use crate::config::{is_blank_key, secret_state, SecretState, API_KEY_FIELD};
use crate::errors::{AppError, AppResult};
use crate::models::{DataSourceInstanceSettings, DataSourceSettings, SecureJsonData};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

pub const DEFAULT_KEYRING_SERVICE: &str = "stripe-datasource";

/// Write-only credential storage, keyed by data source uid.
pub trait SecretStore: Send + Sync {
    fn set(&self, uid: &str, secret: &str) -> AppResult<()>;
    fn get(&self, uid: &str) -> AppResult<Option<String>>;
    fn delete(&self, uid: &str) -> AppResult<()>;

    fn contains(&self, uid: &str) -> AppResult<bool> {
        Ok(self.get(uid)?.is_some_and(|value| !is_blank_key(&value)))
    }
}

#[derive(Debug)]
pub struct KeyringSecretStore {
    service: String,
    lock: Mutex<()>,
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            lock: Mutex::new(()),
        }
    }

    fn entry(&self, uid: &str) -> AppResult<keyring::Entry> {
        keyring::Entry::new(&self.service, uid).map_err(AppError::from)
    }

    fn guard(&self) -> AppResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| AppError::Internal("keyring mutex poisoned".to_string()))
    }
}

impl SecretStore for KeyringSecretStore {
    fn set(&self, uid: &str, secret: &str) -> AppResult<()> {
        let _guard = self.guard()?;
        self.entry(uid)?.set_password(secret).map_err(AppError::from)
    }

    fn get(&self, uid: &str) -> AppResult<Option<String>> {
        let _guard = self.guard()?;
        match self.entry(uid)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AppError::from(error)),
        }
    }

    fn delete(&self, uid: &str) -> AppResult<()> {
        let _guard = self.guard()?;
        match self.entry(uid)?.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AppError::from(error)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_secrets<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> AppResult<T> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| AppError::Internal("secret store mutex poisoned".to_string()))?;
        Ok(f(&mut secrets))
    }
}

impl SecretStore for MemorySecretStore {
    fn set(&self, uid: &str, secret: &str) -> AppResult<()> {
        self.with_secrets(|secrets| {
            secrets.insert(uid.to_string(), secret.to_string());
        })
    }

    fn get(&self, uid: &str) -> AppResult<Option<String>> {
        self.with_secrets(|secrets| secrets.get(uid).cloned())
    }

    fn delete(&self, uid: &str) -> AppResult<()> {
        self.with_secrets(|secrets| {
            secrets.remove(uid);
        })
    }
}

/// Persists an outgoing settings payload. A pending key is written, a reset
/// removes the stored key, and the returned settings carry no plaintext with
/// the presence flag recomputed from the store.
pub fn commit_settings(
    store: &dyn SecretStore,
    uid: &str,
    settings: DataSourceSettings,
) -> AppResult<DataSourceSettings> {
    let state = secret_state(&settings);
    let reset_requested = !settings.secure_json_fields.api_key
        && settings.secure_json_data.api_key.as_deref() == Some("");

    match state {
        SecretState::PendingValue => {
            if let Some(secret) = settings.secure_json_data.api_key.as_deref() {
                store.set(uid, secret.trim())?;
            }
        }
        SecretState::Unset if reset_requested => store.delete(uid)?,
        SecretState::Unset | SecretState::Saved => {}
    }

    let mut persisted = settings;
    persisted.secure_json_data = SecureJsonData::default();
    persisted.secure_json_fields.api_key = store.contains(uid)?;

    tracing::info!(
        uid = %uid,
        previous_state = ?state,
        configured = persisted.secure_json_fields.api_key,
        "committed data source settings"
    );

    Ok(persisted)
}

pub fn decrypted_secure_data(store: &dyn SecretStore, uid: &str) -> AppResult<BTreeMap<String, String>> {
    let mut decrypted = BTreeMap::new();
    if let Some(secret) = store.get(uid)? {
        decrypted.insert(API_KEY_FIELD.to_string(), secret);
    }
    Ok(decrypted)
}

/// Assembles what a backend instance receives for persisted settings.
pub fn instance_settings(
    store: &dyn SecretStore,
    uid: &str,
    name: &str,
    settings: &DataSourceSettings,
) -> AppResult<DataSourceInstanceSettings> {
    Ok(DataSourceInstanceSettings {
        uid: uid.to_string(),
        name: name.to_string(),
        json_data: Some(serde_json::to_value(&settings.json_data)?),
        decrypted_secure_json_data: decrypted_secure_data(store, uid)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{apply_key_change, reset_key, validate_for_save_and_test, SecretInputView};

    #[test]
    fn pending_key_moves_to_saved() {
        let store = MemorySecretStore::new();
        let outgoing = apply_key_change(DataSourceSettings::default(), "sk_test_abc123");

        let persisted = commit_settings(&store, "stripe", outgoing).expect("commit");
        assert!(persisted.secure_json_fields.api_key);
        assert!(persisted.secure_json_data.api_key.is_none());
        assert_eq!(secret_state(&persisted), SecretState::Saved);
        assert_eq!(store.get("stripe").expect("get").as_deref(), Some("sk_test_abc123"));

        let view = SecretInputView::from(&persisted);
        assert!(view.is_configured);
        assert!(view.value.is_empty());
    }

    #[test]
    fn reset_removes_stored_key() {
        let store = MemorySecretStore::new();
        let saved = commit_settings(
            &store,
            "stripe",
            apply_key_change(DataSourceSettings::default(), "sk_test_abc123"),
        )
        .expect("save");

        let cleared = commit_settings(&store, "stripe", reset_key(saved)).expect("reset");
        assert!(!cleared.secure_json_fields.api_key);
        assert!(!store.contains("stripe").expect("contains"));
        assert!(validate_for_save_and_test(&cleared).is_err());
    }

    #[test]
    fn whitespace_key_is_never_marked_configured() {
        let store = MemorySecretStore::new();
        let outgoing = apply_key_change(DataSourceSettings::default(), "   ");
        assert!(validate_for_save_and_test(&outgoing).is_err());

        let persisted = commit_settings(&store, "stripe", outgoing).expect("commit");
        assert!(!persisted.secure_json_fields.api_key);
        assert!(store.get("stripe").expect("get").is_none());

        store.set("legacy", " \t").expect("set");
        assert!(!store.contains("legacy").expect("contains"));
    }

    #[test]
    fn padded_key_is_stored_trimmed() {
        let store = MemorySecretStore::new();
        let outgoing = apply_key_change(DataSourceSettings::default(), "  sk_test_padded  ");
        let persisted = commit_settings(&store, "stripe", outgoing).expect("commit");
        assert!(persisted.secure_json_fields.api_key);
        assert_eq!(store.get("stripe").expect("get").as_deref(), Some("sk_test_padded"));
    }

    #[test]
    #[ignore = "needs an unlocked OS keychain"]
    fn keyring_store_round_trips_through_os_keychain() {
        let store = KeyringSecretStore::new("stripe-datasource-test");
        let uid = format!("uid-{}", uuid::Uuid::new_v4());

        store.set(&uid, "sk_test_keychain1").expect("set");
        assert_eq!(store.get(&uid).expect("get").as_deref(), Some("sk_test_keychain1"));

        let persisted = commit_settings(
            &store,
            &uid,
            apply_key_change(DataSourceSettings::default(), "sk_test_keychain2"),
        )
        .expect("commit");
        assert!(persisted.secure_json_fields.api_key);
        assert_eq!(store.get(&uid).expect("get").as_deref(), Some("sk_test_keychain2"));

        store.delete(&uid).expect("delete");
        assert!(store.get(&uid).expect("get after delete").is_none());
    }

    #[test]
    fn saving_from_unset_is_a_no_op() {
        let store = MemorySecretStore::new();
        let persisted = commit_settings(&store, "stripe", DataSourceSettings::default()).expect("commit");
        assert_eq!(secret_state(&persisted), SecretState::Unset);
        assert!(store.get("stripe").expect("get").is_none());
    }

    #[test]
    fn saved_key_survives_unrelated_edits() {
        let store = MemorySecretStore::new();
        let saved = commit_settings(
            &store,
            "stripe",
            apply_key_change(DataSourceSettings::default(), "rk_live_keepme"),
        )
        .expect("save");

        let mut edited = saved;
        edited
            .json_data
            .extra
            .insert("note".to_string(), serde_json::json!("finance board"));
        let persisted = commit_settings(&store, "stripe", edited).expect("commit");
        assert!(persisted.secure_json_fields.api_key);
        assert_eq!(store.get("stripe").expect("get").as_deref(), Some("rk_live_keepme"));
    }

    #[test]
    fn instance_settings_carry_decrypted_key() {
        let store = MemorySecretStore::new();
        store.set("stripe", "sk_test_inst").expect("set");
        let instance = instance_settings(&store, "stripe", "Stripe", &DataSourceSettings::default())
            .expect("instance");
        assert_eq!(
            instance.decrypted_secure_json_data.get(API_KEY_FIELD).map(String::as_str),
            Some("sk_test_inst")
        );
        assert_eq!(instance.json_data, Some(serde_json::json!({})));
    }

    #[test]
    fn stores_are_isolated_per_uid() {
        let store = MemorySecretStore::new();
        store.set("a", "sk_test_aaaaaa").expect("set");
        assert!(store.contains("a").expect("contains"));
        assert!(!store.contains("b").expect("contains"));
        store.delete("a").expect("delete");
        store.delete("a").expect("second delete is fine");
        assert!(!store.contains("a").expect("contains"));
    }
}

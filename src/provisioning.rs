use crate::config::API_KEY_FIELD;
use crate::errors::{AppError, AppResult};
use crate::models::{DataSourceJsonData, DataSourceSettings, SecureJsonData, SecureJsonFields};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningFile {
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    #[serde(default)]
    pub datasources: Vec<ProvisionedDataSource>,
}

fn default_api_version() -> u32 {
    1
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedDataSource {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub json_data: DataSourceJsonData,
    #[serde(default)]
    pub secure_json_data: BTreeMap<String, String>,
}

impl std::fmt::Debug for ProvisionedDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedDataSource")
            .field("name", &self.name)
            .field("plugin_type", &self.plugin_type)
            .field("uid", &self.uid)
            .field("json_data", &self.json_data)
            .field("secure_json_data", &self.secure_json_data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProvisionedDataSource {
    /// Identifier the secret store keys on; provisioning may omit `uid`.
    pub fn store_uid(&self) -> &str {
        self.uid.as_deref().unwrap_or(&self.name)
    }

    /// Settings as an editing session would submit them: any provisioned key
    /// is a pending value, nothing is marked configured yet.
    pub fn settings(&self) -> DataSourceSettings {
        DataSourceSettings {
            json_data: self.json_data.clone(),
            secure_json_data: SecureJsonData {
                api_key: self.secure_json_data.get(API_KEY_FIELD).cloned(),
            },
            secure_json_fields: SecureJsonFields::default(),
        }
    }
}

impl ProvisioningFile {
    pub fn find(&self, name_or_uid: &str) -> AppResult<&ProvisionedDataSource> {
        self.datasources
            .iter()
            .find(|ds| ds.name == name_or_uid || ds.uid.as_deref() == Some(name_or_uid))
            .ok_or_else(|| AppError::NotFound(format!("No provisioned data source named '{}'", name_or_uid)))
    }

    pub fn of_type<'a>(&'a self, plugin_type: &'a str) -> impl Iterator<Item = &'a ProvisionedDataSource> {
        self.datasources
            .iter()
            .filter(move |ds| ds.plugin_type == plugin_type)
    }
}

pub fn expand_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            match caps.get(1).or_else(|| caps.get(2)) {
                Some(name) => lookup(name.as_str()).unwrap_or_default(),
                None => "$".to_string(),
            }
        })
        .into_owned()
}

fn expand_json(value: &mut serde_json::Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        serde_json::Value::String(text) => *text = expand_env_with(text, lookup),
        serde_json::Value::Array(items) => items.iter_mut().for_each(|item| expand_json(item, lookup)),
        serde_json::Value::Object(map) => map.values_mut().for_each(|item| expand_json(item, lookup)),
        _ => {}
    }
}

pub fn parse_provisioning_with(
    raw: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> AppResult<ProvisioningFile> {
    let mut file: ProvisioningFile = serde_yaml::from_str(raw)?;
    if file.api_version != 1 {
        return Err(AppError::Config(format!(
            "Unsupported provisioning apiVersion {}",
            file.api_version
        )));
    }

    for datasource in &mut file.datasources {
        for value in datasource.json_data.extra.values_mut() {
            expand_json(value, &lookup);
        }
        for value in datasource.secure_json_data.values_mut() {
            *value = expand_env_with(value, &lookup);
        }
    }

    Ok(file)
}

pub fn parse_provisioning(raw: &str) -> AppResult<ProvisioningFile> {
    parse_provisioning_with(raw, |name| std::env::var(name).ok())
}

pub fn load_provisioning(path: &Path) -> AppResult<ProvisioningFile> {
    let raw = std::fs::read_to_string(path)?;
    let file = parse_provisioning(&raw)?;
    tracing::info!(
        path = %path.display(),
        datasources = file.datasources.len(),
        "loaded provisioning file"
    );
    Ok(file)
}

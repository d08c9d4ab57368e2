use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ─── Metric Kinds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Mrr,
    Arr,
    Subscribers,
    Customers,
    Balance,
    Subscriptions,
    Revenue,
    Invoices,
    Charges,
    Products,
    NewMrr,
    ChurnedMrr,
    NetNewMrr,
    ChurnRate,
    Arpu,
    Trialing,
    PastDue,
}

impl MetricKind {
    pub const ALL: [MetricKind; 17] = [
        Self::Mrr,
        Self::Arr,
        Self::Subscribers,
        Self::Customers,
        Self::Balance,
        Self::Subscriptions,
        Self::Revenue,
        Self::Invoices,
        Self::Charges,
        Self::Products,
        Self::NewMrr,
        Self::ChurnedMrr,
        Self::NetNewMrr,
        Self::ChurnRate,
        Self::Arpu,
        Self::Trialing,
        Self::PastDue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mrr => "mrr",
            Self::Arr => "arr",
            Self::Subscribers => "subscribers",
            Self::Customers => "customers",
            Self::Balance => "balance",
            Self::Subscriptions => "subscriptions",
            Self::Revenue => "revenue",
            Self::Invoices => "invoices",
            Self::Charges => "charges",
            Self::Products => "products",
            Self::NewMrr => "new_mrr",
            Self::ChurnedMrr => "churned_mrr",
            Self::NetNewMrr => "net_new_mrr",
            Self::ChurnRate => "churn_rate",
            Self::Arpu => "arpu",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
        }
    }

    /// Kinds rendered as a table frame rather than a single stat value.
    pub fn is_tabular(self) -> bool {
        matches!(
            self,
            Self::Subscriptions | Self::Invoices | Self::Charges | Self::Products
        )
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == trimmed)
            .ok_or_else(|| AppError::NotFound(format!("Unknown metric kind '{}'", trimmed)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricGroup {
    Revenue,
    Subscribers,
    BalanceAndTables,
}

impl MetricGroup {
    pub fn title(self) -> &'static str {
        match self {
            Self::Revenue => "Revenue metrics",
            Self::Subscribers => "Subscriber metrics",
            Self::BalanceAndTables => "Balance & tables",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub kind: MetricKind,
    pub label: String,
    pub description: String,
    pub group: MetricGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectOption {
    pub label: String,
    pub value: MetricKind,
    pub description: String,
}

// ─── Queries ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default)]
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Raw persisted kind. Kept as text so stale or blank values survive decoding.
    #[serde(
        default,
        rename = "queryType",
        alias = "queryKind",
        skip_serializing_if = "Option::is_none"
    )]
    pub query_kind: Option<String>,
}

impl Query {
    pub fn new(ref_id: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            ..Self::default()
        }
    }

    pub fn from_json(value: serde_json::Value) -> AppResult<Self> {
        serde_json::from_value(value)
            .map_err(|error| AppError::BadRequest(format!("json unmarshal: {}", error)))
    }

    /// The selected kind, if set to anything other than blank text.
    pub fn kind_str(&self) -> Option<&str> {
        self.query_kind
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataRequest {
    pub queries: Vec<Query>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

// ─── Data Source Settings ───────────────────────────────────────────────────

/// Persisted settings in the host's provisioning layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSettings {
    #[serde(default)]
    pub json_data: DataSourceJsonData,
    #[serde(default)]
    pub secure_json_data: SecureJsonData,
    #[serde(default)]
    pub secure_json_fields: SecureJsonFields,
}

/// Non-secret options. No fields are owned by this plugin yet; anything the
/// host stores here is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSourceJsonData {
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureJsonData {
    #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl fmt::Debug for SecureJsonData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = match self.api_key.as_deref() {
            None => "<unset>",
            Some("") => "<empty>",
            Some(_) => "<redacted>",
        };
        f.debug_struct("SecureJsonData").field("api_key", &api_key).finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureJsonFields {
    #[serde(rename = "apiKey", default)]
    pub api_key: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, bool>,
}

/// What the host hands a backend instance: raw `jsonData` plus the
/// decrypted secure map.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceInstanceSettings {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub json_data: Option<serde_json::Value>,
    #[serde(default)]
    pub decrypted_secure_json_data: BTreeMap<String, String>,
}

impl fmt::Debug for DataSourceInstanceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secure_keys = self.decrypted_secure_json_data.keys().collect::<Vec<_>>();
        f.debug_struct("DataSourceInstanceSettings")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("json_data", &self.json_data)
            .field("decrypted_secure_json_data", &secure_keys)
            .finish()
    }
}

// ─── Data Frames ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visualization {
    Stat,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    pub preferred_visualization: Visualization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    Number(Vec<f64>),
    Int64(Vec<i64>),
    String(Vec<String>),
    Bool(Vec<bool>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Time(values) => values.len(),
            Self::Number(values) => values.len(),
            Self::Int64(values) => values.len(),
            Self::String(values) => values.len(),
            Self::Bool(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    pub values: FieldValues,
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFrame {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
}

impl DataFrame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            meta: None,
        }
    }

    pub fn with_visualization(mut self, visualization: Visualization) -> Self {
        self.meta = Some(FrameMeta {
            preferred_visualization: visualization,
        });
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, values: FieldValues) -> Self {
        self.fields.push(Field::new(name, values));
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.fields.first().map(|field| field.values.len()).unwrap_or(0)
    }
}

// ─── Responses ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    BadRequest,
    NotFound,
    Internal,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    pub frames: Vec<DataFrame>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
    pub fn ok(frames: Vec<DataFrame>) -> Self {
        Self {
            frames,
            status: ResponseStatus::Ok,
            error: None,
        }
    }

    pub fn error(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            frames: Vec::new(),
            status,
            error: Some(message.into()),
        }
    }

    pub fn from_app_error(error: &AppError) -> Self {
        let status = match error {
            AppError::BadRequest(_) | AppError::MissingCredential => ResponseStatus::BadRequest,
            AppError::NotFound(_) => ResponseStatus::NotFound,
            _ => ResponseStatus::Internal,
        };
        Self::error(status, error.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    pub message: String,
}

impl CheckHealthResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metric_kind_wire_names_match_display() {
        for kind in MetricKind::ALL {
            let encoded = serde_json::to_value(kind).expect("encode kind");
            assert_eq!(encoded, json!(kind.as_str()));
            assert_eq!(kind.as_str().parse::<MetricKind>().expect("parse"), kind);
        }
    }

    #[test]
    fn unknown_kind_is_not_found() {
        let error = "mrr_v2".parse::<MetricKind>().expect_err("unknown kind");
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[test]
    fn query_accepts_either_kind_field_name() {
        let persisted = Query::from_json(json!({ "refId": "A", "queryType": "arr" })).expect("decode");
        let legacy = Query::from_json(json!({ "refId": "B", "queryKind": "churn_rate" })).expect("decode");
        assert_eq!(persisted.kind_str(), Some("arr"));
        assert_eq!(legacy.kind_str(), Some("churn_rate"));

        let encoded = serde_json::to_value(&persisted).expect("encode");
        assert_eq!(encoded, json!({ "refId": "A", "queryType": "arr" }));
    }

    #[test]
    fn malformed_query_json_is_bad_request() {
        let error = Query::from_json(json!({ "refId": 7 })).expect_err("bad ref id");
        assert!(matches!(error, AppError::BadRequest(message) if message.starts_with("json unmarshal")));
    }

    #[test]
    fn settings_keep_host_layout() {
        let raw = json!({
            "jsonData": { "tlsSkipVerify": true },
            "secureJsonData": { "apiKey": "sk_test_123" },
            "secureJsonFields": { "apiKey": false }
        });
        let settings: DataSourceSettings = serde_json::from_value(raw.clone()).expect("decode settings");
        assert_eq!(serde_json::to_value(&settings).expect("encode"), raw);
    }

    #[test]
    fn secure_data_debug_never_prints_the_key() {
        let data = SecureJsonData {
            api_key: Some("sk_live_do_not_print".to_string()),
        };
        let rendered = format!("{:?}", data);
        assert!(!rendered.contains("sk_live_do_not_print"));
        assert!(rendered.contains("<redacted>"));

        let instance = DataSourceInstanceSettings {
            uid: "stripe".to_string(),
            decrypted_secure_json_data: [("apiKey".to_string(), "sk_live_x".to_string())].into(),
            ..DataSourceInstanceSettings::default()
        };
        assert!(!format!("{:?}", instance).contains("sk_live_x"));
    }

    #[test]
    fn frame_row_count_follows_first_field() {
        let frame = DataFrame::new("metrics")
            .with_field("name", FieldValues::String(vec!["a".into(), "b".into()]))
            .with_field("value", FieldValues::Number(vec![1.0, 2.0]));
        assert_eq!(frame.row_count(), 2);
        assert!(frame.field("value").is_some());
        assert_eq!(DataFrame::new("empty").row_count(), 0);
    }
}

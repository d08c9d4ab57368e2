pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod provisioning;
pub mod query;
pub mod redaction;
pub mod secrets;

pub use crate::catalog::MetricCatalog;
pub use crate::engine::datasource::BillingDataSource;
pub use crate::engine::{DataSourceAdapter, EngineOptions, QueryEngine, SaveAndTestOutcome};
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{
    CatalogEntry, CheckHealthResult, DataResponse, DataSourceInstanceSettings, DataSourceSettings, MetricKind, Query,
    QueryDataRequest, QueryDataResponse,
};
pub use crate::secrets::{KeyringSecretStore, MemorySecretStore, SecretStore};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the global JSON subscriber writing to `<dir>/logs/datasource.log`,
/// rotated daily. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(data_dir: &Path) -> AppResult<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "datasource.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(format!("tracing already initialised: {}", error)))
}

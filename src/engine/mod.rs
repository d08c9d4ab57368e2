pub mod billing;
pub mod datasource;
pub mod metrics;

use crate::config::validate_for_save_and_test;
use crate::errors::AppResult;
use crate::models::{
    CheckHealthResult, DataResponse, DataSourceInstanceSettings, DataSourceSettings, Query, QueryDataRequest,
    QueryDataResponse, ResponseStatus,
};
use crate::query::is_runnable;
use crate::secrets::{commit_settings, instance_settings, SecretStore};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capabilities a data source supplies to the generic [`QueryEngine`].
pub trait DataSourceAdapter: Send + Sync {
    fn default_query(&self) -> Query;

    fn filter_query(&self, query: &Query) -> bool {
        is_runnable(query)
    }

    fn execute_query<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, DataResponse>;

    fn check_health<'a>(&'a self, instance: &'a DataSourceInstanceSettings) -> BoxFuture<'a, CheckHealthResult>;
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub query_timeout: Duration,
    pub charge_limit: usize,
    pub churn_window_days: i64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
            charge_limit: 100,
            churn_window_days: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaveAndTestOutcome {
    pub settings: DataSourceSettings,
    pub health: CheckHealthResult,
}

/// Dispatches runnable queries to an adapter. A newer submission for a
/// `refId` supersedes any older one still in flight; the older result comes
/// back as `cancelled`. Nothing is retried.
pub struct QueryEngine<A> {
    adapter: Arc<A>,
    options: EngineOptions,
    in_flight: Mutex<InFlight>,
}

#[derive(Debug, Default)]
struct InFlight {
    generation: u64,
    latest: HashMap<String, u64>,
}

/// Registration of one dispatch. Dropping it, including when the caller
/// abandons the request, clears the `refId` entry unless a newer dispatch
/// has taken it over.
struct InFlightTicket<'a> {
    registry: &'a Mutex<InFlight>,
    ref_id: &'a str,
    generation: u64,
}

impl InFlightTicket<'_> {
    fn is_latest(&self) -> bool {
        lock_registry(self.registry).latest.get(self.ref_id) == Some(&self.generation)
    }
}

impl Drop for InFlightTicket<'_> {
    fn drop(&mut self) {
        let mut registry = lock_registry(self.registry);
        if registry.latest.get(self.ref_id) == Some(&self.generation) {
            registry.latest.remove(self.ref_id);
        }
    }
}

fn lock_registry(registry: &Mutex<InFlight>) -> MutexGuard<'_, InFlight> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<A: DataSourceAdapter> QueryEngine<A> {
    pub fn new(adapter: Arc<A>, options: EngineOptions) -> Self {
        Self {
            adapter,
            options,
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn default_query(&self) -> Query {
        self.adapter.default_query()
    }

    pub async fn query_data(&self, request: QueryDataRequest) -> QueryDataResponse {
        let request_id = Uuid::new_v4();
        let mut response = QueryDataResponse::default();

        for query in &request.queries {
            if !self.adapter.filter_query(query) {
                tracing::debug!(%request_id, ref_id = %query.ref_id, "skipping query without a metric");
                continue;
            }

            let result = self.dispatch(request_id, query).await;
            response.responses.insert(query.ref_id.clone(), result);
        }

        response
    }

    async fn dispatch(&self, request_id: Uuid, query: &Query) -> DataResponse {
        let ticket = self.begin(&query.ref_id);
        let generation = ticket.generation;
        tracing::debug!(
            %request_id,
            ref_id = %query.ref_id,
            query_kind = query.kind_str().unwrap_or_default(),
            generation,
            "dispatching query"
        );

        let result = match timeout(self.options.query_timeout, self.adapter.execute_query(query)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(%request_id, ref_id = %query.ref_id, "query timed out");
                DataResponse::error(
                    ResponseStatus::Internal,
                    format!(
                        "upstream request timed out after {}s",
                        self.options.query_timeout.as_secs_f64()
                    ),
                )
            }
        };

        if ticket.is_latest() {
            result
        } else {
            tracing::debug!(%request_id, ref_id = %query.ref_id, generation, "query superseded");
            DataResponse::error(ResponseStatus::Cancelled, "superseded by a newer request")
        }
    }

    /// Numbers and registers a dispatch under one lock, so registration
    /// order always matches generation order.
    fn begin<'a>(&'a self, ref_id: &'a str) -> InFlightTicket<'a> {
        let mut registry = lock_registry(&self.in_flight);
        registry.generation += 1;
        let generation = registry.generation;
        registry.latest.insert(ref_id.to_string(), generation);
        InFlightTicket {
            registry: &self.in_flight,
            ref_id,
            generation,
        }
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        lock_registry(&self.in_flight).latest.len()
    }

    /// Persists the edited settings, then runs the connectivity check. A
    /// missing credential short-circuits before any upstream call.
    pub async fn save_and_test(
        &self,
        store: &dyn SecretStore,
        uid: &str,
        name: &str,
        settings: DataSourceSettings,
    ) -> AppResult<SaveAndTestOutcome> {
        let persisted = commit_settings(store, uid, settings)?;

        if let Err(error) = validate_for_save_and_test(&persisted) {
            tracing::info!(uid = %uid, "save & test rejected: {}", error);
            return Ok(SaveAndTestOutcome {
                settings: persisted,
                health: CheckHealthResult::error(error.to_string()),
            });
        }

        let instance = instance_settings(store, uid, name, &persisted)?;
        let health = self.adapter.check_health(&instance).await;
        Ok(SaveAndTestOutcome {
            settings: persisted,
            health,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetricCatalog;
    use crate::models::{DataFrame, HealthStatus};
    use crate::query::{default_query, update_kind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the query kind back; kinds starting with `slow` sleep first.
    #[derive(Default)]
    struct EchoAdapter {
        executed: AtomicUsize,
    }

    impl DataSourceAdapter for EchoAdapter {
        fn default_query(&self) -> Query {
            default_query(&MetricCatalog::builtin(), "A")
        }

        fn execute_query<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, DataResponse> {
            Box::pin(async move {
                self.executed.fetch_add(1, Ordering::SeqCst);
                let kind = query.kind_str().unwrap_or_default().to_string();
                match kind.as_str() {
                    slow if slow.starts_with("slow") => tokio::time::sleep(Duration::from_millis(200)).await,
                    "stuck" => tokio::time::sleep(Duration::from_secs(60)).await,
                    _ => {}
                }
                DataResponse::ok(vec![DataFrame::new(kind)])
            })
        }

        fn check_health<'a>(&'a self, _instance: &'a DataSourceInstanceSettings) -> BoxFuture<'a, CheckHealthResult> {
            Box::pin(async move { CheckHealthResult::ok("Connected to Stripe") })
        }
    }

    fn raw_query(ref_id: &str, kind: Option<&str>) -> Query {
        Query {
            ref_id: ref_id.to_string(),
            id: None,
            query_kind: kind.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn only_runnable_queries_are_dispatched() {
        let engine = QueryEngine::new(Arc::new(EchoAdapter::default()), EngineOptions::default());
        let request = QueryDataRequest {
            queries: vec![
                raw_query("A", Some("mrr")),
                raw_query("B", Some("")),
                raw_query("C", None),
                update_kind(raw_query("D", None), crate::models::MetricKind::Arr),
            ],
        };

        let response = engine.query_data(request).await;
        assert_eq!(response.responses.len(), 2);
        assert_eq!(response.responses["A"].frames[0].name, "mrr");
        assert_eq!(response.responses["D"].frames[0].name, "arr");
        assert_eq!(engine.adapter().executed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resubmission_supersedes_in_flight_query() {
        let engine = QueryEngine::new(Arc::new(EchoAdapter::default()), EngineOptions::default());
        let first = QueryDataRequest {
            queries: vec![raw_query("A", Some("slow"))],
        };
        let second = QueryDataRequest {
            queries: vec![raw_query("A", Some("arr"))],
        };

        let (stale, fresh) = tokio::join!(engine.query_data(first), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            engine.query_data(second).await
        });

        assert_eq!(stale.responses["A"].status, ResponseStatus::Cancelled);
        assert!(fresh.responses["A"].is_ok());
        assert_eq!(fresh.responses["A"].frames[0].name, "arr");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn latest_of_many_overlapping_submissions_wins() {
        let engine = Arc::new(QueryEngine::new(Arc::new(EchoAdapter::default()), EngineOptions::default()));
        let mut handles = Vec::new();
        for index in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let request = QueryDataRequest {
                    queries: vec![raw_query("A", Some(format!("slow-{}", index).as_str()))],
                };
                engine.query_data(request).await
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut winners = Vec::new();
        for handle in handles {
            let response = handle.await.expect("join");
            let result = &response.responses["A"];
            if result.is_ok() {
                winners.push(result.frames[0].name.clone());
            } else {
                assert_eq!(result.status, ResponseStatus::Cancelled);
            }
        }
        assert_eq!(winners, ["slow-7"]);
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn abandoned_request_leaves_no_in_flight_entry() {
        let engine = QueryEngine::new(Arc::new(EchoAdapter::default()), EngineOptions::default());
        let request = QueryDataRequest {
            queries: vec![raw_query("A", Some("stuck"))],
        };

        let abandoned = tokio::time::timeout(Duration::from_millis(20), engine.query_data(request)).await;
        assert!(abandoned.is_err());
        assert_eq!(engine.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let options = EngineOptions {
            query_timeout: Duration::from_millis(50),
            ..EngineOptions::default()
        };
        let engine = QueryEngine::new(Arc::new(EchoAdapter::default()), options);
        let response = engine
            .query_data(QueryDataRequest {
                queries: vec![raw_query("A", Some("stuck"))],
            })
            .await;

        let result = &response.responses["A"];
        assert_eq!(result.status, ResponseStatus::Internal);
        assert!(result.error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn save_and_test_without_key_never_checks_upstream() {
        let engine = QueryEngine::new(Arc::new(EchoAdapter::default()), EngineOptions::default());
        let store = crate::secrets::MemorySecretStore::new();

        let outcome = engine
            .save_and_test(&store, "stripe", "Stripe", DataSourceSettings::default())
            .await
            .expect("save and test");
        assert_eq!(outcome.health.status, HealthStatus::Error);
        assert!(outcome.health.message.contains("API key is missing"));
        assert!(!outcome.settings.secure_json_fields.api_key);
    }

    #[tokio::test]
    async fn default_query_comes_from_adapter() {
        let engine = QueryEngine::new(Arc::new(EchoAdapter::default()), EngineOptions::default());
        assert!(is_runnable(&engine.default_query()));
    }
}

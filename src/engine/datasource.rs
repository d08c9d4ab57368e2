use super::billing::{BillingApi, SubscriptionStatus};
use super::metrics::{self, InvoiceMetrics, SummaryInputs, SummaryMetrics};
use super::{BoxFuture, DataSourceAdapter, EngineOptions};
use crate::catalog::MetricCatalog;
use crate::config::PluginSettings;
use crate::errors::{AppError, AppResult, MISSING_API_KEY_MESSAGE};
use crate::models::{
    CatalogEntry, CheckHealthResult, DataFrame, DataResponse, DataSourceInstanceSettings, FieldValues,
    MetricKind, Query, ResponseStatus, Visualization,
};
use crate::query::{self, DEFAULT_REF_ID};
use crate::redaction::Redactor;
use chrono::Utc;
use std::sync::Arc;

/// Builds an upstream client for an API key.
pub type Connector = Arc<dyn Fn(&str) -> Arc<dyn BillingApi> + Send + Sync>;

/// Adapter that turns catalog queries into billing API calls and frames.
pub struct BillingDataSource {
    catalog: MetricCatalog,
    client: Option<Arc<dyn BillingApi>>,
    connector: Connector,
    options: EngineOptions,
    redactor: Redactor,
}

impl BillingDataSource {
    pub fn new(
        instance: &DataSourceInstanceSettings,
        catalog: MetricCatalog,
        connector: Connector,
        options: EngineOptions,
    ) -> AppResult<Self> {
        let settings = PluginSettings::load(instance)?;
        let api_key = settings.secrets.api_key.trim();
        let client = if api_key.is_empty() {
            tracing::warn!(uid = %instance.uid, "data source has no API key; queries will fail");
            None
        } else {
            Some(connector(api_key))
        };

        Ok(Self {
            catalog,
            client,
            connector,
            options,
            redactor: Redactor::new().with_secret(api_key),
        })
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    async fn run(&self, query: &Query) -> AppResult<DataResponse> {
        let entry = query::resolve_kind(&self.catalog, query)?;
        let client = self.client.as_ref().ok_or(AppError::MissingCredential)?;

        let frame = match entry.kind {
            MetricKind::Subscriptions => self.subscriptions_frame(client.as_ref()).await?,
            MetricKind::Invoices => self.invoices_frame(client.as_ref()).await?,
            MetricKind::Charges => self.charges_frame(client.as_ref()).await?,
            MetricKind::Products => self.products_frame(client.as_ref()).await?,
            MetricKind::Revenue => self.revenue_frame(client.as_ref(), entry).await?,
            _ => self.stat_frame(client.as_ref(), entry).await?,
        };
        Ok(DataResponse::ok(vec![frame]))
    }

    async fn summary(&self, client: &dyn BillingApi) -> AppResult<SummaryMetrics> {
        let active = client.list_subscriptions(SubscriptionStatus::Active).await?;
        let trialing = client.list_subscriptions(SubscriptionStatus::Trialing).await?;
        let past_due = client.list_subscriptions(SubscriptionStatus::PastDue).await?;
        let canceled = client.list_subscriptions(SubscriptionStatus::Canceled).await?;
        let customers = client.count_customers().await?;
        let balance = client.balance().await?;

        let inputs = SummaryInputs {
            active,
            canceled,
            trialing_count: trialing.len() as i64,
            past_due_count: past_due.len() as i64,
            customer_count: i64::try_from(customers).unwrap_or(i64::MAX),
            balance,
        };
        Ok(SummaryMetrics::compute(&inputs, Utc::now(), self.options.churn_window_days))
    }

    async fn stat_frame(&self, client: &dyn BillingApi, entry: &CatalogEntry) -> AppResult<DataFrame> {
        let summary = self.summary(client).await?;
        let value = summary
            .value_for(entry.kind)
            .ok_or_else(|| AppError::BadRequest(format!("unknown query type: {}", entry.kind)))?;

        Ok(DataFrame::new("metrics")
            .with_visualization(Visualization::Stat)
            .with_field("time", FieldValues::Time(vec![Utc::now()]))
            .with_field(entry.label.clone(), FieldValues::Number(vec![value])))
    }

    async fn revenue_frame(&self, client: &dyn BillingApi, entry: &CatalogEntry) -> AppResult<DataFrame> {
        let invoices = client.list_invoices().await?;
        let totals = InvoiceMetrics::compute(&invoices, Utc::now());

        Ok(DataFrame::new("revenue")
            .with_field("time", FieldValues::Time(vec![Utc::now()]))
            .with_field(
                entry.label.clone(),
                FieldValues::Number(vec![metrics::to_major_units(totals.total_revenue)]),
            ))
    }

    async fn subscriptions_frame(&self, client: &dyn BillingApi) -> AppResult<DataFrame> {
        let subscriptions = client.list_subscriptions(SubscriptionStatus::Active).await?;
        let (plans, intervals): (Vec<_>, Vec<_>) = subscriptions.iter().map(metrics::plan_details).unzip();

        Ok(DataFrame::new("subscriptions")
            .with_visualization(Visualization::Table)
            .with_field("id", FieldValues::String(subscriptions.iter().map(|s| s.id.clone()).collect()))
            .with_field(
                "status",
                FieldValues::String(subscriptions.iter().map(|s| s.status.as_str().to_string()).collect()),
            )
            .with_field(
                "customer",
                FieldValues::String(subscriptions.iter().map(|s| s.customer_id.clone()).collect()),
            )
            .with_field(
                "mrr",
                FieldValues::Number(
                    subscriptions
                        .iter()
                        .map(|s| metrics::to_major_units(metrics::monthly_amount(s)))
                        .collect(),
                ),
            )
            .with_field("plan", FieldValues::String(plans))
            .with_field("interval", FieldValues::String(intervals))
            .with_field("created", FieldValues::Time(subscriptions.iter().map(|s| s.created).collect())))
    }

    async fn invoices_frame(&self, client: &dyn BillingApi) -> AppResult<DataFrame> {
        let invoices = client.list_invoices().await?;

        Ok(DataFrame::new("invoices")
            .with_visualization(Visualization::Table)
            .with_field("id", FieldValues::String(invoices.iter().map(|i| i.id.clone()).collect()))
            .with_field(
                "customer",
                FieldValues::String(invoices.iter().map(|i| i.customer_id.clone().unwrap_or_default()).collect()),
            )
            .with_field(
                "status",
                FieldValues::String(invoices.iter().map(|i| i.status.as_str().to_string()).collect()),
            )
            .with_field(
                "amount",
                FieldValues::Number(invoices.iter().map(|i| metrics::to_major_units(i.total)).collect()),
            )
            .with_field(
                "amount_paid",
                FieldValues::Number(invoices.iter().map(|i| metrics::to_major_units(i.amount_paid)).collect()),
            )
            .with_field("created", FieldValues::Time(invoices.iter().map(|i| i.created).collect()))
            .with_field(
                "paid",
                FieldValues::Bool(
                    invoices
                        .iter()
                        .map(|i| i.status == super::billing::InvoiceStatus::Paid)
                        .collect(),
                ),
            ))
    }

    async fn charges_frame(&self, client: &dyn BillingApi) -> AppResult<DataFrame> {
        let charges = client.list_charges(self.options.charge_limit).await?;

        Ok(DataFrame::new("charges")
            .with_visualization(Visualization::Table)
            .with_field("id", FieldValues::String(charges.iter().map(|c| c.id.clone()).collect()))
            .with_field(
                "customer",
                FieldValues::String(charges.iter().map(|c| c.customer_id.clone().unwrap_or_default()).collect()),
            )
            .with_field(
                "status",
                FieldValues::String(charges.iter().map(|c| c.status.as_str().to_string()).collect()),
            )
            .with_field(
                "amount",
                FieldValues::Number(charges.iter().map(|c| metrics::to_major_units(c.amount)).collect()),
            )
            .with_field("created", FieldValues::Time(charges.iter().map(|c| c.created).collect()))
            .with_field("paid", FieldValues::Bool(charges.iter().map(|c| c.paid).collect()))
            .with_field("refunded", FieldValues::Bool(charges.iter().map(|c| c.refunded).collect())))
    }

    async fn products_frame(&self, client: &dyn BillingApi) -> AppResult<DataFrame> {
        let active = client.list_subscriptions(SubscriptionStatus::Active).await?;
        let products = metrics::revenue_by_product(&active);

        Ok(DataFrame::new("products")
            .with_visualization(Visualization::Table)
            .with_field(
                "product",
                FieldValues::String(products.iter().map(|p| p.product_name.clone()).collect()),
            )
            .with_field(
                "mrr",
                FieldValues::Number(products.iter().map(|p| metrics::to_major_units(p.mrr)).collect()),
            )
            .with_field(
                "subscriptions",
                FieldValues::Int64(products.iter().map(|p| p.subscription_count).collect()),
            ))
    }

    fn upstream_response(&self, query: &Query, error: AppError) -> DataResponse {
        match error {
            AppError::Upstream(message) => {
                tracing::warn!(
                    ref_id = %query.ref_id,
                    error = %self.redactor.scrub(&message),
                    "upstream query failed"
                );
                DataResponse::error(ResponseStatus::Internal, format!("stripe error: {}", message))
            }
            other => {
                tracing::debug!(ref_id = %query.ref_id, code = other.code(), "query rejected");
                DataResponse::from_app_error(&other)
            }
        }
    }
}

impl DataSourceAdapter for BillingDataSource {
    fn default_query(&self) -> Query {
        query::default_query(&self.catalog, DEFAULT_REF_ID)
    }

    fn execute_query<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, DataResponse> {
        Box::pin(async move {
            match self.run(query).await {
                Ok(response) => response,
                Err(error) => self.upstream_response(query, error),
            }
        })
    }

    fn check_health<'a>(&'a self, instance: &'a DataSourceInstanceSettings) -> BoxFuture<'a, CheckHealthResult> {
        Box::pin(async move {
            let settings = match PluginSettings::load(instance) {
                Ok(settings) => settings,
                Err(error) => {
                    tracing::warn!(uid = %instance.uid, error = %error, "could not load settings for health check");
                    return CheckHealthResult::error("Unable to load settings");
                }
            };

            let api_key = match settings.require_api_key() {
                Ok(key) => key,
                Err(_) => return CheckHealthResult::error(MISSING_API_KEY_MESSAGE),
            };

            let client = (self.connector)(api_key);
            match client.ping().await {
                Ok(()) => {
                    tracing::info!(uid = %instance.uid, "health check passed");
                    CheckHealthResult::ok("Connected to Stripe")
                }
                Err(error) => {
                    let redactor = Redactor::new().with_secret(api_key);
                    tracing::warn!(
                        uid = %instance.uid,
                        error = %redactor.scrub(&error.to_string()),
                        "health check failed"
                    );
                    CheckHealthResult::error(format!("Stripe API error: {}", error))
                }
            }
        })
    }
}

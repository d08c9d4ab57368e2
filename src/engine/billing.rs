use super::BoxFuture;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ─── Upstream Records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringInterval {
    Day,
    Week,
    Month,
    Year,
}

impl RecurringInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub nickname: Option<String>,
    pub product_id: Option<String>,
    /// Minor currency units.
    pub unit_amount: i64,
    pub recurring: Option<RecurringInterval>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub price: Option<Price>,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: SubscriptionStatus,
    pub customer_id: String,
    pub created: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub items: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAmount {
    pub currency: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Vec<BalanceAmount>,
    pub pending: Vec<BalanceAmount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Uncollectible,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Uncollectible => "uncollectible",
            Self::Void => "void",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer_id: Option<String>,
    pub status: InvoiceStatus,
    pub total: i64,
    pub amount_paid: i64,
    pub currency: String,
    pub created: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    Pending,
    Failed,
}

impl ChargeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub customer_id: Option<String>,
    pub status: ChargeStatus,
    pub amount: i64,
    pub amount_refunded: i64,
    pub currency: String,
    pub created: DateTime<Utc>,
    pub paid: bool,
    pub refunded: bool,
}

// ─── Upstream Boundary ──────────────────────────────────────────────────────

/// The upstream billing service. Transport, paging and authentication live
/// behind this trait; every failure comes back as [`AppError::Upstream`].
pub trait BillingApi: Send + Sync {
    fn ping(&self) -> BoxFuture<'_, AppResult<()>>;
    fn list_subscriptions(&self, status: SubscriptionStatus) -> BoxFuture<'_, AppResult<Vec<Subscription>>>;
    fn count_customers(&self) -> BoxFuture<'_, AppResult<u64>>;
    fn balance(&self) -> BoxFuture<'_, AppResult<Balance>>;
    fn list_invoices(&self) -> BoxFuture<'_, AppResult<Vec<Invoice>>>;
    fn list_charges(&self, limit: usize) -> BoxFuture<'_, AppResult<Vec<Charge>>>;
}

#[derive(Debug, Clone, Default)]
pub struct BillingFixture {
    pub subscriptions: Vec<Subscription>,
    pub customers: u64,
    pub balance: Balance,
    pub invoices: Vec<Invoice>,
    pub charges: Vec<Charge>,
}

/// Serves a fixed data set. Used for tests and offline dashboards.
#[derive(Debug, Default)]
pub struct InMemoryBillingApi {
    fixture: BillingFixture,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl InMemoryBillingApi {
    pub fn new(fixture: BillingFixture) -> Self {
        Self {
            fixture,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every subsequent call fails with this upstream message.
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message.into());
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond<T: Send + 'static>(&self, value: impl FnOnce(&BillingFixture) -> T) -> BoxFuture<'_, AppResult<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = match self.failure.lock() {
            Ok(failure) => match failure.as_ref() {
                Some(message) => Err(AppError::Upstream(message.clone())),
                None => Ok(value(&self.fixture)),
            },
            Err(_) => Err(AppError::Internal("billing fixture mutex poisoned".to_string())),
        };
        Box::pin(async move { result })
    }
}

impl BillingApi for InMemoryBillingApi {
    fn ping(&self) -> BoxFuture<'_, AppResult<()>> {
        self.respond(|_| ())
    }

    fn list_subscriptions(&self, status: SubscriptionStatus) -> BoxFuture<'_, AppResult<Vec<Subscription>>> {
        self.respond(|fixture| {
            fixture
                .subscriptions
                .iter()
                .filter(|sub| sub.status == status)
                .cloned()
                .collect()
        })
    }

    fn count_customers(&self) -> BoxFuture<'_, AppResult<u64>> {
        self.respond(|fixture| fixture.customers)
    }

    fn balance(&self) -> BoxFuture<'_, AppResult<Balance>> {
        self.respond(|fixture| fixture.balance.clone())
    }

    fn list_invoices(&self) -> BoxFuture<'_, AppResult<Vec<Invoice>>> {
        self.respond(|fixture| fixture.invoices.clone())
    }

    fn list_charges(&self, limit: usize) -> BoxFuture<'_, AppResult<Vec<Charge>>> {
        self.respond(|fixture| fixture.charges.iter().take(limit).cloned().collect())
    }
}

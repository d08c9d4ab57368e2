//! Billing figures computed from upstream records. Amounts stay in minor
//! currency units until a frame is built.

use super::billing::{Balance, BalanceAmount, Invoice, InvoiceStatus, RecurringInterval, Subscription, SubscriptionItem};
use crate::models::MetricKind;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

pub const REPORTING_CURRENCY: &str = "usd";

pub fn to_major_units(amount: i64) -> f64 {
    amount as f64 / 100.0
}

/// Normalises every recurring item of a subscription to a monthly amount.
pub fn monthly_amount(subscription: &Subscription) -> i64 {
    subscription
        .items
        .iter()
        .fold(0i64, |total, item| total.saturating_add(item_monthly_amount(item)))
}

fn item_monthly_amount(item: &SubscriptionItem) -> i64 {
    let Some(price) = item.price.as_ref() else {
        return 0;
    };
    let Some(interval) = price.recurring else {
        return 0;
    };
    let amount = price.unit_amount.saturating_mul(item.quantity);
    match interval {
        RecurringInterval::Year => amount / 12,
        RecurringInterval::Month => amount,
        RecurringInterval::Week => amount.saturating_mul(4),
        RecurringInterval::Day => amount.saturating_mul(30),
    }
}

/// Inputs gathered from the upstream service for one summary computation.
#[derive(Debug, Clone, Default)]
pub struct SummaryInputs {
    pub active: Vec<Subscription>,
    pub canceled: Vec<Subscription>,
    pub trialing_count: i64,
    pub past_due_count: i64,
    pub customer_count: i64,
    pub balance: Balance,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryMetrics {
    pub mrr: i64,
    pub arr: i64,
    pub active_subscribers: i64,
    pub total_customers: i64,
    pub available_balance: i64,
    pub pending_balance: i64,
    pub new_mrr: i64,
    pub churned_mrr: i64,
    pub net_new_mrr: i64,
    /// Percentage, 0–100.
    pub churn_rate: f64,
    pub arpu: i64,
    pub trialing_count: i64,
    pub past_due_count: i64,
    pub canceled_in_window: i64,
}

impl SummaryMetrics {
    pub fn compute(inputs: &SummaryInputs, now: DateTime<Utc>, window_days: i64) -> Self {
        let window_start = now - Duration::days(window_days);
        let mut metrics = Self {
            trialing_count: inputs.trialing_count,
            past_due_count: inputs.past_due_count,
            total_customers: inputs.customer_count,
            ..Self::default()
        };

        let mut new_subscribers = 0i64;
        for subscription in &inputs.active {
            let mrr = monthly_amount(subscription);
            metrics.mrr = metrics.mrr.saturating_add(mrr);
            metrics.active_subscribers += 1;
            if subscription.created >= window_start {
                metrics.new_mrr = metrics.new_mrr.saturating_add(mrr);
                new_subscribers += 1;
            }
        }
        metrics.arr = metrics.mrr.saturating_mul(12);
        if metrics.active_subscribers > 0 {
            metrics.arpu = metrics.mrr / metrics.active_subscribers;
        }

        for subscription in &inputs.canceled {
            let in_window = subscription
                .canceled_at
                .is_some_and(|canceled_at| canceled_at >= window_start);
            if in_window {
                metrics.canceled_in_window += 1;
                metrics.churned_mrr = metrics.churned_mrr.saturating_add(monthly_amount(subscription));
            }
        }
        metrics.net_new_mrr = metrics.new_mrr.saturating_sub(metrics.churned_mrr);

        // Subscribers at window start: today's base, minus joiners, plus leavers.
        let base_at_window_start =
            metrics.active_subscribers - new_subscribers + metrics.canceled_in_window;
        if base_at_window_start > 0 {
            metrics.churn_rate =
                metrics.canceled_in_window as f64 / base_at_window_start as f64 * 100.0;
        }

        metrics.available_balance = currency_total(&inputs.balance.available);
        metrics.pending_balance = currency_total(&inputs.balance.pending);
        metrics
    }

    /// Display value for a stat metric. `None` for kinds that are not part
    /// of the summary.
    pub fn value_for(&self, kind: MetricKind) -> Option<f64> {
        let value = match kind {
            MetricKind::Mrr => to_major_units(self.mrr),
            MetricKind::Arr => to_major_units(self.arr),
            MetricKind::Subscribers => self.active_subscribers as f64,
            MetricKind::Customers => self.total_customers as f64,
            MetricKind::Balance => to_major_units(self.available_balance),
            MetricKind::NewMrr => to_major_units(self.new_mrr),
            MetricKind::ChurnedMrr => to_major_units(self.churned_mrr),
            MetricKind::NetNewMrr => to_major_units(self.net_new_mrr),
            MetricKind::ChurnRate => self.churn_rate,
            MetricKind::Arpu => to_major_units(self.arpu),
            MetricKind::Trialing => self.trialing_count as f64,
            MetricKind::PastDue => self.past_due_count as f64,
            MetricKind::Revenue
            | MetricKind::Subscriptions
            | MetricKind::Invoices
            | MetricKind::Charges
            | MetricKind::Products => return None,
        };
        Some(value)
    }
}

fn currency_total(amounts: &[BalanceAmount]) -> i64 {
    amounts
        .iter()
        .filter(|amount| amount.currency.eq_ignore_ascii_case(REPORTING_CURRENCY))
        .fold(0i64, |total, amount| total.saturating_add(amount.amount))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceMetrics {
    pub total_revenue: i64,
    pub paid_invoices: i64,
    pub unpaid_invoices: i64,
    pub overdue_invoices: i64,
}

impl InvoiceMetrics {
    pub fn compute(invoices: &[Invoice], now: DateTime<Utc>) -> Self {
        let mut metrics = Self::default();
        for invoice in invoices {
            if invoice.status == InvoiceStatus::Paid {
                metrics.total_revenue = metrics.total_revenue.saturating_add(invoice.amount_paid);
                metrics.paid_invoices += 1;
            } else {
                metrics.unpaid_invoices += 1;
                if invoice.due_date.is_some_and(|due| due < now) {
                    metrics.overdue_invoices += 1;
                }
            }
        }
        metrics
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRevenue {
    pub product_id: String,
    pub product_name: String,
    pub mrr: i64,
    pub subscription_count: i64,
}

/// Monthly revenue per product across active subscriptions, largest first.
pub fn revenue_by_product(active: &[Subscription]) -> Vec<ProductRevenue> {
    let mut products: BTreeMap<String, ProductRevenue> = BTreeMap::new();

    for subscription in active {
        for item in &subscription.items {
            let Some(price) = item.price.as_ref() else {
                continue;
            };
            let product_id = price.product_id.clone().unwrap_or_else(|| price.id.clone());
            let product_name = price
                .nickname
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| product_id.clone());
            let item_mrr = item_monthly_amount(item);

            let entry = products.entry(product_id.clone()).or_insert_with(|| ProductRevenue {
                product_id,
                product_name,
                mrr: 0,
                subscription_count: 0,
            });
            entry.mrr = entry.mrr.saturating_add(item_mrr);
            entry.subscription_count += 1;
        }
    }

    let mut result = products.into_values().collect::<Vec<_>>();
    result.sort_by(|a, b| b.mrr.cmp(&a.mrr).then_with(|| a.product_id.cmp(&b.product_id)));
    result
}

/// Plan label and billing interval of a subscription's first item.
pub fn plan_details(subscription: &Subscription) -> (String, String) {
    let Some(price) = subscription.items.first().and_then(|item| item.price.as_ref()) else {
        return (String::new(), String::new());
    };
    let interval = price
        .recurring
        .map(|interval| interval.as_str().to_string())
        .unwrap_or_default();
    let plan = price
        .nickname
        .clone()
        .filter(|name| !name.is_empty())
        .or_else(|| price.product_id.clone())
        .unwrap_or_default();
    (plan, interval)
}

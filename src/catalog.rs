use crate::errors::{AppError, AppResult};
use crate::models::{CatalogEntry, MetricGroup, MetricKind, SelectOption};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

struct EntrySeed {
    kind: MetricKind,
    label: &'static str,
    description: &'static str,
    group: MetricGroup,
}

const BUILTIN_ENTRIES: &[EntrySeed] = &[
    EntrySeed {
        kind: MetricKind::Mrr,
        label: "MRR",
        description: "Monthly Recurring Revenue",
        group: MetricGroup::Revenue,
    },
    EntrySeed {
        kind: MetricKind::Arr,
        label: "ARR",
        description: "Annual Recurring Revenue",
        group: MetricGroup::Revenue,
    },
    EntrySeed {
        kind: MetricKind::NewMrr,
        label: "New MRR",
        description: "MRR from new subscriptions (last 30 days)",
        group: MetricGroup::Revenue,
    },
    EntrySeed {
        kind: MetricKind::ChurnedMrr,
        label: "Churned MRR",
        description: "MRR lost from cancellations (last 30 days)",
        group: MetricGroup::Revenue,
    },
    EntrySeed {
        kind: MetricKind::NetNewMrr,
        label: "Net New MRR",
        description: "New MRR minus Churned MRR",
        group: MetricGroup::Revenue,
    },
    EntrySeed {
        kind: MetricKind::Revenue,
        label: "Total Revenue",
        description: "Total revenue from paid invoices",
        group: MetricGroup::Revenue,
    },
    EntrySeed {
        kind: MetricKind::Arpu,
        label: "ARPU",
        description: "Average Revenue Per User",
        group: MetricGroup::Revenue,
    },
    EntrySeed {
        kind: MetricKind::Subscribers,
        label: "Active Subscribers",
        description: "Count of active subscriptions",
        group: MetricGroup::Subscribers,
    },
    EntrySeed {
        kind: MetricKind::ChurnRate,
        label: "Churn Rate %",
        description: "Subscriber churn rate (last 30 days)",
        group: MetricGroup::Subscribers,
    },
    EntrySeed {
        kind: MetricKind::Trialing,
        label: "Trialing",
        description: "Subscriptions in trial",
        group: MetricGroup::Subscribers,
    },
    EntrySeed {
        kind: MetricKind::PastDue,
        label: "Past Due",
        description: "Subscriptions past due",
        group: MetricGroup::Subscribers,
    },
    EntrySeed {
        kind: MetricKind::Customers,
        label: "Total Customers",
        description: "Total customer count",
        group: MetricGroup::Subscribers,
    },
    EntrySeed {
        kind: MetricKind::Balance,
        label: "Available Balance",
        description: "Available balance in USD",
        group: MetricGroup::BalanceAndTables,
    },
    EntrySeed {
        kind: MetricKind::Subscriptions,
        label: "Subscriptions",
        description: "List of active subscriptions",
        group: MetricGroup::BalanceAndTables,
    },
    EntrySeed {
        kind: MetricKind::Invoices,
        label: "Invoices",
        description: "List of recent invoices",
        group: MetricGroup::BalanceAndTables,
    },
    EntrySeed {
        kind: MetricKind::Charges,
        label: "Charges",
        description: "List of recent charges",
        group: MetricGroup::BalanceAndTables,
    },
    EntrySeed {
        kind: MetricKind::Products,
        label: "Revenue by Product",
        description: "MRR breakdown by product",
        group: MetricGroup::BalanceAndTables,
    },
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    entries: Vec<CatalogEntry>,
}

/// Ordered registry of the metrics a query may select.
///
/// Order is presentation order and is preserved exactly as given. A catalog
/// may carry any subset of [`MetricKind`]; the first entry is the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCatalog {
    entries: Vec<CatalogEntry>,
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MetricCatalog {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_ENTRIES
                .iter()
                .map(|seed| CatalogEntry {
                    kind: seed.kind,
                    label: seed.label.to_string(),
                    description: seed.description.to_string(),
                    group: seed.group,
                })
                .collect(),
        }
    }

    pub fn new(entries: Vec<CatalogEntry>) -> AppResult<Self> {
        if entries.is_empty() {
            return Err(AppError::Config("Metric catalog cannot be empty".to_string()));
        }

        let mut seen = BTreeSet::new();
        for entry in &entries {
            if entry.label.trim().is_empty() {
                return Err(AppError::Config(format!("Metric '{}' has an empty label", entry.kind)));
            }
            if entry.description.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "Metric '{}' has an empty description",
                    entry.kind
                )));
            }
            if !seen.insert(entry.kind) {
                return Err(AppError::Config(format!(
                    "Metric '{}' is listed more than once",
                    entry.kind
                )));
            }
        }

        Ok(Self { entries })
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        let file: CatalogFile = serde_yaml::from_str(raw)?;
        Self::new(file.entries)
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml(&raw)?;
        tracing::info!(
            path = %path.display(),
            entries = catalog.entries.len(),
            "loaded metric catalog"
        );
        Ok(catalog)
    }

    pub fn list_entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn resolve(&self, kind: MetricKind) -> AppResult<&CatalogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.kind == kind)
            .ok_or_else(|| AppError::NotFound(format!("Metric '{}' is not in the catalog", kind)))
    }

    pub fn resolve_str(&self, raw: &str) -> AppResult<&CatalogEntry> {
        let kind = raw.parse::<MetricKind>()?;
        self.resolve(kind)
    }

    pub fn contains(&self, kind: MetricKind) -> bool {
        self.entries.iter().any(|entry| entry.kind == kind)
    }

    pub fn default_entry(&self) -> &CatalogEntry {
        // Both constructors guarantee at least one entry.
        &self.entries[0]
    }

    pub fn default_kind(&self) -> MetricKind {
        self.default_entry().kind
    }

    pub fn entries_in(&self, group: MetricGroup) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(move |entry| entry.group == group)
    }

    pub fn select_options(&self) -> Vec<SelectOption> {
        self.entries
            .iter()
            .map(|entry| SelectOption {
                label: entry.label.clone(),
                value: entry.kind,
                description: entry.description.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::MetricCatalog;
    use crate::errors::AppError;
    use crate::models::{CatalogEntry, MetricGroup, MetricKind};

    #[test]
    fn every_kind_resolves_with_display_text() {
        let catalog = MetricCatalog::builtin();
        for kind in MetricKind::ALL {
            let entry = catalog.resolve(kind).expect("builtin kind resolves");
            assert_eq!(entry.kind, kind);
            assert!(!entry.label.trim().is_empty());
            assert!(!entry.description.trim().is_empty());
        }
        assert_eq!(catalog.list_entries().len(), MetricKind::ALL.len());
    }

    #[test]
    fn listing_is_stable_and_grouped() {
        let catalog = MetricCatalog::builtin();
        assert_eq!(catalog.list_entries(), catalog.list_entries());
        assert_eq!(catalog.list_entries(), MetricCatalog::builtin().list_entries());

        let groups = catalog
            .list_entries()
            .iter()
            .map(|entry| entry.group)
            .collect::<Vec<_>>();
        let first_subscriber = groups.iter().position(|g| *g == MetricGroup::Subscribers).expect("subscribers");
        let first_table = groups.iter().position(|g| *g == MetricGroup::BalanceAndTables).expect("tables");
        assert!(groups[..first_subscriber].iter().all(|g| *g == MetricGroup::Revenue));
        assert!(groups[first_table..].iter().all(|g| *g == MetricGroup::BalanceAndTables));
        assert_eq!(catalog.entries_in(MetricGroup::Revenue).count(), 7);
    }

    #[test]
    fn default_is_mrr() {
        let catalog = MetricCatalog::builtin();
        assert_eq!(catalog.default_kind(), MetricKind::Mrr);
        assert_eq!(catalog.default_entry().label, "MRR");
    }

    #[test]
    fn arr_resolves_to_arr_label() {
        let catalog = MetricCatalog::builtin();
        assert_eq!(catalog.resolve_str("arr").expect("arr").label, "ARR");
    }

    #[test]
    fn reduced_catalog_reports_removed_kinds_as_not_found() {
        let catalog = MetricCatalog::from_yaml(
            r#"
entries:
  - kind: mrr
    label: MRR
    description: Monthly Recurring Revenue
    group: revenue
  - kind: balance
    label: Available Balance
    description: Available balance in USD
    group: balance-and-tables
"#,
        )
        .expect("parse catalog");

        assert_eq!(catalog.list_entries().len(), 2);
        assert!(catalog.contains(MetricKind::Balance));
        assert!(matches!(catalog.resolve(MetricKind::Arpu), Err(AppError::NotFound(_))));
        assert!(matches!(catalog.resolve_str("nonsense"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn rejects_invalid_catalogs() {
        assert!(matches!(MetricCatalog::new(vec![]), Err(AppError::Config(_))));

        let entry = CatalogEntry {
            kind: MetricKind::Mrr,
            label: "MRR".to_string(),
            description: "Monthly Recurring Revenue".to_string(),
            group: MetricGroup::Revenue,
        };
        let duplicate = MetricCatalog::new(vec![entry.clone(), entry.clone()]);
        assert!(matches!(duplicate, Err(AppError::Config(message)) if message.contains("more than once")));

        let blank = CatalogEntry {
            label: "  ".to_string(),
            ..entry
        };
        assert!(matches!(MetricCatalog::new(vec![blank]), Err(AppError::Config(_))));
    }

    #[test]
    fn loads_catalog_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            "entries:\n  - kind: arr\n    label: ARR\n    description: Annual Recurring Revenue\n    group: revenue\n",
        )
        .expect("write catalog");

        let catalog = MetricCatalog::load(&path).expect("load catalog");
        assert_eq!(catalog.default_kind(), MetricKind::Arr);
        assert!(matches!(
            MetricCatalog::load(&dir.path().join("missing.yaml")),
            Err(AppError::Io(_))
        ));
    }

    #[test]
    fn select_options_follow_catalog_order() {
        let catalog = MetricCatalog::builtin();
        let options = catalog.select_options();
        assert_eq!(options.len(), catalog.list_entries().len());
        assert_eq!(options[0].value, MetricKind::Mrr);
        assert_eq!(options[1].label, "ARR");
    }
}

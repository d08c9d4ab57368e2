use crate::catalog::MetricCatalog;
use crate::errors::{AppError, AppResult};
use crate::models::{CatalogEntry, MetricKind, Query};

pub const DEFAULT_REF_ID: &str = "A";

/// A query whose kind has been pinned to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    pub query: Query,
    pub kind: MetricKind,
    /// Set when the persisted kind could not be resolved and the default was used.
    pub fell_back_from: Option<String>,
}

pub fn default_query(catalog: &MetricCatalog, ref_id: &str) -> Query {
    Query {
        ref_id: ref_id.to_string(),
        id: None,
        query_kind: Some(catalog.default_kind().as_str().to_string()),
    }
}

/// Gate consulted before every dispatch. Only inspects the query itself.
pub fn is_runnable(query: &Query) -> bool {
    query.kind_str().is_some()
}

pub fn update_kind(query: Query, kind: MetricKind) -> Query {
    Query {
        query_kind: Some(kind.as_str().to_string()),
        ..query
    }
}

/// Strict lookup used on the execution side.
pub fn resolve_kind<'a>(catalog: &'a MetricCatalog, query: &Query) -> AppResult<&'a CatalogEntry> {
    let raw = query
        .kind_str()
        .ok_or_else(|| AppError::BadRequest(format!("Query {} has no metric selected", query.ref_id)))?;
    catalog.resolve_str(raw)
}

/// Lenient lookup used by editing surfaces: a stale kind falls back to the
/// catalog default instead of failing the session.
pub fn resolve_or_default(catalog: &MetricCatalog, query: Query) -> ResolvedQuery {
    match resolve_kind(catalog, &query) {
        Ok(entry) => ResolvedQuery {
            kind: entry.kind,
            query,
            fell_back_from: None,
        },
        Err(error) => {
            let previous = query.query_kind.clone().unwrap_or_default();
            let kind = catalog.default_kind();
            tracing::warn!(
                ref_id = %query.ref_id,
                query_kind = %previous,
                fallback = %kind,
                error = %error,
                "query kind not resolvable, using catalog default"
            );
            ResolvedQuery {
                query: update_kind(query, kind),
                kind,
                fell_back_from: Some(previous),
            }
        }
    }
}

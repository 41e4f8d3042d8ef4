pub mod error;
pub mod filter_order;
pub mod types;

pub use error::FilterError;
pub use filter_order::FilterOrder;
pub use types::*;

use sqlx::{Postgres, QueryBuilder};

use crate::config::ApiConfig;

/// Resolved paging/ordering for one list query
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub limit: i64,
    pub offset: i64,
    pub order: Vec<FilterOrderInfo>,
}

impl ListFilter {
    /// Applies config defaults and caps, validates the order spec against
    /// `allowed`, and falls back to `default_order` when none is given.
    pub fn from_params(
        params: &ListParams,
        api: &ApiConfig,
        allowed: &[&'static str],
        default_order: &str,
    ) -> Result<Self, FilterError> {
        let limit = match params.limit {
            None => api.default_page_size,
            Some(l) if l < 1 => {
                return Err(FilterError::InvalidLimit("Limit must be at least 1".to_string()))
            }
            Some(l) => l.min(api.max_page_size),
        };
        let offset = match params.offset {
            None => 0,
            Some(o) if o < 0 => {
                return Err(FilterError::InvalidOffset("Offset must be non-negative".to_string()))
            }
            Some(o) => o,
        };
        let spec = params
            .order
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default_order);
        let order = FilterOrder::parse(spec, allowed)?;
        Ok(Self { limit, offset, order })
    }

    /// Appends `ORDER BY ... LIMIT $n OFFSET $m` to a query under construction.
    pub fn push_tail(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(FilterOrder::generate(&self.order));
        qb.push(" LIMIT ").push_bind(self.limit);
        qb.push(" OFFSET ").push_bind(self.offset);
    }

    pub fn page<T>(&self, items: Vec<T>, total: i64) -> Page<T> {
        Page {
            items,
            total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Escape `\`, `%` and `_` so `term` matches literally under LIKE/ILIKE
/// (backslash is Postgres' default escape character).
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// ILIKE pattern matching `term` anywhere in the column.
pub fn contains_pattern(term: &str) -> String {
    format!("%{}%", escape_like(term))
}

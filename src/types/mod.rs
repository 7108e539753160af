//! Shared record types and the crate-wide error enum

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the aggregation pipeline.
///
/// Upstream failures are never retried and no aggregation step returns a
/// partial result: the first error fails the whole query.
#[derive(Debug, Error)]
pub enum HubcostError {
    /// Network/transport failure reaching the billing API or metrics store
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The billing API signalled additional result pages. Accounting a
    /// partial total would silently undercount, so this is fatal.
    #[error("billing response for {from}..{to} is paginated; refusing to return a partial total")]
    UnsupportedPagination { from: String, to: String },

    /// Client supplied from/to values that cannot be parsed or ordered
    #[error("invalid date range: {0}")]
    InvalidRange(String),

    /// Upstream payload is missing fields the pipeline requires
    #[error("unexpected upstream payload: {0}")]
    UnexpectedShape(String),
}

pub type Result<T> = std::result::Result<T, HubcostError>;

/// A dated cost total discriminated by a `name` field.
///
/// Used for account/attributable totals (`name` is `"account"` or
/// `"attributable"`) and for per-hub totals (`name` is the hub name, with
/// untagged cost reported as `"shared"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub date: NaiveDate,
    pub cost: f64,
    pub name: String,
}

/// A dated cost total for one logical component (compute, home storage, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCostRecord {
    pub date: NaiveDate,
    pub cost: f64,
    pub component: String,
}

/// Daily per-user usage, either an absolute total or a fraction in [0, 1].
///
/// In fraction form, values for a fixed (date, [hub], component) grouping
/// sum to 1 across users, or are uniformly 0 when the grouping saw no usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub date: NaiveDate,
    pub user: String,
    pub hub: String,
    pub component: String,
    pub value: f64,
}

/// A user's share of a day's home-storage cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCostRecord {
    pub date: NaiveDate,
    pub user: String,
    pub cost: f64,
}

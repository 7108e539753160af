//! Billing API client seam
//!
//! The billing backend is a cost-explorer style API: queries carry a metric
//! list, a granularity, an end-exclusive time period, a boolean filter tree
//! over tags/dimensions, and an optional group-by list. The wire shapes use
//! PascalCase keys. The aggregator only sees the [`BillingApi`] trait, so
//! tests substitute stub clients without touching global state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{HubcostError, Result};

/// Boolean filter tree over tags and dimensions
#[derive(Debug, Clone, Serialize)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Dimensions(MatchExpr),
    Tags(MatchExpr),
}

/// A leaf match against one tag key or dimension
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchExpr {
    pub key: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub match_options: Vec<String>,
}

impl MatchExpr {
    pub fn equals(key: &str, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            values: values.iter().map(|v| (*v).to_string()).collect(),
            match_options: vec!["EQUALS".to_string()],
        }
    }

    pub fn absent(key: &str) -> Self {
        Self {
            key: key.to_string(),
            values: Vec::new(),
            match_options: vec!["ABSENT".to_string()],
        }
    }
}

/// One grouping dimension for a cost query
#[derive(Debug, Clone, Serialize)]
pub struct GroupBy {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Key")]
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimePeriod {
    pub start: String,
    pub end: String,
}

/// A cost-and-usage query. `time_period.end` is exclusive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostQuery {
    pub metrics: Vec<String>,
    pub granularity: String,
    pub time_period: TimePeriod,
    pub filter: Filter,
    pub group_by: Vec<GroupBy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricAmount {
    pub amount: String,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostGroup {
    pub keys: Vec<String>,
    pub metrics: HashMap<String, MetricAmount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultByTime {
    pub time_period: TimePeriod,
    #[serde(default)]
    pub total: HashMap<String, MetricAmount>,
    #[serde(default)]
    pub groups: Vec<CostGroup>,
}

/// Per-period (optionally per-group) cost amounts. A populated
/// `next_page_token` means the result is truncated.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostResponse {
    #[serde(default)]
    pub results_by_time: Vec<ResultByTime>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Upstream billing backend operations the aggregator depends on
pub trait BillingApi {
    fn cost_and_usage(&self, query: &CostQuery) -> Result<CostResponse>;

    /// Distinct values recorded for a tag key within the period
    fn tag_values(&self, tag_key: &str, start: &str, end: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TagValuesRequest {
    time_period: TimePeriod,
    tag_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagValuesResponse {
    #[serde(default)]
    tags: Vec<String>,
}

/// Blocking HTTP client for the billing API
pub struct HttpBillingApi {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl HttpBillingApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl BillingApi for HttpBillingApi {
    fn cost_and_usage(&self, query: &CostQuery) -> Result<CostResponse> {
        let url = format!("{}/v1/cost-and-usage", self.base_url.trim_end_matches('/'));
        self.http
            .post(url)
            .json(query)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(transport_error)?
            .json()
            .map_err(decode_error)
    }

    fn tag_values(&self, tag_key: &str, start: &str, end: &str) -> Result<Vec<String>> {
        let url = format!("{}/v1/tags", self.base_url.trim_end_matches('/'));
        let request = TagValuesRequest {
            time_period: TimePeriod {
                start: start.to_string(),
                end: end.to_string(),
            },
            tag_key: tag_key.to_string(),
        };
        let response: TagValuesResponse = self
            .http
            .post(url)
            .json(&request)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(transport_error)?
            .json()
            .map_err(decode_error)?;
        Ok(response.tags)
    }
}

fn transport_error(err: reqwest::Error) -> HubcostError {
    HubcostError::UpstreamUnavailable(format!("billing api: {err}"))
}

fn decode_error(err: reqwest::Error) -> HubcostError {
    HubcostError::UnexpectedShape(format!("billing api: {err}"))
}

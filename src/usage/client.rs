//! Metrics store client seam
//!
//! Windowed range queries against a Prometheus-compatible store. Each
//! matched label-set comes back as a series of (timestamp, value) samples
//! spanning the window. The aggregator only sees the [`MetricsApi`] trait.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{HubcostError, Result};

/// One matched label-set and its samples. Sample values arrive as strings
/// on the wire (Prometheus matrix format).
#[derive(Debug, Clone, Deserialize)]
pub struct RangeSeries {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

pub trait MetricsApi {
    fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<RangeSeries>>;
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<RangeSeries>,
}

/// Blocking HTTP client for the Prometheus range-query API
pub struct HttpMetricsApi {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl HttpMetricsApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl MetricsApi for HttpMetricsApi {
    fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<RangeSeries>> {
        let url = format!("{}/api/v1/query_range", self.base_url.trim_end_matches('/'));
        let start_ts = start.timestamp().to_string();
        let end_ts = end.timestamp().to_string();
        let response: PromResponse = self
            .http
            .get(url)
            .query(&[
                ("query", query),
                ("start", start_ts.as_str()),
                ("end", end_ts.as_str()),
                ("step", step),
            ])
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|err| HubcostError::UpstreamUnavailable(format!("metrics store: {err}")))?
            .json()
            .map_err(|err| HubcostError::UnexpectedShape(format!("metrics store: {err}")))?;

        if response.status != "success" {
            return Err(HubcostError::UnexpectedShape(format!(
                "metrics store returned status {:?}",
                response.status
            )));
        }
        Ok(response.data.map(|data| data.result).unwrap_or_default())
    }
}

//! Date range normalization for the billing and metrics APIs
//!
//! The two upstreams disagree about range conventions: the billing API wants
//! date-only strings with an exclusive end, the metrics store wants inclusive
//! timestamps plus a sampling step. `DateRange` resolves raw from/to query
//! values once and hands each API its preferred shape.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::types::{HubcostError, Result};

/// Default sampling step for metrics range queries. Kept small because user
/// pods can be created and deleted within minutes, and short-lived pods
/// should still contribute usage samples.
pub const DEFAULT_STEP: &str = "5m";

/// A normalized, validated date range.
///
/// Equality and hashing are based on the normalized calendar dates, so two
/// ranges built from the same dates at different times of day key the same
/// cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateRange {
    /// First day covered, inclusive
    start: NaiveDate,
    /// Billing end, exclusive, never past the current UTC date
    billing_end: NaiveDate,
    /// Sampling step for metrics range queries
    step: String,
}

impl DateRange {
    /// Parse raw `from`/`to` query values into a validated range.
    ///
    /// - missing `to` defaults to the current UTC date
    /// - missing `from` defaults to `to` minus 30 days
    /// - the billing end is `to` plus one day (end-exclusive convention),
    ///   clamped down to today to avoid "end date in the future" errors
    /// - a `from` at or past today is reset to one day before the billing
    ///   end to avoid "start after end" errors
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self> {
        Self::parse_at(from, to, Utc::now())
    }

    fn parse_at(from: Option<&str>, to: Option<&str>, now: DateTime<Utc>) -> Result<Self> {
        let now_date = now.date_naive();

        let to_date = match to {
            Some(raw) => ensure_utc_datetime(raw)?.date_naive(),
            None => now_date,
        };
        let from_date = match from {
            Some(raw) => ensure_utc_datetime(raw)?.date_naive(),
            None => to_date - Duration::days(30),
        };

        let mut billing_end = to_date + Duration::days(1);
        if billing_end > now_date {
            billing_end = now_date;
        }

        let mut start = from_date;
        if start >= now_date {
            start = billing_end - Duration::days(1);
        }

        if start >= billing_end {
            return Err(HubcostError::InvalidRange(format!(
                "no valid ordering for from={from_date} to={to_date} (now={now_date})"
            )));
        }

        Ok(Self {
            start,
            billing_end,
            step: DEFAULT_STEP.to_string(),
        })
    }

    /// Replace the metrics sampling step
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = step.into();
        self
    }

    /// Date-only strings for the billing API: start inclusive, end exclusive
    pub fn billing_range(&self) -> (String, String) {
        (
            self.start.format("%Y-%m-%d").to_string(),
            self.billing_end.format("%Y-%m-%d").to_string(),
        )
    }

    /// Inclusive UTC timestamps for the metrics store, spanning the same
    /// calendar days as the billing range
    pub fn metrics_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let last_day = self.billing_end - Duration::days(1);
        let start = NaiveDateTime::new(self.start, NaiveTime::MIN).and_utc();
        let end = NaiveDateTime::new(last_day, end_of_day()).and_utc();
        (start, end)
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// Stable key fragment for the TTL cache
    pub fn cache_key(&self) -> String {
        format!("{}..{}@{}", self.start, self.billing_end, self.step)
    }
}

fn end_of_day() -> NaiveTime {
    // literal is always valid
    NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).expect("valid time literal")
}

/// Parse a date string into a UTC datetime.
///
/// Accepts date-only strings (`YYYY-MM-DD`), naive timestamps, and full
/// RFC 3339 timestamps (including a `Z` suffix). Naive inputs are assumed
/// to be UTC; zoned inputs are converted. Grafana's `${__from:date}` emits
/// UTC, but custom-formatted variants drop the zone, so both must parse.
pub fn ensure_utc_datetime(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(NaiveDateTime::new(date, NaiveTime::MIN).and_utc());
    }
    Err(HubcostError::InvalidRange(format!(
        "unparsable date: {raw:?}"
    )))
}

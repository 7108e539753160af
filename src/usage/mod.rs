//! Usage aggregation: windowed metrics queries pivoted into per-day,
//! per-user records with usage fractions that sum to 1 within a grouping

pub mod client;
pub mod queries;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};

use crate::cache::{CacheConfig, TtlCache};
use crate::dates::DateRange;
use crate::types::{HubcostError, Result, UsageRecord};

use client::{MetricsApi, RangeSeries};
use queries::{HUB_LABEL, USER_LABEL};

/// How the metrics queries report usage.
///
/// Absolute-totals deployments export raw usage (bytes, bytes of memory
/// requested); intra-day samples are summed and then normalized into
/// fractions. Precomputed-shares deployments export ready-made fractions;
/// intra-day samples are averaged and used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageMode {
    AbsoluteTotals,
    PrecomputedShares,
}

impl FromStr for UsageMode {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "absolute" | "absolute-totals" => Ok(Self::AbsoluteTotals),
            "shares" | "precomputed-shares" => Ok(Self::PrecomputedShares),
            other => Err(format!("unknown usage mode: {other:?}")),
        }
    }
}

/// Raw per-sample record, consumed within one pipeline run
struct UsageSample {
    date: NaiveDate,
    user: String,
    hub: String,
    component: String,
    value: f64,
}

/// Issues range queries through an injected [`MetricsApi`] client and
/// reduces the samples to daily per-user usage fractions. Raw series are
/// TTL-cached per (component, range).
pub struct UsageAggregator<M> {
    api: M,
    mode: UsageMode,
    series_cache: TtlCache<Vec<RangeSeries>>,
}

impl<M: MetricsApi> UsageAggregator<M> {
    pub fn new(api: M, mode: UsageMode, cache: CacheConfig) -> Self {
        Self {
            api,
            mode,
            series_cache: TtlCache::new(cache),
        }
    }

    /// Daily usage fractions per (date, user, hub, component), optionally
    /// restricted to one hub, component, or user.
    ///
    /// Fractions within a (date, component) grouping sum to 1 across
    /// users, or within (date, hub, component) when a hub filter is
    /// active; a grouping with no usage reports 0 for every member.
    pub fn query_usage(
        &self,
        range: &DateRange,
        hub: Option<&str>,
        component: Option<&str>,
        user: Option<&str>,
    ) -> Result<Vec<UsageRecord>> {
        let selected: Vec<(&str, &str)> = match component {
            Some(name) => queries::query_for_component(name)
                .map(|query| vec![(name, query)])
                .unwrap_or_default(),
            None => queries::usage_queries().to_vec(),
        };

        let mut samples = Vec::new();
        for (component_name, query) in selected {
            let series = self.query_range_cached(component_name, query, range)?;
            pivot(&series, component_name, &mut samples)?;
        }

        let mut records = self.reduce_by_day(samples);
        if self.mode == UsageMode::AbsoluteTotals {
            normalize(&mut records, hub.is_some());
        }

        records.retain(|record| {
            hub.is_none_or(|wanted| record.hub == wanted)
                && user.is_none_or(|wanted| record.user == wanted)
        });
        records.sort_by(|a, b| {
            (a.date, &a.component, &a.hub, &a.user).cmp(&(b.date, &b.component, &b.hub, &b.user))
        });
        Ok(records)
    }

    fn query_range_cached(
        &self,
        component: &str,
        query: &str,
        range: &DateRange,
    ) -> Result<Vec<RangeSeries>> {
        let key = format!("query-range:{component}:{}", range.cache_key());
        self.series_cache.get_or_insert_with(&key, || {
            let (start, end) = range.metrics_range();
            self.api.query_range(query, start, end, range.step())
        })
    }

    /// Collapse same-day samples per (date, user, hub, component)
    fn reduce_by_day(&self, samples: Vec<UsageSample>) -> Vec<UsageRecord> {
        let mut reduced: BTreeMap<(NaiveDate, String, String, String), (f64, u32)> =
            BTreeMap::new();
        for sample in samples {
            let slot = reduced
                .entry((sample.date, sample.user, sample.hub, sample.component))
                .or_insert((0.0, 0));
            slot.0 += sample.value;
            slot.1 += 1;
        }
        reduced
            .into_iter()
            .map(|((date, user, hub, component), (sum, count))| UsageRecord {
                date,
                user,
                hub,
                component,
                value: match self.mode {
                    UsageMode::AbsoluteTotals => sum,
                    UsageMode::PrecomputedShares => sum / f64::from(count.max(1)),
                },
            })
            .collect()
    }
}

/// Explode each label-set's sample series into dated records
fn pivot(series: &[RangeSeries], component: &str, out: &mut Vec<UsageSample>) -> Result<()> {
    for matched in series {
        let hub = label(matched, HUB_LABEL)?;
        let user = label(matched, USER_LABEL)?;
        for (timestamp, raw_value) in &matched.values {
            let date = DateTime::from_timestamp(*timestamp as i64, 0)
                .ok_or_else(|| {
                    HubcostError::UnexpectedShape(format!("invalid sample timestamp {timestamp}"))
                })?
                .date_naive();
            let value = raw_value.parse::<f64>().map_err(|_| {
                HubcostError::UnexpectedShape(format!("non-numeric sample value {raw_value:?}"))
            })?;
            out.push(UsageSample {
                date,
                user: user.to_string(),
                hub: hub.to_string(),
                component: component.to_string(),
                value,
            });
        }
    }
    Ok(())
}

fn label<'a>(series: &'a RangeSeries, name: &str) -> Result<&'a str> {
    series
        .metric
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| HubcostError::UnexpectedShape(format!("series missing {name:?} label")))
}

/// Divide absolute daily totals by their grouping total, yielding
/// fractions. Grouping is (date, component), or (date, hub, component)
/// when the caller filters by hub. A zero total yields 0 for every member.
fn normalize(records: &mut [UsageRecord], per_hub: bool) {
    let group_key = |record: &UsageRecord| {
        (
            record.date,
            per_hub.then(|| record.hub.clone()),
            record.component.clone(),
        )
    };

    let mut totals: HashMap<(NaiveDate, Option<String>, String), f64> = HashMap::new();
    for record in records.iter() {
        *totals.entry(group_key(record)).or_insert(0.0) += record.value;
    }
    for record in records.iter_mut() {
        let total = totals[&group_key(record)];
        record.value = if total > 0.0 { record.value / total } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    // 2024-01-15T00:00:00Z
    const DAY_ONE: f64 = 1_705_276_800.0;
    // 2024-01-16T00:00:00Z
    const DAY_TWO: f64 = 1_705_363_200.0;

    struct StubMetricsApi {
        by_query: HashMap<&'static str, Vec<RangeSeries>>,
        calls: Cell<usize>,
    }

    impl StubMetricsApi {
        fn new(by_query: HashMap<&'static str, Vec<RangeSeries>>) -> Self {
            Self {
                by_query,
                calls: Cell::new(0),
            }
        }
    }

    impl MetricsApi for &StubMetricsApi {
        fn query_range(
            &self,
            query: &str,
            _start: DateTime<chrono::Utc>,
            _end: DateTime<chrono::Utc>,
            _step: &str,
        ) -> Result<Vec<RangeSeries>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.by_query.get(query).cloned().unwrap_or_default())
        }
    }

    fn series(hub: &str, user: &str, values: &[(f64, &str)]) -> RangeSeries {
        RangeSeries {
            metric: HashMap::from([
                (HUB_LABEL.to_string(), hub.to_string()),
                (USER_LABEL.to_string(), user.to_string()),
            ]),
            values: values
                .iter()
                .map(|(ts, value)| (*ts, (*value).to_string()))
                .collect(),
        }
    }

    fn compute_only(result: Vec<RangeSeries>) -> HashMap<&'static str, Vec<RangeSeries>> {
        HashMap::from([(queries::MEMORY_REQUESTS_PER_USER, result)])
    }

    fn aggregator(api: &StubMetricsApi, mode: UsageMode) -> UsageAggregator<&StubMetricsApi> {
        UsageAggregator::new(api, mode, CacheConfig::default())
    }

    fn range() -> DateRange {
        DateRange::parse(Some("2024-01-10"), Some("2024-01-20")).unwrap()
    }

    fn date(raw: &str) -> NaiveDate {
        raw.parse().unwrap()
    }

    #[test]
    fn test_intra_day_sums_then_normalizes() {
        let api = StubMetricsApi::new(compute_only(vec![
            series("prod", "alice", &[(DAY_ONE, "2"), (DAY_ONE + 3600.0, "4")]),
            series("prod", "bob", &[(DAY_ONE, "2")]),
        ]));
        let records = aggregator(&api, UsageMode::AbsoluteTotals)
            .query_usage(&range(), None, Some("compute"), None)
            .unwrap();

        assert_eq!(records.len(), 2);
        let alice = records.iter().find(|r| r.user == "alice").unwrap();
        let bob = records.iter().find(|r| r.user == "bob").unwrap();
        assert!((alice.value - 0.75).abs() < 1e-9);
        assert!((bob.value - 0.25).abs() < 1e-9);
        assert_eq!(alice.date, date("2024-01-15"));
    }

    #[test]
    fn test_fractions_sum_to_one_across_hubs_without_hub_filter() {
        let api = StubMetricsApi::new(compute_only(vec![
            series("prod", "alice", &[(DAY_ONE, "6")]),
            series("staging", "bob", &[(DAY_ONE, "2")]),
        ]));
        let records = aggregator(&api, UsageMode::AbsoluteTotals)
            .query_usage(&range(), None, Some("compute"), None)
            .unwrap();

        let total: f64 = records.iter().map(|r| r.value).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((records.iter().find(|r| r.user == "alice").unwrap().value - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_hub_filter_normalizes_within_hub() {
        let api = StubMetricsApi::new(compute_only(vec![
            series("prod", "alice", &[(DAY_ONE, "6")]),
            series("prod", "bob", &[(DAY_ONE, "2")]),
            series("staging", "carol", &[(DAY_ONE, "100")]),
        ]));
        let records = aggregator(&api, UsageMode::AbsoluteTotals)
            .query_usage(&range(), Some("prod"), Some("compute"), None)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.hub == "prod"));
        let total: f64 = records.iter().map(|r| r.value).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((records.iter().find(|r| r.user == "alice").unwrap().value - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_zero_total_yields_all_zero_fractions() {
        let api = StubMetricsApi::new(compute_only(vec![
            series("prod", "alice", &[(DAY_ONE, "0")]),
            series("prod", "bob", &[(DAY_ONE, "0")]),
        ]));
        let records = aggregator(&api, UsageMode::AbsoluteTotals)
            .query_usage(&range(), None, Some("compute"), None)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.value == 0.0));
    }

    #[test]
    fn test_precomputed_shares_are_averaged_not_normalized() {
        let api = StubMetricsApi::new(compute_only(vec![
            series("prod", "alice", &[(DAY_ONE, "0.8"), (DAY_ONE + 3600.0, "0.7")]),
            series("prod", "bob", &[(DAY_ONE, "0.2"), (DAY_ONE + 3600.0, "0.3")]),
        ]));
        let records = aggregator(&api, UsageMode::PrecomputedShares)
            .query_usage(&range(), None, Some("compute"), None)
            .unwrap();

        let alice = records.iter().find(|r| r.user == "alice").unwrap();
        let bob = records.iter().find(|r| r.user == "bob").unwrap();
        assert!((alice.value - 0.75).abs() < 1e-9);
        assert!((bob.value - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_user_filter_applied_after_normalization() {
        let api = StubMetricsApi::new(compute_only(vec![
            series("prod", "alice", &[(DAY_ONE, "6")]),
            series("prod", "bob", &[(DAY_ONE, "2")]),
        ]));
        let records = aggregator(&api, UsageMode::AbsoluteTotals)
            .query_usage(&range(), None, Some("compute"), Some("bob"))
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user, "bob");
        // bob still holds his share of the full group, not 1.0
        assert!((records[0].value - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_sorted_by_date_component_hub_user() {
        let api = StubMetricsApi::new(compute_only(vec![
            series("staging", "zoe", &[(DAY_TWO, "1"), (DAY_ONE, "1")]),
            series("prod", "alice", &[(DAY_ONE, "1")]),
        ]));
        let records = aggregator(&api, UsageMode::AbsoluteTotals)
            .query_usage(&range(), None, Some("compute"), None)
            .unwrap();

        let keys: Vec<(NaiveDate, &str, &str)> = records
            .iter()
            .map(|r| (r.date, r.hub.as_str(), r.user.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (date("2024-01-15"), "prod", "alice"),
                (date("2024-01-15"), "staging", "zoe"),
                (date("2024-01-16"), "staging", "zoe"),
            ]
        );
    }

    #[test]
    fn test_missing_user_label_is_unexpected_shape() {
        let mut broken = series("prod", "alice", &[(DAY_ONE, "1")]);
        broken.metric.remove(USER_LABEL);
        let api = StubMetricsApi::new(compute_only(vec![broken]));
        let err = aggregator(&api, UsageMode::AbsoluteTotals)
            .query_usage(&range(), None, Some("compute"), None)
            .unwrap_err();
        assert!(matches!(err, HubcostError::UnexpectedShape(_)));
    }

    #[test]
    fn test_all_components_queried_and_cached() {
        let api = StubMetricsApi::new(HashMap::from([
            (
                queries::MEMORY_REQUESTS_PER_USER,
                vec![series("prod", "alice", &[(DAY_ONE, "1")])],
            ),
            (
                queries::STORAGE_USAGE_PER_USER,
                vec![series("prod", "alice", &[(DAY_ONE, "1")])],
            ),
        ]));
        let agg = aggregator(&api, UsageMode::AbsoluteTotals);

        let records = agg.query_usage(&range(), None, None, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(api.calls.get(), 2);

        // second run served from the series cache
        agg.query_usage(&range(), None, None, None).unwrap();
        assert_eq!(api.calls.get(), 2);
    }

    #[test]
    fn test_unknown_component_returns_empty() {
        let api = StubMetricsApi::new(compute_only(vec![]));
        let records = aggregator(&api, UsageMode::AbsoluteTotals)
            .query_usage(&range(), None, Some("networking"), None)
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(api.calls.get(), 0);
    }

    #[test]
    fn test_usage_mode_parsing() {
        assert_eq!(
            "absolute".parse::<UsageMode>().unwrap(),
            UsageMode::AbsoluteTotals
        );
        assert_eq!(
            "precomputed-shares".parse::<UsageMode>().unwrap(),
            UsageMode::PrecomputedShares
        );
        assert!("bogus".parse::<UsageMode>().is_err());
    }
}

//! Billing aggregation: filtered/grouped cost queries, service-to-component
//! coalescing, and the home-storage cost reallocation
//!
//! The billing API's service-dimension grouping cannot separate general
//! compute cost from the slice of the same service that belongs to
//! home-directory storage. A second, narrower query isolates that slice,
//! which is then moved between components after the grouped query.

pub mod client;
pub mod filters;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::cache::{CacheConfig, TtlCache};
use crate::dates::DateRange;
use crate::types::{ComponentCostRecord, CostRecord, HubcostError, Result};

use client::{BillingApi, CostQuery, CostResponse, Filter, GroupBy, MatchExpr, MetricAmount, TimePeriod};
use filters::{
    COMPUTE_COMPONENT, GRANULARITY_DAILY, HOME_STORAGE_COMPONENT, HUB_TAG_KEY,
    METRIC_UNBLENDED_COST, MIXED_COMPUTE_SERVICE,
};

/// Issues billing queries through an injected [`BillingApi`] client and
/// reduces the responses to date-indexed cost records. Every public query
/// is fronted by the TTL cache.
pub struct BillingAggregator<B> {
    api: B,
    cluster_name: String,
    hub_names: TtlCache<Vec<String>>,
    cost_series: TtlCache<Vec<CostRecord>>,
    component_series: TtlCache<Vec<ComponentCostRecord>>,
}

impl<B: BillingApi> BillingAggregator<B> {
    pub fn new(api: B, cluster_name: impl Into<String>, cache: CacheConfig) -> Self {
        Self {
            api,
            cluster_name: cluster_name.into(),
            hub_names: TtlCache::new(cache),
            cost_series: TtlCache::new(cache),
            component_series: TtlCache::new(cache),
        }
    }

    /// Distinct hub-tag values seen in the period. The empty tag value is
    /// cost not attributed to any one hub, reported as "shared".
    pub fn query_hub_names(&self, range: &DateRange) -> Result<Vec<String>> {
        let key = format!("hub-names:{}", range.cache_key());
        self.hub_names.get_or_insert_with(&key, || {
            let (from, to) = range.billing_range();
            let tags = self.api.tag_values(HUB_TAG_KEY, &from, &to)?;
            Ok(tags
                .into_iter()
                .map(|tag| if tag.is_empty() { "shared".to_string() } else { tag })
                .collect())
        })
    }

    /// Total account cost and total attributable cost as one date-sorted
    /// series discriminated by the `name` field.
    ///
    /// Not every cost can be attributed: accessing the billing API itself,
    /// for example, carries no cluster tag.
    pub fn query_total_costs(&self, range: &DateRange) -> Result<Vec<CostRecord>> {
        let key = format!("total-costs:{}", range.cache_key());
        self.cost_series.get_or_insert_with(&key, || {
            let mut records = self.total_costs_series(range, false)?;
            records.extend(self.total_costs_series(range, true)?);
            // stable sort keeps account before attributable within a date
            records.sort_by_key(|record| record.date);
            Ok(records)
        })
    }

    /// Attributable cost grouped by hub tag; the tag-absent group is
    /// reported as "shared".
    pub fn query_total_costs_per_hub(&self, range: &DateRange) -> Result<Vec<CostRecord>> {
        let key = format!("costs-per-hub:{}", range.cache_key());
        self.cost_series.get_or_insert_with(&key, || {
            let filter = Filter::And(vec![
                filters::usage_costs_filter(),
                filters::attributable_costs_filter(&self.cluster_name),
            ]);
            let response = self.run_query(range, filter, vec![filters::group_by_hub_tag()])?;

            let mut records = Vec::new();
            for result in &response.results_by_time {
                let date = parse_date(&result.time_period.start)?;
                for group in &result.groups {
                    let raw = group.keys.first().ok_or_else(|| {
                        HubcostError::UnexpectedShape("cost group without keys".to_string())
                    })?;
                    // group keys look like "2i2c:hub-name$prod"
                    let hub = raw
                        .split_once('$')
                        .map(|(_, hub)| hub)
                        .ok_or_else(|| {
                            HubcostError::UnexpectedShape(format!(
                                "hub group key without tag separator: {raw:?}"
                            ))
                        })?;
                    records.push(CostRecord {
                        date,
                        cost: round2(metric_amount(&group.metrics)?),
                        name: if hub.is_empty() {
                            "shared".to_string()
                        } else {
                            hub.to_string()
                        },
                    });
                }
            }
            records.sort_by_key(|record| record.date);
            Ok(records)
        })
    }

    /// Attributable cost per logical component, with the home-storage
    /// reallocation applied. One record per (date, component), date-sorted.
    ///
    /// A `hub` filter restricts to cost tagged with that hub, or to
    /// untagged cost for "shared". A `component` filter restricts the
    /// returned records to that component.
    pub fn query_total_costs_per_component(
        &self,
        range: &DateRange,
        hub: Option<&str>,
        component: Option<&str>,
    ) -> Result<Vec<ComponentCostRecord>> {
        let key = format!(
            "costs-per-component:{}:{}:{}",
            range.cache_key(),
            hub.unwrap_or("*"),
            component.unwrap_or("*"),
        );
        self.component_series.get_or_insert_with(&key, || {
            let mut filter_parts = vec![
                filters::usage_costs_filter(),
                filters::attributable_costs_filter(&self.cluster_name),
            ];
            match hub {
                Some("shared") => {
                    filter_parts.push(Filter::Tags(MatchExpr::absent(HUB_TAG_KEY)));
                }
                Some(hub_name) => {
                    filter_parts.push(Filter::Tags(MatchExpr::equals(HUB_TAG_KEY, &[hub_name])));
                }
                None => {}
            }

            let grouped = self.run_query(
                range,
                Filter::And(filter_parts.clone()),
                vec![filters::group_by_service_dimension()],
            )?;

            let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
            for result in &grouped.results_by_time {
                let date = parse_date(&result.time_period.start)?;
                let day = by_date.entry(date).or_default();
                for group in &result.groups {
                    let service = group.keys.first().ok_or_else(|| {
                        HubcostError::UnexpectedShape("cost group without keys".to_string())
                    })?;
                    let component_name = filters::component_for_service(service);
                    *day.entry(component_name.to_string()).or_insert(0.0) +=
                        metric_amount(&group.metrics)?;
                }
            }

            // isolate the storage-tagged slice of the mixed service and
            // move it from compute to home storage
            filter_parts.push(filters::home_storage_costs_filter());
            let storage = self.run_query(
                range,
                Filter::And(filter_parts),
                vec![filters::group_by_service_dimension()],
            )?;
            for result in &storage.results_by_time {
                let date = parse_date(&result.time_period.start)?;
                let mut slice = 0.0;
                for group in &result.groups {
                    if group.keys.first().map(String::as_str) == Some(MIXED_COMPUTE_SERVICE) {
                        slice += metric_amount(&group.metrics)?;
                    }
                }
                if slice <= 0.0 {
                    continue;
                }
                let day = by_date.entry(date).or_default();
                if let Some(compute) = day.get_mut(COMPUTE_COMPONENT) {
                    let adjusted = (*compute - slice).max(0.0);
                    debug!(%date, before = *compute, after = adjusted, "reallocated storage-tagged cost out of compute");
                    *compute = adjusted;
                }
                *day.entry(HOME_STORAGE_COMPONENT.to_string()).or_insert(0.0) += slice;
            }

            let mut records = Vec::new();
            for (date, components) in by_date {
                for (component_name, cost) in components {
                    if component.is_some_and(|wanted| wanted != component_name) {
                        continue;
                    }
                    records.push(ComponentCostRecord {
                        date,
                        cost: round2(cost),
                        component: component_name,
                    });
                }
            }
            Ok(records)
        })
    }

    fn total_costs_series(&self, range: &DateRange, attributable: bool) -> Result<Vec<CostRecord>> {
        let (name, filter) = if attributable {
            (
                "attributable",
                Filter::And(vec![
                    filters::usage_costs_filter(),
                    filters::attributable_costs_filter(&self.cluster_name),
                ]),
            )
        } else {
            ("account", filters::usage_costs_filter())
        };

        let response = self.run_query(range, filter, Vec::new())?;
        response
            .results_by_time
            .iter()
            .map(|result| {
                Ok(CostRecord {
                    date: parse_date(&result.time_period.start)?,
                    cost: round2(metric_amount(&result.total)?),
                    name: name.to_string(),
                })
            })
            .collect()
    }

    /// Run one cost query and refuse truncated responses outright rather
    /// than account partial totals.
    fn run_query(
        &self,
        range: &DateRange,
        filter: Filter,
        group_by: Vec<GroupBy>,
    ) -> Result<CostResponse> {
        let (from, to) = range.billing_range();
        let query = CostQuery {
            metrics: vec![METRIC_UNBLENDED_COST.to_string()],
            granularity: GRANULARITY_DAILY.to_string(),
            time_period: TimePeriod {
                start: from.clone(),
                end: to.clone(),
            },
            filter,
            group_by,
        };
        let response = self.api.cost_and_usage(&query)?;
        if response.next_page_token.is_some() {
            return Err(HubcostError::UnsupportedPagination { from, to });
        }
        Ok(response)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HubcostError::UnexpectedShape(format!("unparsable period start: {raw:?}")))
}

fn metric_amount(metrics: &std::collections::HashMap<String, MetricAmount>) -> Result<f64> {
    let metric = metrics.get(METRIC_UNBLENDED_COST).ok_or_else(|| {
        HubcostError::UnexpectedShape(format!("missing {METRIC_UNBLENDED_COST} metric"))
    })?;
    metric.amount.parse::<f64>().map_err(|_| {
        HubcostError::UnexpectedShape(format!("non-numeric amount: {:?}", metric.amount))
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

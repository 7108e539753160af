//! Joins billing and usage results into per-user cost allocations

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::billing::client::BillingApi;
use crate::billing::filters::HOME_STORAGE_COMPONENT;
use crate::billing::BillingAggregator;
use crate::dates::DateRange;
use crate::types::{Result, UserCostRecord};
use crate::usage::client::MetricsApi;
use crate::usage::UsageAggregator;

/// Per-user share of each day's home-storage cost.
///
/// Joins the per-date "home storage" component cost with per-(date, user)
/// usage fractions for the same component and hub filter. A date present
/// in only one source contributes nothing; the set of users per date is
/// determined by the fraction source.
pub fn query_total_storage_costs_per_user<B: BillingApi, M: MetricsApi>(
    billing: &BillingAggregator<B>,
    usage: &UsageAggregator<M>,
    range: &DateRange,
    hub: Option<&str>,
) -> Result<Vec<UserCostRecord>> {
    let component_costs = billing.query_total_costs_per_component(range, hub, None)?;
    let storage_cost_by_date: HashMap<NaiveDate, f64> = component_costs
        .into_iter()
        .filter(|record| record.component == HOME_STORAGE_COMPONENT)
        .map(|record| (record.date, record.cost))
        .collect();

    let fractions = usage.query_usage(range, hub, Some(HOME_STORAGE_COMPONENT), None)?;

    let mut records: Vec<UserCostRecord> = fractions
        .into_iter()
        .filter_map(|fraction| {
            storage_cost_by_date
                .get(&fraction.date)
                .map(|total| UserCostRecord {
                    date: fraction.date,
                    user: fraction.user,
                    cost: round4(total * fraction.value),
                })
        })
        .collect();
    records.sort_by(|a, b| (a.date, &a.user).cmp(&(b.date, &b.user)));
    Ok(records)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

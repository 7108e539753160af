//! Static query constants: metric names, filter trees, and the
//! service-to-component mapping table

use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::warn;

use super::client::{Filter, GroupBy, MatchExpr};

/// UnblendedCost is the per-account cost, matching what the provider's web
/// console shows by default. Blended metrics fold in organization-level
/// pricing tiers and would misattribute savings.
pub const METRIC_UNBLENDED_COST: &str = "UnblendedCost";

/// Hourly granularity is only retained for a couple of days upstream;
/// daily covers the full 13-month window.
pub const GRANULARITY_DAILY: &str = "DAILY";

pub const HUB_TAG_KEY: &str = "2i2c:hub-name";
pub const SERVICE_DIMENSION: &str = "SERVICE";

/// The one billed service known to mix general compute cost with
/// home-directory block-storage cost (volumes and snapshots). Its
/// storage-tagged slice is re-attributed by the aggregator.
pub const MIXED_COMPUTE_SERVICE: &str = "EC2 - Other";

pub const COMPUTE_COMPONENT: &str = "compute";
pub const HOME_STORAGE_COMPONENT: &str = "home storage";
pub const FALLBACK_COMPONENT: &str = "other";

/// Billing service name to logical component. EC2 - Other maps to compute
/// here even though part of it belongs to home storage; that slice is moved
/// by the reallocation step after the grouped query.
static SERVICE_COMPONENT_MAP: &[(&str, &str)] = &[
    ("AWS Backup", "backup"),
    ("EC2 - Other", COMPUTE_COMPONENT),
    ("Amazon Elastic Compute Cloud - Compute", COMPUTE_COMPONENT),
    ("Amazon Elastic Container Service for Kubernetes", "core"),
    ("Amazon Elastic File System", HOME_STORAGE_COMPONENT),
    ("Amazon Elastic Load Balancing", "networking"),
    ("Amazon Simple Storage Service", "object storage"),
    ("Amazon Virtual Private Cloud", "networking"),
];

static UNMAPPED_SEEN: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Pure table lookup, no default
pub fn lookup_component(service_name: &str) -> Option<&'static str> {
    SERVICE_COMPONENT_MAP
        .iter()
        .find(|(service, _)| *service == service_name)
        .map(|(_, component)| *component)
}

/// Map a billing service name to its component, defaulting unmapped names
/// to "other". Each distinct unmapped name is warned about once per
/// process, not once per call.
pub fn component_for_service(service_name: &str) -> &'static str {
    match lookup_component(service_name) {
        Some(component) => component,
        None => {
            let mut seen = UNMAPPED_SEEN.lock().unwrap_or_else(|e| e.into_inner());
            if seen.insert(service_name.to_string()) {
                warn!(service = service_name, "service not categorized as a component yet");
            }
            FALLBACK_COMPONENT
        }
    }
}

/// Restrict to actual usage charges, excluding credits, tax, refunds etc.
pub fn usage_costs_filter() -> Filter {
    Filter::Dimensions(MatchExpr::equals("RECORD_TYPE", &["Usage"]))
}

/// Cost traceable to the cluster via any of its ownership tags.
///
/// The Not-Absent hub-name and node-purpose arms are a patch to capture
/// resources tagged before the cluster-name tags were rolled out, kept
/// until that date range stops mattering.
pub fn attributable_costs_filter(cluster_name: &str) -> Filter {
    Filter::Or(vec![
        Filter::Tags(MatchExpr::equals(
            "alpha.eksctl.io/cluster-name",
            &[cluster_name],
        )),
        Filter::Tags(MatchExpr::equals(
            &format!("kubernetes.io/cluster/{cluster_name}"),
            &["owned"],
        )),
        Filter::Tags(MatchExpr::equals("2i2c.org/cluster-name", &[cluster_name])),
        Filter::Not(Box::new(Filter::Tags(MatchExpr::absent(HUB_TAG_KEY)))),
        Filter::Not(Box::new(Filter::Tags(MatchExpr::absent("2i2c:node-purpose")))),
    ])
}

/// The storage-tagged slice of block-storage cost (home directory volumes)
pub fn home_storage_costs_filter() -> Filter {
    Filter::Tags(MatchExpr::equals("2i2c:volume-purpose", &["home-nfs"]))
}

pub fn group_by_hub_tag() -> GroupBy {
    GroupBy {
        kind: "TAG".to_string(),
        key: HUB_TAG_KEY.to_string(),
    }
}

pub fn group_by_service_dimension() -> GroupBy {
    GroupBy {
        kind: "DIMENSION".to_string(),
        key: SERVICE_DIMENSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_services_map_to_components() {
        assert_eq!(lookup_component("AWS Backup"), Some("backup"));
        assert_eq!(lookup_component("EC2 - Other"), Some("compute"));
        assert_eq!(
            lookup_component("Amazon Elastic File System"),
            Some("home storage")
        );
        assert_eq!(
            lookup_component("Amazon Virtual Private Cloud"),
            Some("networking")
        );
    }

    #[test]
    fn test_unmapped_service_defaults_to_other() {
        assert_eq!(lookup_component("Amazon SageMaker"), None);
        assert_eq!(component_for_service("Amazon SageMaker"), "other");
        // repeated calls stay on the default path without error
        assert_eq!(component_for_service("Amazon SageMaker"), "other");
    }

    #[test]
    fn test_unmapped_name_recorded_once() {
        component_for_service("Amazon Kendra");
        component_for_service("Amazon Kendra");
        let seen = UNMAPPED_SEEN.lock().unwrap();
        assert_eq!(
            seen.iter().filter(|name| name.as_str() == "Amazon Kendra").count(),
            1
        );
    }

    #[test]
    fn test_attributable_filter_covers_cluster_tags() {
        let filter = attributable_costs_filter("demo-cluster");
        let json = serde_json::to_value(&filter).unwrap();
        let arms = json["Or"].as_array().unwrap();
        assert_eq!(arms.len(), 5);
        assert_eq!(arms[0]["Tags"]["Values"][0], "demo-cluster");
        assert_eq!(arms[1]["Tags"]["Key"], "kubernetes.io/cluster/demo-cluster");
        assert_eq!(arms[1]["Tags"]["Values"][0], "owned");
        assert_eq!(arms[3]["Not"]["Tags"]["Key"], "2i2c:hub-name");
    }

    #[test]
    fn test_home_storage_filter_targets_volume_purpose_tag() {
        let json = serde_json::to_value(home_storage_costs_filter()).unwrap();
        assert_eq!(json["Tags"]["Key"], "2i2c:volume-purpose");
        assert_eq!(json["Tags"]["Values"][0], "home-nfs");
    }
}

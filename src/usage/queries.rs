//! Per-component metrics query expressions
//!
//! Each tracked component has one PromQL expression returning per-(hub, user)
//! sample series. The `namespace` label carries the hub and the `username`
//! label carries the user.

pub const HUB_LABEL: &str = "namespace";
pub const USER_LABEL: &str = "username";

/// Per-user memory requests. Pods can be created and deleted within
/// minutes, which is why the default sampling step is small.
pub const MEMORY_REQUESTS_PER_USER: &str = r#"
    label_replace(
        sum(
            kube_pod_container_resource_requests{resource="memory", namespace=~".*", pod=~"jupyter-.*"} * on (namespace, pod)
            group_left(annotation_hub_jupyter_org_username) group(
                kube_pod_annotations{namespace=~".*", annotation_hub_jupyter_org_username=~".*"}
            ) by (pod, namespace, annotation_hub_jupyter_org_username)
        ) by (annotation_hub_jupyter_org_username, namespace),
        "username", "$1", "annotation_hub_jupyter_org_username", "(.*)"
    )
"#;

/// Per-user home directory size
pub const STORAGE_USAGE_PER_USER: &str = r#"
    label_replace(
        sum(dirsize_total_size_bytes{namespace=~".*"}) by (namespace, directory),
        "username", "$1", "directory", "(.*)"
    )
"#;

/// Tracked components in output order
pub fn usage_queries() -> &'static [(&'static str, &'static str)] {
    &[
        ("compute", MEMORY_REQUESTS_PER_USER),
        ("home storage", STORAGE_USAGE_PER_USER),
    ]
}

pub fn query_for_component(component: &str) -> Option<&'static str> {
    usage_queries()
        .iter()
        .find(|(name, _)| *name == component)
        .map(|(_, query)| *query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_components() {
        let components: Vec<&str> = usage_queries().iter().map(|(name, _)| *name).collect();
        assert_eq!(components, vec!["compute", "home storage"]);
    }

    #[test]
    fn test_query_lookup() {
        assert_eq!(
            query_for_component("home storage"),
            Some(STORAGE_USAGE_PER_USER)
        );
        assert!(query_for_component("networking").is_none());
    }
}

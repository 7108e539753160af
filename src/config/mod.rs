//! Environment-derived settings
//!
//! Deployment injects everything through environment variables, matching
//! how the service runs inside the cluster.

use std::time::Duration;

use anyhow::Context;

use crate::cache::CacheConfig;
use crate::usage::UsageMode;

#[derive(Debug, Clone)]
pub struct Config {
    /// Cluster whose ownership tags mark attributable cost
    pub cluster_name: String,
    pub billing_api_url: String,
    pub prometheus_host: String,
    pub cache: CacheConfig,
    pub usage_mode: UsageMode,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let cluster_name = get("CLUSTER_NAME").context("CLUSTER_NAME must be set")?;
        let billing_api_url = get("BILLING_API_URL").context("BILLING_API_URL must be set")?;
        let prometheus_host =
            get("PROMETHEUS_HOST").unwrap_or_else(|| "http://localhost:9090".to_string());

        let ttl_seconds = get("CACHE_TTL_SECONDS")
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .context("CACHE_TTL_SECONDS must be an integer")?
            .unwrap_or(3600);
        let capacity = get("CACHE_CAPACITY")
            .map(|raw| raw.parse::<usize>())
            .transpose()
            .context("CACHE_CAPACITY must be an integer")?
            .unwrap_or(128);

        let usage_mode = get("USAGE_MODE")
            .map(|raw| raw.parse::<UsageMode>())
            .transpose()
            .map_err(anyhow::Error::msg)?
            .unwrap_or(UsageMode::AbsoluteTotals);

        Ok(Self {
            cluster_name,
            billing_api_url,
            prometheus_host,
            cache: CacheConfig {
                ttl: Duration::from_secs(ttl_seconds),
                capacity,
            },
            usage_mode,
        })
    }
}

//! CLI command handling
//!
//! Each subcommand mirrors one dashboard endpoint: it parses the raw
//! from/to values into a [`DateRange`], runs the aggregation, and prints
//! the resulting records as pretty JSON.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::billing::client::HttpBillingApi;
use crate::billing::BillingAggregator;
use crate::config::Config;
use crate::dates::DateRange;
use crate::reports;
use crate::usage::client::HttpMetricsApi;
use crate::usage::UsageAggregator;

/// Attributed cloud cost & usage breakdowns for multi-tenant clusters
#[derive(Parser)]
#[command(name = "hubcost")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RangeArgs {
    /// Start date (YYYY-MM-DD or RFC 3339); defaults to 30 days before the end
    #[arg(long)]
    from: Option<String>,

    /// End date (YYYY-MM-DD or RFC 3339); defaults to the current UTC date
    #[arg(long)]
    to: Option<String>,
}

impl RangeArgs {
    fn resolve(&self) -> crate::types::Result<DateRange> {
        DateRange::parse(self.from.as_deref(), self.to.as_deref())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List hub names seen in the billing data
    HubNames {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Daily account and attributable cost totals
    TotalCosts {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Daily attributable cost per hub
    TotalCostsPerHub {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Daily attributable cost per component
    TotalCostsPerComponent {
        #[command(flatten)]
        range: RangeArgs,

        /// Restrict to one hub ("shared" for untagged cost)
        #[arg(long)]
        hub: Option<String>,

        /// Restrict output to one component
        #[arg(long)]
        component: Option<String>,
    },

    /// Daily per-user usage fractions
    Usage {
        #[command(flatten)]
        range: RangeArgs,

        #[arg(long)]
        hub: Option<String>,

        #[arg(long)]
        component: Option<String>,

        #[arg(long)]
        user: Option<String>,
    },

    /// Per-user share of daily home storage cost
    StorageCostsPerUser {
        #[command(flatten)]
        range: RangeArgs,

        #[arg(long)]
        hub: Option<String>,
    },
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        let config = Config::from_env()?;
        let billing = BillingAggregator::new(
            HttpBillingApi::new(config.billing_api_url.clone()),
            config.cluster_name.clone(),
            config.cache,
        );
        let usage = UsageAggregator::new(
            HttpMetricsApi::new(config.prometheus_host.clone()),
            config.usage_mode,
            config.cache,
        );

        match self.command {
            Commands::HubNames { range } => {
                print_json(&billing.query_hub_names(&range.resolve()?)?)
            }
            Commands::TotalCosts { range } => {
                print_json(&billing.query_total_costs(&range.resolve()?)?)
            }
            Commands::TotalCostsPerHub { range } => {
                print_json(&billing.query_total_costs_per_hub(&range.resolve()?)?)
            }
            Commands::TotalCostsPerComponent {
                range,
                hub,
                component,
            } => print_json(&billing.query_total_costs_per_component(
                &range.resolve()?,
                hub.as_deref(),
                component.as_deref(),
            )?),
            Commands::Usage {
                range,
                hub,
                component,
                user,
            } => print_json(&usage.query_usage(
                &range.resolve()?,
                hub.as_deref(),
                component.as_deref(),
                user.as_deref(),
            )?),
            Commands::StorageCostsPerUser { range, hub } => {
                print_json(&reports::query_total_storage_costs_per_user(
                    &billing,
                    &usage,
                    &range.resolve()?,
                    hub.as_deref(),
                )?)
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["hubcost"]).is_err());
    }

    #[test]
    fn test_cli_parse_hub_names() {
        let cli = Cli::try_parse_from(["hubcost", "hub-names"]).unwrap();
        assert!(matches!(cli.command, Commands::HubNames { .. }));
    }

    #[test]
    fn test_cli_parse_total_costs_with_range() {
        let cli = Cli::try_parse_from([
            "hubcost",
            "total-costs",
            "--from",
            "2024-08-01",
            "--to",
            "2024-08-31",
        ])
        .unwrap();
        match cli.command {
            Commands::TotalCosts { range } => {
                assert_eq!(range.from.as_deref(), Some("2024-08-01"));
                assert_eq!(range.to.as_deref(), Some("2024-08-31"));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_cli_parse_per_component_filters() {
        let cli = Cli::try_parse_from([
            "hubcost",
            "total-costs-per-component",
            "--hub",
            "shared",
            "--component",
            "home storage",
        ])
        .unwrap();
        match cli.command {
            Commands::TotalCostsPerComponent { hub, component, .. } => {
                assert_eq!(hub.as_deref(), Some("shared"));
                assert_eq!(component.as_deref(), Some("home storage"));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_cli_parse_usage_filters() {
        let cli =
            Cli::try_parse_from(["hubcost", "usage", "--hub", "prod", "--user", "alice"]).unwrap();
        match cli.command {
            Commands::Usage {
                hub,
                user,
                component,
                ..
            } => {
                assert_eq!(hub.as_deref(), Some("prod"));
                assert_eq!(user.as_deref(), Some("alice"));
                assert!(component.is_none());
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_cli_parse_storage_costs_per_user() {
        let cli =
            Cli::try_parse_from(["hubcost", "storage-costs-per-user", "--hub", "prod"]).unwrap();
        assert!(matches!(cli.command, Commands::StorageCostsPerUser { .. }));
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["hubcost", "backup"]).is_err());
    }
}

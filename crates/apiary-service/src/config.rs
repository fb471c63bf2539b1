// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Service configuration.

use std::{path::Path, time::Duration};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use url::Url;

/// Configuration of the orchestration engine.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// How often the hive reloads the node list from the store.
    #[serde(rename = "hive_refresh_interval_secs")]
    #[serde_as(as = "DurationSeconds")]
    pub hive_refresh_interval: Duration,
    /// Delay between reconciliation cycles of the provisioning worker.
    #[serde(rename = "queue_poll_interval_secs")]
    #[serde_as(as = "DurationSeconds")]
    pub queue_poll_interval: Duration,
    /// How often lapsed plans are swept.
    #[serde(rename = "plan_sweep_interval_secs")]
    #[serde_as(as = "DurationSeconds")]
    pub plan_sweep_interval: Duration,
    /// How often batch TTLs are checked.
    #[serde(rename = "ttl_sweep_interval_secs")]
    #[serde_as(as = "DurationSeconds")]
    pub ttl_sweep_interval: Duration,
    /// How often the operating wallet balance is checked.
    #[serde(rename = "wallet_sweep_interval_secs")]
    #[serde_as(as = "DurationSeconds")]
    pub wallet_sweep_interval: Duration,
    /// Remaining batch TTL below which a bridging top-up is queued.
    #[serde(rename = "batch_ttl_threshold_secs")]
    #[serde_as(as = "DurationSeconds")]
    pub batch_ttl_threshold: Duration,
    /// Days added to `paid_until` per successful payment.
    pub paid_period_days: i64,
    /// Days of capacity purchased with a new batch.
    pub creation_days: u64,
    /// Days of capacity added by a renewal top-up.
    pub renewal_days: u64,
    /// Days of capacity added by a bridging top-up near expiry.
    pub top_up_days: u64,
    /// Alert floor for the aggregate operating wallet balance, in PLUR.
    pub min_wallet_balance_plur: u128,
    /// Chat webhook receiving operator alerts; alerts are logged when unset.
    pub alert_webhook_url: Option<Url>,
    /// Node rows seeded into the store at boot.
    pub bees: Vec<BeeSeed>,
}

/// A storage-node row seeded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeeSeed {
    /// Display name.
    pub name: String,
    /// Base URL of the node's API.
    pub url: String,
    /// Optional bearer secret.
    #[serde(default)]
    pub secret: Option<String>,
    /// Whether the node accepts uploads and batch creation.
    #[serde(default = "defaults::enabled")]
    pub upload_enabled: bool,
    /// Whether the node serves downloads.
    #[serde(default = "defaults::enabled")]
    pub download_enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            hive_refresh_interval: Duration::from_secs(120),
            queue_poll_interval: Duration::from_secs(5),
            plan_sweep_interval: Duration::from_secs(5 * 60),
            ttl_sweep_interval: Duration::from_secs(30 * 60),
            wallet_sweep_interval: Duration::from_secs(10 * 60),
            batch_ttl_threshold: Duration::from_secs(3 * 24 * 60 * 60),
            paid_period_days: 31,
            creation_days: 30,
            renewal_days: 31,
            top_up_days: 3,
            // 10 BZZ at 16 decimals.
            min_wallet_balance_plur: 100_000_000_000_000_000,
            alert_webhook_url: None,
            bees: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Reads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config from '{}'", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("unable to parse config at '{}'", path.display()))
    }

    /// A config with millisecond-scale intervals to speed up tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn default_for_test() -> Self {
        Self {
            hive_refresh_interval: Duration::from_millis(20),
            queue_poll_interval: Duration::from_millis(10),
            plan_sweep_interval: Duration::from_millis(10),
            ttl_sweep_interval: Duration::from_millis(10),
            wallet_sweep_interval: Duration::from_millis(10),
            ..Self::default()
        }
    }
}

mod defaults {
    pub(super) fn enabled() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_takes_all_defaults() {
        let config: ServiceConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let config: ServiceConfig = serde_yaml::from_str(
            r#"
            queue_poll_interval_secs: 2
            top_up_days: 5
            bees:
              - name: queen
                url: "http://bee-1.internal:1633"
              - name: worker
                url: "http://bee-2.internal:1633"
                download_enabled: false
            "#,
        )
        .expect("parse");

        assert_eq!(config.queue_poll_interval, Duration::from_secs(2));
        assert_eq!(config.top_up_days, 5);
        assert_eq!(config.plan_sweep_interval, Duration::from_secs(300));
        assert_eq!(config.bees.len(), 2);
        assert!(config.bees[0].upload_enabled && config.bees[0].download_enabled);
        assert!(!config.bees[1].download_enabled);
    }
}

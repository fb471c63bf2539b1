// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Usage-metric bookkeeping the lifecycle delegates to.

use std::sync::Arc;

use apiary_core::OrganizationId;
use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::store::{Store, UsageMetricKind};

/// Days in a usage accounting period.
const PERIOD_DAYS: i64 = 30;

/// Quota bookkeeping for organizations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageMetrics: std::fmt::Debug + Send + Sync {
    /// Creates the zeroed metric rows for a fresh organization.
    async fn create_initial_metrics(&self, organization_id: OrganizationId) -> anyhow::Result<()>;

    /// Raises the organization's ceilings to the given plan limits.
    async fn upgrade_current_metrics(
        &self,
        organization_id: OrganizationId,
        upload_size_limit: u64,
        download_size_limit: u64,
    ) -> anyhow::Result<()>;

    /// Zeroes the organization's counters and restarts the period.
    async fn reset_for_organization(&self, organization_id: OrganizationId) -> anyhow::Result<()>;
}

/// [`UsageMetrics`] backed by the record store.
#[derive(Debug, Clone)]
pub struct StoreUsageMetrics {
    store: Arc<dyn Store>,
}

impl StoreUsageMetrics {
    /// Creates the collaborator over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UsageMetrics for StoreUsageMetrics {
    async fn create_initial_metrics(&self, organization_id: OrganizationId) -> anyhow::Result<()> {
        let period_ends_at = Utc::now() + Duration::days(PERIOD_DAYS);
        for kind in [UsageMetricKind::UploadedBytes, UsageMetricKind::DownloadedBytes] {
            self.store
                .insert_usage_metric(organization_id, kind, 0, period_ends_at)
                .await?;
        }
        Ok(())
    }

    async fn upgrade_current_metrics(
        &self,
        organization_id: OrganizationId,
        upload_size_limit: u64,
        download_size_limit: u64,
    ) -> anyhow::Result<()> {
        for metric in self.store.usage_metrics(organization_id).await? {
            let available = match metric.kind {
                UsageMetricKind::UploadedBytes => upload_size_limit,
                UsageMetricKind::DownloadedBytes => download_size_limit,
            };
            self.store
                .update_usage_metric(metric.id, None, Some(available), None)
                .await?;
        }
        Ok(())
    }

    async fn reset_for_organization(&self, organization_id: OrganizationId) -> anyhow::Result<()> {
        let period_ends_at = Utc::now() + Duration::days(PERIOD_DAYS);
        for metric in self.store.usage_metrics(organization_id).await? {
            self.store
                .update_usage_metric(metric.id, Some(0), None, Some(period_ends_at))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn upgrade_sets_per_kind_ceilings() {
        let store = Arc::new(MemoryStore::new());
        let org = store.insert_organization("acme");
        let metrics = StoreUsageMetrics::new(store.clone());

        metrics.create_initial_metrics(org).await.expect("create");
        metrics
            .upgrade_current_metrics(org, 4 << 30, 8 << 30)
            .await
            .expect("upgrade");

        for metric in store.usage_metrics(org).await.expect("list") {
            let expected = match metric.kind {
                UsageMetricKind::UploadedBytes => 4 << 30,
                UsageMetricKind::DownloadedBytes => 8 << 30,
            };
            assert_eq!(metric.available, expected);
            assert_eq!(metric.used, 0);
        }
    }

    #[tokio::test]
    async fn reset_zeroes_counters_and_restarts_the_period() {
        let store = Arc::new(MemoryStore::new());
        let org = store.insert_organization("acme");
        let metrics = StoreUsageMetrics::new(store.clone());
        metrics.create_initial_metrics(org).await.expect("create");

        let id = store.usage_metrics(org).await.expect("list")[0].id;
        store
            .update_usage_metric(id, Some(123), None, None)
            .await
            .expect("seed usage");

        metrics.reset_for_organization(org).await.expect("reset");
        for metric in store.usage_metrics(org).await.expect("list") {
            assert_eq!(metric.used, 0);
            assert!(metric.period_ends_at > Utc::now() + Duration::days(PERIOD_DAYS - 1));
        }
    }
}

// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Scheduled monitors: plan expiry, batch TTL, and the operating wallet.
//!
//! Each monitor is an independent interval task over the shared hive and
//! store. A failure while checking one organization is alerted and never
//! aborts the rest of the sweep.

use std::{sync::Arc, time::Duration};

use apiary_core::capacity;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    alert::Alerts,
    config::ServiceConfig,
    hive::Hive,
    lifecycle::PlanLifecycle,
    store::{PlanRecord, Store},
};

/// Cancels active plans whose paid period or scheduled cancellation has
/// passed, and re-queues batch creation for organizations whose provisioning
/// silently failed.
#[derive(Debug, Clone)]
pub struct PlanMonitor {
    store: Arc<dyn Store>,
    lifecycle: PlanLifecycle,
    alerts: Arc<dyn Alerts>,
    config: Arc<ServiceConfig>,
}

impl PlanMonitor {
    /// Creates the monitor.
    pub fn new(
        store: Arc<dyn Store>,
        lifecycle: PlanLifecycle,
        alerts: Arc<dyn Alerts>,
        config: Arc<ServiceConfig>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            alerts,
            config,
        }
    }

    /// Sweeps until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        run_sweeps("plan monitor", self.config.plan_sweep_interval, cancel, || {
            self.sweep()
        })
        .await;
    }

    /// Checks every active plan once.
    pub async fn sweep(&self) {
        let plans = match self.store.active_plans().await {
            Ok(plans) => plans,
            Err(error) => {
                tracing::error!(%error, "plan sweep failed to list active plans");
                return;
            }
        };
        for plan in plans {
            if let Err(error) = self.check_plan(&plan).await {
                tracing::error!(
                    organization_id = %plan.organization_id,
                    plan_id = %plan.id,
                    %error,
                    "plan sweep failed for organization",
                );
                self.alerts.send_alert(format!(
                    "plan sweep: failed to maintain plan {} of organization {}: {error:#}",
                    plan.id, plan.organization_id,
                ));
            }
        }
    }

    async fn check_plan(&self, plan: &PlanRecord) -> anyhow::Result<()> {
        let now = Utc::now();
        let lapsed = plan.paid_until.is_some_and(|t| t <= now)
            || plan.cancel_at.is_some_and(|t| t <= now);
        if lapsed {
            self.lifecycle.expire_plan(plan, "paid period ended").await?;
            return Ok(());
        }

        let organization = self.store.organization(plan.organization_id).await?;
        if organization.postage_batch_id.is_none()
            && !self.store.has_pending_create(organization.id).await?
        {
            // An active plan with neither a batch nor a queued creation means
            // provisioning failed silently upstream.
            self.alerts.send_alert(format!(
                "organization {} has an active plan {} but no postage batch; re-queueing creation",
                organization.id, plan.id,
            ));
            self.lifecycle
                .queue_batch_creation(organization.id, plan.storage_gigabytes())
                .await?;
        }
        Ok(())
    }
}

/// Watches the remaining TTL of every active organization's batch and queues
/// a bridging top-up when it runs low.
#[derive(Debug, Clone)]
pub struct ExpirationMonitor {
    store: Arc<dyn Store>,
    hive: Arc<Hive>,
    alerts: Arc<dyn Alerts>,
    config: Arc<ServiceConfig>,
}

impl ExpirationMonitor {
    /// Creates the monitor.
    pub fn new(
        store: Arc<dyn Store>,
        hive: Arc<Hive>,
        alerts: Arc<dyn Alerts>,
        config: Arc<ServiceConfig>,
    ) -> Self {
        Self {
            store,
            hive,
            alerts,
            config,
        }
    }

    /// Sweeps until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        run_sweeps("expiration monitor", self.config.ttl_sweep_interval, cancel, || {
            self.sweep()
        })
        .await;
    }

    /// Checks every active plan's batch once.
    pub async fn sweep(&self) {
        let plans = match self.store.active_plans().await {
            Ok(plans) => plans,
            Err(error) => {
                tracing::error!(%error, "TTL sweep failed to list active plans");
                return;
            }
        };
        self.audit_batch_count(plans.len()).await;
        for plan in plans {
            if let Err(error) = self.check_ttl(&plan).await {
                tracing::error!(
                    organization_id = %plan.organization_id,
                    %error,
                    "TTL check failed for organization",
                );
                self.alerts.send_alert(format!(
                    "TTL sweep: failed to check batch of organization {}: {error:#}",
                    plan.organization_id,
                ));
            }
        }
    }

    /// Compares the number of batches across the hive with the number of
    /// active plans; fewer batches than plans means at least one organization
    /// lost its capacity.
    async fn audit_batch_count(&self, active_plans: usize) {
        let mut total_batches = 0;
        for node in self.hive.nodes().iter() {
            match node.api().get_all_postage_batches().await {
                Ok(batches) => total_batches += batches.len(),
                Err(error) => {
                    tracing::warn!(bee_id = %node.id(), %error, "failed to list batches");
                    return;
                }
            }
        }
        if total_batches < active_plans {
            self.alerts.send_alert(format!(
                "fewer batches ({total_batches}) than active plans ({active_plans})",
            ));
        }
    }

    async fn check_ttl(&self, plan: &PlanRecord) -> anyhow::Result<()> {
        let organization = self.store.organization(plan.organization_id).await?;
        let Some(batch_id) = organization.postage_batch_id else {
            self.alerts.send_alert(format!(
                "organization {} has an active plan {} but no postage batch",
                organization.id, plan.id,
            ));
            return Ok(());
        };
        let Some(bee_id) = organization.bee_id else {
            self.alerts.send_alert(format!(
                "organization {} has batch {batch_id} but no assigned bee",
                organization.id,
            ));
            return Ok(());
        };

        let bee = self.hive.bee_for_upload(bee_id)?;
        let batch = bee.api().get_postage_batch(&batch_id).await?;
        if batch.batch_ttl_secs < 0 {
            // The node has not synced the chain state yet; nothing to judge.
            return Ok(());
        }
        if batch.batch_ttl_secs as u64 >= self.config.batch_ttl_threshold.as_secs() {
            return Ok(());
        }
        if self.store.has_pending_top_up(&batch_id).await? {
            tracing::debug!(%batch_id, "batch close to expiry but a top-up is already queued");
            return Ok(());
        }

        let price_per_block = bee.api().price_per_block().await?;
        let capacity_plan = capacity::plan_for(
            self.config.top_up_days,
            plan.storage_gigabytes(),
            price_per_block,
        );
        self.store
            .enqueue_top_up(organization.id, batch_id, capacity_plan.amount)
            .await?;
        tracing::info!(
            organization_id = %organization.id,
            %batch_id,
            ttl_secs = batch.batch_ttl_secs,
            amount = capacity_plan.amount,
            "batch close to expiry, queued bridging top-up",
        );
        Ok(())
    }
}

/// Watches the aggregate operating wallet balance across the hive.
#[derive(Debug, Clone)]
pub struct WalletMonitor {
    hive: Arc<Hive>,
    alerts: Arc<dyn Alerts>,
    config: Arc<ServiceConfig>,
}

impl WalletMonitor {
    /// Creates the monitor.
    pub fn new(hive: Arc<Hive>, alerts: Arc<dyn Alerts>, config: Arc<ServiceConfig>) -> Self {
        Self {
            hive,
            alerts,
            config,
        }
    }

    /// Sweeps until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        run_sweeps("wallet monitor", self.config.wallet_sweep_interval, cancel, || {
            self.sweep()
        })
        .await;
    }

    /// Sums the wallet balances of all nodes once and alerts below the floor.
    pub async fn sweep(&self) {
        let nodes = self.hive.nodes();
        let mut total_plur: u128 = 0;
        let mut reachable = 0usize;
        for node in nodes.iter() {
            match node.api().wallet_balance().await {
                Ok(wallet) => {
                    total_plur += wallet.bzz_balance;
                    reachable += 1;
                }
                Err(error) => {
                    tracing::warn!(bee_id = %node.id(), %error, "failed to read wallet balance");
                }
            }
        }

        if !nodes.is_empty() && reachable == 0 {
            self.alerts
                .send_alert("wallet monitor: could not reach any node".to_owned());
            return;
        }

        tracing::info!(total_plur, reachable, "wallet monitor balance");
        if total_plur < self.config.min_wallet_balance_plur {
            self.alerts.send_alert(format!(
                "wallet monitor: operating balance {total_plur} PLUR is below the floor of {} PLUR",
                self.config.min_wallet_balance_plur,
            ));
        }
    }
}

/// Runs `sweep` every `period` until cancelled; the first sweep fires
/// immediately.
async fn run_sweeps<F, Fut>(name: &str, period: Duration, cancel: CancellationToken, sweep: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    tracing::info!(task = name, ?period, "monitor started");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => sweep().await,
            _ = cancel.cancelled() => {
                tracing::info!(task = name, "monitor shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use apiary_core::{BatchId, BeeId, PlanStatus, PostageBatchStatus};
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::{
        store::MemoryStore,
        test_utils::{monthly_plan, shared_connector, FakeBee, RecordingAlerts},
        usage::StoreUsageMetrics,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        fake: Arc<FakeBee>,
        alerts: Arc<RecordingAlerts>,
        hive: Arc<Hive>,
        lifecycle: PlanLifecycle,
        config: Arc<ServiceConfig>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert_bee("queen", "http://queen.local:1633", None, true, true);

        let fake = FakeBee::new();
        let hive = Arc::new(Hive::new(store.clone(), shared_connector(fake.clone())));
        hive.refresh().await.expect("refresh");

        let alerts = RecordingAlerts::new();
        let config = Arc::new(ServiceConfig::default_for_test());
        let lifecycle = PlanLifecycle::new(
            store.clone(),
            hive.clone(),
            alerts.clone(),
            Arc::new(StoreUsageMetrics::new(store.clone())),
            config.clone(),
        );
        Fixture {
            store,
            fake,
            alerts,
            hive,
            lifecycle,
            config,
        }
    }

    fn plan_monitor(fixture: &Fixture) -> PlanMonitor {
        PlanMonitor::new(
            fixture.store.clone(),
            fixture.lifecycle.clone(),
            fixture.alerts.clone(),
            fixture.config.clone(),
        )
    }

    fn expiration_monitor(fixture: &Fixture) -> ExpirationMonitor {
        ExpirationMonitor::new(
            fixture.store.clone(),
            fixture.hive.clone(),
            fixture.alerts.clone(),
            fixture.config.clone(),
        )
    }

    /// Active plan whose batch lives on the fake bee with the given TTL.
    async fn active_org(fixture: &Fixture, ttl_secs: i64) -> (apiary_core::OrganizationId, BatchId) {
        let org = fixture.store.insert_organization("acme");
        let plan_id = fixture
            .store
            .insert_plan(monthly_plan(org))
            .await
            .expect("insert plan");
        fixture
            .store
            .set_plan_status(plan_id, PlanStatus::Active, None)
            .await
            .expect("activate");
        fixture
            .store
            .set_plan_paid_until(plan_id, Utc::now() + ChronoDuration::days(20))
            .await
            .expect("paid until");
        let batch_id = fixture.fake.seed_batch(22, ttl_secs);
        fixture
            .store
            .update_organization_batch(org, Some(batch_id), Some(BeeId(1)), PostageBatchStatus::Created)
            .await
            .expect("assign batch");
        (org, batch_id)
    }

    #[tokio::test]
    async fn lapsed_plans_are_cancelled_and_released() {
        let fixture = fixture().await;
        let (org, _batch_id) = active_org(&fixture, 30 * 86_400).await;
        let plan = fixture.store.active_plan(org).await.expect("query").expect("plan");
        fixture
            .store
            .set_plan_paid_until(plan.id, Utc::now() - ChronoDuration::hours(1))
            .await
            .expect("lapse");

        plan_monitor(&fixture).sweep().await;

        assert!(fixture.store.active_plan(org).await.expect("query").is_none());
        let record = fixture.store.organization(org).await.expect("org");
        assert_eq!(record.postage_batch_id, None);
        assert_eq!(record.postage_batch_status, PostageBatchStatus::Removed);
    }

    #[tokio::test]
    async fn scheduled_cancellation_is_honored_even_when_paid() {
        let fixture = fixture().await;
        let (org, _batch_id) = active_org(&fixture, 30 * 86_400).await;
        let plan = fixture.store.active_plan(org).await.expect("query").expect("plan");
        fixture
            .store
            .set_plan_cancel_at(plan.id, Utc::now() - ChronoDuration::minutes(1))
            .await
            .expect("schedule");

        plan_monitor(&fixture).sweep().await;

        assert!(fixture.store.active_plan(org).await.expect("query").is_none());
    }

    #[tokio::test]
    async fn missing_batch_is_alerted_and_requeued_once() {
        let fixture = fixture().await;
        let org = fixture.store.insert_organization("acme");
        let plan_id = fixture
            .store
            .insert_plan(monthly_plan(org))
            .await
            .expect("insert plan");
        fixture
            .store
            .set_plan_status(plan_id, PlanStatus::Active, None)
            .await
            .expect("activate");
        fixture
            .store
            .set_plan_paid_until(plan_id, Utc::now() + ChronoDuration::days(20))
            .await
            .expect("paid until");

        plan_monitor(&fixture).sweep().await;

        assert_eq!(fixture.alerts.count(), 1);
        assert_eq!(fixture.store.create_jobs().await.expect("jobs").len(), 1);

        // The next sweep sees the queued creation and stays quiet.
        plan_monitor(&fixture).sweep().await;
        assert_eq!(fixture.alerts.count(), 1);
        assert_eq!(fixture.store.create_jobs().await.expect("jobs").len(), 1);
    }

    #[tokio::test]
    async fn low_ttl_queues_a_bridging_top_up() {
        let fixture = fixture().await;
        let (org, batch_id) = active_org(&fixture, 86_400).await;

        expiration_monitor(&fixture).sweep().await;

        let jobs = fixture.store.top_up_jobs().await.expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].organization_id, org);
        assert_eq!(jobs[0].batch_id, batch_id);
        assert_eq!(jobs[0].amount, 24_000 * 17_280 * 3);

        // Queued top-up suppresses further ones.
        expiration_monitor(&fixture).sweep().await;
        assert_eq!(fixture.store.top_up_jobs().await.expect("jobs").len(), 1);
    }

    #[tokio::test]
    async fn healthy_ttl_queues_nothing() {
        let fixture = fixture().await;
        active_org(&fixture, 30 * 86_400).await;

        expiration_monitor(&fixture).sweep().await;

        assert!(fixture.store.top_up_jobs().await.expect("jobs").is_empty());
        assert_eq!(fixture.alerts.count(), 0);
    }

    #[tokio::test]
    async fn ttl_sweep_alerts_on_missing_batch_and_keeps_going() {
        let fixture = fixture().await;
        // First organization is broken (no batch), second is near expiry.
        let broken = fixture.store.insert_organization("broken");
        let plan_id = fixture
            .store
            .insert_plan(monthly_plan(broken))
            .await
            .expect("insert plan");
        fixture
            .store
            .set_plan_status(plan_id, PlanStatus::Active, None)
            .await
            .expect("activate");
        let (_org, batch_id) = active_org(&fixture, 3_600).await;

        expiration_monitor(&fixture).sweep().await;

        // One alert for the batch/plan count mismatch, one for the broken
        // organization; the healthy one still gets its top-up.
        assert_eq!(fixture.alerts.count(), 2);
        let jobs = fixture.store.top_up_jobs().await.expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].batch_id, batch_id);
    }

    #[tokio::test]
    async fn wallet_monitor_alerts_below_the_floor() {
        let fixture = fixture().await;
        let monitor = WalletMonitor::new(
            fixture.hive.clone(),
            fixture.alerts.clone(),
            fixture.config.clone(),
        );

        monitor.sweep().await;
        assert_eq!(fixture.alerts.count(), 0);

        *fixture.fake.bzz_balance.lock().expect("mutex poisoned") = 1;
        monitor.sweep().await;
        assert_eq!(fixture.alerts.count(), 1);
    }
}

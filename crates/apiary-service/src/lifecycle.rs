// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The plan lifecycle state machine.
//!
//! Plans move `PENDING_PAYMENT → ACTIVE → CANCELLED`, and the organization's
//! postage batch moves through its provisioning states alongside. Payment
//! events land here, get validated against the state machine's invariants,
//! and leave behind a provisioning job for the reconciliation worker; the
//! triggering request never waits for the storage network.
//!
//! Invariant violations (double activation, a recurring payment with no
//! active plan, an upgrade with no batch) mean billing and storage have
//! desynchronized: they alert the operators and fail the triggering request
//! instead of being absorbed.

use std::sync::Arc;

use apiary_bee_client::NodeError;
use apiary_core::{
    capacity::{self, CapacityPlan},
    OrganizationId, PlanId, PlanStatus, PostageBatchStatus,
};
use chrono::{Duration, Utc};

use crate::{
    alert::Alerts,
    config::ServiceConfig,
    hive::{Hive, HiveError},
    store::{OrganizationRecord, PlanRecord, Store, StoreError},
    usage::UsageMetrics,
};

/// Errors raised by plan lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The plan targeted by an activation is already active, i.e. the same
    /// payment event was delivered twice.
    #[error("plan {plan_id} is already active for organization {organization_id}")]
    PlanAlreadyActive {
        /// The owning organization.
        organization_id: OrganizationId,
        /// The doubly-activated plan.
        plan_id: PlanId,
    },
    /// The plan targeted by an activation was already cancelled; cancelled is
    /// terminal.
    #[error("plan {plan_id} is cancelled and cannot be activated")]
    PlanCancelled {
        /// The cancelled plan.
        plan_id: PlanId,
    },
    /// A recurring payment arrived for an organization without an active
    /// plan.
    #[error("no active plan for organization {organization_id}")]
    NoActivePlan {
        /// The organization the payment referenced.
        organization_id: OrganizationId,
    },
    /// A batch-changing operation was requested but the organization has no
    /// batch reference.
    #[error("organization {organization_id} has no postage batch")]
    MissingPostageBatch {
        /// The organization missing its batch.
        organization_id: OrganizationId,
    },
    /// The record store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// No suitable node was available.
    #[error(transparent)]
    Hive(#[from] HiveError),
    /// A remote node call failed.
    #[error(transparent)]
    Node(#[from] NodeError),
    /// A collaborator failed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The plan lifecycle state machine and its collaborators.
#[derive(Debug, Clone)]
pub struct PlanLifecycle {
    store: Arc<dyn Store>,
    hive: Arc<Hive>,
    alerts: Arc<dyn Alerts>,
    usage: Arc<dyn UsageMetrics>,
    config: Arc<ServiceConfig>,
}

impl PlanLifecycle {
    /// Creates the state machine over its collaborators.
    pub fn new(
        store: Arc<dyn Store>,
        hive: Arc<Hive>,
        alerts: Arc<dyn Alerts>,
        usage: Arc<dyn UsageMetrics>,
        config: Arc<ServiceConfig>,
    ) -> Self {
        Self {
            store,
            hive,
            alerts,
            usage,
            config,
        }
    }

    /// Returns the organization's active plan, if any.
    pub async fn active_plan(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<PlanRecord>, LifecycleError> {
        Ok(self.store.active_plan(organization_id).await?)
    }

    /// Returns a plan by ID, scoped to the organization.
    pub async fn plan_by_id(
        &self,
        organization_id: OrganizationId,
        plan_id: PlanId,
    ) -> Result<PlanRecord, LifecycleError> {
        Ok(self
            .store
            .plan_for_organization(organization_id, plan_id)
            .await?)
    }

    /// Activates `plan_id` after a successful payment.
    ///
    /// Exactly one activation per plan: a second call for the same plan is an
    /// invariant violation. A different plan already active for the
    /// organization is cancelled with a status reason naming its replacement,
    /// never silently dropped. First-time activations enqueue a batch
    /// creation; upgrades of an existing batch enqueue a dilution, and only
    /// when the newly planned depth exceeds the batch's current depth.
    pub async fn activate_plan(
        &self,
        organization_id: OrganizationId,
        plan_id: PlanId,
    ) -> Result<PlanRecord, LifecycleError> {
        let plan = self
            .store
            .plan_for_organization(organization_id, plan_id)
            .await?;
        match plan.status {
            PlanStatus::Active => {
                return Err(self.invariant_violation(LifecycleError::PlanAlreadyActive {
                    organization_id,
                    plan_id,
                }));
            }
            PlanStatus::Cancelled => {
                return Err(self.invariant_violation(LifecycleError::PlanCancelled { plan_id }));
            }
            PlanStatus::PendingPayment => {}
        }

        if let Some(previous) = self.store.active_plan(organization_id).await? {
            tracing::info!(
                %organization_id,
                previous_plan_id = %previous.id,
                new_plan_id = %plan_id,
                "cancelling the previous plan in favor of its upgrade",
            );
            self.store
                .set_plan_status(
                    previous.id,
                    PlanStatus::Cancelled,
                    Some(format!("superseded by plan {plan_id}")),
                )
                .await?;
        }

        let paid_until = Utc::now() + Duration::days(self.config.paid_period_days);
        self.store
            .set_plan_status(plan_id, PlanStatus::Active, None)
            .await?;
        self.store.set_plan_paid_until(plan_id, paid_until).await?;
        self.usage
            .upgrade_current_metrics(
                organization_id,
                plan.upload_size_limit,
                plan.download_size_limit,
            )
            .await?;

        let organization = self.store.organization(organization_id).await?;
        match organization.postage_batch_id {
            None => self.provision_first_batch(&organization, &plan).await?,
            Some(_) => self.provision_upgrade(&organization, &plan).await?,
        }

        tracing::info!(%organization_id, %plan_id, "plan activated");
        Ok(self
            .store
            .plan_for_organization(organization_id, plan_id)
            .await?)
    }

    /// Extends the active plan by one paid period after a recurring payment
    /// and enqueues the matching batch top-up.
    pub async fn apply_recurring_payment(
        &self,
        organization_id: OrganizationId,
    ) -> Result<PlanRecord, LifecycleError> {
        let Some(plan) = self.store.active_plan(organization_id).await? else {
            return Err(
                self.invariant_violation(LifecycleError::NoActivePlan { organization_id })
            );
        };

        let organization = self.store.organization(organization_id).await?;
        let (Some(batch_id), Some(bee_id)) =
            (organization.postage_batch_id, organization.bee_id)
        else {
            return Err(
                self.invariant_violation(LifecycleError::MissingPostageBatch { organization_id })
            );
        };

        let paid_until =
            plan.paid_until.unwrap_or_else(Utc::now) + Duration::days(self.config.paid_period_days);
        self.store.set_plan_paid_until(plan.id, paid_until).await?;

        if self.store.has_pending_top_up(&batch_id).await? {
            tracing::debug!(%organization_id, %batch_id, "top-up already queued, skipping");
            return Ok(plan);
        }

        let capacity_plan = self
            .plan_via_bee(bee_id, self.config.renewal_days, plan.storage_gigabytes())
            .await?;
        self.store
            .enqueue_top_up(organization_id, batch_id, capacity_plan.amount)
            .await?;
        tracing::info!(
            %organization_id,
            %batch_id,
            amount = capacity_plan.amount,
            "queued renewal top-up",
        );
        Ok(plan)
    }

    /// Cancels a plan and releases the organization's batch reference.
    ///
    /// The remote batch is not deleted; its capacity simply expires on the
    /// network.
    pub async fn cancel_plan(
        &self,
        organization_id: OrganizationId,
        plan_id: PlanId,
    ) -> Result<(), LifecycleError> {
        let plan = self
            .store
            .plan_for_organization(organization_id, plan_id)
            .await?;
        self.expire_plan(&plan, "cancelled on request").await
    }

    /// Schedules the active plan to lapse at the end of the paid period
    /// instead of renewing.
    pub async fn schedule_cancellation(
        &self,
        organization_id: OrganizationId,
    ) -> Result<(), LifecycleError> {
        let Some(plan) = self.store.active_plan(organization_id).await? else {
            return Err(
                self.invariant_violation(LifecycleError::NoActivePlan { organization_id })
            );
        };
        let cancel_at = plan.paid_until.unwrap_or_else(Utc::now);
        self.store.set_plan_cancel_at(plan.id, cancel_at).await?;
        tracing::info!(%organization_id, plan_id = %plan.id, %cancel_at, "plan scheduled for cancellation");
        Ok(())
    }

    /// Cancels `plan` and releases the organization's batch reference.
    ///
    /// This is the only path that clears `postage_batch_id`.
    pub(crate) async fn expire_plan(
        &self,
        plan: &PlanRecord,
        reason: &str,
    ) -> Result<(), LifecycleError> {
        self.store
            .set_plan_status(plan.id, PlanStatus::Cancelled, Some(reason.to_owned()))
            .await?;
        self.store
            .update_organization_batch(
                plan.organization_id,
                None,
                None,
                PostageBatchStatus::Removed,
            )
            .await?;
        tracing::info!(
            organization_id = %plan.organization_id,
            plan_id = %plan.id,
            reason,
            "plan cancelled and batch reference released",
        );
        Ok(())
    }

    /// Queues the initial batch creation for an organization, unless one is
    /// already pending.
    pub(crate) async fn queue_batch_creation(
        &self,
        organization_id: OrganizationId,
        storage_gigabytes: u64,
    ) -> Result<(), LifecycleError> {
        if self.store.has_pending_create(organization_id).await? {
            tracing::debug!(%organization_id, "creation already queued, skipping");
            return Ok(());
        }

        let bee = self.hive.bee_for_batch_creation()?;
        let price_per_block = bee.api().price_per_block().await?;
        let capacity_plan =
            capacity::plan_for(self.config.creation_days, storage_gigabytes, price_per_block);

        self.store
            .enqueue_create(organization_id, capacity_plan.depth, capacity_plan.amount)
            .await?;
        self.store
            .set_postage_batch_status(organization_id, PostageBatchStatus::Creating)
            .await?;
        tracing::info!(
            %organization_id,
            depth = capacity_plan.depth,
            amount = capacity_plan.amount,
            "queued postage batch creation",
        );
        Ok(())
    }

    async fn provision_first_batch(
        &self,
        organization: &OrganizationRecord,
        plan: &PlanRecord,
    ) -> Result<(), LifecycleError> {
        self.usage.reset_for_organization(organization.id).await?;
        self.queue_batch_creation(organization.id, plan.storage_gigabytes())
            .await
    }

    async fn provision_upgrade(
        &self,
        organization: &OrganizationRecord,
        plan: &PlanRecord,
    ) -> Result<(), LifecycleError> {
        let batch_id = organization
            .postage_batch_id
            .expect("caller checked the batch reference");
        let Some(bee_id) = organization.bee_id else {
            return Err(self.invariant_violation(LifecycleError::MissingPostageBatch {
                organization_id: organization.id,
            }));
        };

        let bee = self.hive.bee_for_upload(bee_id)?;
        let price_per_block = bee.api().price_per_block().await?;
        let capacity_plan = capacity::plan_for(
            self.config.creation_days,
            plan.storage_gigabytes(),
            price_per_block,
        );

        let remote = bee.api().get_postage_batch(&batch_id).await?;
        if capacity_plan.depth > remote.depth {
            self.store
                .enqueue_dilute(organization.id, batch_id, capacity_plan.depth)
                .await?;
            tracing::info!(
                organization_id = %organization.id,
                %batch_id,
                from_depth = remote.depth,
                to_depth = capacity_plan.depth,
                "queued batch dilution for upgrade",
            );
        } else {
            tracing::debug!(
                organization_id = %organization.id,
                %batch_id,
                depth = remote.depth,
                "existing batch depth suffices, no dilution needed",
            );
        }
        Ok(())
    }

    async fn plan_via_bee(
        &self,
        bee_id: apiary_core::BeeId,
        days: u64,
        storage_gigabytes: u64,
    ) -> Result<CapacityPlan, LifecycleError> {
        let bee = self.hive.bee_for_upload(bee_id)?;
        let price_per_block = bee.api().price_per_block().await?;
        Ok(capacity::plan_for(days, storage_gigabytes, price_per_block))
    }

    fn invariant_violation(&self, error: LifecycleError) -> LifecycleError {
        tracing::error!(%error, "plan lifecycle invariant violated");
        self.alerts.send_alert(error.to_string());
        error
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apiary_core::{BatchId, PlanStatus, PostageBatchStatus};

    use super::*;
    use crate::{
        store::MemoryStore,
        test_utils::{monthly_plan_with_storage, shared_connector, FakeBee, RecordingAlerts},
        usage::StoreUsageMetrics,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        fake: Arc<FakeBee>,
        alerts: Arc<RecordingAlerts>,
        lifecycle: PlanLifecycle,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert_bee("queen", "http://queen.local:1633", None, true, true);

        let fake = FakeBee::new();
        let hive = Arc::new(Hive::new(store.clone(), shared_connector(fake.clone())));
        hive.refresh().await.expect("refresh");

        let alerts = RecordingAlerts::new();
        let lifecycle = PlanLifecycle::new(
            store.clone(),
            hive,
            alerts.clone(),
            Arc::new(StoreUsageMetrics::new(store.clone())),
            Arc::new(ServiceConfig::default_for_test()),
        );
        Fixture {
            store,
            fake,
            alerts,
            lifecycle,
        }
    }

    async fn pending_plan(fixture: &Fixture, gigabytes: u64) -> (OrganizationId, PlanId) {
        let org = fixture.store.insert_organization("acme");
        let plan_id = fixture
            .store
            .insert_plan(monthly_plan_with_storage(org, gigabytes))
            .await
            .expect("insert plan");
        (org, plan_id)
    }

    /// Puts the organization in the provisioned state: active plan, batch on
    /// the fake bee, references on the record.
    async fn provisioned_org(fixture: &Fixture, gigabytes: u64, depth: u8) -> (OrganizationId, PlanId, BatchId) {
        let (org, plan_id) = pending_plan(fixture, gigabytes).await;
        fixture
            .store
            .set_plan_status(plan_id, PlanStatus::Active, None)
            .await
            .expect("activate");
        fixture
            .store
            .set_plan_paid_until(plan_id, Utc::now() + Duration::days(10))
            .await
            .expect("paid until");
        let batch_id = fixture.fake.seed_batch(depth, 30 * 86_400);
        fixture
            .store
            .update_organization_batch(
                org,
                Some(batch_id),
                Some(apiary_core::BeeId(1)),
                PostageBatchStatus::Created,
            )
            .await
            .expect("assign batch");
        (org, plan_id, batch_id)
    }

    #[tokio::test]
    async fn first_activation_queues_a_creation() {
        let fixture = fixture().await;
        let (org, plan_id) = pending_plan(&fixture, 4).await;

        let plan = fixture
            .lifecycle
            .activate_plan(org, plan_id)
            .await
            .expect("activate");

        assert_eq!(plan.status, PlanStatus::Active);
        assert!(plan.paid_until.is_some());

        let jobs = fixture.store.create_jobs().await.expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].depth, 22);
        assert_eq!(jobs[0].amount, 24_000 * 17_280 * 30);

        let org_record = fixture.store.organization(org).await.expect("org");
        assert_eq!(
            org_record.postage_batch_status,
            PostageBatchStatus::Creating,
        );
        assert_eq!(fixture.alerts.count(), 0);
    }

    #[tokio::test]
    async fn double_activation_fails_and_queues_nothing_more() {
        let fixture = fixture().await;
        let (org, plan_id) = pending_plan(&fixture, 4).await;

        fixture
            .lifecycle
            .activate_plan(org, plan_id)
            .await
            .expect("first activation");
        let error = fixture
            .lifecycle
            .activate_plan(org, plan_id)
            .await
            .expect_err("second activation must fail");

        assert!(matches!(error, LifecycleError::PlanAlreadyActive { .. }));
        assert_eq!(fixture.store.create_jobs().await.expect("jobs").len(), 1);
        assert_eq!(fixture.alerts.count(), 1);
    }

    #[tokio::test]
    async fn upgrade_to_a_deeper_plan_queues_one_dilution() {
        let fixture = fixture().await;
        let (org, old_plan_id, batch_id) = provisioned_org(&fixture, 4, 22).await;

        let new_plan_id = fixture
            .store
            .insert_plan(monthly_plan_with_storage(org, 17))
            .await
            .expect("insert plan");
        fixture
            .lifecycle
            .activate_plan(org, new_plan_id)
            .await
            .expect("activate upgrade");

        let old_plan = fixture
            .store
            .plan_for_organization(org, old_plan_id)
            .await
            .expect("old plan");
        assert_eq!(old_plan.status, PlanStatus::Cancelled);
        assert!(old_plan
            .status_reason
            .as_deref()
            .expect("reason recorded")
            .contains(&new_plan_id.to_string()));

        let dilutes = fixture.store.dilute_jobs().await.expect("jobs");
        assert_eq!(dilutes.len(), 1);
        assert_eq!(dilutes[0].batch_id, batch_id);
        assert_eq!(dilutes[0].depth, 25);
        assert!(fixture.store.create_jobs().await.expect("jobs").is_empty());

        // The one-active-plan-per-organization invariant held throughout.
        let active: Vec<_> = fixture
            .store
            .active_plans()
            .await
            .expect("list")
            .into_iter()
            .filter(|plan| plan.organization_id == org)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, new_plan_id);
    }

    #[tokio::test]
    async fn upgrade_within_current_depth_queues_nothing() {
        let fixture = fixture().await;
        let (org, old_plan_id, _batch_id) = provisioned_org(&fixture, 17, 25).await;

        let new_plan_id = fixture
            .store
            .insert_plan(monthly_plan_with_storage(org, 4))
            .await
            .expect("insert plan");
        fixture
            .lifecycle
            .activate_plan(org, new_plan_id)
            .await
            .expect("activate");

        assert_eq!(
            fixture
                .store
                .plan_for_organization(org, old_plan_id)
                .await
                .expect("old plan")
                .status,
            PlanStatus::Cancelled,
        );
        assert!(fixture.store.dilute_jobs().await.expect("jobs").is_empty());
        assert!(fixture.store.create_jobs().await.expect("jobs").is_empty());
    }

    #[tokio::test]
    async fn recurring_payment_without_active_plan_alerts_once() {
        let fixture = fixture().await;
        let org = fixture.store.insert_organization("acme");

        let error = fixture
            .lifecycle
            .apply_recurring_payment(org)
            .await
            .expect_err("must fail");

        assert!(matches!(error, LifecycleError::NoActivePlan { .. }));
        assert_eq!(fixture.alerts.count(), 1);
        assert!(fixture.store.top_up_jobs().await.expect("jobs").is_empty());
    }

    #[tokio::test]
    async fn recurring_payment_extends_and_queues_a_top_up() {
        let fixture = fixture().await;
        let (org, plan_id, batch_id) = provisioned_org(&fixture, 4, 22).await;
        let before = fixture
            .store
            .plan_for_organization(org, plan_id)
            .await
            .expect("plan")
            .paid_until
            .expect("paid");

        fixture
            .lifecycle
            .apply_recurring_payment(org)
            .await
            .expect("recurring payment");

        let after = fixture
            .store
            .plan_for_organization(org, plan_id)
            .await
            .expect("plan")
            .paid_until
            .expect("paid");
        assert_eq!(after - before, Duration::days(31));

        let jobs = fixture.store.top_up_jobs().await.expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].batch_id, batch_id);
        assert_eq!(jobs[0].amount, 24_000 * 17_280 * 31);

        // A second payment while the first top-up is still queued must not
        // stack another job.
        fixture
            .lifecycle
            .apply_recurring_payment(org)
            .await
            .expect("recurring payment");
        assert_eq!(fixture.store.top_up_jobs().await.expect("jobs").len(), 1);
    }

    #[tokio::test]
    async fn scheduling_cancellation_copies_paid_until() {
        let fixture = fixture().await;
        let (org, plan_id, _batch_id) = provisioned_org(&fixture, 4, 22).await;

        fixture
            .lifecycle
            .schedule_cancellation(org)
            .await
            .expect("schedule");

        let plan = fixture
            .store
            .plan_for_organization(org, plan_id)
            .await
            .expect("plan");
        assert_eq!(plan.cancel_at, plan.paid_until);
        assert_eq!(plan.status, PlanStatus::Active);
    }

    #[tokio::test]
    async fn invariant_violations_never_touch_the_network() {
        let store = Arc::new(MemoryStore::new());
        store.insert_bee("queen", "http://queen.local:1633", None, true, true);

        // A mock with no expectations panics on any call, so this hive
        // proves the guards fire before any node is contacted.
        let connector: crate::bee::BeeConnector = Arc::new(|_record| {
            Ok(Arc::new(crate::bee::MockBeeApi::new()) as Arc<dyn crate::bee::BeeApi>)
        });
        let hive = Arc::new(Hive::new(store.clone(), connector));
        hive.refresh().await.expect("refresh");

        let alerts = RecordingAlerts::new();
        let lifecycle = PlanLifecycle::new(
            store.clone(),
            hive,
            alerts.clone(),
            Arc::new(StoreUsageMetrics::new(store.clone())),
            Arc::new(ServiceConfig::default_for_test()),
        );

        let org = store.insert_organization("acme");
        let error = lifecycle
            .apply_recurring_payment(org)
            .await
            .expect_err("must fail");
        assert!(matches!(error, LifecycleError::NoActivePlan { .. }));
        assert_eq!(alerts.count(), 1);
    }

    #[tokio::test]
    async fn cancelling_releases_the_batch_reference() {
        let fixture = fixture().await;
        let (org, plan_id, _batch_id) = provisioned_org(&fixture, 4, 22).await;

        fixture
            .lifecycle
            .cancel_plan(org, plan_id)
            .await
            .expect("cancel");

        let org_record = fixture.store.organization(org).await.expect("org");
        assert_eq!(org_record.postage_batch_id, None);
        assert_eq!(
            org_record.postage_batch_status,
            PostageBatchStatus::Removed,
        );
        assert!(fixture
            .lifecycle
            .active_plan(org)
            .await
            .expect("query")
            .is_none());
    }
}

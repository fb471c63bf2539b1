// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The record-store boundary of the engine.
//!
//! The production deployment keeps these records in a relational database
//! behind a generic keyed-record access layer; that layer is out of scope
//! here, so the engine consumes it through the [`Store`] trait and ships an
//! in-memory implementation used by the daemon and by every test.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
};

use apiary_core::{BatchId, BeeId, OrganizationId, PaymentType, PlanId, PlanStatus,
    PostageBatchStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error raised by record-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// The record family searched.
        entity: &'static str,
        /// The identifier that missed.
        id: u64,
    },
    /// The backing store failed.
    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    fn not_found(entity: &'static str, id: u64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// A storage tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    /// The organization ID.
    pub id: OrganizationId,
    /// Display name.
    pub name: String,
    /// Disabled organizations are excluded from all serving paths.
    pub enabled: bool,
    /// The node owning this organization's postage batch, once assigned.
    pub bee_id: Option<BeeId>,
    /// The active postage batch, once provisioned.
    pub postage_batch_id: Option<BatchId>,
    /// Provisioning state of the postage batch.
    pub postage_batch_status: PostageBatchStatus,
    /// Billing-provider customer reference.
    pub stripe_customer_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A subscription term for an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// The plan ID.
    pub id: PlanId,
    /// The owning organization.
    pub organization_id: OrganizationId,
    /// Price in minor currency units.
    pub amount_cents: u64,
    /// ISO currency code.
    pub currency: String,
    /// Billing frequency label, e.g. `MONTH`.
    pub frequency: String,
    /// Lifecycle state.
    pub status: PlanStatus,
    /// How the plan is paid.
    pub payment_type: PaymentType,
    /// Reason recorded with the most recent status change.
    pub status_reason: Option<String>,
    /// Upload ceiling in bytes.
    pub upload_size_limit: u64,
    /// Download ceiling in bytes.
    pub download_size_limit: u64,
    /// Upload operation ceiling.
    pub upload_count_limit: u64,
    /// Download operation ceiling.
    pub download_count_limit: u64,
    /// End of the currently paid period.
    pub paid_until: Option<DateTime<Utc>>,
    /// Requested non-renewal cutoff.
    pub cancel_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl PlanRecord {
    /// The storage capacity this plan entitles, in whole gigabytes.
    pub fn storage_gigabytes(&self) -> u64 {
        self.upload_size_limit / (1 << 30)
    }
}

/// Input for creating a plan at checkout initiation.
#[derive(Debug, Clone)]
pub struct NewPlan {
    /// The owning organization.
    pub organization_id: OrganizationId,
    /// Price in minor currency units.
    pub amount_cents: u64,
    /// ISO currency code.
    pub currency: String,
    /// Billing frequency label.
    pub frequency: String,
    /// How the plan will be paid.
    pub payment_type: PaymentType,
    /// Upload ceiling in bytes.
    pub upload_size_limit: u64,
    /// Download ceiling in bytes.
    pub download_size_limit: u64,
    /// Upload operation ceiling.
    pub upload_count_limit: u64,
    /// Download operation ceiling.
    pub download_count_limit: u64,
}

/// A storage-node row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeeRecord {
    /// The node ID.
    pub id: BeeId,
    /// Display name.
    pub name: String,
    /// Base URL of the node's API.
    pub url: String,
    /// Optional bearer secret for the node's API.
    pub secret: Option<String>,
    /// Disabled nodes are dropped from the hive on the next refresh.
    pub enabled: bool,
    /// Whether the node accepts uploads and batch creation.
    pub upload_enabled: bool,
    /// Whether the node serves downloads.
    pub download_enabled: bool,
}

/// A queued postage-batch creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJob {
    /// Queue row ID.
    pub id: u64,
    /// The organization to provision.
    pub organization_id: OrganizationId,
    /// Depth to create the batch at.
    pub depth: u8,
    /// Per-chunk amount, in PLUR.
    pub amount: u64,
    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,
}

/// A queued postage-batch top-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpJob {
    /// Queue row ID.
    pub id: u64,
    /// The organization owning the batch.
    pub organization_id: OrganizationId,
    /// The batch to extend.
    pub batch_id: BatchId,
    /// Per-chunk amount to add, in PLUR.
    pub amount: u64,
    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,
}

/// A queued postage-batch dilution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiluteJob {
    /// Queue row ID.
    pub id: u64,
    /// The organization owning the batch.
    pub organization_id: OrganizationId,
    /// The batch to expand.
    pub batch_id: BatchId,
    /// Target depth.
    pub depth: u8,
    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,
}

/// What a usage metric counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageMetricKind {
    /// Bytes uploaded in the current period.
    UploadedBytes,
    /// Bytes downloaded in the current period.
    DownloadedBytes,
}

/// A per-organization usage counter with its ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetricRecord {
    /// Metric row ID.
    pub id: u64,
    /// The measured organization.
    pub organization_id: OrganizationId,
    /// What is counted.
    pub kind: UsageMetricKind,
    /// Consumed quantity.
    pub used: u64,
    /// Ceiling for the current period.
    pub available: u64,
    /// End of the current accounting period.
    pub period_ends_at: DateTime<Utc>,
}

/// The keyed-record store the engine runs against.
///
/// Queue rows are processed at-most-once successfully: rows are deleted only
/// after the remote operation succeeds and are otherwise retained for retry.
/// The queues do not deduplicate; callers use the `has_pending_*` probes
/// before inserting Create and TopUp rows.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync {
    /// Returns the organization with the given ID.
    async fn organization(&self, id: OrganizationId) -> Result<OrganizationRecord, StoreError>;

    /// Replaces an organization's postage-batch reference and status.
    ///
    /// The bee assignment is only overwritten when one is provided, so
    /// releasing a batch keeps the organization pinned to its node.
    async fn update_organization_batch(
        &self,
        id: OrganizationId,
        batch_id: Option<BatchId>,
        bee_id: Option<BeeId>,
        status: PostageBatchStatus,
    ) -> Result<(), StoreError>;

    /// Updates only the postage-batch status of an organization.
    async fn set_postage_batch_status(
        &self,
        id: OrganizationId,
        status: PostageBatchStatus,
    ) -> Result<(), StoreError>;

    /// Returns all enabled storage-node rows.
    async fn enabled_bees(&self) -> Result<Vec<BeeRecord>, StoreError>;

    /// Returns the plan with the given ID, scoped to an organization.
    async fn plan_for_organization(
        &self,
        organization_id: OrganizationId,
        plan_id: PlanId,
    ) -> Result<PlanRecord, StoreError>;

    /// Returns the organization's ACTIVE plan, if any.
    async fn active_plan(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<PlanRecord>, StoreError>;

    /// Returns every ACTIVE plan across organizations, in ID order.
    async fn active_plans(&self) -> Result<Vec<PlanRecord>, StoreError>;

    /// Inserts a new plan in `PENDING_PAYMENT` state.
    async fn insert_plan(&self, new: NewPlan) -> Result<PlanId, StoreError>;

    /// Transitions a plan's status, recording the reason.
    async fn set_plan_status(
        &self,
        id: PlanId,
        status: PlanStatus,
        reason: Option<String>,
    ) -> Result<(), StoreError>;

    /// Updates a plan's paid-until timestamp.
    async fn set_plan_paid_until(
        &self,
        id: PlanId,
        paid_until: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Updates a plan's scheduled cancellation timestamp.
    async fn set_plan_cancel_at(
        &self,
        id: PlanId,
        cancel_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Appends a creation job.
    async fn enqueue_create(
        &self,
        organization_id: OrganizationId,
        depth: u8,
        amount: u64,
    ) -> Result<(), StoreError>;

    /// Appends a top-up job.
    async fn enqueue_top_up(
        &self,
        organization_id: OrganizationId,
        batch_id: BatchId,
        amount: u64,
    ) -> Result<(), StoreError>;

    /// Appends a dilute job.
    async fn enqueue_dilute(
        &self,
        organization_id: OrganizationId,
        batch_id: BatchId,
        depth: u8,
    ) -> Result<(), StoreError>;

    /// Returns all pending creation jobs in insertion order.
    async fn create_jobs(&self) -> Result<Vec<CreateJob>, StoreError>;

    /// Returns all pending top-up jobs in insertion order.
    async fn top_up_jobs(&self) -> Result<Vec<TopUpJob>, StoreError>;

    /// Returns all pending dilute jobs in insertion order.
    async fn dilute_jobs(&self) -> Result<Vec<DiluteJob>, StoreError>;

    /// Deletes a creation job after it succeeded.
    async fn delete_create_job(&self, id: u64) -> Result<(), StoreError>;

    /// Deletes a top-up job after it succeeded.
    async fn delete_top_up_job(&self, id: u64) -> Result<(), StoreError>;

    /// Deletes a dilute job after it succeeded.
    async fn delete_dilute_job(&self, id: u64) -> Result<(), StoreError>;

    /// True if a creation job is already queued for the organization.
    async fn has_pending_create(
        &self,
        organization_id: OrganizationId,
    ) -> Result<bool, StoreError>;

    /// True if a top-up job is already queued for the batch.
    async fn has_pending_top_up(&self, batch_id: &BatchId) -> Result<bool, StoreError>;

    /// Returns all usage metrics of an organization.
    async fn usage_metrics(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<UsageMetricRecord>, StoreError>;

    /// Inserts a usage metric row.
    async fn insert_usage_metric(
        &self,
        organization_id: OrganizationId,
        kind: UsageMetricKind,
        available: u64,
        period_ends_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Patches a usage metric row; `None` fields are left unchanged.
    async fn update_usage_metric(
        &self,
        id: u64,
        used: Option<u64>,
        available: Option<u64>,
        period_ends_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    organizations: BTreeMap<u64, OrganizationRecord>,
    plans: BTreeMap<u64, PlanRecord>,
    bees: BTreeMap<u64, BeeRecord>,
    create_jobs: BTreeMap<u64, CreateJob>,
    top_up_jobs: BTreeMap<u64, TopUpJob>,
    dilute_jobs: BTreeMap<u64, DiluteJob>,
    usage_metrics: BTreeMap<u64, UsageMetricRecord>,
}

/// In-memory [`Store`] implementation.
///
/// A single writer lock over all tables; probe-then-insert sequences issued
/// by one caller are therefore not interleaved with other writers, though the
/// trait itself does not promise that.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Inserts an organization and returns its ID.
    pub fn insert_organization(&self, name: impl Into<String>) -> OrganizationId {
        let id = OrganizationId(self.allocate_id());
        let record = OrganizationRecord {
            id,
            name: name.into(),
            enabled: true,
            bee_id: None,
            postage_batch_id: None,
            postage_batch_status: PostageBatchStatus::None,
            stripe_customer_id: None,
            created_at: Utc::now(),
        };
        self.write().organizations.insert(id.0, record);
        id
    }

    /// Inserts a storage-node row and returns its ID.
    pub fn insert_bee(
        &self,
        name: impl Into<String>,
        url: impl Into<String>,
        secret: Option<String>,
        upload_enabled: bool,
        download_enabled: bool,
    ) -> BeeId {
        let id = BeeId(self.allocate_id());
        let record = BeeRecord {
            id,
            name: name.into(),
            url: url.into(),
            secret,
            enabled: true,
            upload_enabled,
            download_enabled,
        };
        self.write().bees.insert(id.0, record);
        id
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("mutex poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().expect("mutex poisoned")
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn organization(&self, id: OrganizationId) -> Result<OrganizationRecord, StoreError> {
        self.read()
            .organizations
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StoreError::not_found("organization", id.0))
    }

    async fn update_organization_batch(
        &self,
        id: OrganizationId,
        batch_id: Option<BatchId>,
        bee_id: Option<BeeId>,
        status: PostageBatchStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.write();
        let record = tables
            .organizations
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::not_found("organization", id.0))?;
        record.postage_batch_id = batch_id;
        if bee_id.is_some() {
            record.bee_id = bee_id;
        }
        record.postage_batch_status = status;
        Ok(())
    }

    async fn set_postage_batch_status(
        &self,
        id: OrganizationId,
        status: PostageBatchStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.write();
        let record = tables
            .organizations
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::not_found("organization", id.0))?;
        record.postage_batch_status = status;
        Ok(())
    }

    async fn enabled_bees(&self) -> Result<Vec<BeeRecord>, StoreError> {
        Ok(self
            .read()
            .bees
            .values()
            .filter(|bee| bee.enabled)
            .cloned()
            .collect())
    }

    async fn plan_for_organization(
        &self,
        organization_id: OrganizationId,
        plan_id: PlanId,
    ) -> Result<PlanRecord, StoreError> {
        self.read()
            .plans
            .get(&plan_id.0)
            .filter(|plan| plan.organization_id == organization_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("plan", plan_id.0))
    }

    async fn active_plan(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<PlanRecord>, StoreError> {
        Ok(self
            .read()
            .plans
            .values()
            .find(|plan| {
                plan.organization_id == organization_id && plan.status == PlanStatus::Active
            })
            .cloned())
    }

    async fn active_plans(&self) -> Result<Vec<PlanRecord>, StoreError> {
        Ok(self
            .read()
            .plans
            .values()
            .filter(|plan| plan.status == PlanStatus::Active)
            .cloned()
            .collect())
    }

    async fn insert_plan(&self, new: NewPlan) -> Result<PlanId, StoreError> {
        let id = PlanId(self.allocate_id());
        let record = PlanRecord {
            id,
            organization_id: new.organization_id,
            amount_cents: new.amount_cents,
            currency: new.currency,
            frequency: new.frequency,
            status: PlanStatus::PendingPayment,
            payment_type: new.payment_type,
            status_reason: None,
            upload_size_limit: new.upload_size_limit,
            download_size_limit: new.download_size_limit,
            upload_count_limit: new.upload_count_limit,
            download_count_limit: new.download_count_limit,
            paid_until: None,
            cancel_at: None,
            created_at: Utc::now(),
        };
        self.write().plans.insert(id.0, record);
        Ok(id)
    }

    async fn set_plan_status(
        &self,
        id: PlanId,
        status: PlanStatus,
        reason: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tables = self.write();
        let plan = tables
            .plans
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::not_found("plan", id.0))?;
        plan.status = status;
        plan.status_reason = reason;
        Ok(())
    }

    async fn set_plan_paid_until(
        &self,
        id: PlanId,
        paid_until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.write();
        let plan = tables
            .plans
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::not_found("plan", id.0))?;
        plan.paid_until = Some(paid_until);
        Ok(())
    }

    async fn set_plan_cancel_at(
        &self,
        id: PlanId,
        cancel_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.write();
        let plan = tables
            .plans
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::not_found("plan", id.0))?;
        plan.cancel_at = Some(cancel_at);
        Ok(())
    }

    async fn enqueue_create(
        &self,
        organization_id: OrganizationId,
        depth: u8,
        amount: u64,
    ) -> Result<(), StoreError> {
        let id = self.allocate_id();
        self.write().create_jobs.insert(
            id,
            CreateJob {
                id,
                organization_id,
                depth,
                amount,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn enqueue_top_up(
        &self,
        organization_id: OrganizationId,
        batch_id: BatchId,
        amount: u64,
    ) -> Result<(), StoreError> {
        let id = self.allocate_id();
        self.write().top_up_jobs.insert(
            id,
            TopUpJob {
                id,
                organization_id,
                batch_id,
                amount,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn enqueue_dilute(
        &self,
        organization_id: OrganizationId,
        batch_id: BatchId,
        depth: u8,
    ) -> Result<(), StoreError> {
        let id = self.allocate_id();
        self.write().dilute_jobs.insert(
            id,
            DiluteJob {
                id,
                organization_id,
                batch_id,
                depth,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn create_jobs(&self) -> Result<Vec<CreateJob>, StoreError> {
        Ok(self.read().create_jobs.values().cloned().collect())
    }

    async fn top_up_jobs(&self) -> Result<Vec<TopUpJob>, StoreError> {
        Ok(self.read().top_up_jobs.values().cloned().collect())
    }

    async fn dilute_jobs(&self) -> Result<Vec<DiluteJob>, StoreError> {
        Ok(self.read().dilute_jobs.values().cloned().collect())
    }

    async fn delete_create_job(&self, id: u64) -> Result<(), StoreError> {
        self.write()
            .create_jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("create job", id))
    }

    async fn delete_top_up_job(&self, id: u64) -> Result<(), StoreError> {
        self.write()
            .top_up_jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("top-up job", id))
    }

    async fn delete_dilute_job(&self, id: u64) -> Result<(), StoreError> {
        self.write()
            .dilute_jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("dilute job", id))
    }

    async fn has_pending_create(
        &self,
        organization_id: OrganizationId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .read()
            .create_jobs
            .values()
            .any(|job| job.organization_id == organization_id))
    }

    async fn has_pending_top_up(&self, batch_id: &BatchId) -> Result<bool, StoreError> {
        Ok(self
            .read()
            .top_up_jobs
            .values()
            .any(|job| job.batch_id == *batch_id))
    }

    async fn usage_metrics(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<UsageMetricRecord>, StoreError> {
        Ok(self
            .read()
            .usage_metrics
            .values()
            .filter(|metric| metric.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn insert_usage_metric(
        &self,
        organization_id: OrganizationId,
        kind: UsageMetricKind,
        available: u64,
        period_ends_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id = self.allocate_id();
        self.write().usage_metrics.insert(
            id,
            UsageMetricRecord {
                id,
                organization_id,
                kind,
                used: 0,
                available,
                period_ends_at,
            },
        );
        Ok(())
    }

    async fn update_usage_metric(
        &self,
        id: u64,
        used: Option<u64>,
        available: Option<u64>,
        period_ends_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut tables = self.write();
        let metric = tables
            .usage_metrics
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("usage metric", id))?;
        if let Some(used) = used {
            metric.used = used;
        }
        if let Some(available) = available {
            metric.available = available;
        }
        if let Some(period_ends_at) = period_ends_at {
            metric.period_ends_at = period_ends_at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(byte: u8) -> BatchId {
        BatchId([byte; BatchId::LENGTH])
    }

    #[tokio::test]
    async fn queue_rows_are_listed_in_insertion_order() {
        let store = MemoryStore::new();
        let org = store.insert_organization("acme");

        store.enqueue_top_up(org, batch(1), 10).await.expect("enqueue");
        store.enqueue_top_up(org, batch(2), 20).await.expect("enqueue");
        store.enqueue_top_up(org, batch(3), 30).await.expect("enqueue");

        let jobs = store.top_up_jobs().await.expect("list");
        let amounts: Vec<_> = jobs.iter().map(|job| job.amount).collect();
        assert_eq!(amounts, [10, 20, 30]);
    }

    #[tokio::test]
    async fn deleted_jobs_do_not_reappear() {
        let store = MemoryStore::new();
        let org = store.insert_organization("acme");

        store.enqueue_create(org, 24, 100).await.expect("enqueue");
        let job = store.create_jobs().await.expect("list")[0].clone();
        store.delete_create_job(job.id).await.expect("delete");

        assert!(store.create_jobs().await.expect("list").is_empty());
        assert!(!store.has_pending_create(org).await.expect("probe"));
    }

    #[tokio::test]
    async fn pending_probes_match_their_key() {
        let store = MemoryStore::new();
        let org = store.insert_organization("acme");
        let other = store.insert_organization("umbrella");

        store.enqueue_create(org, 24, 100).await.expect("enqueue");
        store.enqueue_top_up(org, batch(7), 5).await.expect("enqueue");

        assert!(store.has_pending_create(org).await.expect("probe"));
        assert!(!store.has_pending_create(other).await.expect("probe"));
        assert!(store.has_pending_top_up(&batch(7)).await.expect("probe"));
        assert!(!store.has_pending_top_up(&batch(8)).await.expect("probe"));
    }

    #[tokio::test]
    async fn active_plan_ignores_other_states() {
        let store = MemoryStore::new();
        let org = store.insert_organization("acme");
        let plan_id = store
            .insert_plan(NewPlan {
                organization_id: org,
                amount_cents: 2900,
                currency: "EUR".into(),
                frequency: "MONTH".into(),
                payment_type: PaymentType::Stripe,
                upload_size_limit: 4 << 30,
                download_size_limit: 8 << 30,
                upload_count_limit: 100_000,
                download_count_limit: 100_000,
            })
            .await
            .expect("insert");

        assert!(store.active_plan(org).await.expect("query").is_none());

        store
            .set_plan_status(plan_id, PlanStatus::Active, None)
            .await
            .expect("update");
        let active = store.active_plan(org).await.expect("query").expect("some");
        assert_eq!(active.id, plan_id);
        assert_eq!(active.storage_gigabytes(), 4);
    }
}

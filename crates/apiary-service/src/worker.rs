// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The queue reconciliation worker.
//!
//! A single long-lived loop drains the three provisioning queues against the
//! hive: top-ups first (least disruptive), then creations, then dilutions.
//! Queue rows are only deleted after the remote operation succeeds, so every
//! job is retried until it lands; a failing job alerts the operators, marks
//! the organization's batch status, and never prevents the remaining jobs of
//! the same cycle from running.

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use apiary_core::PostageBatchStatus;
use tokio_util::sync::CancellationToken;

use crate::{
    alert::Alerts,
    hive::Hive,
    store::{CreateJob, DiluteJob, Store, TopUpJob},
};

/// The queue reconciliation worker.
#[derive(Debug, Clone)]
pub struct ProvisioningWorker {
    store: Arc<dyn Store>,
    hive: Arc<Hive>,
    alerts: Arc<dyn Alerts>,
    poll_interval: Duration,
}

impl ProvisioningWorker {
    /// Creates a worker polling the queues every `poll_interval`.
    pub fn new(
        store: Arc<dyn Store>,
        hive: Arc<Hive>,
        alerts: Arc<dyn Alerts>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            hive,
            alerts,
            poll_interval,
        }
    }

    /// Drains the queues forever, sleeping `poll_interval` between cycles,
    /// until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(poll_interval = ?self.poll_interval, "provisioning worker started");
        loop {
            self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    tracing::info!("provisioning worker shutting down");
                    break;
                }
            }
        }
    }

    /// Runs one reconciliation cycle: top-ups, then creations, then
    /// dilutions, each queue drained fully.
    ///
    /// A cycle over empty queues performs no remote calls and raises no
    /// alerts.
    pub async fn tick(&self) {
        self.drain_top_ups().await;
        self.drain_creates().await;
        self.drain_dilutes().await;
    }

    async fn drain_top_ups(&self) {
        let jobs = match self.store.top_up_jobs().await {
            Ok(jobs) => jobs,
            Err(error) => {
                tracing::error!(%error, "failed to list top-up jobs");
                return;
            }
        };
        for job in jobs {
            if let Err(error) = self.process_top_up(&job).await {
                self.job_failed(
                    "top-up",
                    job.organization_id,
                    PostageBatchStatus::FailedToTopUp,
                    &error,
                )
                .await;
            }
        }
    }

    async fn drain_creates(&self) {
        let jobs = match self.store.create_jobs().await {
            Ok(jobs) => jobs,
            Err(error) => {
                tracing::error!(%error, "failed to list create jobs");
                return;
            }
        };
        for job in jobs {
            if let Err(error) = self.process_create(&job).await {
                self.job_failed(
                    "create",
                    job.organization_id,
                    PostageBatchStatus::FailedToCreate,
                    &error,
                )
                .await;
            }
        }
    }

    async fn drain_dilutes(&self) {
        let jobs = match self.store.dilute_jobs().await {
            Ok(jobs) => jobs,
            Err(error) => {
                tracing::error!(%error, "failed to list dilute jobs");
                return;
            }
        };
        for job in jobs {
            if let Err(error) = self.process_dilute(&job).await {
                self.job_failed(
                    "dilute",
                    job.organization_id,
                    PostageBatchStatus::FailedToDilute,
                    &error,
                )
                .await;
            }
        }
    }

    async fn process_create(&self, job: &CreateJob) -> anyhow::Result<()> {
        let bee = self
            .hive
            .bee_for_batch_creation()
            .context("no node available for batch creation")?;
        let batch_id = bee
            .api()
            .create_postage_batch(job.amount, job.depth)
            .await
            .context("create-batch call failed")?;

        self.store
            .update_organization_batch(
                job.organization_id,
                Some(batch_id),
                Some(bee.id()),
                PostageBatchStatus::Created,
            )
            .await?;
        self.store.delete_create_job(job.id).await?;
        tracing::info!(
            organization_id = %job.organization_id,
            %batch_id,
            bee_id = %bee.id(),
            depth = job.depth,
            "postage batch created",
        );
        Ok(())
    }

    async fn process_top_up(&self, job: &TopUpJob) -> anyhow::Result<()> {
        let organization = self.store.organization(job.organization_id).await?;
        let bee_id = organization
            .bee_id
            .context("organization has no assigned bee")?;
        let bee = self.hive.bee_for_upload(bee_id)?;

        bee.api()
            .top_up(&job.batch_id, job.amount)
            .await
            .context("top-up call failed")?;
        self.store.delete_top_up_job(job.id).await?;
        tracing::info!(
            organization_id = %job.organization_id,
            batch_id = %job.batch_id,
            amount = job.amount,
            "postage batch topped up",
        );
        Ok(())
    }

    async fn process_dilute(&self, job: &DiluteJob) -> anyhow::Result<()> {
        let organization = self.store.organization(job.organization_id).await?;
        let bee_id = organization
            .bee_id
            .context("organization has no assigned bee")?;
        let bee = self.hive.bee_for_upload(bee_id)?;

        bee.api()
            .dilute(&job.batch_id, job.depth)
            .await
            .context("dilute call failed")?;
        self.store.delete_dilute_job(job.id).await?;
        tracing::info!(
            organization_id = %job.organization_id,
            batch_id = %job.batch_id,
            depth = job.depth,
            "postage batch diluted",
        );
        Ok(())
    }

    /// Alerts and records the failure; the job row stays for the next cycle.
    async fn job_failed(
        &self,
        kind: &str,
        organization_id: apiary_core::OrganizationId,
        status: PostageBatchStatus,
        error: &anyhow::Error,
    ) {
        tracing::error!(%organization_id, %error, "{kind} job failed; job retained for retry");
        self.alerts.send_alert(format!(
            "{kind} job: failed to {kind} postage batch for organization {organization_id}: {error:#}",
        ));
        if let Err(store_error) = self
            .store
            .set_postage_batch_status(organization_id, status)
            .await
        {
            tracing::error!(%organization_id, error = %store_error, "failed to record job failure");
        }
    }
}

// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0
//! Apiary orchestration daemon entry point.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use apiary_service::{
    alert::{Alerts, NoopAlerter, WebhookAlerter},
    bee::http_connector,
    config::ServiceConfig,
    hive::Hive,
    lifecycle::PlanLifecycle,
    monitor::{ExpirationMonitor, PlanMonitor, WalletMonitor},
    store::{MemoryStore, Store},
    usage::StoreUsageMetrics,
    worker::ProvisioningWorker,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = env!("CARGO_BIN_NAME"), rename_all = "kebab-case")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to the YAML configuration file.
    #[clap(long, short, env = "APIARY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("unable to build the runtime")?;
    runtime.block_on(run(Arc::new(config)))
}

async fn run(config: Arc<ServiceConfig>) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    for seed in &config.bees {
        store.insert_bee(
            seed.name.clone(),
            seed.url.clone(),
            seed.secret.clone(),
            seed.upload_enabled,
            seed.download_enabled,
        );
    }
    let store: Arc<dyn Store> = store;

    let alerts: Arc<dyn Alerts> = match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlerter::new(url.clone())),
        None => Arc::new(NoopAlerter),
    };

    let hive = Arc::new(Hive::new(store.clone(), http_connector()));
    hive.refresh()
        .await
        .context("initial hive refresh failed")?;

    let cancel = CancellationToken::new();
    hive.clone()
        .spawn_refresh_task(config.hive_refresh_interval, cancel.clone());

    let usage = Arc::new(StoreUsageMetrics::new(store.clone()));
    let lifecycle = PlanLifecycle::new(
        store.clone(),
        hive.clone(),
        alerts.clone(),
        usage,
        config.clone(),
    );

    let worker = ProvisioningWorker::new(
        store.clone(),
        hive.clone(),
        alerts.clone(),
        config.queue_poll_interval,
    );
    let plan_monitor = PlanMonitor::new(
        store.clone(),
        lifecycle.clone(),
        alerts.clone(),
        config.clone(),
    );
    let expiration_monitor = ExpirationMonitor::new(
        store.clone(),
        hive.clone(),
        alerts.clone(),
        config.clone(),
    );
    let wallet_monitor = WalletMonitor::new(hive.clone(), alerts.clone(), config.clone());

    let mut tasks = Vec::new();
    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { worker.run(cancel).await }));
    }
    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { plan_monitor.run(cancel).await }));
    }
    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(
            async move { expiration_monitor.run(cancel).await },
        ));
    }
    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { wallet_monitor.run(cancel).await }));
    }

    tracing::info!("apiary node orchestrator running; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for the shutdown signal")?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

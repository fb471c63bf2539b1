// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Postage-batch lifecycle and node-pool orchestration for the apiary
//! backend.
//!
//! The engine mediates between billing events and a pool of Bee storage
//! nodes: it selects the node serving each operation, provisions and extends
//! postage batches asynchronously through durable work queues, and reconciles
//! those queues against the network with per-job isolation, alerting, and
//! at-least-once retry.

pub mod alert;
pub mod bee;
pub mod config;
pub mod hive;
pub mod lifecycle;
pub mod monitor;
pub mod store;
pub mod usage;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use alert::{Alerts, NoopAlerter, WebhookAlerter};
pub use config::ServiceConfig;
pub use hive::{BeeNode, Hive, HiveError};
pub use lifecycle::{LifecycleError, PlanLifecycle};
pub use store::{MemoryStore, Store, StoreError};
pub use worker::ProvisioningWorker;

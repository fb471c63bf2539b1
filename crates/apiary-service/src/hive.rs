// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The hive: an in-memory registry of the enabled storage nodes, refreshed
//! periodically from the record store, plus the node-selection policy.
//!
//! The node list is replaced wholesale on every refresh, so readers always
//! observe a consistent point-in-time snapshot. The per-node runtime counters
//! live on the snapshot and are therefore reset by a refresh; the download
//! counter is a load-balancing heuristic and the uploading flag a soft hint,
//! neither is relied on for correctness.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, RwLock,
};

use apiary_core::BeeId;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    bee::{BeeApi, BeeConnector},
    store::{BeeRecord, Store},
};

/// Errors raised when selecting a node from the hive.
#[derive(Debug, thiserror::Error)]
pub enum HiveError {
    /// No node in the current snapshot can serve the operation.
    #[error("no bees available for {operation}")]
    NoBeesAvailable {
        /// The operation that found the pool empty.
        operation: &'static str,
    },
    /// The requested node is not part of the current snapshot.
    #[error("bee not found by id: {0}")]
    BeeNotFound(BeeId),
}

/// A storage node in the hive: its durable row, its API client, and runtime
/// counters scoped to the lifetime of the current snapshot.
#[derive(Debug)]
pub struct BeeNode {
    record: BeeRecord,
    api: Arc<dyn BeeApi>,
    downloads: AtomicU64,
    uploading: AtomicBool,
}

impl BeeNode {
    fn new(record: BeeRecord, api: Arc<dyn BeeApi>) -> Self {
        Self {
            record,
            api,
            downloads: AtomicU64::new(0),
            uploading: AtomicBool::new(false),
        }
    }

    /// The node's row ID.
    pub fn id(&self) -> BeeId {
        self.record.id
    }

    /// The node's durable row.
    pub fn record(&self) -> &BeeRecord {
        &self.record
    }

    /// The node's API client.
    pub fn api(&self) -> &Arc<dyn BeeApi> {
        &self.api
    }

    /// Downloads served by this node since the last snapshot refresh.
    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    /// True while an upload is in flight on this node.
    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::Relaxed)
    }

    /// Marks the node as uploading until the returned guard drops.
    ///
    /// A hint for download placement, not a lock; concurrent uploads to the
    /// same node remain possible and harmless.
    pub fn begin_upload(self: Arc<Self>) -> UploadGuard {
        self.uploading.store(true, Ordering::Relaxed);
        UploadGuard(self)
    }
}

/// Clears the owning node's uploading flag on drop.
#[derive(Debug)]
pub struct UploadGuard(Arc<BeeNode>);

impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.0.uploading.store(false, Ordering::Relaxed);
    }
}

/// The node registry and load balancer.
pub struct Hive {
    store: Arc<dyn Store>,
    connector: BeeConnector,
    nodes: RwLock<Arc<Vec<Arc<BeeNode>>>>,
}

impl std::fmt::Debug for Hive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hive")
            .field("store", &self.store)
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

impl Hive {
    /// Creates an empty hive; call [`refresh`][Self::refresh] or
    /// [`spawn_refresh_task`][Self::spawn_refresh_task] to populate it.
    pub fn new(store: Arc<dyn Store>, connector: BeeConnector) -> Self {
        Self {
            store,
            connector,
            nodes: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Reloads the enabled nodes from the store and replaces the snapshot.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let rows = self.store.enabled_bees().await?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            match (self.connector)(&row) {
                Ok(api) => nodes.push(Arc::new(BeeNode::new(row, api))),
                Err(error) => {
                    tracing::warn!(bee_id = %row.id, %error, "skipping bee with unusable client");
                }
            }
        }

        tracing::debug!(count = nodes.len(), "refreshed the hive");
        *self.nodes.write().expect("mutex poisoned") = Arc::new(nodes);
        Ok(())
    }

    /// Starts a task refreshing the hive every `period` until cancelled.
    ///
    /// The first tick fires immediately, so the hive is populated as soon as
    /// the store answers. Refresh failures are logged and retried on the next
    /// tick.
    pub fn spawn_refresh_task(self: Arc<Self>, period: std::time::Duration, cancel: CancellationToken) {
        let hive = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(error) = hive.refresh().await {
                            tracing::warn!(%error, "failed to refresh the hive; retrying next tick");
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!("hive refresh task shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// The current snapshot of nodes.
    pub fn nodes(&self) -> Arc<Vec<Arc<BeeNode>>> {
        self.nodes.read().expect("mutex poisoned").clone()
    }

    /// Returns the node with the given ID.
    pub fn bee_by_id(&self, id: BeeId) -> Result<Arc<BeeNode>, HiveError> {
        self.nodes()
            .iter()
            .find(|node| node.id() == id)
            .cloned()
            .ok_or(HiveError::BeeNotFound(id))
    }

    /// Returns the first node of the snapshot.
    pub fn first_bee(&self) -> Result<Arc<BeeNode>, HiveError> {
        self.nodes()
            .first()
            .cloned()
            .ok_or(HiveError::NoBeesAvailable { operation: "first" })
    }

    /// Picks a node to serve a download and charges it one download.
    ///
    /// Prefers download-enabled nodes with no upload in flight, falling back
    /// to all download-enabled nodes when every candidate is busy. Among the
    /// candidates the least-loaded node wins, first-encountered on ties.
    pub fn bee_for_download(&self) -> Result<Arc<BeeNode>, HiveError> {
        let snapshot = self.nodes();
        let idle: Vec<&Arc<BeeNode>> = snapshot
            .iter()
            .filter(|node| node.record.download_enabled && !node.is_uploading())
            .collect();
        let candidates = if idle.is_empty() {
            snapshot
                .iter()
                .filter(|node| node.record.download_enabled)
                .collect()
        } else {
            idle
        };

        let mut best: Option<&Arc<BeeNode>> = None;
        for node in candidates {
            match best {
                Some(current) if current.download_count() <= node.download_count() => {}
                _ => best = Some(node),
            }
        }

        let node = best.ok_or(HiveError::NoBeesAvailable {
            operation: "download",
        })?;
        node.downloads.fetch_add(1, Ordering::Relaxed);
        Ok(node.clone())
    }

    /// Returns the node pinned for an organization's uploads and batch
    /// operations.
    pub fn bee_for_upload(&self, id: BeeId) -> Result<Arc<BeeNode>, HiveError> {
        self.bee_by_id(id)
    }

    /// Picks the node that will own a newly created postage batch.
    ///
    /// Batches are node-local resources, so creation pins the organization to
    /// the first upload-enabled node rather than load-balancing.
    pub fn bee_for_batch_creation(&self) -> Result<Arc<BeeNode>, HiveError> {
        self.nodes()
            .iter()
            .find(|node| node.record.upload_enabled)
            .cloned()
            .ok_or(HiveError::NoBeesAvailable {
                operation: "postage batch creation",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryStore,
        test_utils::{mock_connector, TestBee},
    };

    async fn hive_with(bees: &[TestBee]) -> (Arc<MemoryStore>, Hive) {
        let store = Arc::new(MemoryStore::new());
        for bee in bees {
            store.insert_bee(
                bee.name,
                format!("http://{}.local:1633", bee.name),
                None,
                bee.upload_enabled,
                bee.download_enabled,
            );
        }
        let hive = Hive::new(store.clone(), mock_connector());
        hive.refresh().await.expect("refresh");
        (store, hive)
    }

    #[tokio::test]
    async fn refresh_replaces_the_snapshot_and_resets_counters() {
        let (store, hive) = hive_with(&[TestBee::new("a"), TestBee::new("b")]).await;

        hive.bee_for_download().expect("pick");
        hive.bee_for_download().expect("pick");
        assert_eq!(
            hive.nodes().iter().map(|n| n.download_count()).sum::<u64>(),
            2,
        );

        store.insert_bee("c", "http://c.local:1633", None, true, true);
        hive.refresh().await.expect("refresh");

        assert_eq!(hive.nodes().len(), 3);
        assert_eq!(
            hive.nodes().iter().map(|n| n.download_count()).sum::<u64>(),
            0,
        );
    }

    #[tokio::test]
    async fn download_picks_are_fair_under_sequential_load() {
        let (_store, hive) =
            hive_with(&[TestBee::new("a"), TestBee::new("b"), TestBee::new("c")])
                .await;

        let requests: u64 = 10;
        for _ in 0..requests {
            hive.bee_for_download().expect("pick");
        }

        let ceiling = requests.div_ceil(hive.nodes().len() as u64);
        for node in hive.nodes().iter() {
            assert!(
                node.download_count() <= ceiling,
                "node {} served {} downloads, ceiling {ceiling}",
                node.record().name,
                node.download_count(),
            );
        }
    }

    #[tokio::test]
    async fn busy_nodes_are_avoided_until_all_are_busy() {
        let (_store, hive) = hive_with(&[TestBee::new("a"), TestBee::new("b")]).await;

        let busy = hive.bee_by_id(BeeId(1)).expect("bee");
        let _guard = busy.begin_upload();

        for _ in 0..3 {
            assert_eq!(hive.bee_for_download().expect("pick").id(), BeeId(2));
        }

        let other = hive.bee_by_id(BeeId(2)).expect("bee");
        let _other_guard = other.begin_upload();
        // Fallback: everyone is busy, the busy filter is dropped.
        hive.bee_for_download().expect("pick despite busy nodes");
    }

    #[tokio::test]
    async fn upload_flag_clears_when_the_guard_drops() {
        let (_store, hive) = hive_with(&[TestBee::new("a")]).await;
        let node = hive.first_bee().expect("bee");

        {
            let _guard = node.clone().begin_upload();
            assert!(node.is_uploading());
        }
        assert!(!node.is_uploading());
    }

    #[tokio::test]
    async fn selection_errors_name_the_operation() {
        let (_store, hive) = hive_with(&[]).await;

        assert!(matches!(
            hive.bee_for_download(),
            Err(HiveError::NoBeesAvailable { .. }),
        ));
        assert!(matches!(
            hive.bee_by_id(BeeId(9)),
            Err(HiveError::BeeNotFound(BeeId(9))),
        ));

        let (_store, upload_only_missing) = hive_with(&[TestBee::download_only("d")]).await;
        assert!(matches!(
            upload_only_missing.bee_for_batch_creation(),
            Err(HiveError::NoBeesAvailable { .. }),
        ));
    }
}

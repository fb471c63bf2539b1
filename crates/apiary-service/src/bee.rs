// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The seam between the engine and remote Bee nodes.
//!
//! Everything the engine asks of a node goes through [`BeeApi`], so tests can
//! substitute a mock and the hive can be rebuilt without re-resolving
//! clients elsewhere.

use apiary_bee_client::{
    api::{ChainState, DownloadedFile, PostageBatch, Topology, UploadResult, WalletBalance},
    BeeClient, ClientBuildError, NodeError,
};
use apiary_core::BatchId;
use async_trait::async_trait;

use crate::store::BeeRecord;

/// Remote operations on a single Bee node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BeeApi: std::fmt::Debug + Send + Sync {
    /// Returns the batch with the given ID, owned by this node.
    async fn get_postage_batch(&self, batch_id: &BatchId) -> Result<PostageBatch, NodeError>;

    /// Returns all batches owned by this node.
    async fn get_all_postage_batches(&self) -> Result<Vec<PostageBatch>, NodeError>;

    /// Buys a new batch and waits for it to become usable.
    async fn create_postage_batch(&self, amount: u64, depth: u8) -> Result<BatchId, NodeError>;

    /// Extends a batch's TTL by `amount` PLUR per chunk.
    async fn top_up(&self, batch_id: &BatchId, amount: u64) -> Result<(), NodeError>;

    /// Expands a batch to `depth` without changing its ID.
    async fn dilute(&self, batch_id: &BatchId, depth: u8) -> Result<(), NodeError>;

    /// Returns the node wallet's balances.
    async fn wallet_balance(&self) -> Result<WalletBalance, NodeError>;

    /// Returns the current chain price per chunk per block, in PLUR.
    async fn price_per_block(&self) -> Result<u64, NodeError>;

    /// Returns the node's overlay topology summary.
    async fn topology(&self) -> Result<Topology, NodeError>;

    /// Downloads the file behind a content reference.
    async fn download(&self, reference: &str) -> Result<DownloadedFile, NodeError>;

    /// Uploads a file against the given batch.
    async fn upload(
        &self,
        batch_id: &BatchId,
        data: Vec<u8>,
        name: &str,
        content_type: &str,
        as_website: bool,
    ) -> Result<UploadResult, NodeError>;
}

#[async_trait]
impl BeeApi for BeeClient {
    async fn get_postage_batch(&self, batch_id: &BatchId) -> Result<PostageBatch, NodeError> {
        BeeClient::get_postage_batch(self, batch_id).await
    }

    async fn get_all_postage_batches(&self) -> Result<Vec<PostageBatch>, NodeError> {
        BeeClient::get_all_postage_batches(self).await
    }

    async fn create_postage_batch(&self, amount: u64, depth: u8) -> Result<BatchId, NodeError> {
        BeeClient::create_postage_batch(self, amount, depth).await
    }

    async fn top_up(&self, batch_id: &BatchId, amount: u64) -> Result<(), NodeError> {
        self.top_up_batch(batch_id, amount).await
    }

    async fn dilute(&self, batch_id: &BatchId, depth: u8) -> Result<(), NodeError> {
        self.dilute_batch(batch_id, depth).await
    }

    async fn wallet_balance(&self) -> Result<WalletBalance, NodeError> {
        self.get_wallet_balance().await
    }

    async fn price_per_block(&self) -> Result<u64, NodeError> {
        Ok(self.get_chain_state().await?.current_price)
    }

    async fn topology(&self) -> Result<Topology, NodeError> {
        self.get_topology().await
    }

    async fn download(&self, reference: &str) -> Result<DownloadedFile, NodeError> {
        self.download_file(reference).await
    }

    async fn upload(
        &self,
        batch_id: &BatchId,
        data: Vec<u8>,
        name: &str,
        content_type: &str,
        as_website: bool,
    ) -> Result<UploadResult, NodeError> {
        self.upload_file(batch_id, data, name, content_type, as_website)
            .await
    }
}

/// Builds the [`BeeApi`] client for a storage-node row.
///
/// The hive calls this on every refresh; injecting a different connector is
/// how tests place mock nodes into the pool.
pub type BeeConnector = std::sync::Arc<
    dyn Fn(&BeeRecord) -> Result<std::sync::Arc<dyn BeeApi>, ClientBuildError> + Send + Sync,
>;

/// Returns the default connector, building an HTTP [`BeeClient`] per row.
pub fn http_connector() -> BeeConnector {
    std::sync::Arc::new(|record: &BeeRecord| {
        let mut builder = BeeClient::builder();
        if let Some(secret) = &record.secret {
            builder = builder.authenticate_with_secret(secret.clone());
        }
        Ok(std::sync::Arc::new(builder.build(&record.url)?) as std::sync::Arc<dyn BeeApi>)
    })
}

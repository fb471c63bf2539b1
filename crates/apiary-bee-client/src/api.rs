// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Typed representations of the Bee HTTP API bodies used by the client.
//!
//! On-chain amounts are string-encoded on the wire; they are bridged to
//! integers with `DisplayFromStr`, matching how the node itself serializes
//! them.

use apiary_core::BatchId;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

/// A postage batch as reported by the owning node.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostageBatch {
    /// The batch ID.
    #[serde(rename = "batchID")]
    pub batch_id: BatchId,
    /// The capacity tier of the batch.
    pub depth: u8,
    /// The per-chunk amount remaining, in PLUR.
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u64,
    /// Remaining time to live, in seconds. `-1` when the chain state is not
    /// yet synced.
    #[serde(rename = "batchTTL")]
    pub batch_ttl_secs: i64,
    /// Whether the batch is usable for uploads.
    pub usable: bool,
    /// Utilization counter of the heaviest bucket.
    #[serde(default)]
    pub utilization: u32,
}

impl PostageBatch {
    /// Remaining TTL in whole days, clamped at zero for unsynced batches.
    pub fn ttl_days(&self) -> u64 {
        u64::try_from(self.batch_ttl_secs).unwrap_or(0) / 86_400
    }
}

/// Response to a batch creation, top-up, or dilute request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampResponse {
    /// The affected batch.
    #[serde(rename = "batchID")]
    pub batch_id: BatchId,
}

/// Wrapper for `GET /stamps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StampsList {
    pub stamps: Vec<PostageBatch>,
}

/// The node wallet's balances, in PLUR and wei respectively.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    /// BZZ balance in PLUR.
    #[serde_as(as = "DisplayFromStr")]
    pub bzz_balance: u128,
    /// Native token balance in wei.
    #[serde_as(as = "DisplayFromStr")]
    pub native_token_balance: u128,
}

/// The subset of `GET /chainstate` the planner consumes.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainState {
    /// Chain block the state was read at.
    pub block: u64,
    /// Current price per chunk per block, in PLUR.
    #[serde_as(as = "DisplayFromStr")]
    pub current_price: u64,
}

/// Summary of the node's view of the overlay network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// The node's storage depth.
    pub depth: u8,
    /// Number of currently connected peers.
    pub connected: u64,
}

/// Reference returned by a `/bzz` upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    /// The content address of the uploaded data.
    pub reference: String,
}

/// A downloaded file: its bytes plus the content type the node reported.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// The file bytes.
    pub data: Vec<u8>,
    /// The `Content-Type` header value, when present.
    pub content_type: Option<String>,
}

// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a programmable in-memory Bee node, a recording alert
//! sink, and record builders.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use apiary_bee_client::{
    api::{DownloadedFile, PostageBatch, Topology, UploadResult, WalletBalance},
    NodeError,
};
use apiary_core::{BatchId, OrganizationId, PaymentType};
use async_trait::async_trait;

use crate::{
    alert::Alerts,
    bee::{BeeApi, BeeConnector},
    store::NewPlan,
};

/// Seconds of TTL bought per PLUR of amount at the fake's block time.
const BLOCK_TIME_SECS: i64 = 5;

#[derive(Debug, thiserror::Error)]
#[error("fake bee: {0}")]
struct FakeBeeError(String);

/// Shorthand description of a bee row inserted for a test.
#[derive(Debug, Clone, Copy)]
pub struct TestBee {
    /// Row name, also used to derive the URL.
    pub name: &'static str,
    /// Whether the row accepts uploads and batch creation.
    pub upload_enabled: bool,
    /// Whether the row serves downloads.
    pub download_enabled: bool,
}

impl TestBee {
    /// A bee with every capability enabled.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            upload_enabled: true,
            download_enabled: true,
        }
    }

    /// A bee that only serves downloads.
    pub fn download_only(name: &'static str) -> Self {
        Self {
            download_enabled: true,
            upload_enabled: false,
            name,
        }
    }
}

/// A programmable [`BeeApi`] holding its batches in memory.
///
/// Created batches get a TTL derived from their amount and the configured
/// price, mirroring how the network prices capacity: `amount / price` blocks
/// at a 5-second block time. Failure flags turn individual operations into
/// errors so retry paths can be exercised.
#[derive(Debug)]
pub struct FakeBee {
    batches: Mutex<HashMap<BatchId, PostageBatch>>,
    created: AtomicU64,
    /// Chain price per chunk per block, in PLUR.
    pub price_per_block: AtomicU64,
    /// Wallet BZZ balance, in PLUR.
    pub bzz_balance: Mutex<u128>,
    /// When set, `create_postage_batch` fails.
    pub fail_creates: AtomicBool,
    /// When set, `top_up` fails.
    pub fail_top_ups: AtomicBool,
    /// When set, `dilute` fails.
    pub fail_dilutes: AtomicBool,
}

impl Default for FakeBee {
    fn default() -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            created: AtomicU64::new(0),
            price_per_block: AtomicU64::new(24_000),
            bzz_balance: Mutex::new(1_000_000_000_000_000_000),
            fail_creates: AtomicBool::new(false),
            fail_top_ups: AtomicBool::new(false),
            fail_dilutes: AtomicBool::new(false),
        }
    }
}

impl FakeBee {
    /// Creates a fake with default pricing and a full wallet.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Inserts a batch with the given depth and TTL, returning its ID.
    pub fn seed_batch(&self, depth: u8, ttl_secs: i64) -> BatchId {
        let batch_id = self.next_batch_id();
        self.batches.lock().expect("mutex poisoned").insert(
            batch_id,
            PostageBatch {
                batch_id,
                depth,
                amount: 0,
                batch_ttl_secs: ttl_secs,
                usable: true,
                utilization: 0,
            },
        );
        batch_id
    }

    /// Number of batches this fake has created or been seeded with.
    pub fn batch_count(&self) -> usize {
        self.batches.lock().expect("mutex poisoned").len()
    }

    /// Returns the current state of a batch, if present.
    pub fn batch(&self, batch_id: &BatchId) -> Option<PostageBatch> {
        self.batches
            .lock()
            .expect("mutex poisoned")
            .get(batch_id)
            .cloned()
    }

    fn next_batch_id(&self) -> BatchId {
        let n = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        let mut bytes = [0u8; BatchId::LENGTH];
        bytes[..8].copy_from_slice(&n.to_be_bytes());
        BatchId(bytes)
    }

    fn ttl_for(&self, amount: u64) -> i64 {
        let price = self.price_per_block.load(Ordering::Relaxed).max(1);
        (amount / price) as i64 * BLOCK_TIME_SECS
    }

    fn fail_if(&self, flag: &AtomicBool, operation: &str) -> Result<(), NodeError> {
        if flag.load(Ordering::Relaxed) {
            Err(NodeError::other(FakeBeeError(format!(
                "{operation} is set to fail"
            ))))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BeeApi for FakeBee {
    async fn get_postage_batch(&self, batch_id: &BatchId) -> Result<PostageBatch, NodeError> {
        self.batch(batch_id)
            .ok_or_else(|| NodeError::other(FakeBeeError(format!("no batch {batch_id}"))))
    }

    async fn get_all_postage_batches(&self) -> Result<Vec<PostageBatch>, NodeError> {
        Ok(self
            .batches
            .lock()
            .expect("mutex poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn create_postage_batch(&self, amount: u64, depth: u8) -> Result<BatchId, NodeError> {
        self.fail_if(&self.fail_creates, "create")?;
        let batch_id = self.next_batch_id();
        self.batches.lock().expect("mutex poisoned").insert(
            batch_id,
            PostageBatch {
                batch_id,
                depth,
                amount,
                batch_ttl_secs: self.ttl_for(amount),
                usable: true,
                utilization: 0,
            },
        );
        Ok(batch_id)
    }

    async fn top_up(&self, batch_id: &BatchId, amount: u64) -> Result<(), NodeError> {
        self.fail_if(&self.fail_top_ups, "top-up")?;
        let mut batches = self.batches.lock().expect("mutex poisoned");
        let batch = batches
            .get_mut(batch_id)
            .ok_or_else(|| NodeError::other(FakeBeeError(format!("no batch {batch_id}"))))?;
        batch.amount += amount;
        batch.batch_ttl_secs += self.ttl_for(amount);
        Ok(())
    }

    async fn dilute(&self, batch_id: &BatchId, depth: u8) -> Result<(), NodeError> {
        self.fail_if(&self.fail_dilutes, "dilute")?;
        let mut batches = self.batches.lock().expect("mutex poisoned");
        let batch = batches
            .get_mut(batch_id)
            .ok_or_else(|| NodeError::other(FakeBeeError(format!("no batch {batch_id}"))))?;
        let steps = depth.saturating_sub(batch.depth);
        batch.depth = depth;
        batch.batch_ttl_secs >>= steps;
        Ok(())
    }

    async fn wallet_balance(&self) -> Result<WalletBalance, NodeError> {
        Ok(WalletBalance {
            bzz_balance: *self.bzz_balance.lock().expect("mutex poisoned"),
            native_token_balance: 0,
        })
    }

    async fn price_per_block(&self) -> Result<u64, NodeError> {
        Ok(self.price_per_block.load(Ordering::Relaxed))
    }

    async fn topology(&self) -> Result<Topology, NodeError> {
        Ok(Topology {
            depth: 8,
            connected: 42,
        })
    }

    async fn download(&self, reference: &str) -> Result<DownloadedFile, NodeError> {
        Err(NodeError::other(FakeBeeError(format!(
            "no file behind reference {reference}"
        ))))
    }

    async fn upload(
        &self,
        _batch_id: &BatchId,
        _data: Vec<u8>,
        name: &str,
        _content_type: &str,
        _as_website: bool,
    ) -> Result<UploadResult, NodeError> {
        Ok(UploadResult {
            reference: format!("ref-{name}"),
        })
    }
}

/// A connector that gives every bee row its own fresh [`FakeBee`].
pub fn mock_connector() -> BeeConnector {
    Arc::new(|_record| Ok(FakeBee::new() as Arc<dyn BeeApi>))
}

/// A connector that maps every bee row to the same shared [`FakeBee`].
pub fn shared_connector(fake: Arc<FakeBee>) -> BeeConnector {
    Arc::new(move |_record| Ok(fake.clone() as Arc<dyn BeeApi>))
}

/// An [`Alerts`] sink that records messages for assertions.
#[derive(Debug, Default)]
pub struct RecordingAlerts {
    messages: Mutex<Vec<String>>,
}

impl RecordingAlerts {
    /// Creates an empty recording sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The alerts recorded so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("mutex poisoned").clone()
    }

    /// Number of alerts recorded so far.
    pub fn count(&self) -> usize {
        self.messages.lock().expect("mutex poisoned").len()
    }
}

impl Alerts for RecordingAlerts {
    fn send_alert(&self, message: String) {
        self.messages.lock().expect("mutex poisoned").push(message);
    }
}

/// A monthly Stripe plan entitling 4 GB of storage and 8 GB of bandwidth.
pub fn monthly_plan(organization_id: OrganizationId) -> NewPlan {
    NewPlan {
        organization_id,
        amount_cents: 2_900,
        currency: "EUR".into(),
        frequency: "MONTH".into(),
        payment_type: PaymentType::Stripe,
        upload_size_limit: 4 << 30,
        download_size_limit: 8 << 30,
        upload_count_limit: 100_000,
        download_count_limit: 100_000,
    }
}

/// Like [`monthly_plan`] but entitling `gigabytes` of storage.
pub fn monthly_plan_with_storage(organization_id: OrganizationId, gigabytes: u64) -> NewPlan {
    NewPlan {
        upload_size_limit: gigabytes << 30,
        ..monthly_plan(organization_id)
    }
}

// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Core functionality for the apiary backend: identifiers shared across the
//! workspace, the domain state enums governing plans and postage batches, and
//! the pure capacity planner.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod capacity;

/// The identifier of a billing/storage tenant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(transparent)]
pub struct OrganizationId(pub u64);

/// The identifier of a subscription plan.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(transparent)]
pub struct PlanId(pub u64);

/// The identifier of a storage node ("bee") row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(transparent)]
pub struct BeeId(pub u64);

macro_rules! impl_id_display {
    ($($name:ident),*) => {
        $(
            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<u64> for $name {
                fn from(value: u64) -> Self {
                    Self(value)
                }
            }
        )*
    };
}

impl_id_display!(OrganizationId, PlanId, BeeId);

/// The ID of a postage batch on the storage network.
///
/// Batch IDs are 32 bytes, rendered as 64 lowercase hex characters on the
/// wire and in the record store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BatchId(pub [u8; Self::LENGTH]);

impl BatchId {
    /// The length of a batch ID in bytes.
    pub const LENGTH: usize = 32;

    /// The all-zero batch ID, used as a placeholder in tests.
    pub const ZERO: Self = Self([0; Self::LENGTH]);
}

impl AsRef<[u8]> for BatchId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchId({self})")
    }
}

/// Error returned when parsing an invalid [`BatchId`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid batch ID: expected 64 hex characters")]
pub struct InvalidBatchId;

impl FromStr for BatchId {
    type Err = InvalidBatchId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InvalidBatchId)?;
        let bytes: [u8; Self::LENGTH] = bytes.try_into().map_err(|_| InvalidBatchId)?;
        Ok(Self(bytes))
    }
}

impl Serialize for BatchId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BatchId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The lifecycle state of a subscription plan.
///
/// Transitions are linear: `PendingPayment → Active → Cancelled`, with
/// `Cancelled` terminal. An organization has at most one `Active` plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    /// Checkout was initiated but no payment has arrived yet.
    PendingPayment,
    /// The plan is paid for and in effect.
    Active,
    /// The plan was cancelled; terminal.
    Cancelled,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{label}")
    }
}

/// The provisioning state of an organization's postage batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostageBatchStatus {
    /// No batch has ever been requested.
    #[default]
    None,
    /// A creation job is queued or in flight.
    Creating,
    /// The batch exists and is usable.
    Created,
    /// The most recent creation attempt failed; the job remains queued.
    FailedToCreate,
    /// The most recent top-up attempt failed; the job remains queued.
    FailedToTopUp,
    /// The most recent dilute attempt failed; the job remains queued.
    FailedToDilute,
    /// The batch reference was released on plan cancellation.
    Removed,
}

/// How a plan is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    /// Paid through a cryptocurrency payment provider.
    Crypto,
    /// Paid through Stripe.
    Stripe,
    /// Not paid (internal or grandfathered plans).
    #[default]
    None,
}

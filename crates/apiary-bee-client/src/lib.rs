// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Client for interacting with the HTTP API of a single Bee storage node.
//!
//! Covers the surface the orchestration engine needs: postage-batch
//! operations (get, list, create, top-up, dilute), wallet and chain state,
//! topology, and `/bzz` upload and download.

pub mod api;
mod client;
mod error;

pub use client::{BeeClient, BeeClientBuilder};
pub use error::{ClientBuildError, NodeError};

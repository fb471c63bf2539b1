// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Errors that may be encountered while interacting with a Bee node.

use reqwest::StatusCode;

/// Error raised during communication with a node.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct NodeError {
    #[from]
    kind: Kind,
}

impl NodeError {
    /// Returns the HTTP error status code associated with the error, if any.
    pub fn http_status_code(&self) -> Option<StatusCode> {
        match &self.kind {
            Kind::Reqwest(inner) => inner.status(),
            Kind::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True if the node reported the requested entity as absent.
    pub fn is_not_found(&self) -> bool {
        self.http_status_code() == Some(StatusCode::NOT_FOUND)
    }

    pub(crate) fn reqwest(err: reqwest::Error) -> Self {
        Kind::Reqwest(err).into()
    }

    pub(crate) fn status(code: StatusCode, message: String) -> Self {
        Kind::Status { code, message }.into()
    }

    pub(crate) fn decode(err: serde_json::Error) -> Self {
        Kind::Decode(err).into()
    }

    /// Wraps an arbitrary error as a node error.
    ///
    /// Used by adapters and test fakes standing in for a real node.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Kind::Other(err.into()).into()
    }
}

/// Errors returned during the communication with a Bee node.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Kind {
    #[error(transparent)]
    Reqwest(reqwest::Error),
    #[error("node returned status {code}: {message}")]
    Status { code: StatusCode, message: String },
    #[error("failed to decode the response body as JSON")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Error returned when a [`BeeClient`][crate::BeeClient] cannot be
/// constructed.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// The provided node URL cannot be used as a base for API routes.
    #[error("invalid node URL: {0}")]
    InvalidUrl(String),
    /// The underlying HTTP client could not be initialized.
    #[error("failed to build the HTTP client")]
    Reqwest(#[from] reqwest::Error),
}

// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Client for interacting with the Bee node API.

use std::time::Duration;

use apiary_core::BatchId;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode, Url,
};
use serde::de::DeserializeOwned;
use tracing::Level;

use crate::{
    api::{
        ChainState, DownloadedFile, PostageBatch, StampResponse, StampsList, Topology,
        UploadResult, WalletBalance,
    },
    error::{ClientBuildError, NodeError},
};

/// Default timeout applied to all requests except batch creation.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for batch creation, which blocks until the new batch is usable
/// on-chain.
const DEFAULT_CREATE_BATCH_TIMEOUT: Duration = Duration::from_secs(480);

const SWARM_POSTAGE_BATCH_ID_HEADER: &str = "swarm-postage-batch-id";
const SWARM_INDEX_DOCUMENT_HEADER: &str = "swarm-index-document";
const SWARM_COLLECTION_HEADER: &str = "swarm-collection";

#[derive(Debug, Clone)]
struct UrlEndpoints(Url);

impl UrlEndpoints {
    /// Joins `path` onto the node's base URL.
    ///
    /// # Panics
    ///
    /// Panics if the result is not a valid URL, which cannot happen for the
    /// fixed route set below.
    fn route(&self, path: &str) -> Url {
        self.0.join(path).expect("this should be a valid URL")
    }

    fn stamp(&self, batch_id: &BatchId) -> Url {
        self.route(&format!("/stamps/{batch_id}"))
    }

    fn stamps(&self) -> Url {
        self.route("/stamps")
    }

    fn create_stamp(&self, amount: u64, depth: u8) -> Url {
        self.route(&format!("/stamps/{amount}/{depth}"))
    }

    fn top_up(&self, batch_id: &BatchId, amount: u64) -> Url {
        self.route(&format!("/stamps/topup/{batch_id}/{amount}"))
    }

    fn dilute(&self, batch_id: &BatchId, depth: u8) -> Url {
        self.route(&format!("/stamps/dilute/{batch_id}/{depth}"))
    }

    fn wallet(&self) -> Url {
        self.route("/wallet")
    }

    fn chain_state(&self) -> Url {
        self.route("/chainstate")
    }

    fn topology(&self) -> Url {
        self.route("/topology")
    }

    fn bzz(&self) -> Url {
        self.route("/bzz")
    }

    fn bzz_reference(&self, reference: &str) -> Url {
        self.route(&format!("/bzz/{reference}/"))
    }
}

/// A client for communicating with a single Bee node.
#[derive(Debug, Clone)]
pub struct BeeClient {
    inner: ReqwestClient,
    endpoints: UrlEndpoints,
    create_batch_timeout: Duration,
}

impl BeeClient {
    /// Returns a new [`BeeClientBuilder`] that can be used to construct a client.
    pub fn builder() -> BeeClientBuilder {
        BeeClientBuilder::default()
    }

    /// Creates a client for the node at `url` with default settings.
    pub fn new(url: &str) -> Result<Self, ClientBuildError> {
        Self::builder().build(url)
    }

    /// The base URL of the node this client talks to.
    pub fn url(&self) -> &Url {
        &self.endpoints.0
    }

    /// Requests a postage batch owned by the node.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn get_postage_batch(&self, batch_id: &BatchId) -> Result<PostageBatch, NodeError> {
        self.send_and_parse(self.inner.get(self.endpoints.stamp(batch_id)))
            .await
    }

    /// Requests all postage batches owned by the node.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn get_all_postage_batches(&self) -> Result<Vec<PostageBatch>, NodeError> {
        let list: StampsList = self
            .send_and_parse(self.inner.get(self.endpoints.stamps()))
            .await?;
        Ok(list.stamps)
    }

    /// Buys a new postage batch and waits until it is usable.
    ///
    /// This is the one intrinsically slow call: the node only replies once
    /// the batch is visible and usable on-chain, so the long
    /// [create-batch timeout][BeeClientBuilder::create_batch_timeout]
    /// applies instead of the client-wide one.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn create_postage_batch(&self, amount: u64, depth: u8) -> Result<BatchId, NodeError> {
        let request = self
            .inner
            .post(self.endpoints.create_stamp(amount, depth))
            .timeout(self.create_batch_timeout);
        let response: StampResponse = self.send_and_parse(request).await?;
        Ok(response.batch_id)
    }

    /// Adds `amount` PLUR per chunk to an existing batch, extending its TTL.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn top_up_batch(&self, batch_id: &BatchId, amount: u64) -> Result<(), NodeError> {
        let request = self
            .inner
            .request(Method::PATCH, self.endpoints.top_up(batch_id, amount));
        self.send_and_check(request).await?;
        Ok(())
    }

    /// Increases the depth of an existing batch without changing its ID.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn dilute_batch(&self, batch_id: &BatchId, depth: u8) -> Result<(), NodeError> {
        let request = self
            .inner
            .request(Method::PATCH, self.endpoints.dilute(batch_id, depth));
        self.send_and_check(request).await?;
        Ok(())
    }

    /// Requests the node wallet's balances.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn get_wallet_balance(&self) -> Result<WalletBalance, NodeError> {
        self.send_and_parse(self.inner.get(self.endpoints.wallet()))
            .await
    }

    /// Requests the chain state; `current_price` is the per-chunk, per-block
    /// price used by the capacity planner.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn get_chain_state(&self) -> Result<ChainState, NodeError> {
        self.send_and_parse(self.inner.get(self.endpoints.chain_state()))
            .await
    }

    /// Requests the node's overlay topology summary.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn get_topology(&self) -> Result<Topology, NodeError> {
        self.send_and_parse(self.inner.get(self.endpoints.topology()))
            .await
    }

    /// Downloads the file behind a `/bzz` reference.
    #[tracing::instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn download_file(&self, reference: &str) -> Result<DownloadedFile, NodeError> {
        let response = self
            .send_and_check(self.inner.get(self.endpoints.bzz_reference(reference)))
            .await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let data = response.bytes().await.map_err(NodeError::reqwest)?.to_vec();
        Ok(DownloadedFile { data, content_type })
    }

    /// Uploads a file against `batch_id` and returns its reference.
    ///
    /// With `as_website` set, the payload is treated as a tar collection with
    /// `index.html` as the index document, mirroring the headers the Bee API
    /// expects for website uploads.
    #[tracing::instrument(skip(self, data), fields(size = data.len()), err(level = Level::DEBUG))]
    pub async fn upload_file(
        &self,
        batch_id: &BatchId,
        data: Vec<u8>,
        name: &str,
        content_type: &str,
        as_website: bool,
    ) -> Result<UploadResult, NodeError> {
        let mut url = self.endpoints.bzz();
        url.query_pairs_mut().append_pair("name", name);

        let mut request = self
            .inner
            .post(url)
            .header(SWARM_POSTAGE_BATCH_ID_HEADER, batch_id.to_string());
        request = if as_website {
            request
                .header(SWARM_COLLECTION_HEADER, "true")
                .header(SWARM_INDEX_DOCUMENT_HEADER, "index.html")
                .header(CONTENT_TYPE, "application/x-tar")
        } else {
            request.header(CONTENT_TYPE, content_type)
        };

        let response = self.send_and_check(request.body(data)).await?;
        response
            .json::<UploadResult>()
            .await
            .map_err(NodeError::reqwest)
    }

    async fn send_and_check(&self, request: RequestBuilder) -> Result<Response, NodeError> {
        let response = request.send().await.map_err(NodeError::reqwest)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        Err(NodeError::status(status, message))
    }

    async fn send_and_parse<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, NodeError> {
        let response = self.send_and_check(request).await?;
        let body = response.bytes().await.map_err(NodeError::reqwest)?;
        serde_json::from_slice(&body).map_err(NodeError::decode)
    }
}

/// Builder to construct a [`BeeClient`].
#[derive(Debug, Default)]
pub struct BeeClientBuilder {
    secret: Option<String>,
    request_timeout: Option<Duration>,
    create_batch_timeout: Option<Duration>,
}

impl BeeClientBuilder {
    /// Authenticates requests with the node's bearer secret.
    pub fn authenticate_with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Overrides the client-wide request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Overrides the timeout for batch creation.
    pub fn create_batch_timeout(mut self, timeout: Duration) -> Self {
        self.create_batch_timeout = Some(timeout);
        self
    }

    /// Consumes the builder and returns a client for the node at `url`.
    pub fn build(self, url: &str) -> Result<BeeClient, ClientBuildError> {
        let url: Url = url
            .parse()
            .map_err(|_| ClientBuildError::InvalidUrl(url.to_owned()))?;
        if url.cannot_be_a_base() {
            return Err(ClientBuildError::InvalidUrl(url.to_string()));
        }

        let mut headers = HeaderMap::new();
        if let Some(secret) = &self.secret {
            let mut value = HeaderValue::from_str(&format!("Bearer {secret}"))
                .map_err(|_| ClientBuildError::InvalidUrl("invalid secret".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let inner = ReqwestClient::builder()
            .timeout(self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .default_headers(headers)
            .build()?;

        Ok(BeeClient {
            inner,
            endpoints: UrlEndpoints(url),
            create_batch_timeout: self
                .create_batch_timeout
                .unwrap_or(DEFAULT_CREATE_BATCH_TIMEOUT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> UrlEndpoints {
        UrlEndpoints("http://bee.local:1633".parse().expect("valid URL"))
    }

    #[test]
    fn stamp_routes_are_rooted_at_the_node() {
        let batch_id: BatchId = "1f".repeat(32).parse().expect("valid batch ID");
        let endpoints = endpoints();

        assert_eq!(
            endpoints.stamp(&batch_id).as_str(),
            format!("http://bee.local:1633/stamps/{batch_id}"),
        );
        assert_eq!(
            endpoints.create_stamp(113_314_620_000, 24).as_str(),
            "http://bee.local:1633/stamps/113314620000/24",
        );
        assert_eq!(
            endpoints.top_up(&batch_id, 42).as_str(),
            format!("http://bee.local:1633/stamps/topup/{batch_id}/42"),
        );
        assert_eq!(
            endpoints.dilute(&batch_id, 25).as_str(),
            format!("http://bee.local:1633/stamps/dilute/{batch_id}/25"),
        );
    }

    #[test]
    fn bzz_reference_route_keeps_trailing_slash() {
        // Bee redirects `/bzz/{ref}` to `/bzz/{ref}/`; going there directly
        // avoids re-sending headers through the redirect.
        assert_eq!(
            endpoints().bzz_reference("0123abcd").as_str(),
            "http://bee.local:1633/bzz/0123abcd/",
        );
    }

    #[test]
    fn builder_rejects_non_base_urls() {
        assert!(matches!(
            BeeClient::new("mailto:bee@example.com"),
            Err(ClientBuildError::InvalidUrl(_)),
        ));
        assert!(BeeClient::new("http://bee.local:1633").is_ok());
    }
}

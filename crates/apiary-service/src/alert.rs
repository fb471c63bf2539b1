// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Operator alerting.
//!
//! Alerts are fire-and-forget: delivery happens on a detached task and
//! failures are only logged, so a broken webhook can never stall or fail the
//! logic that raised the alert.

use reqwest::Url;

/// Sink for operator alerts.
#[cfg_attr(test, mockall::automock)]
pub trait Alerts: std::fmt::Debug + Send + Sync {
    /// Sends `message` to the operators.
    fn send_alert(&self, message: String);
}

/// Discards all alerts; for development setups without a webhook.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlerter;

impl Alerts for NoopAlerter {
    fn send_alert(&self, message: String) {
        tracing::warn!(alert = %message, "alert (no webhook configured)");
    }
}

/// Posts alerts as `{"text": ...}` to a chat webhook.
#[derive(Debug, Clone)]
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: Url,
}

impl WebhookAlerter {
    /// Creates an alerter posting to `url`.
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl Alerts for WebhookAlerter {
    fn send_alert(&self, message: String) {
        tracing::warn!(alert = %message, "sending alert");
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let result = client
                .post(url)
                .json(&serde_json::json!({ "text": message }))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            if let Err(error) = result {
                tracing::error!(%error, "failed to deliver alert");
            }
        });
    }
}

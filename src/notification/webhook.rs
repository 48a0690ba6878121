//! A JSON-over-HTTP transport shared by the channel adapters.
//!
//! Providers (mail gateways, SMS gateways, push relays) sit behind a webhook
//! endpoint. The transport posts the adapter's JSON body and classifies the
//! response into the adapter failure taxonomy.

use crate::core::SendError;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// A client for posting notifications to a provider webhook.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookTransport {
    /// Creates a new `WebhookTransport` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts `payload` to the endpoint.
    #[instrument(skip(self, payload), fields(endpoint = %self.endpoint))]
    pub async fn post(&self, payload: &Value) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request to provider failed");
                SendError::ChannelUnavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(status = %status, "Provider accepted notification");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "Provider rejected notification");
        Err(classify_status(status, &body))
    }
}

/// Maps a non-success HTTP status to an adapter failure.
pub fn classify_status(status: StatusCode, body: &str) -> SendError {
    let detail = if body.is_empty() {
        format!("provider returned {}", status)
    } else {
        format!("provider returned {}: {}", status, body)
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY | StatusCode::TOO_MANY_REQUESTS => {
            SendError::ChannelUnavailable(detail)
        }
        StatusCode::PAYLOAD_TOO_LARGE => SendError::PolicyExceeded(detail),
        s if s.is_server_error() => SendError::ChannelUnavailable(detail),
        s if s.is_client_error() => SendError::InvalidRecipient(detail),
        _ => SendError::ChannelUnavailable(detail),
    }
}

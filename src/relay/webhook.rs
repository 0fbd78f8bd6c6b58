//! Forwarding inbound messages to an automation webhook.
//!
//! The workflow engine behind the webhook produces the reply on its own
//! schedule and delivers it through `POST /send`. Nothing here waits for it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::relay::history::Turn;

/// Body posted to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub sender_id: String,
    pub user_text: String,
    pub name: String,
    /// Sender's history, including the turn for `user_text`.
    pub history: Vec<Turn>,
}

#[derive(Debug)]
pub enum WebhookError {
    Http(String),
    Status(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::Http(e) => write!(f, "HTTP error: {e}"),
            WebhookError::Status(e) => write!(f, "webhook returned {e}"),
        }
    }
}

impl std::error::Error for WebhookError {}

pub struct WebhookForwarder {
    url: String,
    http: reqwest::Client,
}

impl WebhookForwarder {
    pub fn new(url: String) -> Result<Self, WebhookError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WebhookError::Http(e.to_string()))?;
        Ok(Self { url, http })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the payload and wait for the webhook to accept it.
    pub async fn forward(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let response = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WebhookError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WebhookError::Status(format!("{status}: {body}")));
        }
        Ok(())
    }

    /// Fire-and-forget forward. Failures are logged and dropped.
    pub fn spawn_forward(self: &Arc<Self>, payload: WebhookPayload) -> tokio::task::JoinHandle<()> {
        let forwarder = Arc::clone(self);
        tokio::spawn(async move {
            match forwarder.forward(&payload).await {
                Ok(()) => info!("🔗 Forwarded message from {} to webhook", payload.sender_id),
                Err(e) => warn!("Webhook forward failed for {}: {e}", payload.sender_id),
            }
        })
    }
}

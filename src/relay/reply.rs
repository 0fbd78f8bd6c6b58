//! Reply producer - one of two strategies, picked per deployment.

use std::sync::Arc;

use crate::config::{Config, ReplyMode};
use crate::relay::completion::{Client, CompletionResponder};
use crate::relay::webhook::WebhookForwarder;

pub enum ReplyProducer {
    /// Ask the completions API and answer right away.
    Completion(CompletionResponder),
    /// Hand the message to the automation webhook; its answer arrives via `/send`.
    Webhook(Arc<WebhookForwarder>),
}

impl ReplyProducer {
    pub fn from_config(config: &Config) -> Result<Self, String> {
        match config.reply_mode {
            ReplyMode::Completion => {
                let client = Client::new(&config.completion)
                    .map_err(|e| format!("Failed to build completion client: {e}"))?;
                Ok(Self::Completion(CompletionResponder::new(
                    client,
                    config.system_prompt.clone(),
                )))
            }
            ReplyMode::Webhook => {
                let forwarder = WebhookForwarder::new(config.webhook_url.clone())
                    .map_err(|e| format!("Failed to build webhook client: {e}"))?;
                Ok(Self::Webhook(Arc::new(forwarder)))
            }
        }
    }

    pub fn mode(&self) -> ReplyMode {
        match self {
            Self::Completion(_) => ReplyMode::Completion,
            Self::Webhook(_) => ReplyMode::Webhook,
        }
    }
}

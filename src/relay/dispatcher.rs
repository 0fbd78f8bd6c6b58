//! Inbound dispatcher - decides what to do with each message.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::relay::history::{ConversationStore, Turn};
use crate::relay::message::{Dropped, WebMessage};
use crate::relay::outbound::OutboundSender;
use crate::relay::reply::ReplyProducer;
use crate::relay::webhook::WebhookPayload;

/// What happened to one inbound message.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Dropped(Dropped),
    /// Answered directly.
    Replied,
    /// Handed to the webhook; the answer comes later.
    Forwarded,
    /// Processing failed; the error was logged.
    Failed(String),
}

pub struct Dispatcher {
    store: ConversationStore,
    producer: ReplyProducer,
    outbound: OutboundSender,
}

impl Dispatcher {
    pub fn new(store: ConversationStore, producer: ReplyProducer, outbound: OutboundSender) -> Self {
        Self { store, producer, outbound }
    }

    /// Handle a message on its own task so a slow reply never holds up others.
    pub fn dispatch(self: &Arc<Self>, message: WebMessage) -> tokio::task::JoinHandle<Outcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.handle(message).await })
    }

    /// Handle one message. Never fails; problems are logged and reported in the outcome.
    pub async fn handle(&self, message: WebMessage) -> Outcome {
        let inbound = match message.decode() {
            Ok(inbound) => inbound,
            Err(reason) => {
                if reason.is_unexpected() {
                    info!("Dropping message {:?}: {reason}", message.key.id);
                } else {
                    debug!("Dropping message {:?}: {reason}", message.key.id);
                }
                return Outcome::Dropped(reason);
            }
        };

        let preview: String = inbound.text().chars().take(50).collect();
        info!("📩 Message from {} ({}): \"{}\"", inbound.sender, inbound.content.kind(), preview);

        // Held until this turn is complete, so one sender's turns stay in order
        let mut conversation = self.store.lock(&inbound.sender).await;
        conversation.push(Turn::user(inbound.text()));

        match &self.producer {
            ReplyProducer::Completion(responder) => {
                let reply = responder.respond(&conversation.turns()).await;

                if let Err(e) = self.outbound.deliver(&inbound.sender, &reply).await {
                    error!("Error processing message from {}: {e}", inbound.sender);
                    return Outcome::Failed(e.to_string());
                }
                info!("📤 Reply sent to {}", inbound.sender);

                conversation.push(Turn::assistant(reply));
                Outcome::Replied
            }
            ReplyProducer::Webhook(forwarder) => {
                let payload = WebhookPayload {
                    sender_id: inbound.sender.clone(),
                    user_text: inbound.text().to_string(),
                    name: inbound.name.clone(),
                    history: conversation.turns(),
                };
                drop(conversation);

                forwarder.spawn_forward(payload);
                Outcome::Forwarded
            }
        }
    }
}

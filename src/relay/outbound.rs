//! Outbound sender - delivers text through the active session.

use tracing::{info, warn};

use crate::relay::history::{ConversationStore, Turn};
use crate::session::manager::ActiveSession;
use crate::session::transport::SessionError;

#[derive(Clone)]
pub struct OutboundSender {
    session: ActiveSession,
    store: ConversationStore,
}

impl OutboundSender {
    pub fn new(session: ActiveSession, store: ConversationStore) -> Self {
        Self { session, store }
    }

    /// Deliver text without touching history.
    pub async fn deliver(&self, recipient: &str, text: &str) -> Result<(), SessionError> {
        let handle = self.session.current().ok_or(SessionError::NotConnected)?;
        handle.send_text(recipient, text).await
    }

    /// Deliver text and record it as an assistant turn for the recipient.
    ///
    /// Waits for any in-flight turn of the same recipient first. Nothing is
    /// recorded when delivery fails, and nothing is retried.
    pub async fn send(&self, recipient: &str, text: &str) -> Result<(), SessionError> {
        let mut conversation = self.store.lock(recipient).await;
        match self.deliver(recipient, text).await {
            Ok(()) => {
                conversation.push(Turn::assistant(text));
                info!("📤 Sent message to {}", recipient);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send to {}: {e}", recipient);
                Err(e)
            }
        }
    }
}

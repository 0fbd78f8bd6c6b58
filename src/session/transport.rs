//! Seam between the relay and whatever speaks the messaging protocol.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::relay::message::WebMessage;

/// Status code the protocol uses for "this device was logged out".
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Why a connection closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectReason {
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

impl DisconnectReason {
    pub fn logged_out() -> Self {
        Self {
            status_code: Some(LOGGED_OUT_STATUS),
            message: Some("logged out".to_string()),
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: Some(message.into()),
        }
    }

    /// Only an explicit logout stops reconnection.
    pub fn is_logged_out(&self) -> bool {
        self.status_code == Some(LOGGED_OUT_STATUS)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status_code, &self.message) {
            (Some(code), Some(msg)) => write!(f, "{code} {msg}"),
            (Some(code), None) => write!(f, "{code}"),
            (None, Some(msg)) => write!(f, "{msg}"),
            (None, None) => write!(f, "unknown"),
        }
    }
}

/// Something that happened on a live connection.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new pairing code to show the user.
    PairingCode(String),
    Connecting,
    Open,
    Closed(DisconnectReason),
    /// Credential files changed; file name to JSON contents.
    CredentialsUpdated(HashMap<String, Value>),
    Messages(Vec<WebMessage>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Could not start the connection.
    Spawn(String),
    Io(String),
    /// No live session right now.
    NotConnected,
    /// The protocol side refused the request.
    Rejected(String),
    Timeout,
    /// The connection went away while a request was pending.
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to start session: {e}"),
            Self::Io(e) => write!(f, "session I/O error: {e}"),
            Self::NotConnected => write!(f, "session is not connected"),
            Self::Rejected(e) => write!(f, "send rejected: {e}"),
            Self::Timeout => write!(f, "timed out waiting for the session"),
            Self::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Outbound side of a live connection.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Deliver a text message to a chat.
    async fn send_text(&self, to: &str, text: &str) -> Result<(), SessionError>;
}

/// A live connection: a handle to send with and the events it produces.
///
/// Dropping it tears the connection down.
pub struct Connection {
    pub handle: Arc<dyn SessionHandle>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Opens connections to the messaging backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection using (and updating) the credentials in `auth_dir`.
    async fn connect(&self, auth_dir: &Path) -> Result<Connection, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_401_is_logout() {
        assert!(DisconnectReason::logged_out().is_logged_out());
        assert!(!DisconnectReason::default().is_logged_out());
        assert!(
            !DisconnectReason { status_code: Some(428), message: None }.is_logged_out(),
            "connection closed by server is recoverable"
        );
        assert!(!DisconnectReason::with_message("sidecar exited").is_logged_out());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(DisconnectReason::logged_out().to_string(), "401 logged out");
        assert_eq!(DisconnectReason::default().to_string(), "unknown");
        assert_eq!(DisconnectReason { status_code: Some(515), message: None }.to_string(), "515");
    }
}

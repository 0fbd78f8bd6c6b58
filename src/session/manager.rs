//! Session manager - owns the protocol connection.
//!
//! State machine:
//!
//! ```text
//! Connecting --open--> Open --close--> Reconnecting --delay--> Connecting
//!      |                 |
//!      +----logout-------+-----------> LoggedOut
//! Reconnecting --too many failures--> Stopped
//! ```
//!
//! Any close other than an explicit logout is retried with exponential
//! backoff. The failure counter resets whenever a connection opens.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectConfig;
use crate::relay::message::WebMessage;
use crate::session::credentials::CredentialStore;
use crate::session::pairing::{PairingState, terminal_qr};
use crate::session::transport::{Connection, DisconnectReason, SessionEvent, SessionHandle, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    /// Credentials were revoked; needs a fresh pairing.
    LoggedOut,
    /// Gave up after too many failed attempts.
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting { .. } => "reconnecting",
            Self::LoggedOut => "logged_out",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// The currently usable session handle, if any. Replaced wholesale on reconnect.
#[derive(Clone, Default)]
pub struct ActiveSession {
    slot: Arc<RwLock<Option<Arc<dyn SessionHandle>>>>,
}

impl ActiveSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handle: Arc<dyn SessionHandle>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<Arc<dyn SessionHandle>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubles from the base
/// delay up to the cap.
pub fn backoff_delay(policy: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(policy.max_delay)
}

type MessageCallback = Arc<dyn Fn(WebMessage) + Send + Sync>;

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    pairing: PairingState,
    active: ActiveSession,
    reconnect: ReconnectConfig,
    state_tx: watch::Sender<SessionState>,
    on_message: MessageCallback,
}

impl SessionManager {
    /// `on_message` is called once per inbound message, from the manager's task.
    /// It should hand the message off rather than process it inline.
    pub fn new<F>(
        transport: Arc<dyn Transport>,
        credentials: CredentialStore,
        pairing: PairingState,
        active: ActiveSession,
        reconnect: ReconnectConfig,
        on_message: F,
    ) -> Self
    where
        F: Fn(WebMessage) + Send + Sync + 'static,
    {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self {
            transport,
            credentials,
            pairing,
            active,
            reconnect,
            state_tx,
            on_message: Arc::new(on_message),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        debug!("Session state: {}", state);
        self.state_tx.send_replace(state);
    }

    /// Keep a session up until logout or until retries run out.
    /// Returns the terminal state.
    pub async fn run(self) -> SessionState {
        if let Err(e) = self.credentials.ensure_dir() {
            warn!("Credential directory unavailable: {e}");
        }

        let mut failures: u32 = 0;
        loop {
            self.set_state(SessionState::Connecting);

            let reason = match self.transport.connect(self.credentials.dir()).await {
                Ok(connection) => {
                    let (reason, opened) = self.drive(connection).await;
                    if opened {
                        failures = 0;
                    }
                    reason
                }
                Err(e) => {
                    warn!("Failed to connect: {e}");
                    DisconnectReason::with_message(e.to_string())
                }
            };
            self.active.clear();

            if reason.is_logged_out() {
                error!(
                    "Logged out. Delete {:?} and restart to pair again.",
                    self.credentials.dir()
                );
                self.set_state(SessionState::LoggedOut);
                return SessionState::LoggedOut;
            }

            failures = failures.saturating_add(1);
            if self.reconnect.max_attempts > 0 && failures > self.reconnect.max_attempts {
                error!("Giving up after {} failed connection attempts ({reason})", failures - 1);
                self.set_state(SessionState::Stopped);
                return SessionState::Stopped;
            }

            let delay = backoff_delay(&self.reconnect, failures);
            info!("Connection closed ({reason}), reconnecting in {:?}", delay);
            self.set_state(SessionState::Reconnecting { attempt: failures });
            tokio::time::sleep(delay).await;
        }
    }

    /// Pump one connection's events. Returns why it ended and whether it ever opened.
    async fn drive(&self, connection: Connection) -> (DisconnectReason, bool) {
        let Connection { handle, mut events } = connection;
        let mut opened = false;

        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::PairingCode(code) => {
                    match terminal_qr(&code) {
                        Ok(art) => info!("Scan the QR code below to connect (or visit /qr):\n{art}"),
                        Err(e) => warn!("Could not render pairing code: {e}"),
                    }
                    self.pairing.set(code);
                }
                SessionEvent::Connecting => debug!("Sidecar is connecting"),
                SessionEvent::Open => {
                    opened = true;
                    self.pairing.clear();
                    self.active.set(handle.clone());
                    self.set_state(SessionState::Open);
                    info!("✅ Connected");
                }
                SessionEvent::Closed(reason) => return (reason, opened),
                SessionEvent::CredentialsUpdated(files) => {
                    if let Err(e) = self.credentials.persist(&files) {
                        error!("Failed to save credentials: {e}");
                    }
                }
                SessionEvent::Messages(messages) => {
                    for message in messages {
                        (self.on_message)(message);
                    }
                }
            }
        }

        (DisconnectReason::with_message("event stream ended"), opened)
    }
}

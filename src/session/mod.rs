//! Session module - the protocol connection and everything around it.

pub mod credentials;
pub mod manager;
pub mod pairing;
pub mod sidecar;
pub mod transport;

pub use credentials::CredentialStore;
pub use manager::{ActiveSession, SessionManager, SessionState};
pub use pairing::PairingState;
pub use sidecar::SidecarTransport;
pub use transport::{Connection, DisconnectReason, SessionError, SessionEvent, SessionHandle, Transport};

/// Scriptable stand-ins for the protocol side.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::transport::{Connection, SessionError, SessionEvent, SessionHandle, Transport};

    /// Records every send; optionally fails them all.
    #[derive(Default)]
    pub struct FakeHandle {
        sent: Mutex<Vec<(String, String)>>,
        fail_with: Mutex<Option<SessionError>>,
        delay: Mutex<Option<Duration>>,
    }

    impl FakeHandle {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn failing(error: SessionError) -> Arc<Self> {
            let handle = Self::default();
            *handle.fail_with.lock().unwrap() = Some(error);
            Arc::new(handle)
        }

        /// Make every send take this long.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionHandle for FakeHandle {
        async fn send_text(&self, to: &str, text: &str) -> Result<(), SessionError> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.fail_with.lock().unwrap().clone() {
                return Err(error);
            }
            self.sent.lock().unwrap().push((to.to_string(), text.to_string()));
            Ok(())
        }
    }

    /// What one `connect` call does.
    pub enum Script {
        Fail(SessionError),
        /// Emit the events; `hold_open` keeps the stream alive afterwards.
        Events { events: Vec<SessionEvent>, hold_open: bool },
    }

    impl Script {
        pub fn events(events: Vec<SessionEvent>) -> Self {
            Self::Events { events, hold_open: false }
        }

        pub fn held_open(events: Vec<SessionEvent>) -> Self {
            Self::Events { events, hold_open: true }
        }

        pub fn failure(error: SessionError) -> Self {
            Self::Fail(error)
        }
    }

    /// Plays back one script per connect; once they run out, connections
    /// stay open and silent.
    pub struct FakeTransport {
        scripts: Mutex<VecDeque<Script>>,
        handle: Arc<FakeHandle>,
        auth_dirs: Mutex<Vec<PathBuf>>,
        held: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
    }

    impl FakeTransport {
        pub fn new(scripts: Vec<Script>) -> Self {
            Self::with_handle(scripts, FakeHandle::new())
        }

        pub fn with_handle(scripts: Vec<Script>, handle: Arc<FakeHandle>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                handle,
                auth_dirs: Mutex::new(Vec::new()),
                held: Mutex::new(Vec::new()),
            }
        }

        pub fn connect_count(&self) -> usize {
            self.auth_dirs.lock().unwrap().len()
        }

        pub fn auth_dirs(&self) -> Vec<PathBuf> {
            self.auth_dirs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self, auth_dir: &Path) -> Result<Connection, SessionError> {
            self.auth_dirs.lock().unwrap().push(auth_dir.to_path_buf());
            let script = self.scripts.lock().unwrap().pop_front();

            let (events, hold_open) = match script {
                Some(Script::Fail(error)) => return Err(error),
                Some(Script::Events { events, hold_open }) => (events, hold_open),
                None => (Vec::new(), true),
            };

            let (tx, rx) = mpsc::channel(events.len().max(1));
            for event in events {
                tx.try_send(event).expect("channel sized for script");
            }
            if hold_open {
                self.held.lock().unwrap().push(tx);
            }

            Ok(Connection {
                handle: self.handle.clone(),
                events: rx,
            })
        }
    }
}

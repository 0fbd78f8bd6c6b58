//! Protocol sidecar - the messaging library running as a child process.
//!
//! The sidecar owns the wire protocol, encryption and pairing. We talk to it
//! with one JSON object per line: events on its stdout, commands on its
//! stdin. It is started as `<command> <args...> --auth-dir <dir>` and keeps
//! its credential files in that directory; when they change it also reports
//! them so they can be persisted atomically.
//!
//! Events (stdout):
//! ```text
//! {"event":"qr","code":"2@..."}
//! {"event":"connection","state":"open"}
//! {"event":"close","statusCode":401,"message":"logged out"}
//! {"event":"creds","files":{"creds.json":{...}}}
//! {"event":"messages","messages":[...]}
//! {"event":"ack","id":3,"error":null}
//! ```
//! Commands (stdin):
//! ```text
//! {"cmd":"send","id":3,"to":"111@s.whatsapp.net","text":"hi"}
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::SidecarConfig;
use crate::relay::message::WebMessage;
use crate::session::transport::{
    Connection, DisconnectReason, SessionError, SessionEvent, SessionHandle, Transport,
};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum SidecarLine {
    Qr {
        code: String,
    },
    Connection {
        state: String,
    },
    Close {
        #[serde(default, rename = "statusCode")]
        status_code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    Creds {
        #[serde(default)]
        files: HashMap<String, Value>,
    },
    /// Entries are decoded one by one so a bad one can't sink the batch.
    Messages {
        #[serde(default)]
        messages: Vec<Value>,
    },
    Ack {
        id: u64,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
enum SidecarCommand<'a> {
    Send { id: u64, to: &'a str, text: &'a str },
}

/// Starts one sidecar process per connection.
pub struct SidecarTransport {
    config: SidecarConfig,
    send_timeout: Duration,
}

impl SidecarTransport {
    pub fn new(config: SidecarConfig, send_timeout: Duration) -> Self {
        Self { config, send_timeout }
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn connect(&self, auth_dir: &Path) -> Result<Connection, SessionError> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg("--auth-dir")
            .arg(auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Spawn(format!("{}: {e}", self.config.command)))?;

        let stdin = child.stdin.take().ok_or_else(|| SessionError::Spawn("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| SessionError::Spawn("no stdout".into()))?;

        info!("🚀 Sidecar started (PID {})", child.id().unwrap_or_default());

        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(100);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(read_loop(child, stdout, event_tx, pending.clone()));

        let handle = SidecarHandle {
            stdin: AsyncMutex::new(stdin),
            next_id: AtomicU64::new(0),
            pending,
            send_timeout: self.send_timeout,
        };

        Ok(Connection {
            handle: Arc::new(handle),
            events: event_rx,
        })
    }
}

struct SidecarHandle {
    stdin: AsyncMutex<ChildStdin>,
    next_id: AtomicU64,
    pending: Pending,
    send_timeout: Duration,
}

impl SidecarHandle {
    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

#[async_trait]
impl SessionHandle for SidecarHandle {
    async fn send_text(&self, to: &str, text: &str) -> Result<(), SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, ack_tx);

        let mut line = serde_json::to_string(&SidecarCommand::Send { id, to, text })
            .map_err(|e| SessionError::Io(format!("serialize: {e}")))?;
        line.push('\n');

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.forget(id);
            return Err(SessionError::Io(format!("write: {e}")));
        }
        debug!("Sent command {} (len={})", id, text.len());

        match tokio::time::timeout(self.send_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(msg))) => Err(SessionError::Rejected(msg)),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                self.forget(id);
                Err(SessionError::Timeout)
            }
        }
    }
}

fn to_event(line: SidecarLine, pending: &Pending) -> Option<SessionEvent> {
    match line {
        SidecarLine::Qr { code } => Some(SessionEvent::PairingCode(code)),
        SidecarLine::Connection { state } => match state.as_str() {
            "open" => Some(SessionEvent::Open),
            "connecting" => Some(SessionEvent::Connecting),
            other => {
                debug!("Ignoring connection state {other:?}");
                None
            }
        },
        SidecarLine::Close { status_code, message } => {
            Some(SessionEvent::Closed(DisconnectReason { status_code, message }))
        }
        SidecarLine::Creds { files } => Some(SessionEvent::CredentialsUpdated(files)),
        SidecarLine::Messages { messages } => {
            let total = messages.len();
            let decoded: Vec<WebMessage> = messages
                .into_iter()
                .filter_map(|raw| match serde_json::from_value::<WebMessage>(raw) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!("Skipping undecodable message in batch: {e}");
                        None
                    }
                })
                .collect();
            if decoded.is_empty() && total > 0 {
                return None;
            }
            Some(SessionEvent::Messages(decoded))
        }
        SidecarLine::Ack { id, error } => {
            let waiter = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(error.map_or(Ok(()), Err));
                }
                None => debug!("Ack for unknown command {id}"),
            }
            None
        }
        SidecarLine::Other => None,
    }
}

async fn read_loop(
    mut child: Child,
    stdout: ChildStdout,
    event_tx: mpsc::Sender<SessionEvent>,
    pending: Pending,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(l)) if l.trim().is_empty() => continue,
                    Ok(Some(l)) => l,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Sidecar read error: {}", e);
                        break;
                    }
                };

                let parsed = match serde_json::from_str::<SidecarLine>(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!("Unparseable sidecar line: {} ({})", e, line.chars().take(80).collect::<String>());
                        continue;
                    }
                };

                if let Some(event) = to_event(parsed, &pending)
                    && event_tx.send(event).await.is_err()
                {
                    break;
                }
            }
            _ = event_tx.closed() => {
                debug!("Connection dropped, stopping sidecar");
                break;
            }
        }
    }

    // Anyone still waiting for an ack won't get one
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();

    if event_tx.is_closed() {
        let _ = child.kill().await;
        return;
    }

    let reason = match child.wait().await {
        Ok(status) => DisconnectReason::with_message(format!("sidecar exited ({status})")),
        Err(e) => DisconnectReason::with_message(format!("sidecar wait failed: {e}")),
    };
    info!("Sidecar stopped: {}", reason);
    let _ = event_tx.send(SessionEvent::Closed(reason)).await;
}

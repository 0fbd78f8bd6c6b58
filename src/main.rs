use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use wa_relay::config::{Config, DEFAULT_CONFIG_PATH};
use wa_relay::relay::{ConversationStore, Dispatcher, OutboundSender, ReplyProducer};
use wa_relay::server::{self, AppState};
use wa_relay::session::{ActiveSession, CredentialStore, PairingState, SessionManager, SidecarTransport};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // An explicit path must exist; the default one is optional
    let explicit_path = std::env::args().nth(1);
    let required = explicit_path.is_some();
    let config_path = explicit_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match Config::load(&config_path, required) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("relay.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting wa-relay...");
    if required {
        info!("Loaded config from {config_path}");
    }
    info!("Reply mode: {}", config.reply_mode);

    let producer = match ReplyProducer::from_config(&config) {
        Ok(producer) => producer,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    if let ReplyProducer::Webhook(forwarder) = &producer {
        info!("Forwarding messages to {}", forwarder.url());
    }

    let store = ConversationStore::new(config.history_limit);
    let active = ActiveSession::new();
    let pairing = PairingState::new();
    let outbound = OutboundSender::new(active.clone(), store.clone());
    let dispatcher = Arc::new(Dispatcher::new(store, producer, outbound.clone()));

    let credentials = CredentialStore::new(config.auth_dir.clone());
    if !credentials.has_credentials() {
        info!("No saved credentials in {:?}; a pairing code will be issued", credentials.dir());
    }

    let transport = Arc::new(SidecarTransport::new(config.sidecar.clone(), config.send_timeout));
    let manager = SessionManager::new(
        transport,
        credentials,
        pairing.clone(),
        active,
        config.reconnect,
        move |message| {
            dispatcher.dispatch(message);
        },
    );
    let session_state = manager.subscribe();

    tokio::spawn(async move {
        let state = manager.run().await;
        warn!("Session manager stopped: {state}");
    });

    let state = AppState { pairing, outbound, session_state };
    let addr = format!("{}:{}", config.bind_address, config.port);
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down");
    };

    if let Err(e) = server::serve(&addr, state, shutdown).await {
        error!("Server error on {addr}: {e}");
        std::process::exit(1);
    }
}

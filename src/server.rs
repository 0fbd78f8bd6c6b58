//! HTTP surface: liveness, pairing page, outbound callback.
//!
//! None of these endpoints are authenticated; bind to a private interface or
//! put the relay behind a proxy that is.

use std::future::Future;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Html,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::relay::outbound::OutboundSender;
use crate::session::manager::SessionState;
use crate::session::pairing::{PairingState, svg_data_url};

#[derive(Clone)]
pub struct AppState {
    pub pairing: PairingState,
    pub outbound: OutboundSender,
    pub session_state: watch::Receiver<SessionState>,
}

/// Body of `POST /send`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

const NO_QR_PAGE: &str = "<html><body><h1>No QR Code Available</h1>\
<p>Either already connected or waiting for QR generation.</p>\
<script>setTimeout(() => location.reload(), 5000);</script></body></html>";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/qr", get(qr_page))
        .route("/send", post(send_handler))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(addr: &str, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 Relay listening on {}", listener.local_addr()?);
    info!("📱 Visit /qr to scan the pairing code");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn index() -> Html<&'static str> {
    Html("Bot is Alive! 🟢 <br> <a href=\"/qr\">Scan QR Code</a>")
}

async fn qr_page(State(state): State<AppState>) -> (StatusCode, Html<String>) {
    let Some(code) = state.pairing.current() else {
        return (StatusCode::OK, Html(NO_QR_PAGE.to_string()));
    };

    match svg_data_url(&code) {
        Ok(url) => (
            StatusCode::OK,
            Html(format!(
                "<html><body style=\"text-align:center; padding-top:50px;\">\
                 <h1>Scan this QR Code</h1>\
                 <img src=\"{url}\" style=\"width:300px; height:300px; border:1px solid #ccc;\"/>\
                 <p>Reloading in 5 seconds...</p>\
                 <script>setTimeout(() => location.reload(), 5000);</script>\
                 </body></html>"
            )),
        ),
        Err(e) => {
            warn!("Failed to render pairing code: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Html("Error generating QR".to_string()))
        }
    }
}

async fn send_handler(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": rejection.body_text() })));
        }
    };

    let sender_id = request.sender_id.filter(|s| !s.is_empty());
    let text = request.text.filter(|t| !t.is_empty());
    let (Some(sender_id), Some(text)) = (sender_id, text) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "senderId and text are required" })),
        );
    };

    match state.outbound.send(&sender_id, &text).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))),
    }
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let session = *state.session_state.borrow();
    Json(json!({
        "state": session.as_str(),
        "pairingPending": state.pairing.is_pending(),
    }))
}

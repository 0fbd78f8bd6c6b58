//! Chat completions client (OpenAI-compatible, Groq by default).

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::CompletionConfig;
use crate::relay::history::{Role, Turn};

/// Reply used when no API key is configured.
pub const NOT_CONFIGURED_REPLY: &str = "Sorry, AI service is not configured. Please contact the admin.";

/// Reply used when the completion call fails.
pub const FALLBACK_REPLY: &str = "Sorry, I am having trouble responding right now. Please try again later.";

pub struct Client {
    api_url: String,
    model: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Client {
    pub fn new(config: &CompletionConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Ask for the next assistant message given a system instruction and the
    /// conversation so far.
    pub async fn complete(&self, system_prompt: &str, history: &[Turn]) -> Result<String, Error> {
        let api_key = self.api_key.as_deref().ok_or(Error::NotConfigured)?;

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ApiMessage { role: "system", content: system_prompt });
        messages.extend(history.iter().map(|turn| ApiMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &turn.content,
        }));

        let request = ApiRequest { model: &self.model, messages };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(Error::Empty)
    }
}

#[derive(Debug)]
pub enum Error {
    NotConfigured,
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotConfigured => write!(f, "API key not configured"),
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

/// Produces reply text for a conversation, never failing.
pub struct CompletionResponder {
    client: Client,
    system_prompt: String,
}

impl CompletionResponder {
    pub fn new(client: Client, system_prompt: String) -> Self {
        if !client.is_configured() {
            error!("GROQ_API_KEY not set, every reply will be the 'not configured' message");
        }
        Self { client, system_prompt }
    }

    /// Reply text for the given history. Errors become fixed fallback texts.
    pub async fn respond(&self, history: &[Turn]) -> String {
        if !self.client.is_configured() {
            error!("Completion requested but no API key is configured");
            return NOT_CONFIGURED_REPLY.to_string();
        }

        debug!("Calling completions API with {} turn(s)", history.len());
        match self.client.complete(&self.system_prompt, history).await {
            Ok(text) => {
                info!("🤖 Completion received ({} chars)", text.chars().count());
                text
            }
            Err(e) => {
                error!("Completion API error: {e}");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config(api_url: &str, api_key: Option<&str>) -> CompletionConfig {
        CompletionConfig {
            api_url: api_url.to_string(),
            model: "test-model".to_string(),
            api_key: api_key.map(str::to_string),
            timeout: Duration::from_secs(5),
        }
    }

    /// Serve a fixed completion and report each request (auth header, body).
    async fn fake_api(reply: Value) -> (String, mpsc::UnboundedReceiver<(Option<String>, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let tx = tx.clone();
                let reply = reply.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    tx.send((auth, body)).ok();
                    Json(reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.ok() });
        (format!("http://{addr}/v1/chat/completions"), rx)
    }

    #[tokio::test]
    async fn test_not_configured_reply_for_any_input() {
        let client = Client::new(&config("http://127.0.0.1:1/unused", None)).unwrap();
        let responder = CompletionResponder::new(client, "prompt".into());

        assert_eq!(responder.respond(&[Turn::user("Hello")]).await, NOT_CONFIGURED_REPLY);
        assert_eq!(responder.respond(&[]).await, NOT_CONFIGURED_REPLY);
    }

    #[tokio::test]
    async fn test_transport_failure_returns_fallback() {
        // Nothing listens on port 1
        let client = Client::new(&config("http://127.0.0.1:1/v1/chat/completions", Some("key"))).unwrap();
        let responder = CompletionResponder::new(client, "prompt".into());

        assert_eq!(responder.respond(&[Turn::user("Hello")]).await, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_complete_sends_system_prompt_and_history() {
        let (url, mut requests) = fake_api(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Namaste!" } }]
        }))
        .await;
        let client = Client::new(&config(&url, Some("secret"))).unwrap();

        let history = vec![Turn::user("Hi"), Turn::assistant("Hello!"), Turn::user("How are you?")];
        let text = client.complete("be nice", &history).await.unwrap();
        assert_eq!(text, "Namaste!");

        let (auth, body) = requests.recv().await.unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
        assert_eq!(body["model"], "test-model");
        assert_eq!(
            body["messages"],
            json!([
                { "role": "system", "content": "be nice" },
                { "role": "user", "content": "Hi" },
                { "role": "assistant", "content": "Hello!" },
                { "role": "user", "content": "How are you?" }
            ])
        );
    }

    #[tokio::test]
    async fn test_empty_choices_is_error_and_falls_back() {
        let (url, _requests) = fake_api(json!({ "choices": [] })).await;
        let client = Client::new(&config(&url, Some("secret"))).unwrap();
        assert!(matches!(client.complete("p", &[]).await, Err(Error::Empty)));

        let responder = CompletionResponder::new(client, "p".into());
        assert_eq!(responder.respond(&[Turn::user("x")]).await, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "invalid api key") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.ok() });

        let url = format!("http://{addr}/v1/chat/completions");
        let client = Client::new(&config(&url, Some("bad"))).unwrap();
        match client.complete("p", &[Turn::user("x")]).await {
            Err(Error::Api(msg)) => assert!(msg.contains("401")),
            other => panic!("expected API error, got {other:?}"),
        }
    }
}

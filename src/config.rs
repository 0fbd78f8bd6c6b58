use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::relay::prompt::DEFAULT_SYSTEM_PROMPT;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Failed to read the system prompt file.
    ReadPrompt { path: PathBuf, source: std::io::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::ReadPrompt { path, source } => {
                write!(f, "failed to read system prompt file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::ReadPrompt { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// Which reply strategy is active for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// Call the completions endpoint and reply directly.
    Completion,
    /// Forward to the automation webhook; replies come back through `/send`.
    Webhook,
}

impl ReplyMode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completion" => Some(Self::Completion),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

impl fmt::Display for ReplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completion => write!(f, "completion"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    port: Option<u16>,
    bind_address: Option<String>,
    /// Directory for state files (logs, credentials). Defaults to current directory.
    data_dir: Option<String>,
    /// Credential directory, relative to data_dir unless absolute.
    auth_dir: Option<String>,
    reply_mode: Option<ReplyMode>,
    history_limit: Option<usize>,
    #[serde(default)]
    completion: CompletionFile,
    webhook_url: Option<String>,
    system_prompt: Option<String>,
    system_prompt_file: Option<String>,
    #[serde(default)]
    sidecar: SidecarFile,
    #[serde(default)]
    reconnect: ReconnectFile,
    send_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
struct CompletionFile {
    api_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
struct SidecarFile {
    command: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct ReconnectFile {
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

pub const DEFAULT_CONFIG_PATH: &str = "relay.json";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HISTORY_LIMIT: usize = 10;
const DEFAULT_COMPLETION_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_COMPLETION_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_WEBHOOK_URL: &str = "http://localhost:5678/webhook/whatsapp";

/// Settings for the chat completions endpoint.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_url: String,
    pub model: String,
    /// None means the completion strategy always answers with the "not configured" text.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// How to launch the protocol sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub command: String,
    pub args: Vec<String>,
}

/// Reconnect backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0 = retry forever.
    pub max_attempts: u32,
}

pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
    /// Credential directory handed to the sidecar.
    pub auth_dir: PathBuf,
    pub reply_mode: ReplyMode,
    pub history_limit: usize,
    pub completion: CompletionConfig,
    pub webhook_url: String,
    pub system_prompt: String,
    pub sidecar: SidecarConfig,
    pub reconnect: ReconnectConfig,
    pub send_timeout: Duration,
}

impl Config {
    /// Load from a JSON file, then apply environment overrides.
    ///
    /// `required` controls whether a missing file is an error or just means defaults.
    pub fn load<P: AsRef<Path>>(path: P, required: bool) -> Result<Self, ConfigError> {
        Self::load_with_env(path, required, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<P, F>(path: P, required: bool, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let file = if !required && !config_path.exists() {
            ConfigFile::default()
        } else {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
            serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?
        };

        let mut config = Self::from_file(file)?;
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let auth_dir = {
            let dir = PathBuf::from(file.auth_dir.unwrap_or_else(|| "auth_info".to_string()));
            if dir.is_absolute() { dir } else { data_dir.join(dir) }
        };

        // Inline prompt wins over the prompt file
        let system_prompt = match (file.system_prompt, file.system_prompt_file) {
            (Some(prompt), _) => prompt,
            (None, Some(path)) => {
                let path = PathBuf::from(path);
                std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::ReadPrompt { path: path.clone(), source: e })?
            }
            (None, None) => DEFAULT_SYSTEM_PROMPT.to_string(),
        };

        Ok(Self {
            port: file.port.unwrap_or(DEFAULT_PORT),
            bind_address: file.bind_address.unwrap_or_else(|| "0.0.0.0".to_string()),
            data_dir,
            auth_dir,
            reply_mode: file.reply_mode.unwrap_or(ReplyMode::Completion),
            history_limit: file.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            completion: CompletionConfig {
                api_url: file
                    .completion
                    .api_url
                    .unwrap_or_else(|| DEFAULT_COMPLETION_URL.to_string()),
                model: file
                    .completion
                    .model
                    .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string()),
                api_key: file.completion.api_key.filter(|k| !k.trim().is_empty()),
                timeout: Duration::from_secs(file.completion.timeout_secs.unwrap_or(60)),
            },
            webhook_url: file.webhook_url.unwrap_or_else(|| DEFAULT_WEBHOOK_URL.to_string()),
            system_prompt,
            sidecar: SidecarConfig {
                command: file.sidecar.command.unwrap_or_else(|| "node".to_string()),
                args: file.sidecar.args.unwrap_or_else(|| vec!["sidecar.js".to_string()]),
            },
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(file.reconnect.base_delay_ms.unwrap_or(1000)),
                max_delay: Duration::from_millis(file.reconnect.max_delay_ms.unwrap_or(60_000)),
                max_attempts: file.reconnect.max_attempts.unwrap_or(0),
            },
            send_timeout: Duration::from_secs(file.send_timeout_secs.unwrap_or(30)),
        })
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = env("PORT")
            && !port.trim().is_empty()
        {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("PORT is not a valid port: {port:?}")))?;
        }
        if let Some(key) = env("GROQ_API_KEY")
            && !key.trim().is_empty()
        {
            self.completion.api_key = Some(key);
        }
        if let Some(mode) = env("REPLY_MODE") {
            self.reply_mode = ReplyMode::parse(&mode).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "REPLY_MODE must be 'completion' or 'webhook', got {mode:?}"
                ))
            })?;
        }
        if let Some(url) = env("WEBHOOK_URL") {
            self.webhook_url = url;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 {
            return Err(ConfigError::Validation("history_limit must be at least 1".into()));
        }
        if self.sidecar.command.trim().is_empty() {
            return Err(ConfigError::Validation("sidecar.command is required".into()));
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err(ConfigError::Validation(
                "reconnect.max_delay_ms must not be smaller than reconnect.base_delay_ms".into(),
            ));
        }
        if self.reply_mode == ReplyMode::Webhook && reqwest::Url::parse(&self.webhook_url).is_err() {
            return Err(ConfigError::Validation(format!(
                "webhook_url is not a valid URL: {}",
                self.webhook_url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_missing_optional_file_gives_defaults() {
        let config = Config::load_with_env("/nonexistent/relay.json", false, no_env).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.reply_mode, ReplyMode::Completion);
        assert!(config.completion.api_key.is_none());
        assert_eq!(config.auth_dir, PathBuf::from(".").join("auth_info"));
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_file_not_found_when_required() {
        let err = assert_err(Config::load_with_env("/nonexistent/relay.json", true, no_env));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load_with_env(file.path(), true, no_env));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_file_values() {
        let file = write_config(r#"{
            "port": 8080,
            "data_dir": "/var/lib/relay",
            "reply_mode": "webhook",
            "history_limit": 4,
            "webhook_url": "http://127.0.0.1:9000/hook",
            "completion": { "api_key": "from-file", "model": "small" },
            "sidecar": { "command": "bun", "args": ["run", "bridge.ts"] }
        }"#);
        let config = Config::load_with_env(file.path(), true, no_env).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.auth_dir, PathBuf::from("/var/lib/relay/auth_info"));
        assert_eq!(config.reply_mode, ReplyMode::Webhook);
        assert_eq!(config.history_limit, 4);
        assert_eq!(config.completion.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.completion.model, "small");
        assert_eq!(config.sidecar.command, "bun");
        assert_eq!(config.sidecar.args, vec!["run", "bridge.ts"]);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(r#"{ "port": 8080, "completion": { "api_key": "from-file" } }"#);
        let env: HashMap<&str, &str> =
            HashMap::from([("PORT", "4000"), ("GROQ_API_KEY", "from-env"), ("REPLY_MODE", "Webhook")]);
        let config =
            Config::load_with_env(file.path(), true, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.completion.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.reply_mode, ReplyMode::Webhook);
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let file = write_config(r#"{ "completion": { "api_key": "  " } }"#);
        let config =
            Config::load_with_env(file.path(), true, |k| (k == "GROQ_API_KEY").then(String::new)).unwrap();
        assert!(config.completion.api_key.is_none());
    }

    #[test]
    fn test_invalid_port_env() {
        let err = assert_err(Config::load_with_env("/nonexistent", false, |k| {
            (k == "PORT").then(|| "not-a-port".to_string())
        }));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_blank_port_env_keeps_default() {
        let config =
            Config::load_with_env("/nonexistent", false, |k| (k == "PORT").then(String::new)).unwrap();
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_invalid_reply_mode_env() {
        let err = assert_err(Config::load_with_env("/nonexistent", false, |k| {
            (k == "REPLY_MODE").then(|| "carrier-pigeon".to_string())
        }));
        assert!(err.to_string().contains("REPLY_MODE"));
    }

    #[test]
    fn test_zero_history_limit() {
        let file = write_config(r#"{ "history_limit": 0 }"#);
        let err = assert_err(Config::load_with_env(file.path(), true, no_env));
        assert!(err.to_string().contains("history_limit"));
    }

    #[test]
    fn test_bad_webhook_url_only_checked_in_webhook_mode() {
        let file = write_config(r#"{ "webhook_url": "not a url" }"#);
        assert!(Config::load_with_env(file.path(), true, no_env).is_ok());

        let file = write_config(r#"{ "webhook_url": "not a url", "reply_mode": "webhook" }"#);
        let err = assert_err(Config::load_with_env(file.path(), true, no_env));
        assert!(err.to_string().contains("webhook_url"));
    }

    #[test]
    fn test_backoff_bounds_validated() {
        let file = write_config(r#"{ "reconnect": { "base_delay_ms": 5000, "max_delay_ms": 100 } }"#);
        let err = assert_err(Config::load_with_env(file.path(), true, no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_prompt_file() {
        let prompt = write_config("You answer questions about trains.");
        let file = write_config(&format!(
            r#"{{ "system_prompt_file": {:?} }}"#,
            prompt.path().display().to_string()
        ));
        let config = Config::load_with_env(file.path(), true, no_env).unwrap();
        assert_eq!(config.system_prompt, "You answer questions about trains.");

        let file = write_config(r#"{ "system_prompt_file": "/nonexistent/prompt.txt" }"#);
        let err = assert_err(Config::load_with_env(file.path(), true, no_env));
        assert!(matches!(err, ConfigError::ReadPrompt { .. }));
    }
}

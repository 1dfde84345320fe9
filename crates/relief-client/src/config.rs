//! Client configuration loading from file and environment variables.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::consumer::ConsumerConfig;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Event stream settings.
    #[serde(default)]
    pub client: StreamClientConfig,

    /// Offline mutation queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event stream connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamClientConfig {
    /// Base URL of the relief server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Silence tolerated on an open stream before reconnecting.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Channels to subscribe to; empty means all.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Opaque identity forwarded to the server.
    #[serde(default)]
    pub identity: Option<String>,
}

/// Offline mutation queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Path of the SQLite file holding queued mutations.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Server base URL that queued mutations are replayed against. When
    /// unset, drained mutations are acknowledged locally.
    #[serde(default)]
    pub replay_base_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    relief_types::DEFAULT_RECONNECT_DELAY_MS
}

fn default_idle_timeout_ms() -> u64 {
    relief_types::DEFAULT_HEARTBEAT_INTERVAL_SECS * 1_000 + relief_types::DEFAULT_STALL_GRACE_MS
}

fn default_db_path() -> String {
    "relief-queue.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            channels: Vec::new(),
            identity: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            replay_base_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Installs the global tracing subscriber. An unparsable level falls
    /// back to `info`.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
        if self.json {
            subscriber.json().init();
        } else {
            subscriber.init();
        }
    }
}

impl StreamClientConfig {
    /// Consumer settings derived from this section.
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            stream_url: format!("{}/events/stream", self.server_url.trim_end_matches('/')),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms.max(1)),
            channels: self.channels.clone(),
            identity: self.identity.clone(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `RELIEF_SERVER_URL` overrides `client.server_url`
/// - `RELIEF_RECONNECT_MS` overrides `client.reconnect_delay_ms`
/// - `RELIEF_IDLE_TIMEOUT_MS` overrides `client.idle_timeout_ms`
/// - `RELIEF_QUEUE_DB` overrides `queue.db_path`
/// - `RELIEF_LOG_LEVEL` overrides `logging.level`
/// - `RELIEF_LOG_JSON` overrides `logging.json`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path.map(std::fs::read_to_string) {
        None => Config::default(),
        Some(Ok(contents)) => toml::from_str(&contents)?,
        Some(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Some(Err(e)) => return Err(e.into()),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let millis = |key| var(key).and_then(|raw: String| raw.trim().parse::<u64>().ok());

    if let Some(url) = var("RELIEF_SERVER_URL") {
        config.client.server_url = url;
    }
    if let Some(ms) = millis("RELIEF_RECONNECT_MS") {
        config.client.reconnect_delay_ms = ms;
    }
    if let Some(ms) = millis("RELIEF_IDLE_TIMEOUT_MS") {
        config.client.idle_timeout_ms = ms;
    }
    if let Some(path) = var("RELIEF_QUEUE_DB") {
        config.queue.db_path = path;
    }
    if let Some(level) = var("RELIEF_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("RELIEF_LOG_JSON") {
        config.logging.json = matches!(json.trim(), "true" | "1");
    }
}

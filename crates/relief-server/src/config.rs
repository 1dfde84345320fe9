//! Server configuration: a TOML file, then `RELIEF_*` environment overrides.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [events]
//! max_events = 1000
//! broadcast_capacity = 256
//!
//! [stream]
//! heartbeat_interval_secs = 15
//!
//! [logging]
//! level = "relief_server=debug,info"
//! json = true
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub events: EventsConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

/// Listen address.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
        }
    }
}

/// Event log sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events retained for catch-up and resume.
    pub max_events: usize,
    /// Live events buffered per stream before a slow client lags.
    pub broadcast_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_events: relief_types::DEFAULT_MAX_EVENTS,
            broadcast_capacity: 256,
        }
    }
}

/// Stream endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub heartbeat_interval_secs: u64,
    /// Frames buffered per connection between the writer and the socket.
    pub frame_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: relief_types::DEFAULT_HEARTBEAT_INTERVAL_SECS,
            frame_buffer: 64,
        }
    }
}

impl StreamConfig {
    /// Heartbeat period; never shorter than one second.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `"relief_server=debug,info"`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
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

/// Where the configuration path came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Argument(String),
    Environment(String),
    Default,
}

impl ConfigSource {
    /// Picks the first non-blank of the command-line argument and the
    /// environment variable `env_var`.
    pub fn resolve(arg: Option<String>, env_var: &str) -> Self {
        Self::pick(arg, std::env::var(env_var).ok())
    }

    fn pick(arg: Option<String>, env: Option<String>) -> Self {
        let present = |v: &String| !v.trim().is_empty();
        match (arg.filter(present), env.filter(present)) {
            (Some(path), _) => Self::Argument(path),
            (None, Some(path)) => Self::Environment(path),
            (None, None) => Self::Default,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Argument(path) | Self::Environment(path) => Some(path.as_str()),
            Self::Default => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Reads `path` (a missing file means defaults) and applies environment
/// overrides:
///
/// | Variable | Key |
/// |----------|-----|
/// | `RELIEF_HOST` | `server.host` |
/// | `RELIEF_PORT` | `server.port` |
/// | `RELIEF_MAX_EVENTS` | `events.max_events` |
/// | `RELIEF_HEARTBEAT_SECS` | `stream.heartbeat_interval_secs` |
/// | `RELIEF_LOG_LEVEL` | `logging.level` |
/// | `RELIEF_LOG_JSON` | `logging.json` (`true` or `1`) |
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

/// Parses `key` from `var`; unparsable values are ignored.
fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|raw| raw.trim().parse().ok())
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = parsed(&var, "RELIEF_HOST") {
        config.server.host = host;
    }
    if let Some(port) = parsed(&var, "RELIEF_PORT") {
        config.server.port = port;
    }
    if let Some(max_events) = parsed(&var, "RELIEF_MAX_EVENTS") {
        config.events.max_events = max_events;
    }
    if let Some(secs) = parsed(&var, "RELIEF_HEARTBEAT_SECS") {
        config.stream.heartbeat_interval_secs = secs;
    }
    if let Some(level) = var("RELIEF_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("RELIEF_LOG_JSON") {
        config.logging.json = matches!(json.trim(), "true" | "1");
    }
}

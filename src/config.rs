//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::websocket::{HubConfig, OutboundFormat, SessionConfig, SlowConsumerPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding `home.html`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// How long `/sleep` holds the typing indicator open
    #[serde(default = "default_typing_indicator")]
    pub typing_indicator_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./static")
}

fn default_typing_indicator() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            typing_indicator_ms: default_typing_indicator(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn typing_indicator(&self) -> Duration {
        Duration::from_millis(self.typing_indicator_ms)
    }
}

/// Connection and fan-out tunables
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Time allowed to write a frame to a client
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,

    /// Time allowed between pongs from a client
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Heartbeat period; defaults to 9/10 of `pong_wait_ms`
    #[serde(default)]
    pub ping_period_ms: Option<u64>,

    /// Maximum inbound message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default = "default_register_capacity")]
    pub register_capacity: usize,

    #[serde(default)]
    pub slow_consumer: SlowConsumerPolicy,

    #[serde(default)]
    pub outbound_format: OutboundFormat,
}

fn default_write_wait() -> u64 {
    10_000
}

fn default_pong_wait() -> u64 {
    60_000
}

fn default_max_message_size() -> usize {
    512
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_register_capacity() -> usize {
    64
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            write_wait_ms: default_write_wait(),
            pong_wait_ms: default_pong_wait(),
            ping_period_ms: None,
            max_message_size: default_max_message_size(),
            mailbox_capacity: default_mailbox_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            register_capacity: default_register_capacity(),
            slow_consumer: SlowConsumerPolicy::default(),
            outbound_format: OutboundFormat::default(),
        }
    }
}

impl RelayConfig {
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        match self.ping_period_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.pong_wait() * 9 / 10,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            write_wait: self.write_wait(),
            pong_wait: self.pong_wait(),
            ping_period: self.ping_period(),
            max_message_size: self.max_message_size,
            mailbox_capacity: self.mailbox_capacity,
            outbound_format: self.outbound_format,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            register_capacity: self.register_capacity,
            broadcast_capacity: self.broadcast_capacity,
            slow_consumer: self.slow_consumer,
        }
    }

    fn validate(&self) -> Result<(), String> {
        self.session_config().validate()?;
        for (name, value) in [
            ("broadcast_capacity", self.broadcast_capacity),
            ("register_capacity", self.register_capacity),
        ] {
            if value == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// First existing file among the default config locations
    pub fn locate() -> Option<PathBuf> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("parley").join("config.toml")),
            Some(PathBuf::from("/etc/parley/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        config_paths.into_iter().flatten().find(|path| path.exists())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate().map_err(ConfigError::Invalid)
    }

    /// Whether the bundled chat page is served while the relay speaks plain
    /// JSON, which the page cannot display.
    pub fn chat_page_needs_htmx(&self) -> bool {
        self.relay.outbound_format != OutboundFormat::Htmx
            && self.server.static_dir.join("home.html").is_file()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // Server overrides
        if let Ok(host) = std::env::var("PARLEY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PARLEY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(dir) = std::env::var("PARLEY_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(dir);
        }

        // Relay overrides
        if let Ok(format) = std::env::var("PARLEY_OUTBOUND_FORMAT") {
            self.relay.outbound_format = format.parse().map_err(ConfigError::Invalid)?;
        }
        if let Ok(policy) = std::env::var("PARLEY_SLOW_CONSUMER") {
            self.relay.slow_consumer = policy.parse().map_err(ConfigError::Invalid)?;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PARLEY_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Parley Configuration
#
# Environment variables override these settings:
# - PARLEY_HOST
# - PARLEY_PORT
# - PARLEY_STATIC_DIR
# - PARLEY_OUTBOUND_FORMAT
# - PARLEY_SLOW_CONSUMER
# - PARLEY_LOG_LEVEL
# - PARLEY_LOG_FORMAT

[server]
# HTTP server host
host = "0.0.0.0"

# HTTP server port
port = 8080

# Directory containing home.html
static_dir = "./static"

# How long the "someone is typing" indicator stays up (ms)
typing_indicator_ms = 5000

[relay]
# Time allowed to write a frame to a client (ms)
write_wait_ms = 10000

# Time allowed between pongs from a client before it is dropped (ms)
pong_wait_ms = 60000

# Heartbeat period, must be shorter than pong_wait_ms (default: 9/10 of it)
# ping_period_ms = 54000

# Largest inbound message accepted (bytes)
max_message_size = 512

# Outbound queue length per client
mailbox_capacity = 256

# Queue length of the shared broadcast intake
broadcast_capacity = 256

# Queue length of the registration intake
register_capacity = 64

# What to do when a client's queue is full: drop (skip the message for that
# client) or evict (disconnect the client)
slow_consumer = "drop"

# Outbound encoding: json or htmx. The bundled chat page (static/home.html)
# only renders htmx fragments; use json for custom clients.
outbound_format = "json"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.addr(), "0.0.0.0:8080");
        assert_eq!(config.relay.write_wait(), Duration::from_secs(10));
        assert_eq!(config.relay.pong_wait(), Duration::from_secs(60));
        assert_eq!(config.relay.ping_period(), Duration::from_secs(54));
        assert_eq!(config.relay.slow_consumer, SlowConsumerPolicy::Drop);
        assert_eq!(config.relay.outbound_format, OutboundFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.server.port, defaults.server.port);
        assert_eq!(config.relay.pong_wait_ms, defaults.relay.pong_wait_ms);
        assert_eq!(config.relay.ping_period_ms, None);
        assert_eq!(config.relay.mailbox_capacity, defaults.relay.mailbox_capacity);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[relay]\npong_wait_ms = 1000\nslow_consumer = \"evict\"\noutbound_format = \"htmx\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.relay.pong_wait(), Duration::from_secs(1));
        assert_eq!(config.relay.ping_period(), Duration::from_millis(900));
        assert_eq!(config.relay.slow_consumer, SlowConsumerPolicy::Evict);
        assert_eq!(config.relay.outbound_format, OutboundFormat::Htmx);
    }

    #[test]
    fn test_session_and_hub_config() {
        let relay = RelayConfig {
            ping_period_ms: Some(500),
            pong_wait_ms: 1000,
            mailbox_capacity: 8,
            broadcast_capacity: 16,
            slow_consumer: SlowConsumerPolicy::Evict,
            ..RelayConfig::default()
        };

        let session = relay.session_config();
        assert_eq!(session.ping_period, Duration::from_millis(500));
        assert_eq!(session.pong_wait, Duration::from_secs(1));
        assert_eq!(session.mailbox_capacity, 8);

        let hub = relay.hub_config();
        assert_eq!(hub.broadcast_capacity, 16);
        assert_eq!(hub.slow_consumer, SlowConsumerPolicy::Evict);
    }

    #[test]
    fn test_validate_rejects_ping_not_shorter_than_pong() {
        let mut config = Config::default();
        config.relay.pong_wait_ms = 1000;
        config.relay.ping_period_ms = Some(1000);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.relay.ping_period_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.relay.mailbox_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.relay.max_message_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chat_page_needs_htmx() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.static_dir = dir.path().to_path_buf();

        // No page, nothing to warn about
        assert!(!config.chat_page_needs_htmx());

        std::fs::write(dir.path().join("home.html"), "<html></html>").unwrap();
        assert!(config.chat_page_needs_htmx());

        config.relay.outbound_format = OutboundFormat::Htmx;
        assert!(!config.chat_page_needs_htmx());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/parley.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\nslow_consumer = \"block\"").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}

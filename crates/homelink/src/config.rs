//! Configuration file parsing and structures.
//!
//! homelink uses TOML for declarative configuration. Every section has a
//! default, so an empty file (or no file at all) yields a working setup that
//! talks to the public HiveMQ broker with test.mosquitto.org as fallback.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub mqtt: MqttConfig,
    pub debounce: DebounceConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `rumqttc = "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

/// Which MQTT transport the client library should use
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// MQTT over WebSocket (`ws://host:port/path`)
    #[default]
    Websocket,
    /// Plain MQTT over TCP; `path` is ignored
    Tcp,
}

fn default_namespace() -> String {
    "casa".to_string()
}

fn default_client_id_prefix() -> String {
    "dashboard".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// MQTT session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Root of the topic namespace; the session subscribes to `<namespace>/#`
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Client IDs are `<prefix>_<8 random hex digits>`
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Connect as soon as the daemon starts
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    #[serde(
        default = "BrokerConfig::default_primary",
        deserialize_with = "deserialize_primary"
    )]
    pub primary: BrokerConfig,

    #[serde(
        default = "BrokerConfig::default_alternate",
        deserialize_with = "deserialize_alternate"
    )]
    pub alternate: BrokerConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            client_id_prefix: default_client_id_prefix(),
            transport: TransportKind::default(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            auto_connect: true,
            primary: BrokerConfig::default_primary(),
            alternate: BrokerConfig::default_alternate(),
        }
    }
}

impl MqttConfig {
    /// Wildcard filter covering the whole device namespace
    pub fn subscription_filter(&self) -> String {
        format!("{}/#", self.namespace)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_path() -> String {
    "/mqtt".to_string()
}

/// A single broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Set to false to disable this broker (only meaningful for the alternate)
    pub enabled: bool,

    pub host: String,

    pub port: u16,

    /// WebSocket path (default: "/mqtt")
    pub path: String,

    pub use_ssl: bool,

    /// Fixed delay before reconnecting after this broker dropped the session
    pub reconnect_delay_ms: u64,
}

/// A broker table as written in the file. Fields left out keep the value
/// from the role's default broker.
#[derive(Debug, Default, Deserialize)]
struct PartialBrokerConfig {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    use_ssl: Option<bool>,
    reconnect_delay_ms: Option<u64>,
}

impl PartialBrokerConfig {
    fn merge_onto(self, base: BrokerConfig) -> BrokerConfig {
        BrokerConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            host: self.host.unwrap_or(base.host),
            port: self.port.unwrap_or(base.port),
            path: self.path.unwrap_or(base.path),
            use_ssl: self.use_ssl.unwrap_or(base.use_ssl),
            reconnect_delay_ms: self.reconnect_delay_ms.unwrap_or(base.reconnect_delay_ms),
        }
    }
}

fn deserialize_primary<'de, D>(deserializer: D) -> Result<BrokerConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let partial = PartialBrokerConfig::deserialize(deserializer)?;
    Ok(partial.merge_onto(BrokerConfig::default_primary()))
}

fn deserialize_alternate<'de, D>(deserializer: D) -> Result<BrokerConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let partial = PartialBrokerConfig::deserialize(deserializer)?;
    Ok(partial.merge_onto(BrokerConfig::default_alternate()))
}

impl BrokerConfig {
    fn default_primary() -> Self {
        Self {
            enabled: true,
            host: "broker.hivemq.com".to_string(),
            port: 8000,
            path: default_path(),
            use_ssl: false,
            reconnect_delay_ms: 5_000,
        }
    }

    fn default_alternate() -> Self {
        Self {
            enabled: true,
            host: "test.mosquitto.org".to_string(),
            port: 8080,
            path: default_path(),
            use_ssl: false,
            reconnect_delay_ms: 10_000,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn default_resend_window_ms() -> u64 {
    1_000
}

fn default_echo_window_ms() -> u64 {
    2_000
}

fn default_expiry_ms() -> u64 {
    3_000
}

/// Timing windows for the command debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DebounceConfig {
    /// Identical commands to the same topic within this window are dropped
    #[serde(default = "default_resend_window_ms")]
    pub resend_window_ms: u64,

    /// Inbound status matching a command sent within this window is an echo
    #[serde(default = "default_echo_window_ms")]
    pub echo_window_ms: u64,

    /// Pending commands are forgotten after this long
    #[serde(default = "default_expiry_ms")]
    pub expiry_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            resend_window_ms: default_resend_window_ms(),
            echo_window_ms: default_echo_window_ms(),
            expiry_ms: default_expiry_ms(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8565
}

/// Native HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
            port: default_api_port(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let namespace = &self.mqtt.namespace;
        if namespace.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt.namespace must not be empty".to_string(),
            ));
        }
        if namespace.contains(['#', '+']) || namespace.ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "mqtt.namespace '{}' must not contain wildcards or a trailing '/'",
                namespace
            )));
        }

        for (name, broker) in [
            ("primary", &self.mqtt.primary),
            ("alternate", &self.mqtt.alternate),
        ] {
            if broker.host.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "mqtt.{}.host must not be empty",
                    name
                )));
            }
            if broker.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "mqtt.{}.port must not be 0",
                    name
                )));
            }
            if !broker.path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "mqtt.{}.path '{}' must start with '/'",
                    name, broker.path
                )));
            }
        }

        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::Validation(
                "mqtt.keep_alive_secs must be at least 1".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "mqtt.connect_timeout_secs must be at least 1".to_string(),
            ));
        }

        if !self.mqtt.primary.enabled {
            return Err(ConfigError::Validation(
                "mqtt.primary cannot be disabled".to_string(),
            ));
        }

        let debounce = &self.debounce;
        if debounce.resend_window_ms > debounce.expiry_ms
            || debounce.echo_window_ms > debounce.expiry_ms
        {
            return Err(ConfigError::Validation(format!(
                "debounce windows ({}ms resend, {}ms echo) must not exceed expiry ({}ms)",
                debounce.resend_window_ms, debounce.echo_window_ms, debounce.expiry_ms
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

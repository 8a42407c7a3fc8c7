//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via COLINK_CONFIG or --config)
//! 3. Environment variables

use crate::connection::{ConnectionConfig, ReconnectPolicy, TlsClientConfig, TrustPolicy};
use colink_protocol::{DEFAULT_PORT, MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server endpoint and timeouts.
    pub server: ServerConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Loads configuration from COLINK_CONFIG (if set), then applies
    /// environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], with an explicit file taking precedence over
    /// COLINK_CONFIG.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("COLINK_CONFIG") {
                Ok(path) => Self::from_file(path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.server.apply_env_overrides();
        self.tls.apply_env_overrides();
        self.reconnect.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.tls.validate()?;
        self.reconnect.validate()
    }

    /// Validates and converts into a [`ConnectionConfig`].
    pub fn to_connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        self.validate()?;

        let server = &self.server;
        let mut config = ConnectionConfig::new(server.host.clone(), server.port)
            .with_connect_timeout(server.connect_timeout())
            .with_disconnect_grace(Duration::from_millis(server.disconnect_grace_ms))
            .with_max_frame_size(server.max_frame_size)
            .with_event_capacity(server.event_capacity);
        if let Some(timeout) = server.request_timeout() {
            config = config.with_request_timeout(timeout);
        }
        config.reconnect = ReconnectPolicy {
            interval: self.reconnect.interval(),
            max_attempts: self.reconnect.max_attempts,
        };

        config.tls = if self.tls.enabled {
            Some(self.tls.to_client_config())
        } else {
            None
        };

        Ok(config)
    }
}

fn env_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// TCP connect and TLS handshake timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Correlated reply timeout in seconds (0 = wait indefinitely).
    pub request_timeout_secs: u64,
    /// Grace period for the reader on disconnect, in milliseconds.
    pub disconnect_grace_ms: u64,
    /// Largest frame written to the server.
    pub max_frame_size: usize,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 10,
            request_timeout_secs: 0,
            disconnect_grace_ms: 1000,
            max_frame_size: MAX_FRAME_SIZE,
            event_capacity: 256,
        }
    }
}

impl ServerConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("COLINK_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var("COLINK_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }

        if let Ok(timeout) = std::env::var("COLINK_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Ok(timeout) = std::env::var("COLINK_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.request_timeout_secs = secs;
            }
        }

        if let Ok(size) = std::env::var("COLINK_MAX_FRAME_SIZE") {
            if let Ok(size) = size.parse() {
                self.max_frame_size = size;
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationError("server host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError("server port must be non-zero".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.max_frame_size <= MIN_FRAME_SIZE || self.max_frame_size > MAX_FRAME_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "max_frame_size must be in {}..={}",
                MIN_FRAME_SIZE + 1,
                MAX_FRAME_SIZE
            )));
        }
        Ok(())
    }
}

/// Server certificate trust mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustMode {
    /// Bundled web PKI roots.
    #[default]
    Webpki,
    /// CA bundle from `ca_cert_path`.
    CaFile,
    /// Skip verification entirely.
    AcceptAny,
}

/// TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS.
    pub enabled: bool,
    /// How the server certificate is verified.
    pub trust: TrustMode,
    /// Path to PEM-encoded CA certificate(s). Required for `ca_file` trust.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (mTLS).
    pub client_key_path: Option<PathBuf>,
    /// SNI override.
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust: TrustMode::Webpki,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            server_name: None,
        }
    }
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("COLINK_TLS_ENABLED") {
            self.enabled = env_flag(&enabled);
        }
        if let Ok(trust) = std::env::var("COLINK_TLS_TRUST") {
            match trust.to_lowercase().as_str() {
                "webpki" => self.trust = TrustMode::Webpki,
                "ca_file" | "cafile" => self.trust = TrustMode::CaFile,
                "accept_any" | "insecure" => self.trust = TrustMode::AcceptAny,
                other => tracing::warn!("ignoring unknown COLINK_TLS_TRUST value '{}'", other),
            }
        }
        if let Ok(path) = std::env::var("COLINK_TLS_CA") {
            self.ca_cert_path = Some(PathBuf::from(path));
            if self.trust == TrustMode::Webpki {
                self.trust = TrustMode::CaFile;
            }
        }
        if let Ok(path) = std::env::var("COLINK_TLS_CLIENT_CERT") {
            self.client_cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("COLINK_TLS_CLIENT_KEY") {
            self.client_key_path = Some(PathBuf::from(path));
        }
        if let Ok(name) = std::env::var("COLINK_TLS_SERVER_NAME") {
            self.server_name = Some(name);
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.trust == TrustMode::CaFile && self.ca_cert_path.is_none() {
            return Err(ConfigError::ValidationError(
                "ca_file trust selected but ca_cert_path not set".to_string(),
            ));
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::ValidationError(
                "client_cert_path and client_key_path must be set together".to_string(),
            ));
        }

        Ok(())
    }

    fn to_client_config(&self) -> TlsClientConfig {
        let trust = match (self.trust, &self.ca_cert_path) {
            (TrustMode::AcceptAny, _) => TrustPolicy::AcceptAny,
            (TrustMode::CaFile, Some(path)) => TrustPolicy::CaFile(path.clone()),
            _ => TrustPolicy::WebPki,
        };
        TlsClientConfig {
            enabled: true,
            trust,
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            server_name: self.server_name.clone(),
        }
    }
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Pause between attempts in milliseconds.
    pub interval_ms: u64,
    /// Give up after this many failed attempts (0 = never).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("COLINK_RECONNECT_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.interval_ms = ms;
            }
        }
        if let Ok(max) = std::env::var("COLINK_RECONNECT_MAX_ATTEMPTS") {
            if let Ok(n) = max.parse() {
                self.max_attempts = n;
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reconnect interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MDTSDB_CONFIG or --config)
//! 3. Environment variables

use mdtsdb_protocol::{Compression, DEFAULT_COMPRESSION_LEVEL, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service endpoint.
    pub endpoint: EndpointConfig,
    /// Keys and token flow.
    pub credentials: CredentialsConfig,
    /// Transport options.
    pub transport: TransportConfig,
}

impl ClientConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MDTSDB_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads an optional YAML file, then applies environment variable overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.endpoint.apply_env_overrides();
        self.credentials.apply_env_overrides();
        self.transport.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Checks the configuration before any network call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "endpoint host is empty".to_string(),
            ));
        }
        if self.endpoint.port == 0 {
            return Err(ConfigError::ValidationError(
                "endpoint port must be non-zero".to_string(),
            ));
        }
        self.transport.compression()?;

        let creds = &self.credentials;
        if creds.has_token_flow() {
            return Ok(());
        }
        match (creds.app_key.is_empty(), creds.admin_key.is_empty()) {
            (true, true) => {
                return Err(ConfigError::ValidationError(
                    "either app_key or admin_key is required".to_string(),
                ))
            }
            (false, false) => {
                return Err(ConfigError::ValidationError(
                    "app_key and admin_key are mutually exclusive".to_string(),
                ))
            }
            _ => {}
        }
        if creds.secret_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "secret_key is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    /// Use https (and wss for WebSocket targets).
    pub use_ssl: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            use_ssl: false,
        }
    }
}

impl EndpointConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MDTSDB_HOST") {
            self.host = host;
        }

        if let Ok(port) = std::env::var("MDTSDB_PORT") {
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        }

        if let Ok(ssl) = std::env::var("MDTSDB_USE_SSL") {
            self.use_ssl = ssl == "true" || ssl == "1";
        }
    }

    /// Base URL of the HTTP API, with a trailing slash.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }
}

/// Keys and OAuth2 client-credentials settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub app_key: String,
    pub admin_key: String,
    pub secret_key: String,
    /// Token endpoint for the client-credentials flow.
    pub auth_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl CredentialsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("MDTSDB_APP_KEY") {
            self.app_key = key;
        }
        if let Ok(key) = std::env::var("MDTSDB_ADMIN_KEY") {
            self.admin_key = key;
        }
        if let Ok(key) = std::env::var("MDTSDB_SECRET_KEY") {
            self.secret_key = key;
        }
        if let Ok(url) = std::env::var("MDTSDB_AUTH_URL") {
            self.auth_url = Some(url);
        }
        if let Ok(id) = std::env::var("MDTSDB_CLIENT_ID") {
            self.client_id = Some(id);
        }
        if let Ok(secret) = std::env::var("MDTSDB_CLIENT_SECRET") {
            self.client_secret = Some(secret);
        }
    }

    /// Whether all three token-flow settings are present.
    pub fn has_token_flow(&self) -> bool {
        self.auth_url.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

/// Transport options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Ingestion body encoding: none, gzip, bson or gzip-bson.
    pub compression: String,
    /// DEFLATE level 0-9; anything else means the default.
    pub compression_level: i64,
    /// Log requests and responses at debug level.
    pub debug: bool,
    /// Stream request bodies from a sized reader instead of buffering them.
    pub streamed_body: bool,
    /// Use the streaming Authorization scheme.
    pub streaming_auth: bool,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds (0 = none).
    pub read_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            compression: "none".to_string(),
            compression_level: DEFAULT_COMPRESSION_LEVEL as i64,
            debug: false,
            streamed_body: false,
            streaming_auth: false,
            connect_timeout_secs: 10,
            read_timeout_secs: 300,
        }
    }
}

impl TransportConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(compression) = std::env::var("MDTSDB_COMPRESSION") {
            self.compression = compression;
        }

        if let Ok(level) = std::env::var("MDTSDB_COMPRESSION_LEVEL") {
            if let Ok(l) = level.parse() {
                self.compression_level = l;
            }
        }

        if let Ok(debug) = std::env::var("MDTSDB_DEBUG") {
            self.debug = debug == "true" || debug == "1";
        }

        if let Ok(timeout) = std::env::var("MDTSDB_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Ok(timeout) = std::env::var("MDTSDB_READ_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.read_timeout_secs = secs;
            }
        }
    }

    pub fn compression(&self) -> Result<Compression, ConfigError> {
        self.compression
            .parse()
            .map_err(|_| ConfigError::ValidationError(format!("unknown compression '{}'", self.compression)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        if self.read_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.read_timeout_secs))
        }
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

//! Configuration management for Tether connections.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (TETHER__ prefix, `__` separator)
//! 2. Config file (tether.toml)
//! 3. Defaults

use std::time::Duration;

use serde::Deserialize;

use crate::error::TetherError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Where the remote graph endpoint lives and how to authenticate.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Endpoint host name (default: "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    /// Endpoint port (default: 8182).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Sign every connection attempt with IAM credentials.
    #[serde(default)]
    pub use_iam: bool,

    /// Signing region. Falls back to `AWS_REGION` when unset.
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    #[serde(default)]
    pub session_token: Option<String>,
}

/// Bounds for the retrying query executor.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per query, including the first (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed wait between attempts in milliseconds (default: 1000).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8182
}

fn default_max_attempts() -> u32 {
    5
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            use_iam: false,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl TetherConfig {
    /// Load from `{file_prefix}.toml` (optional) overlaid with `TETHER__*`
    /// environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, TetherError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TETHER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(&cfg)
    }

    /// Extract from an already-built config, keeping defaults for any
    /// section that is missing.
    pub fn from_config(cfg: &config::Config) -> Result<Self, TetherError> {
        let connection = match cfg.get::<ConnectionConfig>("connection") {
            Ok(c) => c,
            Err(config::ConfigError::NotFound(_)) => ConnectionConfig::default(),
            Err(e) => return Err(e.into()),
        };
        let retry = match cfg.get::<RetryConfig>("retry") {
            Ok(r) => r,
            Err(config::ConfigError::NotFound(_)) => RetryConfig::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            host = %connection.host,
            port = connection.port,
            use_iam = connection.use_iam,
            max_attempts = retry.max_attempts,
            "Configuration loaded"
        );

        Ok(Self { connection, retry })
    }
}

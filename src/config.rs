//! Configuration management for Tollbooth.

use axum::http::HeaderName;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::{Result, TollboothError};

/// Prefix of environment variables that override file settings,
/// e.g. `TOLLBOOTH__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "TOLLBOOTH";

/// Main configuration for the Tollbooth service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollboothConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Window alignment
    #[serde(default)]
    pub windows: WindowConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Header carrying the caller identity set by the upstream authenticator
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            identity_header: default_identity_header(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

/// How windows line up with the calendar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Offset from UTC, in seconds, of the zone whose midnight ends per-day windows
    #[serde(default)]
    pub utc_offset_secs: i32,
}

impl WindowConfig {
    /// The configured offset as a chrono offset.
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_secs).ok_or_else(|| {
            TollboothError::Config(format!(
                "windows.utc_offset_secs {} is outside -86399..=86399",
                self.utc_offset_secs
            ))
        })
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a YAML file of limits to configure at startup
    pub rules_path: Option<String>,

    /// Upper bound on retained audit entries; unbounded when unset
    pub max_log_entries: Option<usize>,
}

impl TollboothConfig {
    /// Load configuration from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }

        let config: TollboothConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollboothConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollboothError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        self.windows.offset()?;
        HeaderName::from_bytes(self.server.identity_header.as_bytes()).map_err(|_| {
            TollboothError::Config(format!(
                "server.identity_header '{}' is not a valid header name",
                self.server.identity_header
            ))
        })?;
        Ok(())
    }
}

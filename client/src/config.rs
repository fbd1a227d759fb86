//! Configuration for the LoanBot client.

use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the client.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway WebSocket endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub ws_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_url: default_gateway_url(),
        }
    }
}

/// Exponential backoff after unclean closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReconnectPolicy {
    /// First delay, and the delay restored after every successful open.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Ceiling for the doubled delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Reconnection attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms == 0 {
            return Err(ConfigError::Message(
                "reconnect.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Message(format!(
                "reconnect.max_delay_ms ({}) must not be below reconnect.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_gateway_url() -> String {
    "ws://localhost:3001".to_string()
}
fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from `client.toml` (if present) and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("client", false)
    }

    /// Load configuration from the given file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (CLIENT__SECTION__KEY format)
    /// 2. The config file
    /// 3. Built-in defaults
    pub fn load_from(path: &str, required: bool) -> Result<Self, ConfigError> {
        let config: Config = ConfigLoader::builder()
            .set_default("gateway.ws_url", default_gateway_url())?
            .set_default("reconnect.base_delay_ms", default_base_delay() as i64)?
            .set_default("reconnect.max_delay_ms", default_max_delay() as i64)?
            .set_default("reconnect.max_attempts", default_max_attempts() as i64)?
            .set_default("logging.level", default_log_level())?
            .add_source(File::with_name(path).required(required))
            .add_source(
                Environment::with_prefix("CLIENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.reconnect.validate()?;
        Ok(config)
    }
}

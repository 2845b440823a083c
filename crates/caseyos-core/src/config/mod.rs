//! Configuration loading, env overrides, and validation.
//!
//! Configuration is read from a TOML file, then environment variable
//! overrides are applied, then the result is validated. The recognized
//! environment variables are the deployment-facing set (`DATABASE_URL`,
//! `SECRET_KEY`, `ALLOW_REAL_SENDS`, ...); see [`Config::apply_env_overrides`].

mod env_overrides;
mod types;
mod validation;


use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use types::{
    DatabaseConfig, DraftConfig, LlmConfig, RateLimitConfig, RuntimeConfig, ScoringConfig,
    SendingConfig, ServerConfig, WarmupConfig, WebhooksConfig, DEFAULT_SECRET_KEY,
};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// HTTP gateway settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Send gates and secrets.
    #[serde(default)]
    pub sending: SendingConfig,

    /// APS scorer strategy inputs.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Send-rate windows.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Per-source webhook signing secrets.
    #[serde(default)]
    pub webhooks: WebhooksConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Background worker and scheduler settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Draft composition settings.
    #[serde(default)]
    pub draft: DraftConfig,
}

impl Config {
    /// Load configuration from a TOML file, apply env overrides, and validate.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string(),
        })?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string, apply env overrides, and validate.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError { source: e })?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Build a default configuration with env overrides applied.
    ///
    /// Used when no config file exists yet: the env-var set alone is enough
    /// to run in draft-only mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}

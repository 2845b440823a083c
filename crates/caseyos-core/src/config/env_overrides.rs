//! Environment variable overrides for configuration.

use std::env;

use super::Config;
use crate::error::ConfigError;

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// The recognized set is the deployment-facing contract:
    /// `DATABASE_URL`, `BROKER_URL`, `RESULT_BACKEND_URL`, `SECRET_KEY`,
    /// `ADMIN_TOKEN`, `ALLOW_REAL_SENDS`, `AUTO_APPROVE_ENABLED`,
    /// `MODE_DRAFT_ONLY`, `RATE_LIMIT_PER_RECIPIENT_WEEK`,
    /// `RATE_LIMIT_GLOBAL_DAY`, `CSRF_SECRET`, `SENTRY_DSN`, and
    /// `WEBHOOK_SIGNING_SECRET_<SOURCE>` per signal source.
    pub(super) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = env::var("DATABASE_URL") {
            self.database.path = strip_sqlite_scheme(&val);
        }
        if let Ok(val) = env::var("BROKER_URL") {
            self.database.broker_url = Some(val);
        }
        if let Ok(val) = env::var("RESULT_BACKEND_URL") {
            self.database.result_backend_url = Some(val);
        }

        if let Ok(val) = env::var("SECRET_KEY") {
            self.sending.secret_key = val;
        }
        if let Ok(val) = env::var("ADMIN_TOKEN") {
            self.sending.admin_token = val;
        }
        if let Ok(val) = env::var("CSRF_SECRET") {
            self.sending.csrf_secret = val;
        }
        if let Ok(val) = env::var("SENTRY_DSN") {
            self.sending.sentry_dsn = Some(val);
        }

        if let Ok(val) = env::var("ALLOW_REAL_SENDS") {
            self.sending.allow_real_sends = parse_env_bool("ALLOW_REAL_SENDS", &val)?;
        }
        if let Ok(val) = env::var("AUTO_APPROVE_ENABLED") {
            self.sending.auto_approve_enabled = parse_env_bool("AUTO_APPROVE_ENABLED", &val)?;
        }
        if let Ok(val) = env::var("MODE_DRAFT_ONLY") {
            self.sending.mode_draft_only = parse_env_bool("MODE_DRAFT_ONLY", &val)?;
        }

        if let Ok(val) = env::var("RATE_LIMIT_PER_RECIPIENT_WEEK") {
            self.rate_limits.per_recipient_week =
                parse_env_u32("RATE_LIMIT_PER_RECIPIENT_WEEK", &val)?;
        }
        if let Ok(val) = env::var("RATE_LIMIT_GLOBAL_DAY") {
            self.rate_limits.global_day = parse_env_u32("RATE_LIMIT_GLOBAL_DAY", &val)?;
        }

        // Per-source webhook secrets: WEBHOOK_SIGNING_SECRET_FORM, _CRM, ...
        for (key, val) in env::vars() {
            if let Some(source) = key.strip_prefix("WEBHOOK_SIGNING_SECRET_") {
                self.webhooks
                    .signing_secrets
                    .insert(source.to_lowercase(), val);
            }
        }

        Ok(())
    }
}

/// Accept `sqlite:` / `sqlite://` prefixed URLs as plain file paths.
fn strip_sqlite_scheme(url: &str) -> String {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
        .to_string()
}

fn parse_env_bool(name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("expected boolean, got '{other}'"),
        }),
    }
}

fn parse_env_u32(name: &str, val: &str) -> Result<u32, ConfigError> {
    val.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        message: format!("expected unsigned integer, got '{val}'"),
    })
}

//! Configuration validation and production startup guards.

use super::{Config, DEFAULT_SECRET_KEY};
use crate::error::ConfigError;

impl Config {
    /// Validate the configuration.
    ///
    /// Structural checks always run. The production guards refuse a config
    /// that could reach real recipients without its secrets in place:
    /// `allow_real_sends=true` (or draft-only mode disabled) with the default
    /// `SECRET_KEY`, and `allow_real_sends=true` without an admin token.
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limits.per_recipient_week == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limits.per_recipient_week".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.rate_limits.global_day == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limits.global_day".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.draft.business_start_hour >= self.draft.business_end_hour {
            return Err(ConfigError::InvalidValue {
                field: "draft.business_start_hour".to_string(),
                message: "business hours start must precede end".to_string(),
            });
        }
        if self.draft.min_length >= self.draft.max_length {
            return Err(ConfigError::InvalidValue {
                field: "draft.min_length".to_string(),
                message: "min_length must be below max_length".to_string(),
            });
        }
        if self.draft.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "draft.default_timezone".to_string(),
                message: format!("unknown IANA timezone '{}'", self.draft.default_timezone),
            });
        }

        let leaves_draft_safety = self.sending.allow_real_sends || !self.sending.mode_draft_only;
        let secret_is_default =
            self.sending.secret_key == DEFAULT_SECRET_KEY || self.sending.secret_key.is_empty();

        if leaves_draft_safety && secret_is_default {
            return Err(ConfigError::UnsafeProduction {
                message: "SECRET_KEY is the default value".to_string(),
            });
        }
        if self.sending.allow_real_sends && self.sending.admin_token.is_empty() {
            return Err(ConfigError::UnsafeProduction {
                message: "ALLOW_REAL_SENDS=true requires ADMIN_TOKEN".to_string(),
            });
        }

        Ok(())
    }
}

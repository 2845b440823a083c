//! Rolling send-rate windows.
//!
//! Counts come from `send_records`, so the limit holds over *any* window of
//! the configured length, not just calendar buckets. The executor checks a
//! slot immediately before the connector call and the send record it inserts
//! afterwards is the increment.

use chrono::{DateTime, Duration, Utc};

use super::{format_iso, parse_iso, send_records, DbPool};
use crate::config::RateLimitConfig;
use crate::error::StorageError;

/// Seconds in the per-recipient window (7 days).
pub const RECIPIENT_WINDOW_SECONDS: i64 = 7 * 24 * 3600;

/// Seconds in the global window (1 day).
pub const GLOBAL_WINDOW_SECONDS: i64 = 24 * 3600;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    /// A send slot is available.
    Allowed,
    /// The window is full; retry after this many seconds, when the earliest
    /// in-window send ages out.
    Blocked {
        scope: &'static str,
        retry_after_secs: u64,
    },
}

impl SlotDecision {
    /// Whether the decision permits a send.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Check both windows for a prospective send to `recipient`.
///
/// The recipient window is checked first; a recipient block reports its own
/// (longer) retry horizon rather than the global one.
pub async fn check_send_slot(
    pool: &DbPool,
    config: &RateLimitConfig,
    recipient: &str,
    now: DateTime<Utc>,
) -> Result<SlotDecision, StorageError> {
    let recipient_decision = check_recipient_window(pool, config, recipient, now).await?;
    if !recipient_decision.is_allowed() {
        return Ok(recipient_decision);
    }
    check_global_window(pool, config, now).await
}

/// Check the per-recipient rolling 7-day window.
pub async fn check_recipient_window(
    pool: &DbPool,
    config: &RateLimitConfig,
    recipient: &str,
    now: DateTime<Utc>,
) -> Result<SlotDecision, StorageError> {
    let cutoff = format_iso(now - Duration::seconds(RECIPIENT_WINDOW_SECONDS));
    let count = send_records::count_for_recipient_since(pool, recipient, &cutoff).await?;

    if count < i64::from(config.per_recipient_week) {
        return Ok(SlotDecision::Allowed);
    }

    let retry_after_secs = retry_after(
        pool,
        Some(recipient),
        &cutoff,
        RECIPIENT_WINDOW_SECONDS,
        now,
    )
    .await?;
    Ok(SlotDecision::Blocked {
        scope: "recipient",
        retry_after_secs,
    })
}

/// Check the global rolling daily window against the effective cap.
pub async fn check_global_window(
    pool: &DbPool,
    config: &RateLimitConfig,
    now: DateTime<Utc>,
) -> Result<SlotDecision, StorageError> {
    let cutoff = format_iso(now - Duration::seconds(GLOBAL_WINDOW_SECONDS));
    let count = send_records::count_since(pool, &cutoff).await?;

    if count < effective_global_cap(config, now) {
        return Ok(SlotDecision::Allowed);
    }

    let retry_after_secs = retry_after(pool, None, &cutoff, GLOBAL_WINDOW_SECONDS, now).await?;
    Ok(SlotDecision::Blocked {
        scope: "global",
        retry_after_secs,
    })
}

/// The global daily cap, reduced by the warmup ramp when one is active.
///
/// The cap climbs linearly from `start_cap` to `start_cap * factor` over
/// `ramp_days`, never exceeding the configured `global_day`.
pub fn effective_global_cap(config: &RateLimitConfig, now: DateTime<Utc>) -> i64 {
    let base = i64::from(config.global_day);
    let warmup = &config.warmup;
    if !warmup.enabled {
        return base;
    }
    let Some(started_at) = warmup
        .started_at
        .as_deref()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
    else {
        return base;
    };

    let elapsed_days = (now - started_at).num_days().max(0);
    let start = f64::from(warmup.start_cap);
    let ramp_days = f64::from(warmup.ramp_days.max(1));
    let progress = (elapsed_days as f64 / ramp_days).min(1.0);
    let ramped = start + (start * warmup.factor - start) * progress;

    (ramped.floor() as i64).min(base).max(1)
}

/// Seconds until the earliest in-window send falls out of the window.
async fn retry_after(
    pool: &DbPool,
    recipient: Option<&str>,
    cutoff: &str,
    window_seconds: i64,
    now: DateTime<Utc>,
) -> Result<u64, StorageError> {
    let earliest = send_records::earliest_sent_since(pool, recipient, cutoff).await?;
    let Some(earliest) = earliest else {
        // Window reported full but no record found; advise a short pause.
        return Ok(60);
    };

    let earliest = parse_iso("send_records", "sent_at", &earliest)?;
    let frees_at = earliest + Duration::seconds(window_seconds);
    let secs = (frees_at - now).num_seconds();
    Ok(secs.max(1) as u64)
}

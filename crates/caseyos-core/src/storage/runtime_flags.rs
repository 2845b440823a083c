//! Operator-toggled runtime flags and monitor cursors.
//!
//! Flags live in the database (not config) because they are flipped at
//! runtime by admin endpoints and must survive restarts. The emergency stop
//! is the global kill switch: while set, auto-approval and execution halt.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// Key for the kill switch flag.
pub const EMERGENCY_STOP: &str = "emergency_stop";

/// Key prefix for monitor scan cursors.
pub const MONITOR_CURSOR_PREFIX: &str = "monitor_cursor:";

/// Set a flag value.
pub async fn set(pool: &DbPool, key: &str, value: &str) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO runtime_flags (key, value, updated_at) VALUES (?, ?, ?)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(now_iso())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Read a flag value.
pub async fn get(pool: &DbPool, key: &str) -> Result<Option<String>, StorageError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM runtime_flags WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(|r| r.0))
}

/// Whether the emergency stop is currently engaged.
pub async fn emergency_stop_engaged(pool: &DbPool) -> Result<bool, StorageError> {
    Ok(get(pool, EMERGENCY_STOP).await?.as_deref() == Some("on"))
}

/// Engage or release the emergency stop.
pub async fn set_emergency_stop(pool: &DbPool, engaged: bool) -> Result<(), StorageError> {
    set(pool, EMERGENCY_STOP, if engaged { "on" } else { "off" }).await
}

/// Read a monitor cursor, defaulting to the epoch for first runs.
pub async fn monitor_cursor(pool: &DbPool, name: &str) -> Result<String, StorageError> {
    let key = format!("{MONITOR_CURSOR_PREFIX}{name}");
    Ok(get(pool, &key)
        .await?
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string()))
}

/// Advance a monitor cursor.
pub async fn set_monitor_cursor(pool: &DbPool, name: &str, at: &str) -> Result<(), StorageError> {
    let key = format!("{MONITOR_CURSOR_PREFIX}{name}");
    set(pool, &key, at).await
}

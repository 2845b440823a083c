//! Idempotency key store for executor replay detection.
//!
//! Keys are SHA-256 fingerprints of `(queue_item_id, draft_id, action_type)`.
//! A stored key carries the original result JSON so a replay returns it
//! verbatim. Keys expire after 30 days; lookups ignore expired rows and the
//! monitor deletes them.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use super::{format_iso, DbPool};
use crate::error::StorageError;

/// Key lifetime.
pub const TTL_DAYS: i64 = 30;

/// Compute the idempotency key for an executor invocation.
pub fn compute_key(queue_item_id: &str, draft_id: &str, action_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(queue_item_id.as_bytes());
    hasher.update(b"|");
    hasher.update(draft_id.as_bytes());
    hasher.update(b"|");
    hasher.update(action_type.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Store a result under a key. First write wins.
pub async fn store(pool: &DbPool, key: &str, result: &str) -> Result<(), StorageError> {
    sqlx::query("INSERT OR IGNORE INTO idempotency_keys (key, result) VALUES (?, ?)")
        .bind(key)
        .bind(result)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch the stored result for a key, if present and within the TTL.
pub async fn lookup(
    pool: &DbPool,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>, StorageError> {
    let cutoff = format_iso(now - Duration::days(TTL_DAYS));
    let row: Option<(String,)> =
        sqlx::query_as("SELECT result FROM idempotency_keys WHERE key = ? AND created_at >= ?")
            .bind(key)
            .bind(cutoff)
            .fetch_optional(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(|r| r.0))
}

/// Delete keys older than the TTL. Returns the number removed.
pub async fn purge_expired(pool: &DbPool, now: DateTime<Utc>) -> Result<u64, StorageError> {
    let cutoff = format_iso(now - Duration::days(TTL_DAYS));
    let result = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected())
}

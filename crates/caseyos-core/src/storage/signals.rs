//! Storage operations for normalized signals.
//!
//! The `(source, dedupe_hash)` unique constraint is the at-most-once
//! guarantee for the whole ingest path: a second insert with the same pair
//! is detected here and surfaces as [`SignalInsert::Duplicate`].

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// A normalized external event.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Signal {
    pub id: String,
    pub source: String,
    pub kind: String,
    pub dedupe_hash: String,
    /// Opaque JSON payload as received from the source.
    pub payload: String,
    pub received_at: String,
    pub processed_at: Option<String>,
    pub workflow_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Outcome of attempting to persist a signal.
#[derive(Debug, Clone)]
pub enum SignalInsert {
    /// The signal was new and has been stored.
    Inserted(Signal),
    /// A signal with the same `(source, dedupe_hash)` already exists;
    /// carries the existing signal's id.
    Duplicate(String),
}

/// Insert a signal, enforcing `(source, dedupe_hash)` uniqueness.
pub async fn insert(
    pool: &DbPool,
    id: &str,
    source: &str,
    kind: &str,
    dedupe_hash: &str,
    payload: &str,
) -> Result<SignalInsert, StorageError> {
    let received_at = now_iso();
    let result = sqlx::query(
        "INSERT INTO signals (id, source, kind, dedupe_hash, payload, received_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (source, dedupe_hash) DO NOTHING",
    )
    .bind(id)
    .bind(source)
    .bind(kind)
    .bind(dedupe_hash)
    .bind(payload)
    .bind(&received_at)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    if result.rows_affected() == 0 {
        let existing: (String,) =
            sqlx::query_as("SELECT id FROM signals WHERE source = ? AND dedupe_hash = ?")
                .bind(source)
                .bind(dedupe_hash)
                .fetch_one(pool)
                .await
                .map_err(|e| StorageError::Query { source: e })?;
        return Ok(SignalInsert::Duplicate(existing.0));
    }

    let signal = get_by_id(pool, id)
        .await?
        .ok_or_else(|| StorageError::Corrupt {
            table: "signals".to_string(),
            column: "id".to_string(),
            message: format!("inserted signal {id} not found"),
        })?;
    Ok(SignalInsert::Inserted(signal))
}

/// Fetch a signal by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<Signal>, StorageError> {
    sqlx::query_as::<_, Signal>("SELECT * FROM signals WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Mark a signal as processed and link the workflow it produced, if any.
pub async fn mark_processed(
    pool: &DbPool,
    id: &str,
    workflow_id: Option<&str>,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE signals SET processed_at = ?, workflow_id = COALESCE(?, workflow_id),
         updated_at = ? WHERE id = ?",
    )
    .bind(now_iso())
    .bind(workflow_id)
    .bind(now_iso())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Count all stored signals. Used by dedupe invariant tests and stats.
pub async fn count(pool: &DbPool) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM signals")
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}

/// Fetch signals received after the given cursor timestamp, oldest first.
pub async fn received_since(
    pool: &DbPool,
    cursor: &str,
    limit: i64,
) -> Result<Vec<Signal>, StorageError> {
    sqlx::query_as::<_, Signal>(
        "SELECT * FROM signals WHERE received_at > ? ORDER BY received_at ASC LIMIT ?",
    )
    .bind(cursor)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

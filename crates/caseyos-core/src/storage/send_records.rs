//! Storage for send records.
//!
//! A send record is the proof that a draft left the building: exactly one
//! exists per sent draft (UNIQUE on `draft_id`), and the recipient/time
//! columns back the rolling rate-limit windows.

use super::DbPool;
use crate::error::StorageError;

/// A recorded outbound send.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SendRecord {
    pub id: String,
    pub draft_id: String,
    pub recipient: String,
    pub sent_at: String,
    pub external_message_id: String,
    pub thread_id: String,
    pub idem_key: String,
    pub created_at: String,
}

/// Insert a send record. Fails on a second record for the same draft.
#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &DbPool,
    id: &str,
    draft_id: &str,
    recipient: &str,
    sent_at: &str,
    external_message_id: &str,
    thread_id: &str,
    idem_key: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO send_records
         (id, draft_id, recipient, sent_at, external_message_id, thread_id, idem_key)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(draft_id)
    .bind(recipient.to_lowercase())
    .bind(sent_at)
    .bind(external_message_id)
    .bind(thread_id)
    .bind(idem_key)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch the send record for a draft, if any.
pub async fn get_by_draft(
    pool: &DbPool,
    draft_id: &str,
) -> Result<Option<SendRecord>, StorageError> {
    sqlx::query_as::<_, SendRecord>("SELECT * FROM send_records WHERE draft_id = ?")
        .bind(draft_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Fetch a send record by its idempotency key.
pub async fn get_by_idem_key(
    pool: &DbPool,
    idem_key: &str,
) -> Result<Option<SendRecord>, StorageError> {
    sqlx::query_as::<_, SendRecord>(
        "SELECT * FROM send_records WHERE idem_key = ? ORDER BY sent_at DESC LIMIT 1",
    )
    .bind(idem_key)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Count sends to a recipient since the cutoff timestamp.
pub async fn count_for_recipient_since(
    pool: &DbPool,
    recipient: &str,
    cutoff: &str,
) -> Result<i64, StorageError> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM send_records WHERE recipient = ? AND sent_at >= ?")
            .bind(recipient.to_lowercase())
            .bind(cutoff)
            .fetch_one(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}

/// Count all sends since the cutoff timestamp.
pub async fn count_since(pool: &DbPool, cutoff: &str) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM send_records WHERE sent_at >= ?")
        .bind(cutoff)
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}

/// Earliest send at or after the cutoff, for computing when a window frees up.
pub async fn earliest_sent_since(
    pool: &DbPool,
    recipient: Option<&str>,
    cutoff: &str,
) -> Result<Option<String>, StorageError> {
    let row: (Option<String>,) = if let Some(recipient) = recipient {
        sqlx::query_as(
            "SELECT MIN(sent_at) FROM send_records WHERE recipient = ? AND sent_at >= ?",
        )
        .bind(recipient.to_lowercase())
        .bind(cutoff)
        .fetch_one(pool)
        .await
    } else {
        sqlx::query_as("SELECT MIN(sent_at) FROM send_records WHERE sent_at >= ?")
            .bind(cutoff)
            .fetch_one(pool)
            .await
    }
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(row.0)
}

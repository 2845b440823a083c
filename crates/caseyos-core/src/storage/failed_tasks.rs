//! Dead-letter queue: tasks that exhausted their retries.
//!
//! A failed task keeps the original payload so an admin retry can re-enqueue
//! it unchanged; workflows resume from the last good step because the step
//! log survives in the workflow row.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// A dead-lettered task.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct FailedTask {
    pub id: String,
    pub task_name: String,
    pub payload: String,
    pub error_text: String,
    pub retry_count: i64,
    pub next_retry_at: Option<String>,
    pub resolved_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Record a dead-lettered task.
pub async fn insert(
    pool: &DbPool,
    id: &str,
    task_name: &str,
    payload: &str,
    error_text: &str,
    retry_count: i64,
    next_retry_at: Option<&str>,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO failed_tasks (id, task_name, payload, error_text, retry_count, next_retry_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(task_name)
    .bind(payload)
    .bind(error_text)
    .bind(retry_count)
    .bind(next_retry_at)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch a failed task by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<FailedTask>, StorageError> {
    sqlx::query_as::<_, FailedTask>("SELECT * FROM failed_tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// List unresolved failed tasks, oldest first.
pub async fn list_unresolved(pool: &DbPool, limit: i64) -> Result<Vec<FailedTask>, StorageError> {
    sqlx::query_as::<_, FailedTask>(
        "SELECT * FROM failed_tasks WHERE resolved_at IS NULL ORDER BY created_at ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Unresolved tasks whose `next_retry_at` has passed.
pub async fn due_for_retry(pool: &DbPool, now: &str) -> Result<Vec<FailedTask>, StorageError> {
    sqlx::query_as::<_, FailedTask>(
        "SELECT * FROM failed_tasks
         WHERE resolved_at IS NULL AND next_retry_at IS NOT NULL AND next_retry_at <= ?
         ORDER BY next_retry_at ASC",
    )
    .bind(now)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Mark a failed task resolved (after a successful retry or manual fix).
pub async fn resolve(pool: &DbPool, id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE failed_tasks SET resolved_at = ?, updated_at = ?
         WHERE id = ? AND resolved_at IS NULL",
    )
    .bind(now_iso())
    .bind(now_iso())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() == 1)
}

/// Clear the retry schedule once a retry has been enqueued.
pub async fn clear_retry_schedule(pool: &DbPool, id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE failed_tasks SET next_retry_at = NULL, updated_at = ? WHERE id = ?")
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

//! Embedded broker: the durable task queue workers consume from.
//!
//! Claims happen in a single transaction (select oldest runnable, flip to
//! `running`) so concurrent workers never double-claim. Retry scheduling is
//! the worker's job; this module only persists queue state.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// A queued background task.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct QueuedTask {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    /// `queued`, `running`, `done`, or `failed`.
    pub status: String,
    pub attempts: i64,
    pub run_after: String,
    pub claimed_at: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Enqueue a task for immediate execution. Returns the task id.
pub async fn enqueue(pool: &DbPool, kind: &str, payload: &str) -> Result<i64, StorageError> {
    enqueue_after(pool, kind, payload, &now_iso()).await
}

/// Enqueue a task that becomes runnable at `run_after`.
pub async fn enqueue_after(
    pool: &DbPool,
    kind: &str,
    payload: &str,
    run_after: &str,
) -> Result<i64, StorageError> {
    let result = sqlx::query(
        "INSERT INTO task_queue (kind, payload, run_after) VALUES (?, ?, ?)",
    )
    .bind(kind)
    .bind(payload)
    .bind(run_after)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.last_insert_rowid())
}

/// Claim the oldest runnable task, if any.
pub async fn claim_next(pool: &DbPool) -> Result<Option<QueuedTask>, StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    let task: Option<QueuedTask> = sqlx::query_as(
        "SELECT * FROM task_queue WHERE status = 'queued' AND run_after <= ?
         ORDER BY run_after ASC, id ASC LIMIT 1",
    )
    .bind(now_iso())
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    let Some(task) = task else {
        tx.commit()
            .await
            .map_err(|e| StorageError::Connection { source: e })?;
        return Ok(None);
    };

    sqlx::query(
        "UPDATE task_queue SET status = 'running', claimed_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(now_iso())
    .bind(now_iso())
    .bind(task.id)
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    Ok(Some(task))
}

/// Mark a claimed task done.
pub async fn complete(pool: &DbPool, id: i64) -> Result<(), StorageError> {
    sqlx::query("UPDATE task_queue SET status = 'done', updated_at = ? WHERE id = ?")
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Requeue a claimed task for a retry at `run_after`, bumping the attempt
/// counter and recording the error.
pub async fn requeue_for_retry(
    pool: &DbPool,
    id: i64,
    run_after: &str,
    error: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE task_queue SET status = 'queued', attempts = attempts + 1,
         run_after = ?, last_error = ?, claimed_at = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(run_after)
    .bind(error)
    .bind(now_iso())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Mark a claimed task failed (dead-lettered), recording the final error.
pub async fn mark_failed(pool: &DbPool, id: i64, error: &str) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE task_queue SET status = 'failed', attempts = attempts + 1,
         last_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(error)
    .bind(now_iso())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Number of tasks waiting to run. The gateway's backpressure signal.
pub async fn queued_depth(pool: &DbPool) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_queue WHERE status = 'queued'")
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn claim_returns_oldest_runnable() {
        let pool = init_test_db().await.expect("init db");
        enqueue_after(&pool, "later", "{}", "2099-01-01T00:00:00Z")
            .await
            .expect("enqueue later");
        let first = enqueue(&pool, "first", "{}").await.expect("enqueue first");
        enqueue(&pool, "second", "{}").await.expect("enqueue second");

        let claimed = claim_next(&pool).await.expect("claim").expect("task");
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.kind, "first");
    }

    #[tokio::test]
    async fn claimed_task_not_claimable_twice() {
        let pool = init_test_db().await.expect("init db");
        enqueue(&pool, "only", "{}").await.expect("enqueue");

        assert!(claim_next(&pool).await.expect("claim").is_some());
        assert!(claim_next(&pool).await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn retry_requeues_with_attempt_bump() {
        let pool = init_test_db().await.expect("init db");
        let id = enqueue(&pool, "t", "{}").await.expect("enqueue");
        claim_next(&pool).await.expect("claim").expect("task");

        requeue_for_retry(&pool, id, "1970-01-01T00:00:00Z", "transient")
            .await
            .expect("requeue");

        let again = claim_next(&pool).await.expect("claim").expect("task");
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 1);
        assert_eq!(again.last_error.as_deref(), Some("transient"));
    }

    #[tokio::test]
    async fn depth_counts_only_queued() {
        let pool = init_test_db().await.expect("init db");
        enqueue(&pool, "a", "{}").await.expect("enqueue");
        enqueue(&pool, "b", "{}").await.expect("enqueue");
        assert_eq!(queued_depth(&pool).await.expect("depth"), 2);

        let task = claim_next(&pool).await.expect("claim").expect("task");
        assert_eq!(queued_depth(&pool).await.expect("depth"), 1);

        complete(&pool, task.id).await.expect("complete");
        assert_eq!(queued_depth(&pool).await.expect("depth"), 1);
    }
}

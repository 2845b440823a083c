//! Append-only audit trail.
//!
//! Every state transition of consequence (draft status, queue item status,
//! kill switch, sends, rollbacks) is recorded with actor, subject, and the
//! before/after snapshots. Rows are never updated or deleted.

use super::DbPool;
use crate::error::StorageError;

/// One audit entry.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    /// `kind:id`, e.g. `draft:7f3a...`.
    pub subject: String,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    pub at: String,
}

/// Append an audit entry.
pub async fn append(
    pool: &DbPool,
    actor: &str,
    action: &str,
    subject: &str,
    before_state: Option<&str>,
    after_state: Option<&str>,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO audit_log (actor, action, subject, before_state, after_state)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(actor)
    .bind(action)
    .bind(subject)
    .bind(before_state)
    .bind(after_state)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch entries for a subject, newest first.
pub async fn for_subject(
    pool: &DbPool,
    subject: &str,
    limit: i64,
) -> Result<Vec<AuditEntry>, StorageError> {
    sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_log WHERE subject = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(subject)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Fetch the most recent entries across all subjects.
pub async fn recent(pool: &DbPool, limit: i64) -> Result<Vec<AuditEntry>, StorageError> {
    sqlx::query_as::<_, AuditEntry>("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn append_and_read_back() {
        let pool = init_test_db().await.expect("init db");
        append(
            &pool,
            "executor",
            "draft_sent",
            "draft:d-1",
            Some("approved"),
            Some("sent"),
        )
        .await
        .expect("append");

        let entries = for_subject(&pool, "draft:d-1", 10).await.expect("fetch");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "draft_sent");
        assert_eq!(entries[0].before_state.as_deref(), Some("approved"));
    }

    #[tokio::test]
    async fn recent_orders_newest_first() {
        let pool = init_test_db().await.expect("init db");
        for i in 0..3 {
            append(&pool, "admin", &format!("a{i}"), "s", None, None)
                .await
                .expect("append");
        }

        let entries = recent(&pool, 2).await.expect("recent");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "a2");
    }
}

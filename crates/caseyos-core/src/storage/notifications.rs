//! Storage for operator notifications.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// A notification surfaced to the operator.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Notification {
    pub id: String,
    pub kind: String,
    /// `low`, `normal`, `high`, or `urgent`.
    pub priority: String,
    pub title: String,
    pub body: String,
    /// JSON map of related entity ids.
    pub related_ids: String,
    /// `unread`, `read`, `dismissed`, or `snoozed`.
    pub state: String,
    pub snoozed_until: Option<String>,
    pub created_at: String,
}

/// Insert a notification.
pub async fn insert(
    pool: &DbPool,
    id: &str,
    kind: &str,
    priority: &str,
    title: &str,
    body: &str,
    related_ids: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO notifications (id, kind, priority, title, body, related_ids)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(kind)
    .bind(priority)
    .bind(title)
    .bind(body)
    .bind(related_ids)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// List notifications the operator should see: unread plus snoozed ones whose
/// snooze has expired. Newest first.
pub async fn list_active(
    pool: &DbPool,
    now: &str,
    limit: i64,
) -> Result<Vec<Notification>, StorageError> {
    sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications
         WHERE state = 'unread' OR (state = 'snoozed' AND snoozed_until <= ?)
         ORDER BY created_at DESC LIMIT ?",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Set a notification's state. Returns `false` when the id does not exist.
pub async fn set_state(
    pool: &DbPool,
    id: &str,
    state: &str,
    snoozed_until: Option<&str>,
) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE notifications SET state = ?, snoozed_until = ? WHERE id = ?")
        .bind(state)
        .bind(snoozed_until)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() == 1)
}

/// Convenience: current-time active listing.
pub async fn list_active_now(pool: &DbPool, limit: i64) -> Result<Vec<Notification>, StorageError> {
    list_active(pool, &now_iso(), limit).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, new_id};

    #[tokio::test]
    async fn active_listing_includes_expired_snoozes() {
        let pool = init_test_db().await.expect("init db");
        insert(&pool, "n-unread", "workflow_failed", "high", "t", "b", "{}")
            .await
            .expect("insert");
        insert(&pool, "n-snoozed", "high_priority_item", "normal", "t", "b", "{}")
            .await
            .expect("insert");
        insert(&pool, "n-dismissed", "high_priority_item", "normal", "t", "b", "{}")
            .await
            .expect("insert");

        set_state(&pool, "n-snoozed", "snoozed", Some("2026-07-01T00:00:00Z"))
            .await
            .expect("snooze");
        set_state(&pool, "n-dismissed", "dismissed", None)
            .await
            .expect("dismiss");

        let active = list_active(&pool, "2026-08-01T00:00:00Z", 50)
            .await
            .expect("list");
        let ids: Vec<&str> = active.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"n-unread"));
        assert!(ids.contains(&"n-snoozed"), "expired snooze resurfaces");
        assert!(!ids.contains(&"n-dismissed"));
    }

    #[tokio::test]
    async fn set_state_unknown_id_is_false() {
        let pool = init_test_db().await.expect("init db");
        assert!(!set_state(&pool, &new_id(), "read", None)
            .await
            .expect("set"));
    }
}

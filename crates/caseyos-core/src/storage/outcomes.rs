//! Storage for outcome records and the per-contact impact cache.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// A recorded outcome tied to a subject.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct OutcomeRecord {
    pub id: String,
    /// One of `draft`, `queue_item`, `contact`, `deal`.
    pub subject_kind: String,
    pub subject_id: String,
    pub kind: String,
    pub impact: f64,
    /// `auto` or `manual`.
    pub source: String,
    pub detected_at: String,
    pub details: String,
    pub created_at: String,
}

/// Insert an outcome record.
#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &DbPool,
    id: &str,
    subject_kind: &str,
    subject_id: &str,
    kind: &str,
    impact: f64,
    source: &str,
    detected_at: &str,
    details: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO outcome_records
         (id, subject_kind, subject_id, kind, impact, source, detected_at, details)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(subject_kind)
    .bind(subject_id)
    .bind(kind)
    .bind(impact)
    .bind(source)
    .bind(detected_at)
    .bind(details)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch outcomes for a subject in `detected_at` order.
pub async fn for_subject(
    pool: &DbPool,
    subject_kind: &str,
    subject_id: &str,
) -> Result<Vec<OutcomeRecord>, StorageError> {
    sqlx::query_as::<_, OutcomeRecord>(
        "SELECT * FROM outcome_records WHERE subject_kind = ? AND subject_id = ?
         ORDER BY detected_at ASC, id ASC",
    )
    .bind(subject_kind)
    .bind(subject_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Fetch outcomes recorded after the cursor, oldest first.
pub async fn recorded_since(
    pool: &DbPool,
    cursor: &str,
    limit: i64,
) -> Result<Vec<OutcomeRecord>, StorageError> {
    sqlx::query_as::<_, OutcomeRecord>(
        "SELECT * FROM outcome_records WHERE created_at > ? ORDER BY created_at ASC LIMIT ?",
    )
    .bind(cursor)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Per-kind counts and impact sums for the stats endpoint.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct OutcomeKindStats {
    pub kind: String,
    pub count: i64,
    pub total_impact: f64,
}

/// Aggregate outcomes by kind.
pub async fn stats_by_kind(pool: &DbPool) -> Result<Vec<OutcomeKindStats>, StorageError> {
    sqlx::query_as::<_, OutcomeKindStats>(
        "SELECT kind, COUNT(*) AS count, COALESCE(SUM(impact), 0) AS total_impact
         FROM outcome_records GROUP BY kind ORDER BY kind",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Add an outcome's impact to the per-contact aggregate cache.
pub async fn accumulate_contact_impact(
    pool: &DbPool,
    contact_id: &str,
    impact: f64,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO contact_outcome_impact (contact_id, total_impact, outcome_count, updated_at)
         VALUES (?, ?, 1, ?)
         ON CONFLICT (contact_id) DO UPDATE SET
            total_impact = contact_outcome_impact.total_impact + excluded.total_impact,
            outcome_count = contact_outcome_impact.outcome_count + 1,
            updated_at = excluded.updated_at",
    )
    .bind(contact_id)
    .bind(impact)
    .bind(now_iso())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Read the cached aggregate impact for a contact.
pub async fn contact_impact(pool: &DbPool, contact_id: &str) -> Result<f64, StorageError> {
    let row: Option<(f64,)> =
        sqlx::query_as("SELECT total_impact FROM contact_outcome_impact WHERE contact_id = ?")
            .bind(contact_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map_or(0.0, |r| r.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, new_id};

    #[tokio::test]
    async fn subject_outcomes_ordered_by_detection() {
        let pool = init_test_db().await.expect("init db");
        insert(
            &pool, &new_id(), "draft", "d-1", "email_replied", 8.0, "auto",
            "2026-07-02T00:00:00Z", "{}",
        )
        .await
        .expect("second");
        insert(
            &pool, &new_id(), "draft", "d-1", "email_sent", 0.0, "auto",
            "2026-07-01T00:00:00Z", "{}",
        )
        .await
        .expect("first");

        let outcomes = for_subject(&pool, "draft", "d-1").await.expect("fetch");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].kind, "email_sent");
        assert_eq!(outcomes[1].kind, "email_replied");
    }

    #[tokio::test]
    async fn stats_group_by_kind() {
        let pool = init_test_db().await.expect("init db");
        for (kind, impact) in [("email_sent", 0.0), ("email_sent", 0.0), ("email_replied", 8.0)] {
            insert(
                &pool, &new_id(), "draft", "d-1", kind, impact, "auto",
                "2026-07-01T00:00:00Z", "{}",
            )
            .await
            .expect("insert");
        }

        let stats = stats_by_kind(&pool).await.expect("stats");
        let sent = stats.iter().find(|s| s.kind == "email_sent").expect("sent");
        assert_eq!(sent.count, 2);
        let replied = stats
            .iter()
            .find(|s| s.kind == "email_replied")
            .expect("replied");
        assert!((replied.total_impact - 8.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn contact_impact_accumulates() {
        let pool = init_test_db().await.expect("init db");
        accumulate_contact_impact(&pool, "c-1", 8.0)
            .await
            .expect("first");
        accumulate_contact_impact(&pool, "c-1", -3.0)
            .await
            .expect("second");

        let total = contact_impact(&pool, "c-1").await.expect("read");
        assert!((total - 5.0).abs() < f64::EPSILON);
        assert!((contact_impact(&pool, "c-2").await.expect("read")).abs() < f64::EPSILON);
    }
}

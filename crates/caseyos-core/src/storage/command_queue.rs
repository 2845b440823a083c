//! Storage operations for the command queue ("Today's Moves").
//!
//! Queue items reference drafts and other action specs through
//! `action_context` but never own them. Ordering for the daily view is
//! APS-descending with the scorer's banded tie-break applied in Rust.

use super::{now_iso, DbPool};
use crate::error::StorageError;
use crate::scoring;

/// Lifecycle states of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Accepted,
    Dismissed,
    Completed,
    Failed,
}

impl QueueItemStatus {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Dismissed => "dismissed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "dismissed" => Some(Self::Dismissed),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// States from which a transition to `self` is legal.
    fn legal_sources(self) -> &'static [QueueItemStatus] {
        match self {
            Self::Pending => &[Self::Accepted],
            Self::Accepted | Self::Dismissed => &[Self::Pending],
            Self::Completed | Self::Failed => &[Self::Pending, Self::Accepted],
        }
    }
}

/// A scored, actionable recommendation.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct CommandQueueItem {
    pub id: String,
    pub owner: String,
    pub domain: String,
    pub action_type: String,
    /// JSON map; includes `draft_id` / `contact_id` for email actions.
    pub action_context: String,
    pub aps_score: f64,
    pub reasoning: String,
    pub due_by: Option<String>,
    pub status: String,
    /// JSON array of contributing signal ids.
    pub signal_ids: String,
    /// `received_at` of the oldest contributing signal; tie-break input.
    pub received_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CommandQueueItem {
    /// The draft this item references, if it is an email action.
    pub fn draft_id(&self) -> Option<String> {
        serde_json::from_str::<serde_json::Value>(&self.action_context)
            .ok()
            .and_then(|v| v.get("draft_id").and_then(|d| d.as_str().map(String::from)))
    }

    /// The contact this item targets, if recorded.
    pub fn contact_id(&self) -> Option<String> {
        serde_json::from_str::<serde_json::Value>(&self.action_context)
            .ok()
            .and_then(|v| {
                v.get("contact_id")
                    .and_then(|d| d.as_str().map(String::from))
            })
    }
}

/// Fields for inserting a queue item.
#[derive(Debug, Clone)]
pub struct NewQueueItem<'a> {
    pub id: &'a str,
    pub owner: &'a str,
    pub domain: &'a str,
    pub action_type: &'a str,
    pub action_context: &'a str,
    pub aps_score: f64,
    pub reasoning: &'a str,
    pub due_by: Option<&'a str>,
    pub signal_ids: &'a str,
    pub received_at: &'a str,
}

/// Insert a new pending queue item.
pub async fn insert(pool: &DbPool, item: &NewQueueItem<'_>) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO command_queue
         (id, owner, domain, action_type, action_context, aps_score, reasoning,
          due_by, signal_ids, received_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(item.id)
    .bind(item.owner)
    .bind(item.domain)
    .bind(item.action_type)
    .bind(item.action_context)
    .bind(item.aps_score)
    .bind(item.reasoning)
    .bind(item.due_by)
    .bind(item.signal_ids)
    .bind(item.received_at)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch a queue item by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<CommandQueueItem>, StorageError> {
    sqlx::query_as::<_, CommandQueueItem>("SELECT * FROM command_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// List actionable items for the daily view, highest priority first.
///
/// `domain` of `None` (or `"all"` at the API layer) returns every domain.
pub async fn list_today(
    pool: &DbPool,
    domain: Option<&str>,
) -> Result<Vec<CommandQueueItem>, StorageError> {
    let mut items: Vec<CommandQueueItem> = if let Some(domain) = domain {
        sqlx::query_as(
            "SELECT * FROM command_queue WHERE status IN ('pending', 'accepted') AND domain = ?",
        )
        .bind(domain)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as("SELECT * FROM command_queue WHERE status IN ('pending', 'accepted')")
            .fetch_all(pool)
            .await
    }
    .map_err(|e| StorageError::Query { source: e })?;

    items.sort_by(|a, b| {
        scoring::compare_ranked(
            a.aps_score,
            &a.received_at,
            &a.id,
            b.aps_score,
            &b.received_at,
            &b.id,
        )
    });

    Ok(items)
}

/// Attempt a status transition. Returns `false` when illegal from the
/// current state.
pub async fn try_transition(
    pool: &DbPool,
    id: &str,
    to: QueueItemStatus,
) -> Result<bool, StorageError> {
    let sources = to.legal_sources();
    let placeholders: Vec<&str> = sources.iter().map(|_| "?").collect();
    let sql = format!(
        "UPDATE command_queue SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
        placeholders.join(", ")
    );

    let mut query = sqlx::query(&sql).bind(to.as_str()).bind(now_iso()).bind(id);
    for source in sources {
        query = query.bind(source.as_str());
    }

    let result = query
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() == 1)
}

/// Dismiss every pending outbound-email item targeting a contact.
///
/// Called when a contact becomes suppressed so the daily view never offers
/// an email the executor would refuse.
pub async fn dismiss_pending_email_for_contact(
    pool: &DbPool,
    contact_id: &str,
) -> Result<u64, StorageError> {
    let result = sqlx::query(
        "UPDATE command_queue SET status = 'dismissed', updated_at = ?
         WHERE status = 'pending' AND action_type = 'send_email'
           AND json_extract(action_context, '$.contact_id') = ?",
    )
    .bind(now_iso())
    .bind(contact_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected())
}

/// Fetch pending items with a score at or above the threshold, created after
/// the cursor. Feeds the monitor's high-priority notifications.
pub async fn pending_high_priority_since(
    pool: &DbPool,
    cursor: &str,
    min_score: f64,
) -> Result<Vec<CommandQueueItem>, StorageError> {
    sqlx::query_as::<_, CommandQueueItem>(
        "SELECT * FROM command_queue
         WHERE status = 'pending' AND aps_score >= ? AND created_at > ?
         ORDER BY created_at ASC",
    )
    .bind(min_score)
    .bind(cursor)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, new_id};

    async fn seed_item(pool: &DbPool, score: f64, received_at: &str, id: &str) {
        insert(
            pool,
            &NewQueueItem {
                id,
                owner: "casey",
                domain: "sales",
                action_type: "send_email",
                action_context: r#"{"draft_id":"d-1","contact_id":"c-1"}"#,
                aps_score: score,
                reasoning: "test",
                due_by: None,
                signal_ids: "[]",
                received_at,
            },
        )
        .await
        .expect("insert item");
    }

    #[tokio::test]
    async fn list_today_orders_by_score_desc() {
        let pool = init_test_db().await.expect("init db");
        seed_item(&pool, 40.0, "2026-07-01T00:00:00Z", "b").await;
        seed_item(&pool, 80.0, "2026-07-01T00:00:00Z", "a").await;

        let items = list_today(&pool, None).await.expect("list");
        assert_eq!(items[0].id, "a");
        assert_eq!(items[1].id, "b");
    }

    #[tokio::test]
    async fn near_tied_scores_break_on_age_then_id() {
        let pool = init_test_db().await.expect("init db");
        // Scores within ±0.5: older signal first.
        seed_item(&pool, 70.2, "2026-07-02T00:00:00Z", "young").await;
        seed_item(&pool, 70.0, "2026-07-01T00:00:00Z", "old").await;
        // Fully tied: lexicographic id.
        seed_item(&pool, 50.0, "2026-07-03T00:00:00Z", "zz").await;
        seed_item(&pool, 50.0, "2026-07-03T00:00:00Z", "aa").await;

        let items = list_today(&pool, None).await.expect("list");
        let order: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["old", "young", "aa", "zz"]);
    }

    #[tokio::test]
    async fn domain_filter_applies() {
        let pool = init_test_db().await.expect("init db");
        seed_item(&pool, 50.0, "2026-07-01T00:00:00Z", "sales-item").await;
        insert(
            &pool,
            &NewQueueItem {
                id: "marketing-item",
                owner: "casey",
                domain: "marketing",
                action_type: "send_email",
                action_context: "{}",
                aps_score: 90.0,
                reasoning: "test",
                due_by: None,
                signal_ids: "[]",
                received_at: "2026-07-01T00:00:00Z",
            },
        )
        .await
        .expect("insert marketing");

        let items = list_today(&pool, Some("sales")).await.expect("list");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "sales-item");
    }

    #[tokio::test]
    async fn transitions_enforced() {
        let pool = init_test_db().await.expect("init db");
        seed_item(&pool, 50.0, "2026-07-01T00:00:00Z", "q-1").await;

        assert!(try_transition(&pool, "q-1", QueueItemStatus::Accepted)
            .await
            .expect("accept"));
        assert!(!try_transition(&pool, "q-1", QueueItemStatus::Dismissed)
            .await
            .expect("dismiss after accept"));
        assert!(try_transition(&pool, "q-1", QueueItemStatus::Completed)
            .await
            .expect("complete"));
        assert!(!try_transition(&pool, "q-1", QueueItemStatus::Failed)
            .await
            .expect("failed after completed"));
    }

    #[tokio::test]
    async fn dismiss_pending_email_targets_only_matching_contact() {
        let pool = init_test_db().await.expect("init db");
        seed_item(&pool, 50.0, "2026-07-01T00:00:00Z", "q-1").await;
        insert(
            &pool,
            &NewQueueItem {
                id: "q-2",
                owner: "casey",
                domain: "sales",
                action_type: "send_email",
                action_context: r#"{"draft_id":"d-2","contact_id":"c-other"}"#,
                aps_score: 50.0,
                reasoning: "test",
                due_by: None,
                signal_ids: "[]",
                received_at: "2026-07-01T00:00:00Z",
            },
        )
        .await
        .expect("insert second");

        let dismissed = dismiss_pending_email_for_contact(&pool, "c-1")
            .await
            .expect("dismiss");
        assert_eq!(dismissed, 1);

        let q1 = get_by_id(&pool, "q-1").await.expect("get").expect("exists");
        let q2 = get_by_id(&pool, "q-2").await.expect("get").expect("exists");
        assert_eq!(q1.status, "dismissed");
        assert_eq!(q2.status, "pending");
    }

    #[tokio::test]
    async fn draft_and_contact_accessors() {
        let pool = init_test_db().await.expect("init db");
        seed_item(&pool, 50.0, "2026-07-01T00:00:00Z", "q-1").await;

        let item = get_by_id(&pool, "q-1").await.expect("get").expect("exists");
        assert_eq!(item.draft_id().as_deref(), Some("d-1"));
        assert_eq!(item.contact_id().as_deref(), Some("c-1"));
    }
}

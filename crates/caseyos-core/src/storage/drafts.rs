//! Storage operations for draft emails and their status state machine.
//!
//! Status transitions are enforced here, in a single conditional UPDATE, so
//! concurrent writers serialize on the row and an out-of-order transition is
//! a visible no-op rather than silent corruption.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// Draft lifecycle states.
///
/// ```text
/// pending ─► auto_approved ─► sent ─► rolled_back (30-min window, never email)
///         └► approved      ─► sent ─► (terminal)
///         └► rejected (terminal)
///         └► failed   ─► pending (on retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    AutoApproved,
    Approved,
    Rejected,
    Sent,
    Failed,
    RolledBack,
}

impl DraftStatus {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AutoApproved => "auto_approved",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Parse a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "auto_approved" => Some(Self::AutoApproved),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// States from which a transition to `self` is legal.
    fn legal_sources(self) -> &'static [DraftStatus] {
        match self {
            Self::Pending => &[Self::Failed],
            Self::AutoApproved | Self::Approved | Self::Rejected => &[Self::Pending],
            Self::Sent => &[Self::AutoApproved, Self::Approved],
            Self::Failed => &[Self::Pending, Self::AutoApproved, Self::Approved],
            Self::RolledBack => &[Self::Sent],
        }
    }
}

/// A persisted draft email.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct DraftEmail {
    pub id: String,
    pub workflow_id: String,
    pub contact_id: String,
    pub recipient: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    /// JSON map of threading headers (In-Reply-To, References, ...).
    pub thread_headers: String,
    pub voice_profile_id: Option<String>,
    pub status: String,
    /// JSON map: campaign, source, talking_points, assets, slots, cta, ...
    pub metadata: String,
    pub external_draft_id: Option<String>,
    pub created_at: String,
    pub status_changed_at: String,
    pub updated_at: String,
}

/// Fields for creating a new draft (always starts `pending`).
#[derive(Debug, Clone)]
pub struct NewDraft<'a> {
    pub id: &'a str,
    pub workflow_id: &'a str,
    pub contact_id: &'a str,
    pub recipient: &'a str,
    pub subject: &'a str,
    pub body_text: &'a str,
    pub body_html: Option<&'a str>,
    pub thread_headers: &'a str,
    pub voice_profile_id: Option<&'a str>,
    pub metadata: &'a str,
    pub external_draft_id: Option<&'a str>,
}

/// Insert a new draft in the `pending` state.
pub async fn insert(pool: &DbPool, draft: &NewDraft<'_>) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO draft_emails
         (id, workflow_id, contact_id, recipient, subject, body_text, body_html,
          thread_headers, voice_profile_id, metadata, external_draft_id)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(draft.id)
    .bind(draft.workflow_id)
    .bind(draft.contact_id)
    .bind(draft.recipient.to_lowercase())
    .bind(draft.subject)
    .bind(draft.body_text)
    .bind(draft.body_html)
    .bind(draft.thread_headers)
    .bind(draft.voice_profile_id)
    .bind(draft.metadata)
    .bind(draft.external_draft_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch a draft by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<DraftEmail>, StorageError> {
    sqlx::query_as::<_, DraftEmail>("SELECT * FROM draft_emails WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Fetch the draft a workflow produced, if any.
pub async fn get_by_workflow(
    pool: &DbPool,
    workflow_id: &str,
) -> Result<Option<DraftEmail>, StorageError> {
    sqlx::query_as::<_, DraftEmail>(
        "SELECT * FROM draft_emails WHERE workflow_id = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(workflow_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Attempt a status transition.
///
/// Returns `true` when the transition was applied, `false` when the draft was
/// not in a legal source state (including already being in the target state).
pub async fn try_transition(
    pool: &DbPool,
    id: &str,
    to: DraftStatus,
) -> Result<bool, StorageError> {
    let sources = to.legal_sources();
    let placeholders: Vec<&str> = sources.iter().map(|_| "?").collect();
    let sql = format!(
        "UPDATE draft_emails SET status = ?, status_changed_at = ?, updated_at = ?
         WHERE id = ? AND status IN ({})",
        placeholders.join(", ")
    );

    let now = now_iso();
    let mut query = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(&now)
        .bind(&now)
        .bind(id);
    for source in sources {
        query = query.bind(source.as_str());
    }

    let result = query
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(result.rows_affected() == 1)
}

/// Record the external draft id returned by the email connector.
pub async fn set_external_draft_id(
    pool: &DbPool,
    id: &str,
    external_draft_id: &str,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE draft_emails SET external_draft_id = ?, updated_at = ? WHERE id = ?")
        .bind(external_draft_id)
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, new_id};

    async fn seed_draft(pool: &DbPool) -> String {
        let id = new_id();
        insert(
            pool,
            &NewDraft {
                id: &id,
                workflow_id: "wf-1",
                contact_id: "ct-1",
                recipient: "Ann@Acme.com",
                subject: "Hello Acme",
                body_text: "Hi Ann, following up on your note.",
                body_html: None,
                thread_headers: "{}",
                voice_profile_id: None,
                metadata: "{}",
                external_draft_id: None,
            },
        )
        .await
        .expect("insert draft");
        id
    }

    #[tokio::test]
    async fn insert_starts_pending_and_lowercases_recipient() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_draft(&pool).await;

        let draft = get_by_id(&pool, &id).await.expect("get").expect("exists");
        assert_eq!(draft.status, "pending");
        assert_eq!(draft.recipient, "ann@acme.com");
    }

    #[tokio::test]
    async fn happy_path_transitions() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_draft(&pool).await;

        assert!(try_transition(&pool, &id, DraftStatus::AutoApproved)
            .await
            .expect("to auto_approved"));
        assert!(try_transition(&pool, &id, DraftStatus::Sent)
            .await
            .expect("to sent"));

        let draft = get_by_id(&pool, &id).await.expect("get").expect("exists");
        assert_eq!(draft.status, "sent");
    }

    #[tokio::test]
    async fn sent_is_terminal_except_rollback() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_draft(&pool).await;
        try_transition(&pool, &id, DraftStatus::Approved)
            .await
            .expect("approve");
        try_transition(&pool, &id, DraftStatus::Sent)
            .await
            .expect("send");

        assert!(!try_transition(&pool, &id, DraftStatus::Pending)
            .await
            .expect("no pending"));
        assert!(!try_transition(&pool, &id, DraftStatus::Rejected)
            .await
            .expect("no reject"));
        assert!(try_transition(&pool, &id, DraftStatus::RolledBack)
            .await
            .expect("rollback allowed"));
    }

    #[tokio::test]
    async fn rejected_is_terminal() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_draft(&pool).await;
        try_transition(&pool, &id, DraftStatus::Rejected)
            .await
            .expect("reject");

        for target in [
            DraftStatus::Pending,
            DraftStatus::Approved,
            DraftStatus::Sent,
            DraftStatus::Failed,
        ] {
            assert!(
                !try_transition(&pool, &id, target).await.expect("attempt"),
                "rejected draft must not move to {target:?}"
            );
        }
    }

    #[tokio::test]
    async fn failed_can_retry_to_pending() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_draft(&pool).await;
        try_transition(&pool, &id, DraftStatus::Failed)
            .await
            .expect("fail");
        assert!(try_transition(&pool, &id, DraftStatus::Pending)
            .await
            .expect("retry"));
    }

    #[tokio::test]
    async fn double_send_is_rejected() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_draft(&pool).await;
        try_transition(&pool, &id, DraftStatus::Approved)
            .await
            .expect("approve");

        assert!(try_transition(&pool, &id, DraftStatus::Sent)
            .await
            .expect("first send"));
        assert!(!try_transition(&pool, &id, DraftStatus::Sent)
            .await
            .expect("second send"));
    }

    #[test]
    fn status_round_trip() {
        for status in [
            DraftStatus::Pending,
            DraftStatus::AutoApproved,
            DraftStatus::Approved,
            DraftStatus::Rejected,
            DraftStatus::Sent,
            DraftStatus::Failed,
            DraftStatus::RolledBack,
        ] {
            assert_eq!(DraftStatus::parse(status.as_str()), Some(status));
        }
    }
}

//! Storage operations for draft workflows and their step logs.
//!
//! The step log is an append-only JSON array on the workflow row. Each entry
//! records the step name, its status, a detail payload (the step's output,
//! serialized, so a resumed run can reuse it), and a timestamp.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// Lifecycle states of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Triggered,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl WorkflowState {
    /// Canonical stored string for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Parse a stored state string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "triggered" => Some(Self::Triggered),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// Status of a single recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Skipped,
    Failed,
}

/// One entry in a workflow's step log.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepRecord {
    /// Step name (stable identifier, e.g. "resolve_contact").
    pub step: String,
    /// How the step ended.
    pub status: StepStatus,
    /// Step output (serialized) for `ok`, or the failure/skip reason.
    pub detail: String,
    /// When the entry was recorded.
    pub at: String,
}

/// A persisted workflow row.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Workflow {
    pub id: String,
    pub state: String,
    pub signal_id: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// JSON-encoded `Vec<StepRecord>`.
    pub step_log: String,
    pub task_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Workflow {
    /// Decode the step log.
    pub fn steps(&self) -> Result<Vec<StepRecord>, StorageError> {
        serde_json::from_str(&self.step_log).map_err(|e| StorageError::Corrupt {
            table: "workflows".to_string(),
            column: "step_log".to_string(),
            message: e.to_string(),
        })
    }

    /// The recorded entry for a step, if any.
    pub fn step(&self, name: &str) -> Result<Option<StepRecord>, StorageError> {
        Ok(self.steps()?.into_iter().find(|s| s.step == name))
    }
}

/// Create a workflow in the `triggered` state for a signal.
pub async fn create(pool: &DbPool, id: &str, signal_id: &str) -> Result<(), StorageError> {
    sqlx::query("INSERT INTO workflows (id, state, signal_id) VALUES (?, 'triggered', ?)")
        .bind(id)
        .bind(signal_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch a workflow by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<Workflow>, StorageError> {
    sqlx::query_as::<_, Workflow>("SELECT * FROM workflows WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Transition a workflow to a new state.
///
/// Sets `started_at` on entering `processing` and `completed_at` on any
/// terminal state.
pub async fn set_state(pool: &DbPool, id: &str, state: WorkflowState) -> Result<(), StorageError> {
    let now = now_iso();
    match state {
        WorkflowState::Processing => {
            sqlx::query(
                "UPDATE workflows SET state = ?, started_at = COALESCE(started_at, ?),
                 updated_at = ? WHERE id = ?",
            )
            .bind(state.as_str())
            .bind(&now)
            .bind(&now)
            .bind(id)
        }
        WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Dead => {
            sqlx::query(
                "UPDATE workflows SET state = ?, completed_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(state.as_str())
            .bind(&now)
            .bind(&now)
            .bind(id)
        }
        WorkflowState::Triggered => {
            sqlx::query("UPDATE workflows SET state = ?, updated_at = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(&now)
                .bind(id)
        }
    }
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Record the broker task currently driving this workflow.
pub async fn set_task_id(pool: &DbPool, id: &str, task_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE workflows SET task_id = ?, updated_at = ? WHERE id = ?")
        .bind(task_id)
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Append a step record, replacing any previous entry for the same step.
///
/// Replacement (rather than blind append) is what makes resumption
/// idempotent: re-running a previously failed step overwrites its entry.
pub async fn record_step(
    pool: &DbPool,
    id: &str,
    step: &str,
    status: StepStatus,
    detail: &str,
) -> Result<(), StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    let row: (String,) = sqlx::query_as("SELECT step_log FROM workflows WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let mut steps: Vec<StepRecord> =
        serde_json::from_str(&row.0).map_err(|e| StorageError::Corrupt {
            table: "workflows".to_string(),
            column: "step_log".to_string(),
            message: e.to_string(),
        })?;

    steps.retain(|s| s.step != step);
    steps.push(StepRecord {
        step: step.to_string(),
        status,
        detail: detail.to_string(),
        at: now_iso(),
    });

    let encoded = serde_json::to_string(&steps).map_err(|e| StorageError::Corrupt {
        table: "workflows".to_string(),
        column: "step_log".to_string(),
        message: e.to_string(),
    })?;

    sqlx::query("UPDATE workflows SET step_log = ?, updated_at = ? WHERE id = ?")
        .bind(&encoded)
        .bind(now_iso())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    Ok(())
}

/// Fetch workflows that entered `failed` after the given cursor, oldest first.
pub async fn failed_since(
    pool: &DbPool,
    cursor: &str,
    limit: i64,
) -> Result<Vec<Workflow>, StorageError> {
    sqlx::query_as::<_, Workflow>(
        "SELECT * FROM workflows WHERE state = 'failed' AND completed_at > ?
         ORDER BY completed_at ASC LIMIT ?",
    )
    .bind(cursor)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, new_id};

    async fn seed_workflow(pool: &DbPool) -> String {
        let id = new_id();
        create(pool, &id, "sig-1").await.expect("create");
        id
    }

    #[tokio::test]
    async fn create_starts_triggered() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_workflow(&pool).await;

        let wf = get_by_id(&pool, &id).await.expect("get").expect("exists");
        assert_eq!(wf.state, "triggered");
        assert!(wf.started_at.is_none());
        assert!(wf.steps().expect("steps").is_empty());
    }

    #[tokio::test]
    async fn processing_sets_started_at_once() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_workflow(&pool).await;

        set_state(&pool, &id, WorkflowState::Processing)
            .await
            .expect("set");
        let first = get_by_id(&pool, &id)
            .await
            .expect("get")
            .expect("exists")
            .started_at;
        assert!(first.is_some());

        set_state(&pool, &id, WorkflowState::Processing)
            .await
            .expect("set again");
        let second = get_by_id(&pool, &id)
            .await
            .expect("get")
            .expect("exists")
            .started_at;
        assert_eq!(first, second, "started_at must not move on re-entry");
    }

    #[tokio::test]
    async fn record_step_replaces_same_step() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_workflow(&pool).await;

        record_step(&pool, &id, "resolve_contact", StepStatus::Failed, "timeout")
            .await
            .expect("record failed");
        record_step(&pool, &id, "resolve_contact", StepStatus::Ok, "{}")
            .await
            .expect("record ok");

        let wf = get_by_id(&pool, &id).await.expect("get").expect("exists");
        let steps = wf.steps().expect("steps");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Ok);
    }

    #[tokio::test]
    async fn terminal_state_sets_completed_at() {
        let pool = init_test_db().await.expect("init db");
        let id = seed_workflow(&pool).await;

        set_state(&pool, &id, WorkflowState::Failed)
            .await
            .expect("set");
        let wf = get_by_id(&pool, &id).await.expect("get").expect("exists");
        assert_eq!(wf.state, "failed");
        assert!(wf.completed_at.is_some());
    }

    #[test]
    fn state_round_trip() {
        for state in [
            WorkflowState::Triggered,
            WorkflowState::Processing,
            WorkflowState::Completed,
            WorkflowState::Failed,
            WorkflowState::Dead,
        ] {
            assert_eq!(WorkflowState::parse(state.as_str()), Some(state));
        }
        assert_eq!(WorkflowState::parse("bogus"), None);
    }
}

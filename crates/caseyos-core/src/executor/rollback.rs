//! Compensating rollback for rejected work.
//!
//! Compensation runs in the reverse of creation order: the CRM follow-up
//! task (created last) is deleted first, then the external email draft.
//! A delivered email is never compensated. Each compensation is idempotent,
//! so a crashed rollback can simply run again.

use chrono::{Duration, Utc};

use crate::config::Config;
use crate::connector::ConnectorRegistry;
use crate::executor::ExecutorError;
use crate::storage::{audit_log, drafts, parse_iso, workflows, DbPool};
use crate::workflow::step_names;

/// How long after draft creation a rejection still unwinds the external
/// artifacts.
pub const ROLLBACK_WINDOW_MINUTES: i64 = 30;

/// What a rollback pass actually did.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RollbackReport {
    pub task_deleted: bool,
    pub external_draft_deleted: bool,
    pub window_expired: bool,
}

/// Unwind the external artifacts of a rejected draft.
///
/// Outside the 30-minute window the artifacts are left in place (the report
/// says so); inside it, the CRM task and external draft are deleted in
/// reverse creation order. The draft row itself is expected to already be
/// `rejected`; a `sent` draft is refused (no unsend).
pub async fn compensate_rejected_draft(
    pool: &DbPool,
    registry: &ConnectorRegistry,
    _config: &Config,
    draft_id: &str,
) -> Result<RollbackReport, ExecutorError> {
    let draft = drafts::get_by_id(pool, draft_id)
        .await?
        .ok_or_else(|| ExecutorError::Invalid(format!("draft {draft_id} not found")))?;

    if draft.status == "sent" {
        return Err(ExecutorError::Invalid(
            "sent email cannot be rolled back".to_string(),
        ));
    }

    let created = parse_iso("draft_emails", "created_at", &draft.created_at)?;
    if Utc::now() - created > Duration::minutes(ROLLBACK_WINDOW_MINUTES) {
        tracing::info!(draft_id, "Rollback window expired; leaving artifacts");
        return Ok(RollbackReport {
            window_expired: true,
            ..RollbackReport::default()
        });
    }

    let mut report = RollbackReport::default();

    // Reverse creation order: the follow-up task went out after the draft.
    if let Some(task_id) = followup_task_id(pool, &draft.workflow_id).await? {
        registry.crm.delete_task(&task_id).await?;
        audit_log::append(
            pool,
            "executor",
            "rollback_task_deleted",
            &format!("draft:{draft_id}"),
            Some(&task_id),
            None,
        )
        .await?;
        report.task_deleted = true;
    }

    if let Some(external_draft_id) = &draft.external_draft_id {
        registry.email.delete_draft(external_draft_id).await?;
        audit_log::append(
            pool,
            "executor",
            "rollback_draft_deleted",
            &format!("draft:{draft_id}"),
            Some(external_draft_id),
            None,
        )
        .await?;
        report.external_draft_deleted = true;
    }

    tracing::info!(
        draft_id,
        task_deleted = report.task_deleted,
        external_draft_deleted = report.external_draft_deleted,
        "Rollback complete"
    );
    Ok(report)
}

/// The CRM task id recorded by the workflow's follow-up step, if that step
/// completed.
async fn followup_task_id(
    pool: &DbPool,
    workflow_id: &str,
) -> Result<Option<String>, ExecutorError> {
    let Some(workflow) = workflows::get_by_id(pool, workflow_id).await? else {
        return Ok(None);
    };
    let Some(record) = workflow.step(step_names::CRM_FOLLOWUP)? else {
        return Ok(None);
    };
    if record.status != workflows::StepStatus::Ok {
        return Ok(None);
    }
    Ok(serde_json::from_str(&record.detail).ok())
}

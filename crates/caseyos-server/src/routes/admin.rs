//! Admin endpoints: emergency stop, rules, whitelist, DLQ retries, audit.
//!
//! All routes here sit behind the admin bearer-token middleware.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use caseyos_core::storage::{
    audit_log, auto_approval, failed_tasks, new_id, runtime_flags, tasks, workflows,
};

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /api/admin/emergency-stop` — engage the kill switch.
pub async fn emergency_stop(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    runtime_flags::set_emergency_stop(&state.db, true).await?;
    audit_log::append(
        &state.db,
        "admin",
        "emergency_stop_engaged",
        "runtime:kill_switch",
        Some("off"),
        Some("on"),
    )
    .await?;
    tracing::warn!("Emergency stop engaged");
    Ok(Json(json!({ "emergency_stop": true })))
}

/// `POST /api/admin/emergency-resume` — release the kill switch.
pub async fn emergency_resume(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    runtime_flags::set_emergency_stop(&state.db, false).await?;
    audit_log::append(
        &state.db,
        "admin",
        "emergency_stop_released",
        "runtime:kill_switch",
        Some("on"),
        Some("off"),
    )
    .await?;
    tracing::info!("Emergency stop released");
    Ok(Json(json!({ "emergency_stop": false })))
}

/// `GET /api/admin/emergency-status` — current kill switch state.
pub async fn emergency_status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let engaged = runtime_flags::emergency_stop_engaged(&state.db).await?;
    Ok(Json(json!({ "emergency_stop": engaged })))
}

/// `GET /api/admin/rules` — all auto-approval rules.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let rules = auto_approval::all_rules(&state.db).await?;
    Ok(Json(json!(rules)))
}

/// Request body for creating a rule.
#[derive(Deserialize)]
pub struct CreateRuleRequest {
    pub kind: String,
    #[serde(default)]
    pub conditions: Option<Value>,
    pub confidence: f64,
    pub priority: i64,
}

/// `POST /api/admin/rules` — create an operator-defined rule.
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRuleRequest>,
) -> Result<Json<Value>, ApiError> {
    if !matches!(
        body.kind.as_str(),
        "replied_before" | "known_good_recipient" | "high_icp_score"
    ) {
        return Err(ApiError::Validation(format!("unknown rule kind: {}", body.kind)));
    }
    if !(0.0..=1.0).contains(&body.confidence) {
        return Err(ApiError::Validation("confidence must be in 0..1".to_string()));
    }

    let id = new_id();
    let conditions = body
        .conditions
        .map(|c| c.to_string())
        .unwrap_or_else(|| "{}".to_string());
    auto_approval::insert_rule(
        &state.db,
        &id,
        &body.kind,
        &conditions,
        body.confidence,
        body.priority,
    )
    .await?;

    Ok(Json(json!({ "id": id })))
}

/// `POST /api/admin/rules/{id}/enable` and `/disable`.
pub async fn enable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_rule(&state, &id, true).await
}

pub async fn disable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_rule(&state, &id, false).await
}

async fn set_rule(state: &AppState, id: &str, enabled: bool) -> Result<Json<Value>, ApiError> {
    let found = auto_approval::set_rule_enabled(&state.db, id, enabled).await?;
    if !found {
        return Err(ApiError::NotFound(format!("rule {id} not found")));
    }
    audit_log::append(
        &state.db,
        "admin",
        if enabled { "rule_enabled" } else { "rule_disabled" },
        &format!("rule:{id}"),
        None,
        None,
    )
    .await?;
    Ok(Json(json!({ "id": id, "enabled": enabled })))
}

/// `GET /api/admin/approved-recipients` — the whitelist.
pub async fn list_recipients(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let recipients = auto_approval::list_approved_recipients(&state.db).await?;
    Ok(Json(json!(recipients)))
}

/// Request body for whitelisting a recipient.
#[derive(Deserialize)]
pub struct AddRecipientRequest {
    pub email: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /api/admin/approved-recipients` — whitelist a recipient.
pub async fn add_recipient(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddRecipientRequest>,
) -> Result<Json<Value>, ApiError> {
    if !body.email.contains('@') {
        return Err(ApiError::Validation("email must contain '@'".to_string()));
    }
    auto_approval::add_approved_recipient(
        &state.db,
        &body.email,
        body.reason.as_deref().unwrap_or("manually whitelisted"),
    )
    .await?;
    Ok(Json(json!({ "email": body.email.to_lowercase() })))
}

/// `DELETE /api/admin/approved-recipients/{email}`.
pub async fn remove_recipient(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let removed = auto_approval::remove_approved_recipient(&state.db, &email).await?;
    if !removed {
        return Err(ApiError::NotFound(format!("{email} is not whitelisted")));
    }
    Ok(Json(json!({ "email": email.to_lowercase(), "removed": true })))
}

/// `GET /api/admin/failed-tasks` — the dead-letter queue.
pub async fn list_failed_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let failed = failed_tasks::list_unresolved(&state.db, 200).await?;
    Ok(Json(json!(failed)))
}

/// `POST /api/admin/failed-tasks/{id}/retry` — re-enqueue a dead letter.
///
/// The original payload goes back on the queue; a failed workflow resumes
/// from its last good step because the step log is intact.
pub async fn retry_failed_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let failed = failed_tasks::get_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("failed task {id} not found")))?;
    if failed.resolved_at.is_some() {
        return Err(ApiError::conflict_reason("already_resolved"));
    }

    let task_id = tasks::enqueue(&state.db, &failed.task_name, &failed.payload).await?;
    failed_tasks::resolve(&state.db, &id).await?;
    audit_log::append(
        &state.db,
        "admin",
        "failed_task_retried",
        &format!("failed_task:{id}"),
        None,
        Some(&task_id.to_string()),
    )
    .await?;

    Ok(Json(json!({ "id": id, "requeued_task_id": task_id })))
}

/// `POST /api/admin/workflows/{id}/cancel` — move a workflow to `dead`.
///
/// Running steps are not preempted; the orchestrator checks the flag
/// between steps and stops at the next boundary.
pub async fn cancel_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let workflow = workflows::get_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow {id} not found")))?;
    if matches!(workflow.state.as_str(), "completed" | "dead") {
        return Err(ApiError::conflict_reason("workflow_not_cancellable"));
    }

    workflows::set_state(&state.db, &id, workflows::WorkflowState::Dead).await?;
    audit_log::append(
        &state.db,
        "admin",
        "workflow_cancelled",
        &format!("workflow:{id}"),
        Some(&workflow.state),
        Some("dead"),
    )
    .await?;
    Ok(Json(json!({ "id": id, "state": "dead" })))
}

/// Query parameters for the audit view.
#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default = "default_audit_limit")]
    pub limit: i64,
}

fn default_audit_limit() -> i64 {
    100
}

/// `GET /api/admin/audit` — recent audit entries, optionally per subject.
pub async fn audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.clamp(1, 1000);
    let entries = match params.subject.as_deref() {
        Some(subject) => audit_log::for_subject(&state.db, subject, limit).await?,
        None => audit_log::recent(&state.db, limit).await?,
    };
    Ok(Json(json!(entries)))
}

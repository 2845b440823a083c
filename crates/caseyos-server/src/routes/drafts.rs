//! Draft review endpoints: inspect, approve, reject.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use caseyos_core::executor::rollback;
use caseyos_core::storage::{audit_log, auto_approval, drafts};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/drafts/{id}` — draft with its approval decision history.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let draft = drafts::get_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("draft {id} not found")))?;
    let decisions = auto_approval::decisions_for_draft(&state.db, &id).await?;

    Ok(Json(json!({ "draft": draft, "decisions": decisions })))
}

/// `POST /api/drafts/{id}/approve` — operator approves a pending draft.
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let draft = drafts::get_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("draft {id} not found")))?;

    let moved = drafts::try_transition(&state.db, &id, drafts::DraftStatus::Approved).await?;
    if !moved {
        return Err(ApiError::conflict_reason("draft_not_pending"));
    }

    audit_log::append(
        &state.db,
        "operator",
        "draft_approved",
        &format!("draft:{id}"),
        Some(&draft.status),
        Some("approved"),
    )
    .await?;

    Ok(Json(json!({ "id": id, "status": "approved" })))
}

/// `POST /api/drafts/{id}/reject` — operator rejects a draft; the external
/// artifacts are compensated while the rollback window is open.
pub async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let draft = drafts::get_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("draft {id} not found")))?;

    let moved = drafts::try_transition(&state.db, &id, drafts::DraftStatus::Rejected).await?;
    if !moved {
        return Err(ApiError::conflict_reason("draft_not_pending"));
    }

    audit_log::append(
        &state.db,
        "operator",
        "draft_rejected",
        &format!("draft:{id}"),
        Some(&draft.status),
        Some("rejected"),
    )
    .await?;

    let report =
        rollback::compensate_rejected_draft(&state.db, &state.registry, &state.config, &id).await?;

    Ok(Json(json!({
        "id": id,
        "status": "rejected",
        "rollback": report,
    })))
}

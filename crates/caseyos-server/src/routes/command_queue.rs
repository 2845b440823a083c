//! Command queue ("Today's Moves") endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use caseyos_core::storage::command_queue::{self, QueueItemStatus};

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for the daily view.
#[derive(Deserialize)]
pub struct TodayQuery {
    /// `all` (default), `sales`, `marketing`, or `cs`.
    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_domain() -> String {
    "all".to_string()
}

/// `GET /api/command-queue/today` — actionable items, highest APS first.
pub async fn today(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TodayQuery>,
) -> Result<Json<Value>, ApiError> {
    let domain = match params.domain.as_str() {
        "all" => None,
        "sales" | "marketing" | "cs" => Some(params.domain.as_str()),
        other => {
            return Err(ApiError::Validation(format!("unknown domain: {other}")));
        }
    };

    let items = command_queue::list_today(&state.db, domain).await?;
    Ok(Json(json!(items)))
}

/// `POST /api/command-queue/{id}/accept` — operator accepts a move.
pub async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    transition(&state, &id, QueueItemStatus::Accepted).await
}

/// `POST /api/command-queue/{id}/dismiss` — operator dismisses a move.
pub async fn dismiss(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    transition(&state, &id, QueueItemStatus::Dismissed).await
}

async fn transition(
    state: &AppState,
    id: &str,
    to: QueueItemStatus,
) -> Result<Json<Value>, ApiError> {
    let item = command_queue::get_by_id(&state.db, id).await?;
    if item.is_none() {
        return Err(ApiError::NotFound(format!("queue item {id} not found")));
    }

    let moved = command_queue::try_transition(&state.db, id, to).await?;
    if !moved {
        return Err(ApiError::conflict_reason("queue_item_not_actionable"));
    }

    Ok(Json(json!({ "id": id, "status": to.as_str() })))
}

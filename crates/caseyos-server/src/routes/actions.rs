//! Action execution endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use caseyos_core::executor::{self, ExecutionResult};

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for `POST /api/actions/execute`.
#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub queue_item_id: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// `POST /api/actions/execute` — preview or perform a queue item.
///
/// Gate refusals and idempotency replays are 409s; a rate-limit block is a
/// 429 with `Retry-After`.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Json<Value>, ApiError> {
    let result = executor::execute(
        &state.db,
        &state.registry,
        &state.config,
        &body.queue_item_id,
        body.dry_run,
    )
    .await?;

    match result {
        ExecutionResult::Preview { .. } | ExecutionResult::Executed { .. } => {
            Ok(Json(json!(result)))
        }
        ExecutionResult::Blocked {
            ref reason,
            retry_after_secs,
        } => {
            if reason == "rate_limited" {
                Err(ApiError::RateLimited {
                    retry_after_secs: retry_after_secs.unwrap_or(60),
                    body: json!(result),
                })
            } else {
                Err(ApiError::Conflict(json!({ "reason": reason })))
            }
        }
        ExecutionResult::Replayed { original } => Err(ApiError::Conflict(json!({
            "reason": "idempotent_replay",
            "original": original,
        }))),
    }
}

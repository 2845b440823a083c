//! Notification center endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use caseyos_core::storage::notifications;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/notifications` — unread and resurfaced notifications.
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let active = notifications::list_active_now(&state.db, 100).await?;
    Ok(Json(json!(active)))
}

/// `POST /api/notifications/{id}/read`.
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_state(&state, &id, "read", None).await
}

/// `POST /api/notifications/{id}/dismiss`.
pub async fn dismiss(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_state(&state, &id, "dismissed", None).await
}

/// Request body for snoozing.
#[derive(Deserialize)]
pub struct SnoozeRequest {
    /// ISO-8601 UTC timestamp when the notification resurfaces.
    pub until: String,
}

/// `POST /api/notifications/{id}/snooze`.
pub async fn snooze(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SnoozeRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.until.parse::<chrono::DateTime<chrono::Utc>>().is_err() {
        return Err(ApiError::Validation(format!(
            "unparseable snooze time: {}",
            body.until
        )));
    }
    set_state(&state, &id, "snoozed", Some(&body.until)).await
}

async fn set_state(
    state: &AppState,
    id: &str,
    to: &str,
    snoozed_until: Option<&str>,
) -> Result<Json<Value>, ApiError> {
    let found = notifications::set_state(&state.db, id, to, snoozed_until).await?;
    if !found {
        return Err(ApiError::NotFound(format!("notification {id} not found")));
    }
    Ok(Json(json!({ "id": id, "state": to })))
}

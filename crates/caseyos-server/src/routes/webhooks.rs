//! Inbound webhook ingress.
//!
//! Signature validation happens against the raw body before anything is
//! parsed; a bad signature is a 401 with no side effects. Everything heavy
//! is deferred to the background worker, so the handler's only writes are
//! the signal row and one queued task.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use caseyos_core::ingest::{self, SignalSource};
use caseyos_core::storage::tasks;

use crate::auth::{signature_matches, webhook_signature};
use crate::error::ApiError;
use crate::state::AppState;

/// Default event kind when the payload does not name one.
fn default_kind(source: SignalSource) -> &'static str {
    match source {
        SignalSource::Form => "lead",
        SignalSource::Crm => "new_lead",
        SignalSource::Social => "mention",
        SignalSource::Manual => "manual",
        SignalSource::Email | SignalSource::Calendar => "unknown",
    }
}

/// `POST /api/webhooks/{source}` — authenticated signal ingress.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let source = SignalSource::parse(&source)
        .ok_or_else(|| ApiError::Validation(format!("unknown signal source: {source}")))?;

    // Signature check against the raw body, before any parsing.
    let secret = state
        .config
        .webhooks
        .signing_secrets
        .get(source.as_str())
        .ok_or_else(|| {
            ApiError::Auth(format!("no signing secret configured for {}", source.as_str()))
        })?;
    let provided = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let expected = webhook_signature(secret, &body);
    if !signature_matches(&expected, provided) {
        return Err(ApiError::Auth("invalid webhook signature".to_string()));
    }

    // Backpressure: shed non-essential sources when the broker is deep.
    let depth = tasks::queued_depth(&state.db).await?;
    if depth > state.config.runtime.broker_depth_threshold
        && source.sheddable_under_backpressure()
    {
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "queue saturated", "retry_after": 30 })),
        ));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("body is not JSON: {e}")))?;
    if !payload.is_object() {
        return Err(ApiError::Validation("body must be a JSON object".to_string()));
    }

    let kind = payload
        .get("kind")
        .or_else(|| payload.get("event_type"))
        .or_else(|| payload.get("change_type"))
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| default_kind(source))
        .to_string();

    let accepted = ingest::accept_signal(&state.db, source, &kind, &payload).await?;

    let status = if accepted.duplicate {
        "duplicate"
    } else {
        "accepted"
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": status,
            "duplicate": accepted.duplicate,
            "signal_id": accepted.signal_id,
        })),
    ))
}

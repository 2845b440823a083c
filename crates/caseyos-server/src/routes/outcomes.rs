//! Outcome recording and stats endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use caseyos_core::outcome::{self, OutcomeKind, RecordOutcome, SubjectKind};
use caseyos_core::storage::outcomes;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for `POST /api/outcomes/record`.
#[derive(Deserialize)]
pub struct RecordRequest {
    pub subject_kind: String,
    pub subject_id: String,
    pub kind: String,
    #[serde(default)]
    pub impact: Option<f64>,
    #[serde(default)]
    pub details: Option<Value>,
}

/// `POST /api/outcomes/record` — record a manual outcome.
pub async fn record(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RecordRequest>,
) -> Result<Json<Value>, ApiError> {
    let subject_kind = SubjectKind::parse(&body.subject_kind)
        .ok_or_else(|| ApiError::Validation(format!("unknown subject_kind: {}", body.subject_kind)))?;
    let kind = OutcomeKind::parse(&body.kind)
        .ok_or_else(|| ApiError::Validation(format!("unknown outcome kind: {}", body.kind)))?;

    let outcome_id = outcome::record(
        &state.db,
        RecordOutcome {
            subject_kind,
            subject_id: body.subject_id,
            kind,
            impact: body.impact,
            source: "manual",
            detected_at: None,
            details: body
                .details
                .map(|d| d.to_string())
                .unwrap_or_else(|| "{}".to_string()),
        },
    )
    .await?;

    Ok(Json(json!({ "outcome_id": outcome_id })))
}

/// `GET /api/outcomes/stats` — counts and impact sums per kind and category.
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let by_kind = outcomes::stats_by_kind(&state.db).await?;

    let mut by_category: std::collections::BTreeMap<&str, (i64, f64)> =
        std::collections::BTreeMap::new();
    for row in &by_kind {
        if let Some(kind) = OutcomeKind::parse(&row.kind) {
            let entry = by_category.entry(kind.category()).or_insert((0, 0.0));
            entry.0 += row.count;
            entry.1 += row.total_impact;
        }
    }
    let by_category: Vec<Value> = by_category
        .into_iter()
        .map(|(category, (count, total_impact))| {
            json!({ "category": category, "count": count, "total_impact": total_impact })
        })
        .collect();

    Ok(Json(json!({
        "by_kind": by_kind,
        "by_category": by_category,
    })))
}

//! Health endpoints: liveness, readiness, per-connector dependency status.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use caseyos_core::storage::{self, tasks};

use crate::state::AppState;

/// Probe timeout for dependency checks.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET /health/liveness` — 200 whenever the process is serving.
pub async fn liveness() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /health/readiness` — 200 iff the data store and task queue respond.
pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let db_ok = storage::ping(&state.db).await.is_ok();
    let broker_depth = tasks::queued_depth(&state.db).await.ok();

    let ready = db_ok && broker_depth.is_some();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "database": db_ok,
            "broker_depth": broker_depth,
        })),
    )
}

/// `GET /health/dependencies` — live probe of every connector capability.
pub async fn dependencies(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registry = &state.registry;

    let email = probe(async {
        registry
            .email
            .search_threads("from:healthcheck@invalid.example", 1)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .await;
    let crm = probe(async {
        registry
            .crm
            .find_contact_by_email("healthcheck@invalid.example")
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .await;
    let calendar = probe(async {
        registry
            .calendar
            .freebusy(
                "2026-01-01T00:00:00Z",
                "2026-01-01T01:00:00Z",
                &[],
            )
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .await;
    let assets = probe(async {
        registry
            .assets
            .search("healthcheck", &[])
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .await;
    let llm = probe(async {
        registry
            .llm
            .health_check()
            .await
            .map_err(|e| e.to_string())
    })
    .await;

    Json(json!({
        "email": email,
        "crm": crm,
        "calendar": calendar,
        "assets": assets,
        "llm": llm,
    }))
}

async fn probe<F>(future: F) -> Value
where
    F: std::future::Future<Output = Result<(), String>>,
{
    match tokio::time::timeout(PROBE_TIMEOUT, future).await {
        Ok(Ok(())) => json!({ "ok": true }),
        Ok(Err(error)) => json!({ "ok": false, "error": error }),
        Err(_) => json!({ "ok": false, "error": "probe timed out" }),
    }
}

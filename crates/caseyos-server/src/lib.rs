//! CaseyOS HTTP API gateway.
//!
//! Exposes `caseyos-core`'s control loop as a REST API: webhook ingress,
//! the command queue, action execution, outcome recording, draft review,
//! admin controls, and health probes. State-changing routes require a CSRF
//! token (webhooks and health excepted); admin routes require the bearer
//! token.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete axum router with all API routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/emergency-stop", post(routes::admin::emergency_stop))
        .route("/emergency-resume", post(routes::admin::emergency_resume))
        .route("/emergency-status", get(routes::admin::emergency_status))
        .route(
            "/rules",
            get(routes::admin::list_rules).post(routes::admin::create_rule),
        )
        .route("/rules/{id}/enable", post(routes::admin::enable_rule))
        .route("/rules/{id}/disable", post(routes::admin::disable_rule))
        .route(
            "/approved-recipients",
            get(routes::admin::list_recipients).post(routes::admin::add_recipient),
        )
        .route(
            "/approved-recipients/{email}",
            delete(routes::admin::remove_recipient),
        )
        .route("/failed-tasks", get(routes::admin::list_failed_tasks))
        .route(
            "/failed-tasks/{id}/retry",
            post(routes::admin::retry_failed_task),
        )
        .route(
            "/workflows/{id}/cancel",
            post(routes::admin::cancel_workflow),
        )
        .route("/audit", get(routes::admin::audit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_middleware,
        ));

    // Webhook handlers carry a hard 5-second budget; anything heavier is
    // already deferred to the task queue.
    let webhooks = Router::new()
        .route("/webhooks/{source}", post(routes::webhooks::receive))
        .layer(TimeoutLayer::new(Duration::from_secs(5)));

    let api = Router::new()
        .route("/csrf", get(csrf))
        .merge(webhooks)
        // Command queue
        .route("/command-queue/today", get(routes::command_queue::today))
        .route(
            "/command-queue/{id}/accept",
            post(routes::command_queue::accept),
        )
        .route(
            "/command-queue/{id}/dismiss",
            post(routes::command_queue::dismiss),
        )
        // Actions
        .route("/actions/execute", post(routes::actions::execute))
        // Outcomes
        .route("/outcomes/record", post(routes::outcomes::record))
        .route("/outcomes/stats", get(routes::outcomes::stats))
        // Drafts
        .route("/drafts/{id}", get(routes::drafts::get))
        .route("/drafts/{id}/approve", post(routes::drafts::approve))
        .route("/drafts/{id}/reject", post(routes::drafts::reject))
        // Notifications
        .route("/notifications", get(routes::notifications::list))
        .route(
            "/notifications/{id}/read",
            post(routes::notifications::mark_read),
        )
        .route(
            "/notifications/{id}/dismiss",
            post(routes::notifications::dismiss),
        )
        .route(
            "/notifications/{id}/snooze",
            post(routes::notifications::snooze),
        )
        .nest("/admin", admin);

    let health = Router::new()
        .route("/liveness", get(routes::health::liveness))
        .route("/readiness", get(routes::health::readiness))
        .route("/dependencies", get(routes::health::dependencies));

    Router::new()
        .nest("/api", api)
        .nest("/health", health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::csrf_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /api/csrf` — the CSRF token clients must replay on writes.
async fn csrf(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "token": auth::csrf_token(state.config.sending.effective_csrf_secret()) }))
}

#[cfg(test)]
mod tests;

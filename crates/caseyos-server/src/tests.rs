//! Gateway route tests: auth, ingress, execution gates, admin controls.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use caseyos_core::config::Config;
use caseyos_core::connector::sandbox::SandboxWorld;
use caseyos_core::connector::ConnectorRegistry;
use caseyos_core::ingest::{self, Classification, SignalSource};
use caseyos_core::storage::{auto_approval, contacts, drafts, init_test_db, new_id};
use caseyos_core::workflow::orchestrate::{run_workflow, RunOutcome, WorkflowEnv};

use crate::auth::{csrf_token, webhook_signature};
use crate::state::AppState;

const HOOK_SECRET: &str = "hook-secret";
const ADMIN_TOKEN: &str = "admin-tok";

fn test_config() -> Config {
    let mut config = Config::default();
    config.sending.secret_key = "test-secret".to_string();
    config.sending.admin_token = ADMIN_TOKEN.to_string();
    config
        .webhooks
        .signing_secrets
        .insert("form".to_string(), HOOK_SECRET.to_string());
    config
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    world: SandboxWorld,
}

async fn test_app_with(config: Config) -> TestApp {
    let db = init_test_db().await.expect("init db");
    auto_approval::seed_default_rules(&db).await.expect("seed rules");
    let world = SandboxWorld::shared();
    let registry = ConnectorRegistry::sandbox_with(world.clone());
    let state = Arc::new(AppState {
        db,
        config,
        registry,
    });
    TestApp {
        router: crate::build_router(state.clone()),
        state,
        world,
    }
}

async fn test_app() -> TestApp {
    test_app_with(test_config()).await
}

fn csrf(state: &AppState) -> String {
    csrf_token(state.config.sending.effective_csrf_secret())
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn signed_webhook(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/form")
        .header("content-type", "application/json")
        .header("x-signature", webhook_signature(HOOK_SECRET, body.as_bytes()))
        .body(Body::from(body.to_string()))
        .expect("request")
}

const FORM_BODY: &str =
    r#"{"form_id":"f1","email":"ann@acme.com","firstname":"Ann","company":"Acme"}"#;

/// Run the background workflow for the most recently accepted signal.
async fn run_background(app: &TestApp, signal_id: &str) -> (String, Option<String>) {
    let classification =
        ingest::process_signal(&app.state.db, &app.state.config, signal_id)
            .await
            .expect("process signal");
    let Classification::Workflow { workflow_id } = classification else {
        panic!("expected workflow classification");
    };
    let env = WorkflowEnv {
        db: app.state.db.clone(),
        registry: app.state.registry.clone(),
        config: app.state.config.clone(),
        memory: None,
    };
    match run_workflow(&env, &workflow_id).await.expect("run workflow") {
        RunOutcome::Completed {
            draft_id,
            queue_item_id,
        } => (draft_id, queue_item_id),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn webhook_with_valid_signature_is_accepted() {
    let app = test_app().await;

    let response = app.router.oneshot(signed_webhook(FORM_BODY)).await.expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["duplicate"], false);
    assert!(body["signal_id"].as_str().is_some());
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected_without_side_effects() {
    let app = test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/form")
        .header("content-type", "application/json")
        .header("x-signature", "deadbeef")
        .body(Body::from(FORM_BODY))
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let count = caseyos_core::storage::signals::count(&app.state.db)
        .await
        .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn duplicate_webhook_reports_duplicate() {
    let app = test_app().await;

    let first = app
        .router
        .clone()
        .oneshot(signed_webhook(FORM_BODY))
        .await
        .expect("first");
    let first = body_json(first).await;

    let second = app
        .router
        .oneshot(signed_webhook(FORM_BODY))
        .await
        .expect("second");
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let second = body_json(second).await;

    assert_eq!(second["duplicate"], true);
    assert_eq!(second["signal_id"], first["signal_id"]);
    assert_eq!(
        caseyos_core::storage::signals::count(&app.state.db)
            .await
            .expect("count"),
        1
    );
}

#[tokio::test]
async fn state_changing_requests_require_csrf() {
    let app = test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/outcomes/record")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"subject_kind":"contact","subject_id":"x","kind":"no_response"}"#))
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn full_loop_lead_to_scored_queue_item() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(FORM_BODY))
        .await
        .expect("webhook");
    let accepted = body_json(response).await;
    let signal_id = accepted["signal_id"].as_str().expect("signal id");

    let (draft_id, queue_item_id) = run_background(&app, signal_id).await;
    let queue_item_id = queue_item_id.expect("queue item");

    // The daily view carries the scored item.
    let request = Request::builder()
        .uri("/api/command-queue/today?domain=sales")
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("today");
    assert_eq!(response.status(), StatusCode::OK);
    let items = body_json(response).await;
    let item = items
        .as_array()
        .expect("array")
        .iter()
        .find(|i| i["id"] == queue_item_id.as_str())
        .expect("queue item listed");
    assert!(item["aps_score"].as_f64().expect("score") >= 60.0);

    // The draft endpoint shows the decision trail.
    let request = Request::builder()
        .uri(format!("/api/drafts/{draft_id}"))
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("draft");
    let body = body_json(response).await;
    assert!(body["draft"]["subject"]
        .as_str()
        .expect("subject")
        .contains("Acme"));
    assert_eq!(body["decisions"][0]["decision"], "needs_review");
}

#[tokio::test]
async fn execute_with_sends_disabled_conflicts() {
    let app = test_app().await;
    let token = csrf(&app.state);

    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(FORM_BODY))
        .await
        .expect("webhook");
    let accepted = body_json(response).await;
    let (_, queue_item_id) = run_background(&app, accepted["signal_id"].as_str().expect("id")).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/actions/execute")
        .header("content-type", "application/json")
        .header("x-csrf-token", &token)
        .body(Body::from(
            serde_json::json!({
                "queue_item_id": queue_item_id.expect("queue item"),
                "dry_run": false,
            })
            .to_string(),
        ))
        .expect("request");
    let response = app.router.oneshot(request).await.expect("execute");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "draft_not_approved");
    assert!(app.world.sent_messages().is_empty());
}

#[tokio::test]
async fn dry_run_returns_preview() {
    let app = test_app().await;
    let token = csrf(&app.state);

    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(FORM_BODY))
        .await
        .expect("webhook");
    let accepted = body_json(response).await;
    let (_, queue_item_id) = run_background(&app, accepted["signal_id"].as_str().expect("id")).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/actions/execute")
        .header("content-type", "application/json")
        .header("x-csrf-token", &token)
        .body(Body::from(
            serde_json::json!({
                "queue_item_id": queue_item_id.expect("queue item"),
                "dry_run": true,
            })
            .to_string(),
        ))
        .expect("request");
    let response = app.router.oneshot(request).await.expect("dry run");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "preview");
    assert_eq!(body["artifact"]["recipient"], "ann@acme.com");
}

#[tokio::test]
async fn emergency_stop_blocks_execution_until_resumed() {
    let app = test_app().await;
    let token = csrf(&app.state);

    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(FORM_BODY))
        .await
        .expect("webhook");
    let accepted = body_json(response).await;
    let (_, queue_item_id) = run_background(&app, accepted["signal_id"].as_str().expect("id")).await;
    let queue_item_id = queue_item_id.expect("queue item");

    // Engage the kill switch via the admin surface.
    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/emergency-stop")
        .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
        .header("x-csrf-token", &token)
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("stop");
    assert_eq!(response.status(), StatusCode::OK);

    let execute = |dry_run: bool| {
        Request::builder()
            .method("POST")
            .uri("/api/actions/execute")
            .header("content-type", "application/json")
            .header("x-csrf-token", &token)
            .body(Body::from(
                serde_json::json!({ "queue_item_id": queue_item_id, "dry_run": dry_run })
                    .to_string(),
            ))
            .expect("request")
    };

    let response = app.router.clone().oneshot(execute(false)).await.expect("execute");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "emergency_stop");

    // The stop trip is audited.
    let request = Request::builder()
        .uri("/api/admin/audit?subject=runtime:kill_switch")
        .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("audit");
    let entries = body_json(response).await;
    assert!(entries
        .as_array()
        .expect("array")
        .iter()
        .any(|e| e["action"] == "emergency_stop_engaged"));

    // Resume restores normal behavior (now blocked by the approval gate,
    // not the kill switch).
    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/emergency-resume")
        .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
        .header("x-csrf-token", &token)
        .body(Body::empty())
        .expect("request");
    app.router.clone().oneshot(request).await.expect("resume");

    let response = app.router.oneshot(execute(false)).await.expect("execute");
    let body = body_json(response).await;
    assert_eq!(body["reason"], "draft_not_approved");
}

#[tokio::test]
async fn bounce_outcome_suppresses_contact_and_blocks_execution() {
    let app = test_app().await;
    let token = csrf(&app.state);

    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(FORM_BODY))
        .await
        .expect("webhook");
    let accepted = body_json(response).await;
    let (draft_id, queue_item_id) =
        run_background(&app, accepted["signal_id"].as_str().expect("id")).await;
    let queue_item_id = queue_item_id.expect("queue item");

    let request = Request::builder()
        .method("POST")
        .uri("/api/outcomes/record")
        .header("content-type", "application/json")
        .header("x-csrf-token", &token)
        .body(Body::from(
            serde_json::json!({
                "subject_kind": "draft",
                "subject_id": draft_id,
                "kind": "email_bounced",
            })
            .to_string(),
        ))
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("record");
    assert_eq!(response.status(), StatusCode::OK);

    let contact = contacts::get_by_email(&app.state.db, "ann@acme.com")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(contact.suppressed, "bounce");

    let request = Request::builder()
        .method("POST")
        .uri("/api/actions/execute")
        .header("content-type", "application/json")
        .header("x-csrf-token", &token)
        .body(Body::from(
            serde_json::json!({ "queue_item_id": queue_item_id, "dry_run": false }).to_string(),
        ))
        .expect("request");
    let response = app.router.oneshot(request).await.expect("execute");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "contact_suppressed");
}

#[tokio::test]
async fn admin_routes_require_bearer_token() {
    let app = test_app().await;

    let request = Request::builder()
        .uri("/api/admin/emergency-status")
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/admin/emergency-status")
        .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health/liveness")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("liveness");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health/readiness")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("readiness");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/health/dependencies")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("dependencies");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["email"]["ok"], true);
    assert_eq!(body["llm"]["ok"], true);
}

#[tokio::test]
async fn reject_draft_compensates_external_artifacts() {
    let app = test_app().await;
    let token = csrf(&app.state);

    let response = app
        .router
        .clone()
        .oneshot(signed_webhook(FORM_BODY))
        .await
        .expect("webhook");
    let accepted = body_json(response).await;
    let (draft_id, _) = run_background(&app, accepted["signal_id"].as_str().expect("id")).await;

    let external_id = drafts::get_by_id(&app.state.db, &draft_id)
        .await
        .expect("get")
        .expect("exists")
        .external_draft_id
        .expect("external draft id");
    assert!(app.world.has_draft(&external_id));

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/drafts/{draft_id}/reject"))
        .header("x-csrf-token", &token)
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("reject");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["rollback"]["external_draft_deleted"], true);
    assert!(!app.world.has_draft(&external_id));
}

#[tokio::test]
async fn unknown_outcome_kind_is_bad_request() {
    let app = test_app().await;
    let token = csrf(&app.state);
    let contact = contacts::upsert_by_email(&app.state.db, &new_id(), "a@b.c", None, None)
        .await
        .expect("contact");

    let request = Request::builder()
        .method("POST")
        .uri("/api/outcomes/record")
        .header("content-type", "application/json")
        .header("x-csrf-token", &token)
        .body(Body::from(
            serde_json::json!({
                "subject_kind": "contact",
                "subject_id": contact.id,
                "kind": "email_vanished",
            })
            .to_string(),
        ))
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_webhook_source_is_bad_request() {
    let app = test_app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/carrier-pigeon")
        .header("x-signature", "00")
        .body(Body::from("{}"))
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn backpressure_sheds_social_but_not_form() {
    let mut config = test_config();
    config.runtime.broker_depth_threshold = 0;
    config
        .webhooks
        .signing_secrets
        .insert("social".to_string(), HOOK_SECRET.to_string());
    let app = test_app_with(config).await;

    // Preload the queue past the (zero) threshold.
    caseyos_core::storage::tasks::enqueue(&app.state.db, "noop", "{}")
        .await
        .expect("enqueue");

    let social_body = r#"{"tweet_id":"t-1","author":"ann"}"#;
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/social")
        .header(
            "x-signature",
            webhook_signature(HOOK_SECRET, social_body.as_bytes()),
        )
        .body(Body::from(social_body))
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("social");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Form leads are essential and still accepted.
    let response = app.router.oneshot(signed_webhook(FORM_BODY)).await.expect("form");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn ingest_signal_source_parsing_is_total_over_api_sources() {
    for source in ["form", "crm", "email", "calendar", "social", "manual"] {
        assert!(SignalSource::parse(source).is_some());
    }
}

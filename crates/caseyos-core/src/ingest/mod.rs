//! Signal ingestion: dedupe hashing, acceptance, and classification.
//!
//! Acceptance is the only work done on the webhook path: compute the dedupe
//! hash, insert the signal, enqueue a `process_signal` task, respond. All
//! classification (workflow creation, direct queue items, outcome
//! application) happens in the background worker.

use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::outcome::{self, OutcomeKind, RecordOutcome, SubjectKind};
use crate::scoring::{self, ActionKind, ScoreInputs};
use crate::storage::{
    command_queue, contacts, new_id, signals, tasks, workflows, DbPool,
};
use crate::{config::Config, runtime::task_kinds};

/// Errors from signal ingestion and classification.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Storage-layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Payload violated the source's schema.
    #[error("invalid signal payload: {0}")]
    InvalidPayload(String),

    /// Unknown signal source.
    #[error("unknown signal source: {0}")]
    UnknownSource(String),

    /// Outcome application failed during classification.
    #[error("outcome error: {0}")]
    Outcome(#[from] outcome::OutcomeError),
}

/// Recognized signal sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Form,
    Crm,
    Email,
    Calendar,
    Social,
    Manual,
}

impl SignalSource {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Crm => "crm",
            Self::Email => "email",
            Self::Calendar => "calendar",
            Self::Social => "social",
            Self::Manual => "manual",
        }
    }

    /// Parse a source string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "form" => Some(Self::Form),
            "crm" => Some(Self::Crm),
            "email" => Some(Self::Email),
            "calendar" => Some(Self::Calendar),
            "social" => Some(Self::Social),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Whether the gateway may shed this source under backpressure.
    pub fn sheddable_under_backpressure(self) -> bool {
        matches!(self, Self::Email | Self::Calendar | Self::Social)
    }

    /// Payload fields that identify an event from this source. When all are
    /// present they form the dedupe identity; otherwise the whole canonical
    /// payload does.
    fn canonical_fields(self) -> &'static [&'static str] {
        match self {
            Self::Form => &["form_submission_id"],
            Self::Crm => &["object_id", "change_type"],
            Self::Email => &["message_id", "event_type"],
            Self::Calendar => &["event_id", "event_type"],
            Self::Social => &["tweet_id"],
            Self::Manual => &[],
        }
    }
}

/// Compute the deterministic dedupe hash for a signal.
///
/// Uses the source's canonical identity fields when all are present, falling
/// back to the canonicalized (key-sorted) payload JSON.
pub fn dedupe_hash(source: SignalSource, payload: &serde_json::Value) -> String {
    let fields = source.canonical_fields();
    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());

    let field_values: Option<Vec<String>> = if fields.is_empty() {
        None
    } else {
        fields
            .iter()
            .map(|f| {
                payload
                    .get(*f)
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), String::from))
            })
            .collect()
    };

    match field_values {
        Some(values) => {
            for value in values {
                hasher.update(b"|");
                hasher.update(value.as_bytes());
            }
        }
        None => {
            // serde_json maps are key-sorted, so this is canonical.
            hasher.update(b"|");
            hasher.update(payload.to_string().as_bytes());
        }
    }

    format!("{:x}", hasher.finalize())
}

/// Result of accepting a signal at the gateway.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AcceptedSignal {
    pub signal_id: String,
    pub duplicate: bool,
}

/// Accept an authenticated signal: persist it and enqueue classification.
///
/// Duplicate submissions return the existing signal id without side effects.
pub async fn accept_signal(
    pool: &DbPool,
    source: SignalSource,
    kind: &str,
    payload: &serde_json::Value,
) -> Result<AcceptedSignal, IngestError> {
    let hash = dedupe_hash(source, payload);
    let id = new_id();

    match signals::insert(
        pool,
        &id,
        source.as_str(),
        kind,
        &hash,
        &payload.to_string(),
    )
    .await?
    {
        signals::SignalInsert::Inserted(signal) => {
            tasks::enqueue(
                pool,
                task_kinds::PROCESS_SIGNAL,
                &serde_json::json!({ "signal_id": signal.id }).to_string(),
            )
            .await?;
            tracing::info!(signal_id = %signal.id, source = source.as_str(), kind, "Signal accepted");
            Ok(AcceptedSignal {
                signal_id: signal.id,
                duplicate: false,
            })
        }
        signals::SignalInsert::Duplicate(existing) => {
            tracing::debug!(signal_id = %existing, source = source.as_str(), "Duplicate signal");
            Ok(AcceptedSignal {
                signal_id: existing,
                duplicate: true,
            })
        }
    }
}

/// What classification did with a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A draft workflow was created and enqueued.
    Workflow { workflow_id: String },
    /// A queue item was created directly.
    QueueItem { queue_item_id: String },
    /// An outcome was recorded.
    Outcome { outcome_id: String },
    /// Nothing actionable (unknown kind, missing fields).
    Ignored { reason: String },
}

/// Classify a persisted signal and fan it into the rest of the system.
///
/// Runs in a background worker; always marks the signal processed.
pub async fn process_signal(
    pool: &DbPool,
    config: &Config,
    signal_id: &str,
) -> Result<Classification, IngestError> {
    let signal = signals::get_by_id(pool, signal_id)
        .await?
        .ok_or_else(|| IngestError::InvalidPayload(format!("signal {signal_id} not found")))?;

    let source = SignalSource::parse(&signal.source)
        .ok_or_else(|| IngestError::UnknownSource(signal.source.clone()))?;
    let payload: serde_json::Value = serde_json::from_str(&signal.payload)
        .map_err(|e| IngestError::InvalidPayload(e.to_string()))?;

    let classification = match (source, signal.kind.as_str()) {
        // Lead-shaped signals start a draft workflow.
        (SignalSource::Form, _) | (SignalSource::Crm, "new_lead" | "contact_created") => {
            start_workflow(pool, &signal).await?
        }

        // Inbound email events fold into the outcome loop.
        (SignalSource::Email, "reply_received") => {
            contact_outcome(pool, &payload, OutcomeKind::EmailReplied, &signal).await?
        }
        (SignalSource::Email, "bounce") => {
            contact_outcome(pool, &payload, OutcomeKind::EmailBounced, &signal).await?
        }
        (SignalSource::Email, "unsubscribe") => {
            contact_outcome(pool, &payload, OutcomeKind::EmailUnsubscribed, &signal).await?
        }
        (SignalSource::Email, "complaint") => {
            complaint(pool, &payload).await?
        }

        // Deal movement from the CRM.
        (SignalSource::Crm, "deal_stage_changed") => deal_outcome(pool, &payload, &signal).await?,

        // Calendar attendance.
        (SignalSource::Calendar, "event_created") => {
            contact_outcome(pool, &payload, OutcomeKind::MeetingBooked, &signal).await?
        }
        (SignalSource::Calendar, "event_attended") => {
            contact_outcome(pool, &payload, OutcomeKind::MeetingHeld, &signal).await?
        }
        (SignalSource::Calendar, "no_show") => {
            contact_outcome(pool, &payload, OutcomeKind::MeetingNoShow, &signal).await?
        }

        // Simple engagement recommendations go straight to the queue.
        (SignalSource::Social, _) => social_queue_item(pool, config, &signal, &payload).await?,
        (SignalSource::Manual, _) => manual_queue_item(pool, config, &signal, &payload).await?,

        (_, kind) => Classification::Ignored {
            reason: format!("no classification for {}:{kind}", signal.source),
        },
    };

    let workflow_id = match &classification {
        Classification::Workflow { workflow_id } => Some(workflow_id.as_str()),
        _ => None,
    };
    signals::mark_processed(pool, signal_id, workflow_id).await?;

    Ok(classification)
}

async fn start_workflow(
    pool: &DbPool,
    signal: &signals::Signal,
) -> Result<Classification, IngestError> {
    let workflow_id = new_id();
    workflows::create(pool, &workflow_id, &signal.id).await?;
    tasks::enqueue(
        pool,
        task_kinds::RUN_WORKFLOW,
        &serde_json::json!({ "workflow_id": workflow_id }).to_string(),
    )
    .await?;
    tracing::info!(workflow_id = %workflow_id, signal_id = %signal.id, "Draft workflow triggered");
    Ok(Classification::Workflow { workflow_id })
}

async fn contact_outcome(
    pool: &DbPool,
    payload: &serde_json::Value,
    kind: OutcomeKind,
    signal: &signals::Signal,
) -> Result<Classification, IngestError> {
    let Some(email) = payload.get("email").and_then(|v| v.as_str()) else {
        return Ok(Classification::Ignored {
            reason: "missing email in payload".to_string(),
        });
    };

    let contact = contacts::upsert_by_email(pool, &new_id(), email, None, None).await?;
    let outcome_id = outcome::record(
        pool,
        RecordOutcome {
            subject_kind: SubjectKind::Contact,
            subject_id: contact.id,
            kind,
            impact: None,
            source: "auto",
            detected_at: Some(signal.received_at.clone()),
            details: payload.to_string(),
        },
    )
    .await?;
    Ok(Classification::Outcome { outcome_id })
}

async fn complaint(
    pool: &DbPool,
    payload: &serde_json::Value,
) -> Result<Classification, IngestError> {
    let Some(email) = payload.get("email").and_then(|v| v.as_str()) else {
        return Ok(Classification::Ignored {
            reason: "missing email in payload".to_string(),
        });
    };
    let contact = contacts::upsert_by_email(pool, &new_id(), email, None, None).await?;
    contacts::suppress(pool, &contact.id, contacts::Suppression::Complaint).await?;
    command_queue::dismiss_pending_email_for_contact(pool, &contact.id).await?;
    Ok(Classification::Ignored {
        reason: "complaint suppressed contact".to_string(),
    })
}

async fn deal_outcome(
    pool: &DbPool,
    payload: &serde_json::Value,
    signal: &signals::Signal,
) -> Result<Classification, IngestError> {
    let Some(deal_id) = payload.get("deal_id").and_then(|v| v.as_str()) else {
        return Ok(Classification::Ignored {
            reason: "missing deal_id in payload".to_string(),
        });
    };
    let direction = payload
        .get("direction")
        .and_then(|v| v.as_str())
        .unwrap_or("advanced");
    let kind = match direction {
        "regressed" => OutcomeKind::DealStageRegressed,
        "won" => OutcomeKind::DealWon,
        "lost" => OutcomeKind::DealLost,
        _ => OutcomeKind::DealStageAdvanced,
    };

    let outcome_id = outcome::record(
        pool,
        RecordOutcome {
            subject_kind: SubjectKind::Deal,
            subject_id: deal_id.to_string(),
            kind,
            impact: None,
            source: "auto",
            detected_at: Some(signal.received_at.clone()),
            details: payload.to_string(),
        },
    )
    .await?;
    Ok(Classification::Outcome { outcome_id })
}

async fn social_queue_item(
    pool: &DbPool,
    config: &Config,
    signal: &signals::Signal,
    payload: &serde_json::Value,
) -> Result<Classification, IngestError> {
    let handle = payload
        .get("author")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    direct_queue_item(
        pool,
        config,
        signal,
        ActionKind::EngageSocial,
        &format!("Engage with @{handle}"),
        payload,
    )
    .await
}

async fn manual_queue_item(
    pool: &DbPool,
    config: &Config,
    signal: &signals::Signal,
    payload: &serde_json::Value,
) -> Result<Classification, IngestError> {
    let action_kind = payload
        .get("action_type")
        .and_then(|v| v.as_str())
        .and_then(ActionKind::parse)
        .unwrap_or(ActionKind::CreateTask);
    let reason = payload
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("Manually requested action");
    direct_queue_item(pool, config, signal, action_kind, reason, payload).await
}

async fn direct_queue_item(
    pool: &DbPool,
    config: &Config,
    signal: &signals::Signal,
    action_kind: ActionKind,
    reasoning: &str,
    payload: &serde_json::Value,
) -> Result<Classification, IngestError> {
    let source = SignalSource::parse(&signal.source);
    let aps = scoring::compute_aps(&ScoreInputs {
        deal_amount: None,
        deal_ceiling: config.scoring.deal_ceiling,
        icp_score: None,
        hours_since_signal: 0.0,
        urgency_tau_hours: config.scoring.urgency_tau_hours,
        overdue: false,
        action_kind,
        in_target_segment: false,
        strategic_account: false,
        high_intent_source: matches!(source, Some(SignalSource::Form | SignalSource::Crm)),
    });

    let queue_item_id = new_id();
    command_queue::insert(
        pool,
        &command_queue::NewQueueItem {
            id: &queue_item_id,
            owner: "casey",
            domain: "sales",
            action_type: action_kind.as_str(),
            action_context: &serde_json::json!({ "payload": payload }).to_string(),
            aps_score: aps,
            reasoning,
            due_by: None,
            signal_ids: &serde_json::json!([signal.id]).to_string(),
            received_at: &signal.received_at,
        },
    )
    .await?;
    Ok(Classification::QueueItem { queue_item_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    fn form_payload() -> serde_json::Value {
        serde_json::json!({
            "form_id": "f1",
            "email": "ann@acme.com",
            "firstname": "Ann",
            "company": "Acme"
        })
    }

    #[test]
    fn dedupe_hash_is_deterministic() {
        let payload = form_payload();
        assert_eq!(
            dedupe_hash(SignalSource::Form, &payload),
            dedupe_hash(SignalSource::Form, &payload)
        );
    }

    #[test]
    fn dedupe_hash_ignores_key_order() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"email":"a@b.c","form_id":"f1"}"#).expect("json");
        let b: serde_json::Value =
            serde_json::from_str(r#"{"form_id":"f1","email":"a@b.c"}"#).expect("json");
        assert_eq!(
            dedupe_hash(SignalSource::Form, &a),
            dedupe_hash(SignalSource::Form, &b)
        );
    }

    #[test]
    fn dedupe_hash_uses_canonical_fields_when_present() {
        let a = serde_json::json!({"form_submission_id": "s-1", "email": "a@b.c"});
        let b = serde_json::json!({"form_submission_id": "s-1", "email": "different@b.c"});
        assert_eq!(
            dedupe_hash(SignalSource::Form, &a),
            dedupe_hash(SignalSource::Form, &b),
            "same submission id must dedupe regardless of other fields"
        );

        let c = serde_json::json!({"form_submission_id": "s-2", "email": "a@b.c"});
        assert_ne!(
            dedupe_hash(SignalSource::Form, &a),
            dedupe_hash(SignalSource::Form, &c)
        );
    }

    #[test]
    fn dedupe_hash_differs_across_sources() {
        let payload = serde_json::json!({"x": 1});
        assert_ne!(
            dedupe_hash(SignalSource::Form, &payload),
            dedupe_hash(SignalSource::Manual, &payload)
        );
    }

    #[tokio::test]
    async fn accept_enqueues_processing_task() {
        let pool = init_test_db().await.expect("init db");
        let accepted = accept_signal(&pool, SignalSource::Form, "lead", &form_payload())
            .await
            .expect("accept");

        assert!(!accepted.duplicate);
        assert_eq!(tasks::queued_depth(&pool).await.expect("depth"), 1);
    }

    #[tokio::test]
    async fn duplicate_accept_returns_same_id_without_new_task() {
        let pool = init_test_db().await.expect("init db");
        let first = accept_signal(&pool, SignalSource::Form, "lead", &form_payload())
            .await
            .expect("accept");
        let second = accept_signal(&pool, SignalSource::Form, "lead", &form_payload())
            .await
            .expect("re-accept");

        assert!(second.duplicate);
        assert_eq!(second.signal_id, first.signal_id);
        assert_eq!(signals::count(&pool).await.expect("count"), 1);
        assert_eq!(
            tasks::queued_depth(&pool).await.expect("depth"),
            1,
            "duplicate must not enqueue a second task"
        );
    }

    #[tokio::test]
    async fn form_signal_classifies_into_workflow() {
        let pool = init_test_db().await.expect("init db");
        let config = Config::default();
        let accepted = accept_signal(&pool, SignalSource::Form, "lead", &form_payload())
            .await
            .expect("accept");

        let classification = process_signal(&pool, &config, &accepted.signal_id)
            .await
            .expect("process");

        let Classification::Workflow { workflow_id } = classification else {
            panic!("expected workflow classification");
        };
        let signal = signals::get_by_id(&pool, &accepted.signal_id)
            .await
            .expect("get")
            .expect("exists");
        assert!(signal.processed_at.is_some());
        assert_eq!(signal.workflow_id.as_deref(), Some(workflow_id.as_str()));
    }

    #[tokio::test]
    async fn reply_signal_classifies_into_outcome() {
        let pool = init_test_db().await.expect("init db");
        let config = Config::default();
        let payload = serde_json::json!({
            "message_id": "m-1",
            "event_type": "reply",
            "email": "ann@acme.com"
        });
        let accepted = accept_signal(&pool, SignalSource::Email, "reply_received", &payload)
            .await
            .expect("accept");

        let classification = process_signal(&pool, &config, &accepted.signal_id)
            .await
            .expect("process");
        assert!(matches!(classification, Classification::Outcome { .. }));

        let contact = contacts::get_by_email(&pool, "ann@acme.com")
            .await
            .expect("get")
            .expect("created on first unseen email");
        assert!(contact.last_reply_at.is_some());
    }

    #[tokio::test]
    async fn social_signal_creates_queue_item_directly() {
        let pool = init_test_db().await.expect("init db");
        let config = Config::default();
        let payload = serde_json::json!({"tweet_id": "t-1", "author": "annacme"});
        let accepted = accept_signal(&pool, SignalSource::Social, "mention", &payload)
            .await
            .expect("accept");

        let classification = process_signal(&pool, &config, &accepted.signal_id)
            .await
            .expect("process");
        let Classification::QueueItem { queue_item_id } = classification else {
            panic!("expected queue item");
        };

        let item = command_queue::get_by_id(&pool, &queue_item_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(item.action_type, "engage_social");
        assert!(item.reasoning.contains("annacme"));
    }

    #[tokio::test]
    async fn unknown_kind_is_ignored_but_processed() {
        let pool = init_test_db().await.expect("init db");
        let config = Config::default();
        let accepted = accept_signal(
            &pool,
            SignalSource::Crm,
            "mystery",
            &serde_json::json!({"object_id": "o-1", "change_type": "x"}),
        )
        .await
        .expect("accept");

        let classification = process_signal(&pool, &config, &accepted.signal_id)
            .await
            .expect("process");
        assert!(matches!(classification, Classification::Ignored { .. }));
    }
}

//! Action executor: the only component allowed to touch the outside world.
//!
//! `execute` runs the gate checks, idempotency lookup, and rate-limit
//! consult in that order, then either returns the rendered artifact
//! (dry run) or performs the action. Success writes the send record, flips
//! the draft and queue item, appends the audit trail, stores the
//! idempotency result, and enqueues outcome detection.

pub mod rollback;

use chrono::Utc;

use crate::config::Config;
use crate::connector::{with_backoff, ConnectorError, ConnectorRegistry};
use crate::error::StorageError;
use crate::outcome::{self, OutcomeKind, RecordOutcome, SubjectKind};
use crate::runtime::task_kinds;
use crate::storage::{
    audit_log, command_queue, contacts, drafts, idempotency, new_id, now_iso, rate_limits,
    runtime_flags, send_records, tasks, DbPool,
};

/// Errors from the executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Storage-layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Connector failure during execution.
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// The queue item or its references are malformed.
    #[error("invalid execution request: {0}")]
    Invalid(String),
}

/// The rendered artifact a dry run returns.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreviewArtifact {
    Email {
        recipient: String,
        subject: String,
        body: String,
    },
    CrmTask {
        title: String,
        due_at: String,
    },
    CalendarEvent {
        title: String,
        start: String,
        end: String,
    },
    Note {
        summary: String,
    },
}

/// Result of an `execute` call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Dry run: the artifact that would be produced, no side effects.
    Preview { artifact: PreviewArtifact },
    /// The action ran; for email, exactly one send record now exists.
    Executed {
        draft_id: Option<String>,
        external_id: String,
        thread_id: Option<String>,
    },
    /// A gate refused the action.
    Blocked {
        reason: String,
        retry_after_secs: Option<u64>,
    },
    /// Idempotency replay: the original result, returned verbatim.
    Replayed { original: serde_json::Value },
}

/// Single entry point: execute (or preview) a queue item.
pub async fn execute(
    pool: &DbPool,
    registry: &ConnectorRegistry,
    config: &Config,
    queue_item_id: &str,
    dry_run: bool,
) -> Result<ExecutionResult, ExecutorError> {
    let item = command_queue::get_by_id(pool, queue_item_id)
        .await?
        .ok_or_else(|| ExecutorError::Invalid(format!("queue item {queue_item_id} not found")))?;

    // Gate: suppression is terminal for outbound email, and outranks every
    // other refusal (a dismissed item for a suppressed contact still reports
    // the suppression).
    if item.action_type == "send_email" {
        if let Some(contact_id) = item.contact_id() {
            let contact = contacts::get_by_id(pool, &contact_id).await?;
            if contact.is_some_and(|c| c.is_suppressed()) {
                audit_log::append(
                    pool,
                    "executor",
                    "execute_blocked",
                    &format!("queue_item:{queue_item_id}"),
                    None,
                    Some("contact_suppressed"),
                )
                .await?;
                return Ok(blocked("contact_suppressed", None));
            }
        }
    }

    // Gate: the item must still be actionable.
    if !matches!(item.status.as_str(), "pending" | "accepted") {
        return Ok(blocked("queue_item_not_actionable", None));
    }

    // Gate: the kill switch halts everything, dry runs included.
    if runtime_flags::emergency_stop_engaged(pool).await? {
        audit_log::append(
            pool,
            "executor",
            "execute_blocked",
            &format!("queue_item:{queue_item_id}"),
            None,
            Some("emergency_stop"),
        )
        .await?;
        return Ok(blocked("emergency_stop", None));
    }

    match item.action_type.as_str() {
        "send_email" => execute_email(pool, registry, config, &item, dry_run).await,
        "create_task" => execute_crm_task(pool, registry, &item, dry_run).await,
        "book_meeting" => execute_calendar(pool, registry, &item, dry_run).await,
        other => execute_note(pool, &item, other, dry_run).await,
    }
}

fn blocked(reason: &str, retry_after_secs: Option<u64>) -> ExecutionResult {
    ExecutionResult::Blocked {
        reason: reason.to_string(),
        retry_after_secs,
    }
}

/// Email send: the full gate/idempotency/rate-limit/rollback treatment.
async fn execute_email(
    pool: &DbPool,
    registry: &ConnectorRegistry,
    config: &Config,
    item: &command_queue::CommandQueueItem,
    dry_run: bool,
) -> Result<ExecutionResult, ExecutorError> {
    let draft_id = item
        .draft_id()
        .ok_or_else(|| ExecutorError::Invalid("queue item has no draft_id".to_string()))?;
    let draft = drafts::get_by_id(pool, &draft_id)
        .await?
        .ok_or_else(|| ExecutorError::Invalid(format!("draft {draft_id} not found")))?;

    // Idempotency first: a replay of a completed send returns its original
    // result before any gate can reclassify it.
    let idem_key = idempotency::compute_key(&item.id, &draft_id, &item.action_type);
    if let Some(original) = idempotency::lookup(pool, &idem_key, Utc::now()).await? {
        let original: serde_json::Value = serde_json::from_str(&original)
            .map_err(|e| ExecutorError::Invalid(format!("corrupt idempotency record: {e}")))?;
        return Ok(ExecutionResult::Replayed { original });
    }

    // Gate: a sent draft never sends twice.
    if draft.status == "sent" {
        return Ok(blocked("draft_already_sent", None));
    }

    // Gate: suppression is terminal for outbound email.
    let contact = contacts::get_by_id(pool, &draft.contact_id).await?;
    if contact.as_ref().is_some_and(|c| c.is_suppressed()) {
        audit_log::append(
            pool,
            "executor",
            "execute_blocked",
            &format!("draft:{draft_id}"),
            Some(&draft.status),
            Some("contact_suppressed"),
        )
        .await?;
        return Ok(blocked("contact_suppressed", None));
    }

    // Rate limits: consult both windows before anything leaves.
    let slot = rate_limits::check_send_slot(pool, &config.rate_limits, &draft.recipient, Utc::now())
        .await?;
    if let rate_limits::SlotDecision::Blocked {
        scope,
        retry_after_secs,
    } = slot
    {
        tracing::info!(
            draft_id = %draft_id,
            scope,
            retry_after_secs,
            "Send blocked by rate limit"
        );
        return Ok(blocked("rate_limited", Some(retry_after_secs)));
    }

    if dry_run {
        return Ok(ExecutionResult::Preview {
            artifact: PreviewArtifact::Email {
                recipient: draft.recipient.clone(),
                subject: draft.subject.clone(),
                body: draft.body_text.clone(),
            },
        });
    }

    // Gate: only approved drafts may send.
    if !matches!(draft.status.as_str(), "approved" | "auto_approved") {
        return Ok(blocked("draft_not_approved", None));
    }

    // Gate: real sends must be enabled and draft-only mode off.
    if !config.sending.allow_real_sends || config.sending.mode_draft_only {
        return Ok(blocked("sends_disabled", None));
    }

    let external_draft_id = draft.external_draft_id.clone().ok_or_else(|| {
        ExecutorError::Invalid(format!("draft {draft_id} has no external draft id"))
    })?;

    let email = registry.email.as_ref();
    let sent = match with_backoff(|| email.send(&external_draft_id)).await {
        Ok(sent) => sent,
        Err(e) => {
            // The send never happened; fail the draft and queue item, and
            // dead-letter transient failures for a retry.
            drafts::try_transition(pool, &draft_id, drafts::DraftStatus::Failed).await?;
            command_queue::try_transition(pool, &item.id, command_queue::QueueItemStatus::Failed)
                .await?;
            audit_log::append(
                pool,
                "executor",
                "send_failed",
                &format!("draft:{draft_id}"),
                Some(&draft.status),
                Some("failed"),
            )
            .await?;
            if e.is_retryable() {
                crate::storage::failed_tasks::insert(
                    pool,
                    &new_id(),
                    task_kinds::EXECUTE_ACTION,
                    &serde_json::json!({ "queue_item_id": item.id }).to_string(),
                    &e.to_string(),
                    0,
                    Some(&now_iso()),
                )
                .await?;
            }
            return Err(ExecutorError::Connector(e));
        }
    };

    let sent_at = now_iso();
    let send_record_id = new_id();
    send_records::insert(
        pool,
        &send_record_id,
        &draft_id,
        &draft.recipient,
        &sent_at,
        &sent.message_id,
        &sent.thread_id,
        &idem_key,
    )
    .await?;

    drafts::try_transition(pool, &draft_id, drafts::DraftStatus::Sent).await?;
    command_queue::try_transition(pool, &item.id, command_queue::QueueItemStatus::Completed)
        .await?;
    audit_log::append(
        pool,
        "executor",
        "draft_sent",
        &format!("draft:{draft_id}"),
        Some(&draft.status),
        Some("sent"),
    )
    .await?;

    outcome::record(
        pool,
        RecordOutcome {
            subject_kind: SubjectKind::Draft,
            subject_id: draft_id.clone(),
            kind: OutcomeKind::EmailSent,
            impact: None,
            source: "auto",
            detected_at: Some(sent_at),
            details: serde_json::json!({ "message_id": sent.message_id }).to_string(),
        },
    )
    .await
    .map_err(|e| ExecutorError::Invalid(e.to_string()))?;

    tasks::enqueue(
        pool,
        task_kinds::DETECT_OUTCOMES,
        &serde_json::json!({ "draft_id": draft_id }).to_string(),
    )
    .await?;

    let result = ExecutionResult::Executed {
        draft_id: Some(draft_id.clone()),
        external_id: sent.message_id.clone(),
        thread_id: Some(sent.thread_id),
    };
    store_result(pool, &idem_key, &result).await?;

    tracing::info!(draft_id = %draft_id, recipient = %draft.recipient, "Draft sent");
    Ok(result)
}

/// CRM follow-up task execution.
async fn execute_crm_task(
    pool: &DbPool,
    registry: &ConnectorRegistry,
    item: &command_queue::CommandQueueItem,
    dry_run: bool,
) -> Result<ExecutionResult, ExecutorError> {
    let context: serde_json::Value = serde_json::from_str(&item.action_context)
        .map_err(|e| ExecutorError::Invalid(format!("bad action context: {e}")))?;
    let title = context
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or(&item.reasoning)
        .to_string();
    let due_at = context
        .get("due_at")
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| item.due_by.clone())
        .unwrap_or_else(now_iso);

    if dry_run {
        return Ok(ExecutionResult::Preview {
            artifact: PreviewArtifact::CrmTask { title, due_at },
        });
    }

    let idem_key = idempotency::compute_key(&item.id, "", &item.action_type);
    if let Some(original) = idempotency::lookup(pool, &idem_key, Utc::now()).await? {
        let original: serde_json::Value = serde_json::from_str(&original)
            .map_err(|e| ExecutorError::Invalid(format!("corrupt idempotency record: {e}")))?;
        return Ok(ExecutionResult::Replayed { original });
    }

    let contact_id = item.contact_id().unwrap_or_default();
    let crm = registry.crm.as_ref();
    let task_id = with_backoff(|| crm.create_task(&contact_id, &title, &due_at)).await?;

    command_queue::try_transition(pool, &item.id, command_queue::QueueItemStatus::Completed)
        .await?;
    audit_log::append(
        pool,
        "executor",
        "crm_task_created",
        &format!("queue_item:{}", item.id),
        None,
        Some(&task_id),
    )
    .await?;

    let result = ExecutionResult::Executed {
        draft_id: None,
        external_id: task_id,
        thread_id: None,
    };
    store_result(pool, &idem_key, &result).await?;
    Ok(result)
}

/// Calendar booking execution.
async fn execute_calendar(
    pool: &DbPool,
    registry: &ConnectorRegistry,
    item: &command_queue::CommandQueueItem,
    dry_run: bool,
) -> Result<ExecutionResult, ExecutorError> {
    let context: serde_json::Value = serde_json::from_str(&item.action_context)
        .map_err(|e| ExecutorError::Invalid(format!("bad action context: {e}")))?;
    let title = context
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Intro call")
        .to_string();
    let start = context
        .get("start")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecutorError::Invalid("book_meeting requires start".to_string()))?
        .to_string();
    let end = context
        .get("end")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecutorError::Invalid("book_meeting requires end".to_string()))?
        .to_string();

    if dry_run {
        return Ok(ExecutionResult::Preview {
            artifact: PreviewArtifact::CalendarEvent { title, start, end },
        });
    }

    let idem_key = idempotency::compute_key(&item.id, "", &item.action_type);
    if let Some(original) = idempotency::lookup(pool, &idem_key, Utc::now()).await? {
        let original: serde_json::Value = serde_json::from_str(&original)
            .map_err(|e| ExecutorError::Invalid(format!("corrupt idempotency record: {e}")))?;
        return Ok(ExecutionResult::Replayed { original });
    }

    let attendees: Vec<String> = context
        .get("attendees")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let calendar = registry.calendar.as_ref();
    let event_id = with_backoff(|| calendar.create_event(&title, &start, &end, &attendees)).await?;

    command_queue::try_transition(pool, &item.id, command_queue::QueueItemStatus::Completed)
        .await?;
    audit_log::append(
        pool,
        "executor",
        "calendar_event_created",
        &format!("queue_item:{}", item.id),
        None,
        Some(&event_id),
    )
    .await?;

    let result = ExecutionResult::Executed {
        draft_id: None,
        external_id: event_id,
        thread_id: None,
    };
    store_result(pool, &idem_key, &result).await?;
    Ok(result)
}

/// Actions with no connector surface (social engagement, research) complete
/// as operator notes.
async fn execute_note(
    pool: &DbPool,
    item: &command_queue::CommandQueueItem,
    action_type: &str,
    dry_run: bool,
) -> Result<ExecutionResult, ExecutorError> {
    if dry_run {
        return Ok(ExecutionResult::Preview {
            artifact: PreviewArtifact::Note {
                summary: item.reasoning.clone(),
            },
        });
    }

    command_queue::try_transition(pool, &item.id, command_queue::QueueItemStatus::Completed)
        .await?;
    audit_log::append(
        pool,
        "executor",
        "action_completed",
        &format!("queue_item:{}", item.id),
        None,
        Some(action_type),
    )
    .await?;

    Ok(ExecutionResult::Executed {
        draft_id: None,
        external_id: item.id.clone(),
        thread_id: None,
    })
}

async fn store_result(
    pool: &DbPool,
    idem_key: &str,
    result: &ExecutionResult,
) -> Result<(), StorageError> {
    let encoded = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
    idempotency::store(pool, idem_key, &encoded).await
}

//! Task queue workers: claim, dispatch, retry, dead-letter.
//!
//! Retries use exponential backoff (base 60 s, 3 attempts, jitter). A task
//! that exhausts its attempts, or fails permanently, lands in the
//! `failed_tasks` dead-letter queue with its payload intact so an admin can
//! re-enqueue it; failed workflows then resume from their last good step.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::executor::{self, ExecutionResult};
use crate::ingest;
use crate::outcome::{self, OutcomeKind, RecordOutcome, SubjectKind};
use crate::runtime::task_kinds;
use crate::storage::{drafts, failed_tasks, format_iso, new_id, send_records, tasks};
use crate::workflow::orchestrate::{self, RunOutcome, WorkflowEnv};

/// Maximum attempts before dead-lettering.
const MAX_ATTEMPTS: i64 = 3;

/// Base retry backoff in seconds.
const BACKOFF_BASE_SECS: u64 = 60;

/// Idle poll interval when the queue is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How a dispatched task ended, from the queue's point of view.
#[derive(Debug)]
enum Disposition {
    /// Done; ack the task.
    Done,
    /// Transient failure; retry with backoff.
    Retry(String),
    /// Permanent failure; dead-letter.
    DeadLetter(String),
}

/// Run a single worker until cancelled.
pub async fn run_worker(env: WorkflowEnv, worker_id: u32, cancel: CancellationToken) {
    tracing::info!(worker_id, "Worker started");

    loop {
        if cancel.is_cancelled() {
            tracing::info!(worker_id, "Worker stopping");
            return;
        }

        let task = match tasks::claim_next(&env.db).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::select! {
                    () = cancel.cancelled() => continue,
                    () = tokio::time::sleep(POLL_INTERVAL) => continue,
                }
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Task claim failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let disposition = dispatch(&env, &task.kind, &task.payload).await;
        if let Err(e) = settle(&env, &task, disposition).await {
            tracing::error!(worker_id, task_id = task.id, error = %e, "Task settlement failed");
        }
    }
}

/// Dispatch one task body.
async fn dispatch(env: &WorkflowEnv, kind: &str, payload: &str) -> Disposition {
    let payload: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => return Disposition::DeadLetter(format!("unparseable payload: {e}")),
    };

    match kind {
        task_kinds::PROCESS_SIGNAL => {
            let Some(signal_id) = payload.get("signal_id").and_then(|v| v.as_str()) else {
                return Disposition::DeadLetter("missing signal_id".to_string());
            };
            match ingest::process_signal(&env.db, &env.config, signal_id).await {
                Ok(_) => Disposition::Done,
                Err(ingest::IngestError::InvalidPayload(e)) => Disposition::DeadLetter(e),
                Err(ingest::IngestError::UnknownSource(e)) => Disposition::DeadLetter(e),
                Err(e) => Disposition::Retry(e.to_string()),
            }
        }

        task_kinds::RUN_WORKFLOW => {
            let Some(workflow_id) = payload.get("workflow_id").and_then(|v| v.as_str()) else {
                return Disposition::DeadLetter("missing workflow_id".to_string());
            };
            let budget = Duration::from_secs(env.config.runtime.workflow_timeout_seconds);
            match tokio::time::timeout(budget, orchestrate::run_workflow(env, workflow_id)).await {
                Ok(Ok(RunOutcome::Completed { .. })) => Disposition::Done,
                Ok(Ok(RunOutcome::Dead { reason })) => {
                    tracing::warn!(workflow_id, reason = %reason, "Workflow dead");
                    Disposition::Done
                }
                Ok(Ok(RunOutcome::Failed {
                    step,
                    detail,
                    transient,
                })) => {
                    let message = format!("step {step}: {detail}");
                    if transient {
                        Disposition::Retry(message)
                    } else {
                        Disposition::DeadLetter(message)
                    }
                }
                Ok(Err(e)) => Disposition::Retry(e.to_string()),
                Err(_) => Disposition::Retry(format!(
                    "workflow exceeded {}s budget",
                    env.config.runtime.workflow_timeout_seconds
                )),
            }
        }

        task_kinds::EXECUTE_ACTION => {
            let Some(queue_item_id) = payload.get("queue_item_id").and_then(|v| v.as_str()) else {
                return Disposition::DeadLetter("missing queue_item_id".to_string());
            };
            match executor::execute(&env.db, &env.registry, &env.config, queue_item_id, false).await
            {
                Ok(ExecutionResult::Blocked {
                    reason,
                    retry_after_secs: Some(secs),
                }) if reason == "rate_limited" => {
                    Disposition::Retry(format!("rate limited, retry in {secs}s"))
                }
                Ok(_) => Disposition::Done,
                Err(executor::ExecutorError::Connector(e)) if e.is_retryable() => {
                    Disposition::Retry(e.to_string())
                }
                Err(e) => Disposition::DeadLetter(e.to_string()),
            }
        }

        task_kinds::DETECT_OUTCOMES => {
            let Some(draft_id) = payload.get("draft_id").and_then(|v| v.as_str()) else {
                return Disposition::DeadLetter("missing draft_id".to_string());
            };
            // Best effort: detection trouble is not worth dead-lettering.
            if let Err(e) = detect_reply(env, draft_id).await {
                tracing::debug!(draft_id, error = %e, "Outcome detection incomplete");
            }
            Disposition::Done
        }

        other => Disposition::DeadLetter(format!("unknown task kind: {other}")),
    }
}

/// Poll the sent draft's thread for an inbound reply and record it.
async fn detect_reply(env: &WorkflowEnv, draft_id: &str) -> Result<(), String> {
    let draft = drafts::get_by_id(&env.db, draft_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("draft not found")?;
    let record = send_records::get_by_draft(&env.db, draft_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("no send record")?;

    let thread = env
        .registry
        .email
        .get_thread(&record.thread_id)
        .await
        .map_err(|e| e.to_string())?;

    let replied = thread.messages.iter().any(|m| {
        m.from.to_lowercase().contains(&draft.recipient) && m.sent_at > record.sent_at
    });
    if replied {
        outcome::record(
            &env.db,
            RecordOutcome {
                subject_kind: SubjectKind::Draft,
                subject_id: draft_id.to_string(),
                kind: OutcomeKind::EmailReplied,
                impact: None,
                source: "auto",
                detected_at: None,
                details: serde_json::json!({ "thread_id": record.thread_id }).to_string(),
            },
        )
        .await
        .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Apply a disposition to the claimed task.
async fn settle(
    env: &WorkflowEnv,
    task: &tasks::QueuedTask,
    disposition: Disposition,
) -> Result<(), crate::error::StorageError> {
    match disposition {
        Disposition::Done => tasks::complete(&env.db, task.id).await,
        Disposition::Retry(error) if task.attempts + 1 < MAX_ATTEMPTS => {
            let backoff = backoff_secs(task.attempts);
            let run_after = format_iso(Utc::now() + chrono::Duration::seconds(backoff as i64));
            tracing::warn!(
                task_id = task.id,
                kind = %task.kind,
                attempt = task.attempts + 1,
                backoff_secs = backoff,
                error = %error,
                "Task retry scheduled"
            );
            tasks::requeue_for_retry(&env.db, task.id, &run_after, &error).await
        }
        Disposition::Retry(error) | Disposition::DeadLetter(error) => {
            tracing::error!(
                task_id = task.id,
                kind = %task.kind,
                attempts = task.attempts + 1,
                error = %error,
                "Task dead-lettered"
            );
            tasks::mark_failed(&env.db, task.id, &error).await?;
            failed_tasks::insert(
                &env.db,
                &new_id(),
                &task.kind,
                &task.payload,
                &error,
                task.attempts + 1,
                None,
            )
            .await
        }
    }
}

/// Exponential backoff with jitter: `base * 2^attempt + jitter(0..base/2)`.
fn backoff_secs(attempt: i64) -> u64 {
    let attempt = attempt.clamp(0, 6) as u32;
    let base = BACKOFF_BASE_SECS * 2u64.pow(attempt);
    base + rand::thread_rng().gen_range(0..=BACKOFF_BASE_SECS / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connector::ConnectorRegistry;
    use crate::storage::init_test_db;

    async fn env() -> WorkflowEnv {
        WorkflowEnv {
            db: init_test_db().await.expect("init db"),
            registry: ConnectorRegistry::sandbox(),
            config: Config::default(),
            memory: None,
        }
    }

    #[test]
    fn backoff_grows_exponentially() {
        for attempt in 0..3 {
            let secs = backoff_secs(attempt);
            let base = BACKOFF_BASE_SECS * 2u64.pow(attempt as u32);
            assert!(secs >= base);
            assert!(secs <= base + BACKOFF_BASE_SECS / 2);
        }
    }

    #[tokio::test]
    async fn unknown_task_kind_dead_letters() {
        let env = env().await;
        tasks::enqueue(&env.db, "mystery", "{}").await.expect("enqueue");
        let task = tasks::claim_next(&env.db).await.expect("claim").expect("task");

        let disposition = dispatch(&env, &task.kind, &task.payload).await;
        settle(&env, &task, disposition).await.expect("settle");

        let dead = failed_tasks::list_unresolved(&env.db, 10).await.expect("dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task_name, "mystery");
    }

    #[tokio::test]
    async fn transient_failure_requeues_until_exhausted() {
        let env = env().await;
        // A process_signal task for a missing signal id parses but cannot
        // load the signal, which is an invalid-payload dead letter.
        tasks::enqueue(
            &env.db,
            task_kinds::PROCESS_SIGNAL,
            r#"{"signal_id":"missing"}"#,
        )
        .await
        .expect("enqueue");
        let task = tasks::claim_next(&env.db).await.expect("claim").expect("task");

        let disposition = dispatch(&env, &task.kind, &task.payload).await;
        assert!(matches!(disposition, Disposition::DeadLetter(_)));
    }

    #[tokio::test]
    async fn settle_retry_schedules_backoff() {
        let env = env().await;
        let id = tasks::enqueue(&env.db, task_kinds::RUN_WORKFLOW, "{}")
            .await
            .expect("enqueue");
        let task = tasks::claim_next(&env.db).await.expect("claim").expect("task");
        assert_eq!(task.id, id);

        settle(&env, &task, Disposition::Retry("flaky".to_string()))
            .await
            .expect("settle");

        // Requeued but not yet runnable (run_after is in the future).
        assert_eq!(tasks::queued_depth(&env.db).await.expect("depth"), 1);
        assert!(tasks::claim_next(&env.db).await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter() {
        let env = env().await;
        tasks::enqueue(&env.db, task_kinds::RUN_WORKFLOW, "{}")
            .await
            .expect("enqueue");
        // Simulate two prior attempts.
        sqlx::query("UPDATE task_queue SET attempts = 2")
            .execute(&env.db)
            .await
            .expect("bump attempts");
        let task = tasks::claim_next(&env.db).await.expect("claim").expect("task");

        settle(&env, &task, Disposition::Retry("still flaky".to_string()))
            .await
            .expect("settle");

        let dead = failed_tasks::list_unresolved(&env.db, 10).await.expect("dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, 3);
    }
}

//! Periodic monitor: notifications, DLQ retries, and housekeeping.
//!
//! Each pass scans for newly surfaced high-priority queue items and failed
//! workflows (cursored so nothing is notified twice), re-enqueues
//! dead-lettered tasks whose retry time has come, and purges expired
//! idempotency keys.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::runtime::scheduler::LoopScheduler;
use crate::storage::{
    command_queue, failed_tasks, idempotency, new_id, notifications, now_iso, runtime_flags,
    tasks, workflows, DbPool,
};
use crate::workflow::orchestrate::WorkflowEnv;

/// APS score at or above which a new pending item is worth a notification.
const HIGH_PRIORITY_APS: f64 = 75.0;

/// Run the monitor loop until cancelled.
pub async fn run_monitor(env: WorkflowEnv, cancel: CancellationToken) {
    let scheduler = LoopScheduler::from_config(
        env.config.runtime.monitor_interval_seconds,
        env.config.runtime.min_jitter_seconds,
        env.config.runtime.max_jitter_seconds,
    );
    tracing::info!(
        interval_secs = scheduler.interval().as_secs(),
        "Monitor started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("Monitor stopping");
                return;
            }
            () = scheduler.tick() => {}
        }

        if let Err(e) = run_pass(&env.db).await {
            tracing::error!(error = %e, "Monitor pass failed");
        }
    }
}

/// One monitor pass. Public so tests (and the admin surface) can drive it
/// without the loop.
pub async fn run_pass(pool: &DbPool) -> Result<(), StorageError> {
    notify_high_priority_items(pool).await?;
    notify_failed_workflows(pool).await?;
    requeue_due_failed_tasks(pool).await?;
    idempotency::purge_expired(pool, Utc::now()).await?;
    Ok(())
}

async fn notify_high_priority_items(pool: &DbPool) -> Result<(), StorageError> {
    let cursor = runtime_flags::monitor_cursor(pool, "high_priority").await?;
    let items = command_queue::pending_high_priority_since(pool, &cursor, HIGH_PRIORITY_APS).await?;

    let mut latest = cursor;
    for item in items {
        notifications::insert(
            pool,
            &new_id(),
            "high_priority_item",
            "high",
            &format!("New move scored {:.0}", item.aps_score),
            &item.reasoning,
            &serde_json::json!({ "queue_item_id": item.id }).to_string(),
        )
        .await?;
        if item.created_at > latest {
            latest = item.created_at.clone();
        }
    }
    runtime_flags::set_monitor_cursor(pool, "high_priority", &latest).await?;
    Ok(())
}

async fn notify_failed_workflows(pool: &DbPool) -> Result<(), StorageError> {
    let cursor = runtime_flags::monitor_cursor(pool, "failed_workflows").await?;
    let failed = workflows::failed_since(pool, &cursor, 50).await?;

    let mut latest = cursor;
    for workflow in failed {
        let last_failure = workflow
            .steps()?
            .into_iter()
            .rev()
            .find(|s| s.status == workflows::StepStatus::Failed);
        let body = last_failure
            .map(|s| format!("step {}: {}", s.step, s.detail))
            .unwrap_or_else(|| "no failing step recorded".to_string());

        notifications::insert(
            pool,
            &new_id(),
            "workflow_failed",
            "urgent",
            "Draft workflow failed",
            &body,
            &serde_json::json!({ "workflow_id": workflow.id }).to_string(),
        )
        .await?;
        if let Some(completed_at) = &workflow.completed_at {
            if completed_at > &latest {
                latest = completed_at.clone();
            }
        }
    }
    runtime_flags::set_monitor_cursor(pool, "failed_workflows", &latest).await?;
    Ok(())
}

async fn requeue_due_failed_tasks(pool: &DbPool) -> Result<(), StorageError> {
    for failed in failed_tasks::due_for_retry(pool, &now_iso()).await? {
        tracing::info!(failed_task = %failed.id, task = %failed.task_name, "Re-enqueueing dead-lettered task");
        tasks::enqueue(pool, &failed.task_name, &failed.payload).await?;
        failed_tasks::resolve(pool, &failed.id).await?;
    }
    Ok(())
}

//! Orchestrator for the 11-step form-to-draft pipeline.
//!
//! Step 2 runs first (everything downstream needs the resolved contact),
//! then the context branches run concurrently (thread search feeding thread
//! context, pattern recall, asset hunt, slot proposal) and join before
//! planning. Completed steps are cached in the step log, so a retried
//! workflow re-runs only the steps that were not `ok`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::approval;
use crate::config::Config;
use crate::connector::ConnectorRegistry;
use crate::ingest::SignalSource;
use crate::scoring::{self, ActionKind, ScoreInputs};
use crate::storage::{
    audit_log, command_queue, contacts, drafts, new_id, outcomes, signals, workflows, DbPool,
};
use crate::connector::with_backoff;
use crate::storage::workflows::{StepRecord, StepStatus, WorkflowState};
use crate::workflow::{
    compose::{self, DraftContext},
    context, step_names, with_deadline, Cta, DraftContent, MemoryStore, StepOutcome,
    WorkflowError,
};

/// Everything a workflow run needs, injected once at process start.
#[derive(Clone)]
pub struct WorkflowEnv {
    pub db: DbPool,
    pub registry: ConnectorRegistry,
    pub config: Config,
    pub memory: Option<Arc<dyn MemoryStore>>,
}

/// Terminal result of one orchestrator run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Pipeline finished; a pending draft and (unless the contact is
    /// suppressed) a scored queue item exist.
    Completed {
        draft_id: String,
        queue_item_id: Option<String>,
    },
    /// A step failed. Transient failures are retried by the task runtime.
    Failed {
        step: &'static str,
        detail: String,
        transient: bool,
    },
    /// The workflow is unrecoverable (invalid payload or cancelled).
    Dead { reason: String },
}

/// Run (or resume) a workflow to its terminal state.
pub async fn run_workflow(env: &WorkflowEnv, workflow_id: &str) -> Result<RunOutcome, WorkflowError> {
    let pool = &env.db;
    let workflow = workflows::get_by_id(pool, workflow_id)
        .await?
        .ok_or_else(|| WorkflowError::Invalid(format!("workflow {workflow_id} not found")))?;

    match WorkflowState::parse(&workflow.state) {
        Some(WorkflowState::Dead) => {
            return Ok(RunOutcome::Dead {
                reason: "workflow is dead".to_string(),
            })
        }
        Some(WorkflowState::Completed) => {
            let draft = drafts::get_by_workflow(pool, workflow_id).await?;
            return Ok(RunOutcome::Completed {
                draft_id: draft.map(|d| d.id).unwrap_or_default(),
                queue_item_id: None,
            });
        }
        Some(_) => {}
        None => {
            return Err(WorkflowError::Invalid(format!(
                "workflow {workflow_id} has unknown state {}",
                workflow.state
            )))
        }
    }

    let signal = signals::get_by_id(pool, &workflow.signal_id)
        .await?
        .ok_or_else(|| {
            WorkflowError::Invalid(format!("signal {} not found", workflow.signal_id))
        })?;
    let source = SignalSource::parse(&signal.source)
        .ok_or_else(|| WorkflowError::Invalid(format!("unknown source {}", signal.source)))?;

    workflows::set_state(pool, workflow_id, WorkflowState::Processing).await?;

    let mut prior: HashMap<String, StepRecord> = workflow
        .steps()?
        .into_iter()
        .map(|s| (s.step.clone(), s))
        .collect();

    // Step 1: validate. A bad payload kills the workflow for good.
    let lead = match cached(&prior, step_names::VALIDATE_PAYLOAD)? {
        Some(lead) => lead,
        None => match context::validate_payload(&signal) {
            StepOutcome::Ok(lead) => {
                record_ok(pool, workflow_id, &mut prior, step_names::VALIDATE_PAYLOAD, &lead)
                    .await?;
                lead
            }
            StepOutcome::Failed { detail, .. } => {
                workflows::record_step(
                    pool,
                    workflow_id,
                    step_names::VALIDATE_PAYLOAD,
                    StepStatus::Failed,
                    &detail,
                )
                .await?;
                workflows::set_state(pool, workflow_id, WorkflowState::Dead).await?;
                return Ok(RunOutcome::Dead { reason: detail });
            }
            StepOutcome::Skipped(reason) => {
                return Err(WorkflowError::Invalid(format!(
                    "validate_payload cannot skip: {reason}"
                )))
            }
        },
    };

    // Step 2: resolve contact/company. Later steps need the contact id.
    let party = match cached(&prior, step_names::RESOLVE_CONTACT)? {
        Some(party) => party,
        None => {
            match context::resolve_contact(pool, &env.registry, &env.config, &lead, source).await {
                StepOutcome::Ok(party) => {
                    record_ok(pool, workflow_id, &mut prior, step_names::RESOLVE_CONTACT, &party)
                        .await?;
                    party
                }
                StepOutcome::Failed { detail, transient } => {
                    return fail(pool, workflow_id, step_names::RESOLVE_CONTACT, detail, transient)
                        .await;
                }
                StepOutcome::Skipped(reason) => {
                    return Err(WorkflowError::Invalid(format!(
                        "resolve_contact cannot skip: {reason}"
                    )))
                }
            }
        }
    };

    if is_cancelled(pool, workflow_id).await? {
        return Ok(RunOutcome::Dead {
            reason: "cancelled".to_string(),
        });
    }

    // Steps 3–7: context branches run concurrently and join here. The
    // thread-context branch chains 3 then 4 (4 reads 3's top match); the
    // other branches are independent.
    let timeout = env.config.runtime.connector_timeout_seconds;
    let threads_cached = cached(&prior, step_names::SEARCH_THREADS)?;
    let thread_ctx_cached: Option<Option<crate::workflow::ThreadContext>> =
        cached(&prior, step_names::READ_THREAD_CONTEXT)?.map(Some);
    let patterns_cached = cached(&prior, step_names::RECALL_PATTERNS)?;
    let assets_cached = cached(&prior, step_names::HUNT_ASSETS)?;
    let slots_cached = cached(&prior, step_names::PROPOSE_SLOTS)?;

    let thread_branch = async {
        let threads = match threads_cached.clone() {
            Some(threads) => StepOutcome::Ok(threads),
            None => {
                context::search_threads(env.registry.email.as_ref(), &party.contact_email, timeout)
                    .await
            }
        };
        let thread_ctx = match (&threads, thread_ctx_cached.clone()) {
            (_, Some(cached)) => match cached {
                Some(ctx) => StepOutcome::Ok(ctx),
                None => StepOutcome::Skipped("cached skip".to_string()),
            },
            (StepOutcome::Ok(refs), None) => {
                context::read_thread_context(env.registry.email.as_ref(), refs, timeout).await
            }
            _ => StepOutcome::Skipped("thread search unavailable".to_string()),
        };
        (threads, thread_ctx)
    };

    let patterns_branch = async {
        match patterns_cached.clone() {
            Some(patterns) => StepOutcome::Ok(patterns),
            None => {
                let topic = format!(
                    "{} {}",
                    party.company_name.as_deref().unwrap_or(""),
                    party.company_industry.as_deref().unwrap_or("")
                );
                context::recall_patterns(env.memory.as_deref(), topic.trim()).await
            }
        }
    };

    let assets_branch = async {
        match assets_cached.clone() {
            Some(assets) => StepOutcome::Ok(assets),
            None => context::hunt_assets(env.registry.assets.as_ref(), &env.config, &party).await,
        }
    };

    let slots_branch = async {
        match slots_cached.clone() {
            Some(slots) => StepOutcome::Ok(slots),
            None => {
                context::propose_slots(env.registry.calendar.as_ref(), &env.config, &party).await
            }
        }
    };

    let ((threads, thread_ctx), patterns, assets, slots) =
        tokio::join!(thread_branch, patterns_branch, assets_branch, slots_branch);

    // Record the join results in pipeline order.
    match threads {
        StepOutcome::Ok(refs) => {
            if threads_cached.is_none() {
                record_ok(pool, workflow_id, &mut prior, step_names::SEARCH_THREADS, &refs).await?;
            }
        }
        StepOutcome::Failed { detail, transient } => {
            return fail(pool, workflow_id, step_names::SEARCH_THREADS, detail, transient).await;
        }
        StepOutcome::Skipped(reason) => {
            record_skip(pool, workflow_id, step_names::SEARCH_THREADS, &reason).await?;
        }
    }

    let thread_ctx = match thread_ctx {
        StepOutcome::Ok(ctx) => {
            if thread_ctx_cached.is_none() {
                record_ok(
                    pool,
                    workflow_id,
                    &mut prior,
                    step_names::READ_THREAD_CONTEXT,
                    &ctx,
                )
                .await?;
            }
            Some(ctx)
        }
        StepOutcome::Skipped(reason) => {
            if thread_ctx_cached.is_none() {
                record_skip(pool, workflow_id, step_names::READ_THREAD_CONTEXT, &reason).await?;
            }
            None
        }
        StepOutcome::Failed { detail, transient } => {
            return fail(
                pool,
                workflow_id,
                step_names::READ_THREAD_CONTEXT,
                detail,
                transient,
            )
            .await;
        }
    };

    let patterns = record_optional(
        pool,
        workflow_id,
        &mut prior,
        step_names::RECALL_PATTERNS,
        patterns,
        patterns_cached.is_some(),
    )
    .await?
    .unwrap_or_default();

    let assets = record_optional(
        pool,
        workflow_id,
        &mut prior,
        step_names::HUNT_ASSETS,
        assets,
        assets_cached.is_some(),
    )
    .await?
    .unwrap_or_default();

    let slots = record_optional(
        pool,
        workflow_id,
        &mut prior,
        step_names::PROPOSE_SLOTS,
        slots,
        slots_cached.is_some(),
    )
    .await?
    .unwrap_or_default();

    if is_cancelled(pool, workflow_id).await? {
        return Ok(RunOutcome::Dead {
            reason: "cancelled".to_string(),
        });
    }

    let draft_context = DraftContext {
        lead,
        party: party.clone(),
        thread: thread_ctx,
        patterns,
        assets,
        slots,
    };

    // Step 8: deterministic CTA plan.
    let cta = match cached(&prior, step_names::PLAN_NEXT_STEP)? {
        Some(cta) => cta,
        None => {
            let cta = compose::plan_next_step(&draft_context, &env.config);
            record_ok(pool, workflow_id, &mut prior, step_names::PLAN_NEXT_STEP, &cta).await?;
            cta
        }
    };

    // Step 9: write the draft body.
    let content: DraftContent = match cached(&prior, step_names::WRITE_DRAFT)? {
        Some(content) => content,
        None => {
            match compose::write_draft(env.registry.llm.as_ref(), &draft_context, cta, &env.config)
                .await
            {
                StepOutcome::Ok(content) => {
                    record_ok(pool, workflow_id, &mut prior, step_names::WRITE_DRAFT, &content)
                        .await?;
                    content
                }
                StepOutcome::Failed { detail, transient } => {
                    return fail(pool, workflow_id, step_names::WRITE_DRAFT, detail, transient)
                        .await;
                }
                StepOutcome::Skipped(reason) => {
                    return Err(WorkflowError::Invalid(format!(
                        "write_draft cannot skip: {reason}"
                    )))
                }
            }
        }
    };

    // Step 10: create the external draft and persist the local row.
    let draft_id = match cached(&prior, step_names::CREATE_EXTERNAL_DRAFT)? {
        Some(draft_id) => draft_id,
        None => {
            match create_external_draft(env, workflow_id, &draft_context, cta, &content).await {
                StepOutcome::Ok(draft_id) => {
                    record_ok(
                        pool,
                        workflow_id,
                        &mut prior,
                        step_names::CREATE_EXTERNAL_DRAFT,
                        &draft_id,
                    )
                    .await?;
                    draft_id
                }
                StepOutcome::Failed { detail, transient } => {
                    return fail(
                        pool,
                        workflow_id,
                        step_names::CREATE_EXTERNAL_DRAFT,
                        detail,
                        transient,
                    )
                    .await;
                }
                StepOutcome::Skipped(reason) => {
                    return Err(WorkflowError::Invalid(format!(
                        "create_external_draft cannot skip: {reason}"
                    )))
                }
            }
        }
    };

    // Step 11: best-effort CRM follow-up and thread labelling.
    if cached::<String>(&prior, step_names::CRM_FOLLOWUP)?.is_none() {
        match crm_followup(env, &draft_context).await {
            StepOutcome::Ok(task_id) => {
                record_ok(pool, workflow_id, &mut prior, step_names::CRM_FOLLOWUP, &task_id)
                    .await?;
            }
            StepOutcome::Skipped(reason) | StepOutcome::Failed { detail: reason, .. } => {
                record_skip(pool, workflow_id, step_names::CRM_FOLLOWUP, &reason).await?;
            }
        }
    }

    // Hand the draft to the approval engine and surface it on the queue.
    let decision = approval::evaluate_draft(pool, &env.config, &draft_id)
        .await
        .map_err(|e| WorkflowError::Invalid(e.to_string()))?;

    let queue_item_id =
        create_queue_item(env, &signal, &party, &draft_id, cta, &decision).await?;

    workflows::set_state(pool, workflow_id, WorkflowState::Completed).await?;
    audit_log::append(
        pool,
        "orchestrator",
        "workflow_completed",
        &format!("workflow:{workflow_id}"),
        None,
        Some(&format!("draft:{draft_id}")),
    )
    .await?;

    tracing::info!(
        workflow_id,
        draft_id = %draft_id,
        queue_item = queue_item_id.as_deref().unwrap_or("-"),
        cta = cta.as_str(),
        "Workflow completed"
    );

    Ok(RunOutcome::Completed {
        draft_id,
        queue_item_id,
    })
}

/// Step 10 body: external draft + local `DraftEmail` row.
async fn create_external_draft(
    env: &WorkflowEnv,
    workflow_id: &str,
    draft_context: &DraftContext,
    cta: Cta,
    content: &DraftContent,
) -> StepOutcome<String> {
    let mut thread_headers = HashMap::new();
    if let Some(thread) = &draft_context.thread {
        thread_headers.insert("thread_id".to_string(), thread.thread_id.clone());
    }

    let email = env.registry.email.as_ref();
    let timeout = env.config.runtime.connector_timeout_seconds;
    let external_draft_id = match with_backoff(|| {
        with_deadline(
            "email",
            "create_draft",
            timeout,
            email.create_draft(
                &draft_context.party.contact_email,
                &content.subject,
                &content.body,
                &thread_headers,
            ),
        )
    })
    .await
    {
        Ok(id) => id,
        Err(e) => {
            return StepOutcome::Failed {
                detail: e.to_string(),
                transient: e.is_retryable(),
            }
        }
    };

    let draft_id = new_id();
    let metadata = serde_json::json!({
        "campaign": "inbound",
        "source": "workflow",
        "cta": cta.as_str(),
        "assets": draft_context.assets,
        "slots": draft_context.slots,
        "talking_points": draft_context.patterns,
    });
    let headers_json = serde_json::to_string(&thread_headers).unwrap_or_else(|_| "{}".to_string());

    let insert = drafts::insert(
        &env.db,
        &drafts::NewDraft {
            id: &draft_id,
            workflow_id,
            contact_id: &draft_context.party.contact_id,
            recipient: &draft_context.party.contact_email,
            subject: &content.subject,
            body_text: &content.body,
            body_html: None,
            thread_headers: &headers_json,
            voice_profile_id: env.config.draft.voice_profile.as_ref().map(|_| "default"),
            metadata: &metadata.to_string(),
            external_draft_id: Some(&external_draft_id),
        },
    )
    .await;

    match insert {
        Ok(()) => StepOutcome::Ok(draft_id),
        Err(e) => StepOutcome::Failed {
            detail: format!("draft persist failed: {e}"),
            transient: true,
        },
    }
}

/// Step 11 body: CRM follow-up task two business days out, plus the
/// pipeline label on the thread when one exists.
async fn crm_followup(env: &WorkflowEnv, draft_context: &DraftContext) -> StepOutcome<String> {
    let due = crate::workflow::add_business_days(
        Utc::now(),
        env.config.draft.crm_task_due_business_days,
    );
    let due = crate::storage::format_iso(due);
    let title = format!(
        "Follow up with {}",
        draft_context
            .party
            .contact_name
            .as_deref()
            .unwrap_or(&draft_context.party.contact_email)
    );

    let timeout = env.config.runtime.connector_timeout_seconds;
    let crm = env.registry.crm.as_ref();
    let task_id = match with_deadline(
        "crm",
        "create_task",
        timeout,
        crm.create_task(&draft_context.party.contact_id, &title, &due),
    )
    .await
    {
        Ok(id) => id,
        Err(e) => return StepOutcome::Skipped(format!("task creation failed: {e}")),
    };

    if let Some(thread) = &draft_context.thread {
        if let Err(e) = with_deadline(
            "email",
            "label_thread",
            timeout,
            env.registry
                .email
                .label_thread(&thread.thread_id, &env.config.draft.thread_label),
        )
        .await
        {
            tracing::warn!(error = %e, "Thread labelling failed, continuing");
        }
    }

    StepOutcome::Ok(task_id)
}

/// Surface the finished draft on the command queue, unless the contact has
/// become suppressed since the workflow started.
async fn create_queue_item(
    env: &WorkflowEnv,
    signal: &signals::Signal,
    party: &crate::workflow::ResolvedParty,
    draft_id: &str,
    cta: Cta,
    decision: &approval::ApprovalDecision,
) -> Result<Option<String>, WorkflowError> {
    let pool = &env.db;
    let contact = contacts::get_by_id(pool, &party.contact_id).await?;
    if contact.as_ref().is_some_and(contacts::Contact::is_suppressed) {
        tracing::info!(draft_id, "Contact suppressed; not queueing outbound email");
        return Ok(None);
    }

    let segments = match &contact {
        Some(contact) => contact.segment_list()?,
        None => Vec::new(),
    };
    let in_target_segment = segments
        .iter()
        .any(|s| env.config.scoring.target_segments.contains(s))
        || outcomes::contact_impact(pool, &party.contact_id).await? >= 5.0;
    let strategic_account = party
        .company_domain
        .as_deref()
        .is_some_and(|d| env.config.scoring.strategic_accounts.iter().any(|s| s == d));

    let received = crate::storage::parse_iso("signals", "received_at", &signal.received_at)?;
    let hours_since_signal = (Utc::now() - received).num_seconds().max(0) as f64 / 3600.0;

    let aps = scoring::compute_aps(&ScoreInputs {
        deal_amount: party.deal_amount,
        deal_ceiling: env.config.scoring.deal_ceiling,
        icp_score: party.icp_score,
        hours_since_signal,
        urgency_tau_hours: env.config.scoring.urgency_tau_hours,
        overdue: false,
        action_kind: ActionKind::SendEmail,
        in_target_segment,
        strategic_account,
        high_intent_source: matches!(
            SignalSource::parse(&signal.source),
            Some(SignalSource::Form | SignalSource::Crm)
        ),
    });

    let queue_item_id = new_id();
    let reasoning = format!(
        "{} draft for {} ({})",
        cta.as_str(),
        party.contact_email,
        decision.reasoning
    );
    command_queue::insert(
        pool,
        &command_queue::NewQueueItem {
            id: &queue_item_id,
            owner: "casey",
            domain: "sales",
            action_type: ActionKind::SendEmail.as_str(),
            action_context: &serde_json::json!({
                "draft_id": draft_id,
                "contact_id": party.contact_id,
            })
            .to_string(),
            aps_score: aps,
            reasoning: &reasoning,
            due_by: None,
            signal_ids: &serde_json::json!([signal.id]).to_string(),
            received_at: &signal.received_at,
        },
    )
    .await?;

    Ok(Some(queue_item_id))
}

// --- Step-log plumbing ---

fn cached<T: serde::de::DeserializeOwned>(
    prior: &HashMap<String, StepRecord>,
    step: &str,
) -> Result<Option<T>, WorkflowError> {
    let Some(record) = prior.get(step) else {
        return Ok(None);
    };
    if record.status != StepStatus::Ok {
        return Ok(None);
    }
    serde_json::from_str(&record.detail)
        .map(Some)
        .map_err(|e| WorkflowError::Invalid(format!("corrupt step output for {step}: {e}")))
}

async fn record_ok<T: serde::Serialize>(
    pool: &DbPool,
    workflow_id: &str,
    prior: &mut HashMap<String, StepRecord>,
    step: &str,
    output: &T,
) -> Result<(), WorkflowError> {
    let detail = serde_json::to_string(output)
        .map_err(|e| WorkflowError::Invalid(format!("unencodable step output for {step}: {e}")))?;
    workflows::record_step(pool, workflow_id, step, StepStatus::Ok, &detail).await?;
    prior.insert(
        step.to_string(),
        StepRecord {
            step: step.to_string(),
            status: StepStatus::Ok,
            detail,
            at: crate::storage::now_iso(),
        },
    );
    Ok(())
}

async fn record_skip(
    pool: &DbPool,
    workflow_id: &str,
    step: &str,
    reason: &str,
) -> Result<(), WorkflowError> {
    tracing::debug!(workflow_id, step, reason, "Step skipped");
    workflows::record_step(pool, workflow_id, step, StepStatus::Skipped, reason).await?;
    Ok(())
}

async fn record_optional<T: serde::Serialize + serde::de::DeserializeOwned>(
    pool: &DbPool,
    workflow_id: &str,
    prior: &mut HashMap<String, StepRecord>,
    step: &str,
    outcome: StepOutcome<T>,
    was_cached: bool,
) -> Result<Option<T>, WorkflowError> {
    match outcome {
        StepOutcome::Ok(value) => {
            if !was_cached {
                record_ok(pool, workflow_id, prior, step, &value).await?;
            }
            Ok(Some(value))
        }
        StepOutcome::Skipped(reason) => {
            record_skip(pool, workflow_id, step, &reason).await?;
            Ok(None)
        }
        StepOutcome::Failed { detail, .. } => {
            // Optional branches degrade to a skip; the pipeline continues.
            record_skip(pool, workflow_id, step, &detail).await?;
            Ok(None)
        }
    }
}

async fn fail(
    pool: &DbPool,
    workflow_id: &str,
    step: &'static str,
    detail: String,
    transient: bool,
) -> Result<RunOutcome, WorkflowError> {
    workflows::record_step(pool, workflow_id, step, StepStatus::Failed, &detail).await?;
    workflows::set_state(pool, workflow_id, WorkflowState::Failed).await?;
    tracing::warn!(workflow_id, step, transient, detail = %detail, "Workflow step failed");
    Ok(RunOutcome::Failed {
        step,
        detail,
        transient,
    })
}

async fn is_cancelled(pool: &DbPool, workflow_id: &str) -> Result<bool, WorkflowError> {
    let workflow = workflows::get_by_id(pool, workflow_id).await?;
    Ok(workflow.is_some_and(|w| w.state == "dead"))
}

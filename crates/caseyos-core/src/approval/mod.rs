//! Auto-approval engine.
//!
//! Evaluates a pending draft against the whitelist rules in ascending
//! priority (lower rule id breaks priority ties). The global gates are
//! checked before any rule: with the kill switch engaged, auto-approval
//! disabled, or the global send window closed, every draft needs review
//! regardless of rule matches. Whether real sends are allowed is the
//! executor's gate, not this engine's: a draft can be auto-approved in
//! draft-only mode and still never leave the building. The engine never
//! auto-rejects, and every evaluation writes an `auto_approval_log` row.

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::error::StorageError;
use crate::storage::{
    auto_approval, companies, contacts, drafts, new_id, rate_limits, runtime_flags, DbPool,
};

/// Errors from approval evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// Storage-layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The draft does not exist or is not pending.
    #[error("draft not evaluable: {0}")]
    NotEvaluable(String),
}

/// The two possible decisions. Rejection is always a human's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    AutoApproved,
    NeedsReview,
}

impl DecisionKind {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoApproved => "auto_approved",
            Self::NeedsReview => "needs_review",
        }
    }
}

/// Result of evaluating a draft.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApprovalDecision {
    pub decision: DecisionKind,
    pub rule_id: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Snapshot of the global gates at evaluation time.
#[derive(Debug, Clone, Copy)]
pub struct GateState {
    pub emergency_stop: bool,
    pub auto_approve_enabled: bool,
    pub global_window_open: bool,
}

impl GateState {
    /// Whether auto-approval may proceed to rule evaluation.
    pub fn open(self) -> bool {
        !self.emergency_stop && self.auto_approve_enabled && self.global_window_open
    }

    /// Human-readable list of closed gates.
    fn closed_reasons(self) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if self.emergency_stop {
            reasons.push("emergency stop engaged");
        }
        if !self.auto_approve_enabled {
            reasons.push("auto-approval disabled");
        }
        if !self.global_window_open {
            reasons.push("global send window closed");
        }
        reasons
    }
}

/// Read the current gate state.
pub async fn gate_state(pool: &DbPool, config: &Config) -> Result<GateState, StorageError> {
    let emergency_stop = runtime_flags::emergency_stop_engaged(pool).await?;
    let global_window_open = rate_limits::check_global_window(pool, &config.rate_limits, Utc::now())
        .await?
        .is_allowed();
    Ok(GateState {
        emergency_stop,
        auto_approve_enabled: config.sending.auto_approve_enabled,
        global_window_open,
    })
}

/// Evaluate a pending draft and record the decision.
///
/// On auto-approval the draft transitions `pending -> auto_approved`.
pub async fn evaluate_draft(
    pool: &DbPool,
    config: &Config,
    draft_id: &str,
) -> Result<ApprovalDecision, ApprovalError> {
    let draft = drafts::get_by_id(pool, draft_id)
        .await?
        .ok_or_else(|| ApprovalError::NotEvaluable(format!("draft {draft_id} not found")))?;

    let gates = gate_state(pool, config).await?;
    let decision = if gates.open() {
        evaluate_rules(pool, &draft).await?
    } else {
        ApprovalDecision {
            decision: DecisionKind::NeedsReview,
            rule_id: None,
            confidence: 0.0,
            reasoning: format!("gates closed: {}", gates.closed_reasons().join(", ")),
        }
    };

    if decision.decision == DecisionKind::AutoApproved {
        let moved = drafts::try_transition(pool, draft_id, drafts::DraftStatus::AutoApproved).await?;
        if !moved {
            // Raced with another transition; record the review decision instead.
            let fallback = ApprovalDecision {
                decision: DecisionKind::NeedsReview,
                rule_id: None,
                confidence: 0.0,
                reasoning: "draft left pending state during evaluation".to_string(),
            };
            log(pool, draft_id, &fallback).await?;
            return Ok(fallback);
        }
    }

    log(pool, draft_id, &decision).await?;

    tracing::info!(
        draft_id,
        decision = decision.decision.as_str(),
        rule = decision.rule_id.as_deref().unwrap_or("-"),
        confidence = decision.confidence,
        "Auto-approval evaluated"
    );

    Ok(decision)
}

async fn log(
    pool: &DbPool,
    draft_id: &str,
    decision: &ApprovalDecision,
) -> Result<(), StorageError> {
    auto_approval::log_decision(
        pool,
        &new_id(),
        draft_id,
        decision.decision.as_str(),
        decision.rule_id.as_deref(),
        decision.confidence,
        &decision.reasoning,
    )
    .await
}

/// Evaluate the enabled rules in order; first match wins.
async fn evaluate_rules(
    pool: &DbPool,
    draft: &drafts::DraftEmail,
) -> Result<ApprovalDecision, ApprovalError> {
    let contact = contacts::get_by_id(pool, &draft.contact_id).await?;
    let rules = auto_approval::enabled_rules(pool).await?;

    for rule in &rules {
        let matched = match rule.kind.as_str() {
            "replied_before" => {
                let days = rule.condition_i64("days", 90);
                replied_within(contact.as_ref(), days)
            }
            "known_good_recipient" => {
                auto_approval::is_approved_recipient(pool, &draft.recipient).await?
            }
            "high_icp_score" => {
                let min_icp = rule.condition_f64("min_icp", 0.9);
                high_icp_match(pool, &draft.recipient, min_icp).await?
            }
            other => {
                tracing::warn!(rule_id = %rule.id, kind = other, "Unknown rule kind, skipping");
                false
            }
        };

        if matched {
            return Ok(ApprovalDecision {
                decision: DecisionKind::AutoApproved,
                rule_id: Some(rule.id.clone()),
                confidence: rule.confidence,
                reasoning: format!("matched rule {} ({})", rule.id, rule.kind),
            });
        }
    }

    Ok(ApprovalDecision {
        decision: DecisionKind::NeedsReview,
        rule_id: None,
        confidence: 0.0,
        reasoning: format!("no enabled rule matched ({} evaluated)", rules.len()),
    })
}

fn replied_within(contact: Option<&contacts::Contact>, days: i64) -> bool {
    let Some(last_reply) = contact.and_then(|c| c.last_reply_at.as_deref()) else {
        return false;
    };
    let Ok(last_reply) = last_reply.parse::<DateTime<Utc>>() else {
        return false;
    };
    Utc::now() - last_reply <= Duration::days(days)
}

/// True iff the recipient's domain has a company with ICP at or above the
/// threshold. Looking the company up by the recipient's own domain is what
/// enforces the email-domain-matches-company-domain condition.
async fn high_icp_match(
    pool: &DbPool,
    recipient: &str,
    min_icp: f64,
) -> Result<bool, StorageError> {
    let Some(domain) = recipient.rsplit('@').next().filter(|d| d.contains('.')) else {
        return Ok(false);
    };
    let Some(company) = companies::get_by_domain(pool, domain).await? else {
        return Ok(false);
    };
    Ok(company.icp_score.is_some_and(|icp| icp >= min_icp))
}

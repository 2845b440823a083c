//! Outcome recording and the feedback loop.
//!
//! Outcomes tie results (replies, bounces, meetings, deal movement) back to
//! the entities that caused them. Recording an outcome applies its feedback
//! effects: reply-like outcomes whitelist the recipient and advance
//! `last_reply_at`; bounce/unsubscribe suppress the contact and clear their
//! pending email moves; every contact-attributable outcome feeds the cached
//! impact aggregate the APS scorer consumes.
//!
//! All feedback effects are monotone (insert-or-ignore, first-suppression-
//! wins, max-timestamp), so late-arriving outcomes can be applied in any
//! order and converge to the same state.

use crate::error::StorageError;
use crate::storage::{
    auto_approval, command_queue, contacts, drafts, new_id, now_iso, outcomes, DbPool,
};

/// Errors from outcome recording.
#[derive(Debug, thiserror::Error)]
pub enum OutcomeError {
    /// Storage-layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Unknown outcome kind or subject kind.
    #[error("invalid outcome: {0}")]
    Invalid(String),
}

/// What an outcome is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Draft,
    QueueItem,
    Contact,
    Deal,
}

impl SubjectKind {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::QueueItem => "queue_item",
            Self::Contact => "contact",
            Self::Deal => "deal",
        }
    }

    /// Parse a stored subject kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "queue_item" => Some(Self::QueueItem),
            "contact" => Some(Self::Contact),
            "deal" => Some(Self::Deal),
            _ => None,
        }
    }
}

/// The outcome taxonomy, grouped into email, meeting, deal, task, and
/// general categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    // Email
    EmailSent,
    EmailDelivered,
    EmailOpened,
    EmailClicked,
    EmailReplied,
    EmailBounced,
    EmailUnsubscribed,
    // Meeting
    MeetingBooked,
    MeetingHeld,
    MeetingNoShow,
    MeetingRescheduled,
    // Deal
    DealCreated,
    DealStageAdvanced,
    DealStageRegressed,
    DealWon,
    DealLost,
    // Task
    TaskCompleted,
    TaskOverdue,
    // General
    PositiveResponse,
    NegativeResponse,
    NoResponse,
}

/// Every kind, in taxonomy order. Drives exhaustiveness tests and stats.
pub const ALL_KINDS: &[OutcomeKind] = &[
    OutcomeKind::EmailSent,
    OutcomeKind::EmailDelivered,
    OutcomeKind::EmailOpened,
    OutcomeKind::EmailClicked,
    OutcomeKind::EmailReplied,
    OutcomeKind::EmailBounced,
    OutcomeKind::EmailUnsubscribed,
    OutcomeKind::MeetingBooked,
    OutcomeKind::MeetingHeld,
    OutcomeKind::MeetingNoShow,
    OutcomeKind::MeetingRescheduled,
    OutcomeKind::DealCreated,
    OutcomeKind::DealStageAdvanced,
    OutcomeKind::DealStageRegressed,
    OutcomeKind::DealWon,
    OutcomeKind::DealLost,
    OutcomeKind::TaskCompleted,
    OutcomeKind::TaskOverdue,
    OutcomeKind::PositiveResponse,
    OutcomeKind::NegativeResponse,
    OutcomeKind::NoResponse,
];

impl OutcomeKind {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailSent => "email_sent",
            Self::EmailDelivered => "email_delivered",
            Self::EmailOpened => "email_opened",
            Self::EmailClicked => "email_clicked",
            Self::EmailReplied => "email_replied",
            Self::EmailBounced => "email_bounced",
            Self::EmailUnsubscribed => "email_unsubscribed",
            Self::MeetingBooked => "meeting_booked",
            Self::MeetingHeld => "meeting_held",
            Self::MeetingNoShow => "meeting_no_show",
            Self::MeetingRescheduled => "meeting_rescheduled",
            Self::DealCreated => "deal_created",
            Self::DealStageAdvanced => "deal_stage_advanced",
            Self::DealStageRegressed => "deal_stage_regressed",
            Self::DealWon => "deal_won",
            Self::DealLost => "deal_lost",
            Self::TaskCompleted => "task_completed",
            Self::TaskOverdue => "task_overdue",
            Self::PositiveResponse => "positive_response",
            Self::NegativeResponse => "negative_response",
            Self::NoResponse => "no_response",
        }
    }

    /// Parse a stored kind string.
    pub fn parse(s: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|k| k.as_str() == s)
    }

    /// Taxonomy category.
    pub fn category(self) -> &'static str {
        match self {
            Self::EmailSent
            | Self::EmailDelivered
            | Self::EmailOpened
            | Self::EmailClicked
            | Self::EmailReplied
            | Self::EmailBounced
            | Self::EmailUnsubscribed => "email",
            Self::MeetingBooked
            | Self::MeetingHeld
            | Self::MeetingNoShow
            | Self::MeetingRescheduled => "meeting",
            Self::DealCreated
            | Self::DealStageAdvanced
            | Self::DealStageRegressed
            | Self::DealWon
            | Self::DealLost => "deal",
            Self::TaskCompleted | Self::TaskOverdue => "task",
            Self::PositiveResponse | Self::NegativeResponse | Self::NoResponse => "general",
        }
    }

    /// Fixed impact score in `[-5, +10]`.
    pub fn default_impact(self) -> f64 {
        match self {
            Self::EmailSent => 0.0,
            Self::EmailDelivered => 0.5,
            Self::EmailOpened => 1.0,
            Self::EmailClicked => 2.0,
            Self::EmailReplied => 8.0,
            Self::EmailBounced => -3.0,
            Self::EmailUnsubscribed => -5.0,
            Self::MeetingBooked => 9.0,
            Self::MeetingHeld => 10.0,
            Self::MeetingNoShow => -2.0,
            Self::MeetingRescheduled => 1.0,
            Self::DealCreated => 8.0,
            Self::DealStageAdvanced => 6.0,
            Self::DealStageRegressed => -3.0,
            Self::DealWon => 10.0,
            Self::DealLost => -4.0,
            Self::TaskCompleted => 2.0,
            Self::TaskOverdue => -1.0,
            Self::PositiveResponse => 7.0,
            Self::NegativeResponse => -3.0,
            Self::NoResponse => -1.0,
        }
    }
}

/// A request to record an outcome.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub subject_kind: SubjectKind,
    pub subject_id: String,
    pub kind: OutcomeKind,
    /// Override for the fixed impact table; clamped to `[-5, +10]`.
    pub impact: Option<f64>,
    /// `auto` for detected outcomes, `manual` for operator-recorded ones.
    pub source: &'static str,
    /// When the outcome was observed; defaults to now.
    pub detected_at: Option<String>,
    /// Free-form detail map, JSON-encoded.
    pub details: String,
}

/// Record an outcome and apply its feedback effects.
///
/// Returns the stored outcome record id.
pub async fn record(pool: &DbPool, request: RecordOutcome) -> Result<String, OutcomeError> {
    let id = new_id();
    let impact = request
        .impact
        .unwrap_or_else(|| request.kind.default_impact())
        .clamp(-5.0, 10.0);
    let detected_at = request.detected_at.clone().unwrap_or_else(now_iso);

    outcomes::insert(
        pool,
        &id,
        request.subject_kind.as_str(),
        &request.subject_id,
        request.kind.as_str(),
        impact,
        request.source,
        &detected_at,
        &request.details,
    )
    .await?;

    let contact = resolve_contact(pool, request.subject_kind, &request.subject_id).await?;

    if let Some(contact) = contact {
        apply_feedback(pool, &contact, request.kind, impact, &detected_at).await?;
    }

    tracing::info!(
        outcome_id = %id,
        kind = request.kind.as_str(),
        subject = %format!("{}:{}", request.subject_kind.as_str(), request.subject_id),
        impact,
        "Outcome recorded"
    );

    Ok(id)
}

/// Resolve the contact an outcome is attributable to, when any.
async fn resolve_contact(
    pool: &DbPool,
    subject_kind: SubjectKind,
    subject_id: &str,
) -> Result<Option<contacts::Contact>, OutcomeError> {
    let contact_id = match subject_kind {
        SubjectKind::Contact => Some(subject_id.to_string()),
        SubjectKind::Draft => drafts::get_by_id(pool, subject_id)
            .await?
            .map(|d| d.contact_id),
        SubjectKind::QueueItem => command_queue::get_by_id(pool, subject_id)
            .await?
            .and_then(|q| q.contact_id()),
        SubjectKind::Deal => None,
    };

    match contact_id {
        Some(id) => Ok(contacts::get_by_id(pool, &id).await?),
        None => Ok(None),
    }
}

/// Apply the feedback effects of an outcome to its contact.
async fn apply_feedback(
    pool: &DbPool,
    contact: &contacts::Contact,
    kind: OutcomeKind,
    impact: f64,
    detected_at: &str,
) -> Result<(), OutcomeError> {
    match kind {
        OutcomeKind::EmailReplied | OutcomeKind::PositiveResponse => {
            auto_approval::add_approved_recipient(
                pool,
                &contact.email,
                &format!("{} outcome", kind.as_str()),
            )
            .await?;
            contacts::set_last_reply_at(pool, &contact.id, detected_at).await?;
        }
        OutcomeKind::EmailBounced => {
            contacts::suppress(pool, &contact.id, contacts::Suppression::Bounce).await?;
            command_queue::dismiss_pending_email_for_contact(pool, &contact.id).await?;
        }
        OutcomeKind::EmailUnsubscribed => {
            contacts::suppress(pool, &contact.id, contacts::Suppression::Unsub).await?;
            command_queue::dismiss_pending_email_for_contact(pool, &contact.id).await?;
        }
        _ => {}
    }

    outcomes::accumulate_contact_impact(pool, &contact.id, impact).await?;
    Ok(())
}

//! APS (Action Priority Score) computation.
//!
//! The scorer is pure and deterministic: given the same inputs it returns
//! bit-identical results. It reads nothing from storage or rules; the caller
//! assembles [`ScoreInputs`] from signal, contact, company, and outcome state.
//!
//! ```text
//! APS = 100 · (0.40·revenue + 0.25·urgency + 0.15·effort + 0.20·strategic)
//! ```

use std::cmp::Ordering;

const REVENUE_WEIGHT: f64 = 0.40;
const URGENCY_WEIGHT: f64 = 0.25;
const EFFORT_WEIGHT: f64 = 0.15;
const STRATEGIC_WEIGHT: f64 = 0.20;

/// Revenue fallback when neither a deal nor an ICP score is known.
const REVENUE_BASELINE: f64 = 0.3;

/// Denominator for normalizing effort minutes.
const EFFORT_CEILING_MINUTES: f64 = 60.0;

/// Two scores within this distance are treated as tied and fall through to
/// the age/id tie-break.
const TIE_BAND: f64 = 0.5;

/// The kind of action a queue item proposes. Drives the effort component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail,
    BookMeeting,
    UpdateDeal,
    CreateTask,
    EngageSocial,
    Research,
}

impl ActionKind {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::BookMeeting => "book_meeting",
            Self::UpdateDeal => "update_deal",
            Self::CreateTask => "create_task",
            Self::EngageSocial => "engage_social",
            Self::Research => "research",
        }
    }

    /// Parse a stored action kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send_email" => Some(Self::SendEmail),
            "book_meeting" => Some(Self::BookMeeting),
            "update_deal" => Some(Self::UpdateDeal),
            "create_task" => Some(Self::CreateTask),
            "engage_social" => Some(Self::EngageSocial),
            "research" => Some(Self::Research),
            _ => None,
        }
    }

    /// Estimated operator minutes for this action kind.
    fn estimated_minutes(self) -> f64 {
        match self {
            Self::SendEmail => 5.0,
            Self::BookMeeting => 2.0,
            Self::UpdateDeal => 3.0,
            Self::CreateTask => 2.0,
            Self::EngageSocial => 3.0,
            Self::Research => 15.0,
        }
    }
}

/// Everything the scorer needs, assembled by the caller.
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    /// Open deal amount, when a deal exists.
    pub deal_amount: Option<f64>,
    /// Deal amount that maps to a full revenue component.
    pub deal_ceiling: f64,
    /// ICP score of the contact's company, when known.
    pub icp_score: Option<f64>,
    /// Hours since the driving signal was received.
    pub hours_since_signal: f64,
    /// Urgency decay constant in hours.
    pub urgency_tau_hours: f64,
    /// Whether the action's `due_by` has passed.
    pub overdue: bool,
    /// The proposed action kind.
    pub action_kind: ActionKind,
    /// Contact belongs to a configured target segment.
    pub in_target_segment: bool,
    /// Company is on the strategic accounts list.
    pub strategic_account: bool,
    /// Signal came from a high-intent source (form or CRM).
    pub high_intent_source: bool,
}

/// Per-component breakdown, exposed for reasoning strings and tests.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScoreBreakdown {
    pub revenue: f64,
    pub urgency: f64,
    pub effort: f64,
    pub strategic: f64,
    pub total: f64,
}

/// Compute the APS for a candidate action, in `[0, 100]`.
pub fn compute_aps(inputs: &ScoreInputs) -> f64 {
    breakdown(inputs).total
}

/// Compute the APS with its component breakdown.
pub fn breakdown(inputs: &ScoreInputs) -> ScoreBreakdown {
    let revenue = revenue_component(inputs);
    let urgency = urgency_component(inputs);
    let effort = effort_component(inputs.action_kind);
    let strategic = strategic_component(inputs);

    let total = 100.0
        * (REVENUE_WEIGHT * revenue
            + URGENCY_WEIGHT * urgency
            + EFFORT_WEIGHT * effort
            + STRATEGIC_WEIGHT * strategic);

    ScoreBreakdown {
        revenue,
        urgency,
        effort,
        strategic,
        total,
    }
}

fn revenue_component(inputs: &ScoreInputs) -> f64 {
    if let Some(amount) = inputs.deal_amount {
        if inputs.deal_ceiling <= 0.0 {
            return 1.0;
        }
        return (amount / inputs.deal_ceiling).clamp(0.0, 1.0);
    }
    if let Some(icp) = inputs.icp_score {
        return icp.clamp(0.0, 1.0);
    }
    REVENUE_BASELINE
}

fn urgency_component(inputs: &ScoreInputs) -> f64 {
    if inputs.overdue {
        return 1.0;
    }
    let tau = if inputs.urgency_tau_hours > 0.0 {
        inputs.urgency_tau_hours
    } else {
        48.0
    };
    (-inputs.hours_since_signal.max(0.0) / tau).exp()
}

fn effort_component(kind: ActionKind) -> f64 {
    let minutes = kind.estimated_minutes().min(EFFORT_CEILING_MINUTES);
    1.0 - minutes / EFFORT_CEILING_MINUTES
}

fn strategic_component(inputs: &ScoreInputs) -> f64 {
    let mut score: f64 = 0.0;
    if inputs.in_target_segment {
        score += 0.5;
    }
    if inputs.strategic_account {
        score += 0.3;
    }
    if inputs.high_intent_source {
        score += 0.2;
    }
    score.min(1.0)
}

/// Ordering for the daily queue view: higher score first; scores within
/// ±0.5 of each other tie-break on older `received_at`, then id.
pub fn compare_ranked(
    score_a: f64,
    received_a: &str,
    id_a: &str,
    score_b: f64,
    received_b: &str,
    id_b: &str,
) -> Ordering {
    if (score_a - score_b).abs() > TIE_BAND {
        // Higher score first; scores are finite by construction.
        return score_b
            .partial_cmp(&score_a)
            .unwrap_or(Ordering::Equal);
    }
    match received_a.cmp(received_b) {
        Ordering::Equal => id_a.cmp(id_b),
        other => other,
    }
}

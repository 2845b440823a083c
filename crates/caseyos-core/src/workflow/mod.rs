//! Draft workflow layer: the resumable form-to-draft pipeline.
//!
//! Each step has an explicit typed IO contract and ends in a [`StepOutcome`]
//! rather than an exception: the orchestrator dispatches on the tag. Step
//! outputs are serialized into the workflow's step log, which is what makes
//! a retried workflow resume from the first non-`ok` step instead of
//! repeating completed work.
//!
//! The orchestrator never sends email. Its terminal artifact is a pending
//! `DraftEmail` plus a scored queue item; sending is the executor's sole
//! privilege.

pub mod compose;
pub mod context;
pub mod orchestrate;


use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};

use crate::connector::{ConnectorError, ConnectorErrorKind};
use crate::error::{SafetyError, StorageError};

/// Errors from workflow operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Storage-layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Connector failure that escaped step-level handling.
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Draft safety rejection.
    #[error("safety violation: {0}")]
    Safety(#[from] SafetyError),

    /// Workflow or signal data is missing or malformed.
    #[error("invalid workflow state: {0}")]
    Invalid(String),
}

/// How a single step ended.
#[derive(Debug, Clone)]
pub enum StepOutcome<T> {
    /// The step produced its output.
    Ok(T),
    /// The step was skipped; the pipeline continues without its output.
    Skipped(String),
    /// The step failed. `transient` failures are retried by the task
    /// runtime; permanent ones dead-letter the workflow.
    Failed { detail: String, transient: bool },
}

impl<T> StepOutcome<T> {
    /// The output, when the step succeeded.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }
}

/// Step names, in pipeline order. These are the stable identifiers stored
/// in the step log.
pub mod step_names {
    pub const VALIDATE_PAYLOAD: &str = "validate_payload";
    pub const RESOLVE_CONTACT: &str = "resolve_contact";
    pub const SEARCH_THREADS: &str = "search_threads";
    pub const READ_THREAD_CONTEXT: &str = "read_thread_context";
    pub const RECALL_PATTERNS: &str = "recall_patterns";
    pub const HUNT_ASSETS: &str = "hunt_assets";
    pub const PROPOSE_SLOTS: &str = "propose_slots";
    pub const PLAN_NEXT_STEP: &str = "plan_next_step";
    pub const WRITE_DRAFT: &str = "write_draft";
    pub const CREATE_EXTERNAL_DRAFT: &str = "create_external_draft";
    pub const CRM_FOLLOWUP: &str = "crm_followup";

    /// All steps in execution order.
    pub const ALL: &[&str] = &[
        VALIDATE_PAYLOAD,
        RESOLVE_CONTACT,
        SEARCH_THREADS,
        READ_THREAD_CONTEXT,
        RECALL_PATTERNS,
        HUNT_ASSETS,
        PROPOSE_SLOTS,
        PLAN_NEXT_STEP,
        WRITE_DRAFT,
        CREATE_EXTERNAL_DRAFT,
        CRM_FOLLOWUP,
    ];
}

/// The validated lead extracted from a signal payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LeadPayload {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub message: Option<String>,
    pub timezone: Option<String>,
}

impl LeadPayload {
    /// Display name with explicit fallback.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => "there".to_string(),
        }
    }
}

/// Contact/company identity after CRM resolution (step 2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResolvedParty {
    pub contact_id: String,
    pub contact_email: String,
    pub contact_name: Option<String>,
    pub contact_timezone: Option<String>,
    pub company_id: Option<String>,
    pub company_domain: Option<String>,
    pub company_name: Option<String>,
    pub company_industry: Option<String>,
    pub icp_score: Option<f64>,
    pub deal_amount: Option<f64>,
}

/// Thread context extracted from the best-matching thread (step 4).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThreadContext {
    pub thread_id: String,
    pub subject: String,
    /// The last few messages, oldest first, as "sender: snippet" lines.
    pub recent_messages: Vec<String>,
}

/// The single primary call to action chosen in step 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cta {
    BookMeeting,
    ReplyForInfo,
    ShareAsset,
    Nurture,
}

impl Cta {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BookMeeting => "book_meeting",
            Self::ReplyForInfo => "reply_for_info",
            Self::ShareAsset => "share_asset",
            Self::Nurture => "nurture",
        }
    }
}

/// The composed draft produced by step 9.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DraftContent {
    pub subject: String,
    pub body: String,
}

/// Optional memory collaborator for step 5: prior successful draft
/// summaries relevant to a topic. The default deployment has none.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Recall summaries of prior successful drafts similar to the topic.
    async fn recall_similar(
        &self,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<String>, ConnectorError>;
}

/// Bound a connector future with the hard per-call timeout.
pub(crate) async fn with_deadline<T, Fut>(
    connector: &'static str,
    operation: &'static str,
    secs: u64,
    future: Fut,
) -> Result<T, ConnectorError>
where
    Fut: std::future::Future<Output = Result<T, ConnectorError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), future).await {
        Ok(result) => result,
        Err(_) => Err(ConnectorError::new(
            connector,
            operation,
            ConnectorErrorKind::Transient,
            format!("timed out after {secs}s"),
        )),
    }
}

/// Add `n` business days to a timestamp, skipping Saturdays and Sundays.
pub fn add_business_days(from: DateTime<Utc>, n: u32) -> DateTime<Utc> {
    let mut at = from;
    let mut remaining = n;
    while remaining > 0 {
        at += chrono::Duration::days(1);
        if !matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    at
}

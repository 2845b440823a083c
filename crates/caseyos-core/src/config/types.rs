//! Configuration section structs and their serde default functions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Placeholder secret shipped in the sample config. Startup validation
/// refuses to run with real sends enabled while this value is in place.
pub const DEFAULT_SECRET_KEY: &str = "change-me";

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP gateway bind settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8700
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite database location.
///
/// The task queue (broker) and idempotency store live in the same database;
/// `broker_url` and `result_backend_url` are recognized for deployment-tool
/// compatibility but resolve to the primary database.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Accepted for compatibility; the embedded broker uses `path`.
    #[serde(default)]
    pub broker_url: Option<String>,

    /// Accepted for compatibility; results are stored in `path`.
    #[serde(default)]
    pub result_backend_url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            broker_url: None,
            result_backend_url: None,
        }
    }
}

fn default_db_path() -> String {
    "~/.caseyos/caseyos.db".to_string()
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Global send gates and secrets.
///
/// All three gates default to the safe side: nothing leaves the system until
/// an operator flips `allow_real_sends` and disables draft-only mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendingConfig {
    /// Whether the executor may perform real sends against connectors.
    #[serde(default)]
    pub allow_real_sends: bool,

    /// Whether the auto-approval engine may approve drafts at all.
    #[serde(default)]
    pub auto_approve_enabled: bool,

    /// Draft-only mode: workflows produce drafts but the executor refuses
    /// every outbound action.
    #[serde(default = "default_true")]
    pub mode_draft_only: bool,

    /// Application secret used for CSRF token derivation.
    #[serde(default = "default_secret_key")]
    pub secret_key: String,

    /// Bearer token required on admin endpoints.
    #[serde(default)]
    pub admin_token: String,

    /// CSRF secret; falls back to `secret_key` when empty.
    #[serde(default)]
    pub csrf_secret: String,

    /// Optional error-tracking DSN, forwarded to the logging layer.
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

impl Default for SendingConfig {
    fn default() -> Self {
        Self {
            allow_real_sends: false,
            auto_approve_enabled: false,
            mode_draft_only: true,
            secret_key: default_secret_key(),
            admin_token: String::new(),
            csrf_secret: String::new(),
            sentry_dsn: None,
        }
    }
}

impl SendingConfig {
    /// The effective CSRF secret (falls back to the app secret).
    pub fn effective_csrf_secret(&self) -> &str {
        if self.csrf_secret.is_empty() {
            &self.secret_key
        } else {
            &self.csrf_secret
        }
    }
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Inputs for the APS scorer that come from operator strategy rather than
/// from the signal itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// Deal amount that maps to a full revenue component.
    #[serde(default = "default_deal_ceiling")]
    pub deal_ceiling: f64,

    /// Urgency decay constant in hours.
    #[serde(default = "default_urgency_tau_hours")]
    pub urgency_tau_hours: f64,

    /// Contact segments counted as "target segment" for the strategic component.
    #[serde(default = "default_target_segments")]
    pub target_segments: Vec<String>,

    /// Company domains counted as strategic accounts.
    #[serde(default)]
    pub strategic_accounts: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            deal_ceiling: default_deal_ceiling(),
            urgency_tau_hours: default_urgency_tau_hours(),
            target_segments: default_target_segments(),
            strategic_accounts: Vec::new(),
        }
    }
}

fn default_deal_ceiling() -> f64 {
    50_000.0
}

fn default_urgency_tau_hours() -> f64 {
    48.0
}

fn default_target_segments() -> Vec<String> {
    vec!["inbound".to_string()]
}

// ---------------------------------------------------------------------------
// Rate limits
// ---------------------------------------------------------------------------

/// Send-rate windows enforced by the executor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Maximum sends per recipient per rolling 7-day window.
    #[serde(default = "default_per_recipient_week")]
    pub per_recipient_week: u32,

    /// Maximum sends globally per rolling day.
    #[serde(default = "default_global_day")]
    pub global_day: u32,

    /// Optional warmup ramp for the global daily cap.
    #[serde(default)]
    pub warmup: WarmupConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_recipient_week: default_per_recipient_week(),
            global_day: default_global_day(),
            warmup: WarmupConfig::default(),
        }
    }
}

fn default_per_recipient_week() -> u32 {
    2
}

fn default_global_day() -> u32 {
    20
}

/// Warmup ramp: the global daily cap climbs from `start_cap` to
/// `start_cap * factor` over `ramp_days` days from `started_at`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarmupConfig {
    /// Whether the ramp is active.
    #[serde(default)]
    pub enabled: bool,

    /// Daily cap on day zero of the ramp.
    #[serde(default = "default_warmup_start_cap")]
    pub start_cap: u32,

    /// Multiplier reached at the end of the ramp.
    #[serde(default = "default_warmup_factor")]
    pub factor: f64,

    /// Ramp length in days.
    #[serde(default = "default_warmup_ramp_days")]
    pub ramp_days: u32,

    /// ISO-8601 UTC timestamp when the ramp started.
    #[serde(default)]
    pub started_at: Option<String>,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_cap: default_warmup_start_cap(),
            factor: default_warmup_factor(),
            ramp_days: default_warmup_ramp_days(),
            started_at: None,
        }
    }
}

fn default_warmup_start_cap() -> u32 {
    5
}

fn default_warmup_factor() -> f64 {
    4.0
}

fn default_warmup_ramp_days() -> u32 {
    14
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

/// Per-source webhook signing secrets.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhooksConfig {
    /// Map of signal source name to HMAC signing secret.
    #[serde(default)]
    pub signing_secrets: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// LLM provider endpoint settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Base URL of the chat completions endpoint.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// API key (empty for local endpoints).
    #[serde(default)]
    pub api_key: String,

    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Maximum tokens per completion.
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_max_tokens() -> u32 {
    800
}

fn default_llm_temperature() -> f32 {
    0.7
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Background worker and scheduler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Number of concurrent task workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,

    /// Base interval for the periodic monitor, in seconds.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,

    /// Minimum jitter added to each scheduler tick, in seconds.
    #[serde(default)]
    pub min_jitter_seconds: u64,

    /// Maximum jitter added to each scheduler tick, in seconds.
    #[serde(default = "default_max_jitter")]
    pub max_jitter_seconds: u64,

    /// Queued-task depth beyond which the gateway sheds non-essential signals.
    #[serde(default = "default_broker_depth_threshold")]
    pub broker_depth_threshold: i64,

    /// Hard budget for a single workflow run, in seconds.
    #[serde(default = "default_workflow_timeout")]
    pub workflow_timeout_seconds: u64,

    /// Hard timeout for a single connector call, in seconds.
    #[serde(default = "default_connector_timeout")]
    pub connector_timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            monitor_interval_seconds: default_monitor_interval(),
            min_jitter_seconds: 0,
            max_jitter_seconds: default_max_jitter(),
            broker_depth_threshold: default_broker_depth_threshold(),
            workflow_timeout_seconds: default_workflow_timeout(),
            connector_timeout_seconds: default_connector_timeout(),
        }
    }
}

fn default_worker_count() -> u32 {
    2
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_max_jitter() -> u64 {
    5
}

fn default_broker_depth_threshold() -> i64 {
    1000
}

fn default_workflow_timeout() -> u64 {
    1800
}

fn default_connector_timeout() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// Draft composition settings: voice, length bounds, assets, meeting slots.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DraftConfig {
    /// Voice profile text prepended to every composition prompt.
    #[serde(default)]
    pub voice_profile: Option<String>,

    /// Minimum draft body length in characters.
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Maximum draft body length in characters.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Asset sources the hunt step may return results from.
    #[serde(default)]
    pub asset_allowlist: Vec<String>,

    /// Maximum asset references attached to a draft.
    #[serde(default = "default_asset_cap")]
    pub asset_cap: usize,

    /// Number of meeting slots to propose.
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,

    /// Meeting slot duration in minutes.
    #[serde(default = "default_slot_duration")]
    pub slot_duration_minutes: u32,

    /// Local business hours start (inclusive).
    #[serde(default = "default_business_start")]
    pub business_start_hour: u32,

    /// Local business hours end (exclusive).
    #[serde(default = "default_business_end")]
    pub business_end_hour: u32,

    /// Fallback IANA timezone when the contact has none.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// CRM follow-up task due date, in business days from draft creation.
    #[serde(default = "default_task_due_days")]
    pub crm_task_due_business_days: u32,

    /// Label applied to the email thread after draft creation.
    #[serde(default = "default_thread_label")]
    pub thread_label: String,

    /// Phrases that must never appear in an outbound draft.
    #[serde(default)]
    pub banned_phrases: Vec<String>,

    /// ICP score at or above which a first-touch draft proposes a meeting.
    #[serde(default = "default_meeting_icp_threshold")]
    pub meeting_icp_threshold: f64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            voice_profile: None,
            min_length: default_min_length(),
            max_length: default_max_length(),
            asset_allowlist: Vec::new(),
            asset_cap: default_asset_cap(),
            slot_count: default_slot_count(),
            slot_duration_minutes: default_slot_duration(),
            business_start_hour: default_business_start(),
            business_end_hour: default_business_end(),
            default_timezone: default_timezone(),
            crm_task_due_business_days: default_task_due_days(),
            thread_label: default_thread_label(),
            banned_phrases: Vec::new(),
            meeting_icp_threshold: default_meeting_icp_threshold(),
        }
    }
}

fn default_min_length() -> usize {
    40
}

fn default_max_length() -> usize {
    4000
}

fn default_asset_cap() -> usize {
    3
}

fn default_slot_count() -> usize {
    3
}

fn default_slot_duration() -> u32 {
    30
}

fn default_business_start() -> u32 {
    9
}

fn default_business_end() -> u32 {
    17
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_task_due_days() -> u32 {
    2
}

fn default_thread_label() -> String {
    "pipeline/casey-os-draft".to_string()
}

fn default_meeting_icp_threshold() -> f64 {
    0.7
}

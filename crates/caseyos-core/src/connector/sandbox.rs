//! In-memory sandbox providers for every connector capability.
//!
//! The sandbox is the draft-only deployment target and the test fixture:
//! every capability behaves like a well-mannered provider, nothing leaves
//! the process, and tests can seed and inspect the shared world state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use super::{
    AssetConnector, AssetRef, BusyInterval, CalendarConnector, ConnectorError, ConnectorErrorKind,
    CrmAssociations, CrmCompany, CrmConnector, CrmContact, EmailConnector, EmailThread,
    MeetingSlot, SentMessage, ThreadMessage, ThreadRef,
};
use crate::llm::{GenerationParams, LlmConnector, LlmResponse, TokenUsage};

/// Shared mutable world state behind all sandbox providers.
#[derive(Default)]
struct WorldState {
    threads: Vec<EmailThread>,
    drafts: HashMap<String, PendingDraft>,
    sent: Vec<SentMessage>,
    labels: Vec<(String, String)>,
    crm_contacts: HashMap<String, CrmContact>,
    crm_companies: HashMap<String, CrmCompany>,
    crm_associations: HashMap<String, CrmAssociations>,
    crm_tasks: HashMap<String, (String, String, String)>,
    deal_updates: Vec<(String, String, String)>,
    assets: Vec<AssetRef>,
    events: Vec<(String, String, String)>,
}

#[derive(Clone)]
struct PendingDraft {
    to: String,
    subject: String,
    body: String,
}

/// Handle to the sandbox world. Clone freely; all clones share state.
#[derive(Clone)]
pub struct SandboxWorld {
    state: Arc<Mutex<WorldState>>,
    counter: Arc<AtomicU64>,
}

impl SandboxWorld {
    /// Create a fresh, empty world.
    pub fn shared() -> Self {
        Self {
            state: Arc::new(Mutex::new(WorldState::default())),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }

    /// Seed an email thread with a contact.
    pub fn seed_thread(&self, thread: EmailThread) {
        self.state.lock().expect("world lock").threads.push(thread);
    }

    /// Seed a CRM contact keyed by email.
    pub fn seed_crm_contact(&self, contact: CrmContact) {
        self.state
            .lock()
            .expect("world lock")
            .crm_contacts
            .insert(contact.email.to_lowercase(), contact);
    }

    /// Seed a CRM company keyed by domain.
    pub fn seed_crm_company(&self, company: CrmCompany) {
        self.state
            .lock()
            .expect("world lock")
            .crm_companies
            .insert(company.domain.to_lowercase(), company);
    }

    /// Seed associations for a CRM contact id.
    pub fn seed_associations(&self, contact_id: &str, associations: CrmAssociations) {
        self.state
            .lock()
            .expect("world lock")
            .crm_associations
            .insert(contact_id.to_string(), associations);
    }

    /// Seed a shareable asset.
    pub fn seed_asset(&self, asset: AssetRef) {
        self.state.lock().expect("world lock").assets.push(asset);
    }

    /// Messages sent through the sandbox email provider.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().expect("world lock").sent.clone()
    }

    /// CRM tasks created through the sandbox provider.
    pub fn crm_task_count(&self) -> usize {
        self.state.lock().expect("world lock").crm_tasks.len()
    }

    /// Labels applied to threads.
    pub fn thread_labels(&self) -> Vec<(String, String)> {
        self.state.lock().expect("world lock").labels.clone()
    }

    /// Whether an external draft with the given id still exists.
    pub fn has_draft(&self, external_draft_id: &str) -> bool {
        self.state
            .lock()
            .expect("world lock")
            .drafts
            .contains_key(external_draft_id)
    }
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

/// Sandbox email provider.
pub struct SandboxEmail {
    world: SandboxWorld,
}

impl SandboxEmail {
    pub fn new(world: SandboxWorld) -> Self {
        Self { world }
    }
}

#[async_trait::async_trait]
impl EmailConnector for SandboxEmail {
    async fn search_threads(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ThreadRef>, ConnectorError> {
        let needle = query.strip_prefix("from:").unwrap_or(query).to_lowercase();
        let state = self.world.state.lock().expect("world lock");
        let mut refs: Vec<ThreadRef> = state
            .threads
            .iter()
            .filter(|t| {
                t.messages
                    .iter()
                    .any(|m| m.from.to_lowercase().contains(&needle))
            })
            .map(|t| ThreadRef {
                thread_id: t.thread_id.clone(),
                subject: t.subject.clone(),
                last_message_at: t
                    .messages
                    .last()
                    .map(|m| m.sent_at.clone())
                    .unwrap_or_default(),
            })
            .collect();
        refs.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        refs.truncate(limit as usize);
        Ok(refs)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<EmailThread, ConnectorError> {
        let state = self.world.state.lock().expect("world lock");
        state
            .threads
            .iter()
            .find(|t| t.thread_id == thread_id)
            .cloned()
            .ok_or_else(|| {
                ConnectorError::new(
                    "email",
                    "get_thread",
                    ConnectorErrorKind::NotFound,
                    format!("thread {thread_id} not found"),
                )
            })
    }

    async fn create_draft(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        _thread_headers: &HashMap<String, String>,
    ) -> Result<String, ConnectorError> {
        let id = self.world.next_id("draft");
        self.world.state.lock().expect("world lock").drafts.insert(
            id.clone(),
            PendingDraft {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            },
        );
        Ok(id)
    }

    async fn send(&self, external_draft_id: &str) -> Result<SentMessage, ConnectorError> {
        let mut state = self.world.state.lock().expect("world lock");
        let draft = state.drafts.remove(external_draft_id).ok_or_else(|| {
            ConnectorError::new(
                "email",
                "send",
                ConnectorErrorKind::NotFound,
                format!("draft {external_draft_id} not found"),
            )
        })?;

        let message_id = format!("msg-{external_draft_id}");
        let thread_id = format!("th-{external_draft_id}");
        let sent = SentMessage {
            message_id: message_id.clone(),
            thread_id: thread_id.clone(),
        };
        state.sent.push(sent.clone());
        state.threads.push(EmailThread {
            thread_id,
            subject: draft.subject,
            messages: vec![ThreadMessage {
                message_id,
                from: "casey@caseyos.local".to_string(),
                to: draft.to,
                sent_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                snippet: draft.body.chars().take(120).collect(),
            }],
        });
        Ok(sent)
    }

    async fn delete_draft(&self, external_draft_id: &str) -> Result<(), ConnectorError> {
        self.world
            .state
            .lock()
            .expect("world lock")
            .drafts
            .remove(external_draft_id);
        Ok(())
    }

    async fn label_thread(&self, thread_id: &str, label: &str) -> Result<(), ConnectorError> {
        self.world
            .state
            .lock()
            .expect("world lock")
            .labels
            .push((thread_id.to_string(), label.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CRM
// ---------------------------------------------------------------------------

/// Sandbox CRM provider.
pub struct SandboxCrm {
    world: SandboxWorld,
}

impl SandboxCrm {
    pub fn new(world: SandboxWorld) -> Self {
        Self { world }
    }
}

#[async_trait::async_trait]
impl CrmConnector for SandboxCrm {
    async fn find_contact_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CrmContact>, ConnectorError> {
        let state = self.world.state.lock().expect("world lock");
        Ok(state.crm_contacts.get(&email.to_lowercase()).cloned())
    }

    async fn find_company_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<CrmCompany>, ConnectorError> {
        let state = self.world.state.lock().expect("world lock");
        Ok(state.crm_companies.get(&domain.to_lowercase()).cloned())
    }

    async fn associations(&self, contact_id: &str) -> Result<CrmAssociations, ConnectorError> {
        let state = self.world.state.lock().expect("world lock");
        Ok(state
            .crm_associations
            .get(contact_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_task(
        &self,
        contact_id: &str,
        title: &str,
        due_at: &str,
    ) -> Result<String, ConnectorError> {
        let id = self.world.next_id("task");
        self.world.state.lock().expect("world lock").crm_tasks.insert(
            id.clone(),
            (contact_id.to_string(), title.to_string(), due_at.to_string()),
        );
        Ok(id)
    }

    async fn update_task(
        &self,
        task_id: &str,
        title: Option<&str>,
        due_at: Option<&str>,
    ) -> Result<(), ConnectorError> {
        let mut state = self.world.state.lock().expect("world lock");
        let task = state.crm_tasks.get_mut(task_id).ok_or_else(|| {
            ConnectorError::new(
                "crm",
                "update_task",
                ConnectorErrorKind::NotFound,
                format!("task {task_id} not found"),
            )
        })?;
        if let Some(title) = title {
            task.1 = title.to_string();
        }
        if let Some(due_at) = due_at {
            task.2 = due_at.to_string();
        }
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), ConnectorError> {
        self.world
            .state
            .lock()
            .expect("world lock")
            .crm_tasks
            .remove(task_id);
        Ok(())
    }

    async fn update_deal(
        &self,
        deal_id: &str,
        property: &str,
        value: &str,
    ) -> Result<(), ConnectorError> {
        self.world
            .state
            .lock()
            .expect("world lock")
            .deal_updates
            .push((deal_id.to_string(), property.to_string(), value.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

/// Sandbox calendar provider.
///
/// Slot proposal is the real algorithm (business hours, weekend skipping,
/// 1–3 business days out); only freebusy is stubbed empty.
pub struct SandboxCalendar;

impl SandboxCalendar {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl CalendarConnector for SandboxCalendar {
    async fn freebusy(
        &self,
        _range_start: &str,
        _range_end: &str,
        _calendars: &[String],
    ) -> Result<Vec<BusyInterval>, ConnectorError> {
        Ok(Vec::new())
    }

    async fn propose_slots(
        &self,
        duration_minutes: u32,
        count: usize,
        business_hours: (u32, u32),
        timezone: &str,
    ) -> Result<Vec<MeetingSlot>, ConnectorError> {
        propose_business_slots(Utc::now(), duration_minutes, count, business_hours, timezone)
    }

    async fn create_event(
        &self,
        title: &str,
        start: &str,
        _end: &str,
        _attendees: &[String],
    ) -> Result<String, ConnectorError> {
        Ok(format!("event-{}-{}", title.len(), start.len()))
    }
}

/// Compute open meeting slots starting 1–3 business days after `from`.
///
/// One slot per business day at the start of business hours, in the given
/// timezone, skipping Saturdays and Sundays.
pub fn propose_business_slots(
    from: DateTime<Utc>,
    duration_minutes: u32,
    count: usize,
    business_hours: (u32, u32),
    timezone: &str,
) -> Result<Vec<MeetingSlot>, ConnectorError> {
    let tz: Tz = timezone.parse().map_err(|_| {
        ConnectorError::new(
            "calendar",
            "propose_slots",
            ConnectorErrorKind::Permanent,
            format!("unknown timezone '{timezone}'"),
        )
    })?;

    let (start_hour, end_hour) = business_hours;
    let local_now = from.with_timezone(&tz);
    let mut slots = Vec::with_capacity(count);
    let mut day = local_now.date_naive();
    let mut business_days_ahead = 0u32;

    while slots.len() < count && business_days_ahead < 30 {
        day = day.succ_opt().ok_or_else(|| {
            ConnectorError::new(
                "calendar",
                "propose_slots",
                ConnectorErrorKind::Permanent,
                "date overflow",
            )
        })?;
        if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }
        business_days_ahead += 1;

        let Some(naive_start) = day.and_hms_opt(start_hour, 0, 0) else {
            continue;
        };
        let Some(start_local) = tz.from_local_datetime(&naive_start).earliest() else {
            continue;
        };
        let end_local = start_local + Duration::minutes(i64::from(duration_minutes));
        if end_local.time().hour() >= end_hour && end_local.time().minute() > 0 {
            continue;
        }

        slots.push(MeetingSlot {
            start: start_local.to_rfc3339(),
            end: end_local.to_rfc3339(),
            timezone: timezone.to_string(),
        });
    }

    Ok(slots)
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Sandbox asset store.
pub struct SandboxAssets {
    world: SandboxWorld,
}

impl SandboxAssets {
    pub fn new(world: SandboxWorld) -> Self {
        Self { world }
    }
}

#[async_trait::async_trait]
impl AssetConnector for SandboxAssets {
    async fn search(
        &self,
        query: &str,
        allowlist: &[String],
    ) -> Result<Vec<AssetRef>, ConnectorError> {
        let needle = query.to_lowercase();
        let state = self.world.state.lock().expect("world lock");
        Ok(state
            .assets
            .iter()
            .filter(|a| allowlist.iter().any(|s| s == &a.source))
            .filter(|a| {
                needle.is_empty()
                    || needle
                        .split_whitespace()
                        .any(|word| a.title.to_lowercase().contains(word))
            })
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// Deterministic sandbox LLM: composes a serviceable body without a network.
pub struct SandboxLlm;

impl SandboxLlm {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl LlmConnector for SandboxLlm {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn generate(
        &self,
        _system: &str,
        user_message: &str,
        _params: &GenerationParams,
    ) -> Result<LlmResponse, ConnectorError> {
        // Echo enough of the brief to make tests meaningful while staying
        // deterministic: greet, reference the ask, close with a question.
        let text = format!(
            "Hi there,\n\nThanks for reaching out. I read through what you shared and \
             I think there's a clear next step here. {}\n\nWould any of the times I \
             suggested work for a quick call?\n\nBest,\nCasey",
            user_message.lines().next().unwrap_or_default()
        );
        Ok(LlmResponse {
            text,
            usage: TokenUsage {
                input_tokens: user_message.len() as u32 / 4,
                output_tokens: 60,
            },
            model: "sandbox".to_string(),
        })
    }
}

//! Planning and composition steps of the draft pipeline (steps 8–9).
//!
//! Step 8 is a deterministic rule, not an LLM call: the context decides the
//! single primary call to action. Step 9 renders the prompt as a pure
//! function of the gathered context (every lookup has an explicit default),
//! asks the LLM for the body, and post-processes the result through the
//! safety checks.

use crate::config::Config;
use crate::connector::{AssetRef, MeetingSlot};
use crate::llm::{generate_with_retry, GenerationParams, LlmConnector};
use crate::safety;
use crate::workflow::{Cta, DraftContent, LeadPayload, ResolvedParty, StepOutcome, ThreadContext};

/// Everything gathered before planning and composition.
#[derive(Debug, Clone)]
pub struct DraftContext {
    pub lead: LeadPayload,
    pub party: ResolvedParty,
    pub thread: Option<ThreadContext>,
    pub patterns: Vec<String>,
    pub assets: Vec<AssetRef>,
    pub slots: Vec<MeetingSlot>,
}

/// Step 8: choose the single primary call to action.
///
/// An existing thread means we are replying; a strong ICP with no history
/// earns a meeting ask; useful collateral gets shared; everything else is a
/// nurture touch.
pub fn plan_next_step(context: &DraftContext, config: &Config) -> Cta {
    if context.thread.is_some() {
        return Cta::ReplyForInfo;
    }
    if context
        .party
        .icp_score
        .is_some_and(|icp| icp >= config.draft.meeting_icp_threshold)
    {
        return Cta::BookMeeting;
    }
    if !context.assets.is_empty() {
        return Cta::ShareAsset;
    }
    Cta::Nurture
}

/// Compose the subject line. Replies reuse the thread subject; fresh
/// outreach names the company (or falls back to the contact).
pub fn compose_subject(context: &DraftContext) -> String {
    if let Some(thread) = &context.thread {
        if thread.subject.to_lowercase().starts_with("re:") {
            return thread.subject.clone();
        }
        return format!("Re: {}", thread.subject);
    }
    match context.party.company_name.as_deref() {
        Some(company) => format!("Quick intro for {company}"),
        None => format!("Quick intro for {}", context.lead.display_name()),
    }
}

/// Render the generation prompt as a pure function of the context.
///
/// Returns `(system, user)`. Every field has an explicit default; nothing is
/// looked up at render time.
pub fn compose_prompt(context: &DraftContext, cta: Cta, config: &Config) -> (String, String) {
    let voice = config
        .draft
        .voice_profile
        .as_deref()
        .unwrap_or("Warm, direct, and brief. One ask per email. No hype.");

    let system = format!(
        "You write outbound sales emails for CaseyOS. Voice profile: {voice} \
         Write plain text only, under 180 words, with exactly one call to action."
    );

    let mut user = String::new();
    user.push_str(&format!(
        "Write an email to {} <{}> at {}.\n",
        context.party.contact_name.as_deref().unwrap_or("there"),
        context.party.contact_email,
        context.party.company_name.as_deref().unwrap_or("their company"),
    ));
    user.push_str(&format!(
        "Industry: {}.\n",
        context.party.company_industry.as_deref().unwrap_or("unknown")
    ));

    if let Some(message) = &context.lead.message {
        user.push_str(&format!("They wrote: \"{message}\"\n"));
    }

    match &context.thread {
        Some(thread) => {
            user.push_str(&format!(
                "This continues the thread \"{}\". Recent messages:\n",
                thread.subject
            ));
            for message in &thread.recent_messages {
                user.push_str(&format!("- {message}\n"));
            }
        }
        None => user.push_str("This is a first touch; there is no prior thread.\n"),
    }

    if !context.patterns.is_empty() {
        user.push_str("Patterns that worked before:\n");
        for pattern in &context.patterns {
            user.push_str(&format!("- {pattern}\n"));
        }
    }

    if !context.assets.is_empty() {
        user.push_str("Assets you may reference:\n");
        for asset in &context.assets {
            user.push_str(&format!("- {} ({})\n", asset.title, asset.url));
        }
    }

    if !context.slots.is_empty() {
        user.push_str("Offer these meeting times:\n");
        for slot in &context.slots {
            user.push_str(&format!("- {} ({})\n", slot.start, slot.timezone));
        }
    }

    let cta_line = match cta {
        Cta::BookMeeting => "Primary call to action: propose a short intro call.",
        Cta::ReplyForInfo => "Primary call to action: answer their question and ask one clarifying question.",
        Cta::ShareAsset => "Primary call to action: share the most relevant asset.",
        Cta::Nurture => "Primary call to action: a light check-in, no hard ask.",
    };
    user.push_str(cta_line);

    (system, user)
}

/// Step 9: write the draft via the LLM and post-process it.
///
/// A PII hit is a permanent failure; transient LLM trouble is retried by the
/// runtime like any other connector failure.
pub async fn write_draft(
    llm: &dyn LlmConnector,
    context: &DraftContext,
    cta: Cta,
    config: &Config,
) -> StepOutcome<DraftContent> {
    let (system, user) = compose_prompt(context, cta, config);
    let params = GenerationParams {
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
    };

    let response = match generate_with_retry(llm, &system, &user, &params).await {
        Ok(response) => response,
        Err(e) => {
            return StepOutcome::Failed {
                detail: e.to_string(),
                transient: e.is_retryable(),
            }
        }
    };

    match safety::postprocess_draft(&response.text, &config.draft) {
        Ok(body) => StepOutcome::Ok(DraftContent {
            subject: compose_subject(context),
            body,
        }),
        // Safety rejections (PII included) are permanent; the runtime must
        // never retry them.
        Err(e) => StepOutcome::Failed {
            detail: e.to_string(),
            transient: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_context() -> DraftContext {
        DraftContext {
            lead: LeadPayload {
                email: "ann@acme.com".to_string(),
                first_name: Some("Ann".to_string()),
                last_name: None,
                company_name: Some("Acme".to_string()),
                message: Some("How does pricing work?".to_string()),
                timezone: None,
            },
            party: ResolvedParty {
                contact_id: "c-1".to_string(),
                contact_email: "ann@acme.com".to_string(),
                contact_name: Some("Ann".to_string()),
                contact_timezone: None,
                company_id: Some("co-1".to_string()),
                company_domain: Some("acme.com".to_string()),
                company_name: Some("Acme".to_string()),
                company_industry: Some("software".to_string()),
                icp_score: None,
                deal_amount: None,
            },
            thread: None,
            patterns: vec![],
            assets: vec![],
            slots: vec![],
        }
    }

    fn thread() -> ThreadContext {
        ThreadContext {
            thread_id: "th-1".to_string(),
            subject: "Pricing question".to_string(),
            recent_messages: vec!["ann@acme.com: How does pricing work?".to_string()],
        }
    }

    #[test]
    fn existing_thread_means_reply() {
        let mut context = base_context();
        context.thread = Some(thread());
        context.party.icp_score = Some(0.99);
        assert_eq!(plan_next_step(&context, &Config::default()), Cta::ReplyForInfo);
    }

    #[test]
    fn high_icp_without_thread_books_meeting() {
        let mut context = base_context();
        context.party.icp_score = Some(0.8);
        assert_eq!(plan_next_step(&context, &Config::default()), Cta::BookMeeting);
    }

    #[test]
    fn assets_without_icp_share() {
        let mut context = base_context();
        context.assets.push(AssetRef {
            id: "a-1".to_string(),
            title: "Case study".to_string(),
            url: "https://assets/cs".to_string(),
            source: "drive".to_string(),
        });
        assert_eq!(plan_next_step(&context, &Config::default()), Cta::ShareAsset);
    }

    #[test]
    fn default_is_nurture() {
        assert_eq!(plan_next_step(&base_context(), &Config::default()), Cta::Nurture);
    }

    #[test]
    fn subject_names_the_company_on_first_touch() {
        let subject = compose_subject(&base_context());
        assert!(subject.contains("Acme"), "got: {subject}");
    }

    #[test]
    fn subject_reuses_thread_subject_without_stacking_re() {
        let mut context = base_context();
        context.thread = Some(thread());
        assert_eq!(compose_subject(&context), "Re: Pricing question");

        context.thread.as_mut().expect("thread").subject = "Re: Pricing question".to_string();
        assert_eq!(compose_subject(&context), "Re: Pricing question");
    }

    #[test]
    fn prompt_is_pure_and_carries_context() {
        let mut context = base_context();
        context.slots.push(MeetingSlot {
            start: "2026-07-06T09:00:00-04:00".to_string(),
            end: "2026-07-06T09:30:00-04:00".to_string(),
            timezone: "America/New_York".to_string(),
        });
        let config = Config::default();

        let (system_a, user_a) = compose_prompt(&context, Cta::BookMeeting, &config);
        let (system_b, user_b) = compose_prompt(&context, Cta::BookMeeting, &config);
        assert_eq!(system_a, system_b);
        assert_eq!(user_a, user_b);

        assert!(user_a.contains("ann@acme.com"));
        assert!(user_a.contains("How does pricing work?"));
        assert!(user_a.contains("2026-07-06T09:00:00-04:00"));
        assert!(user_a.contains("intro call"));
    }

    #[test]
    fn prompt_has_defaults_for_sparse_context() {
        let mut context = base_context();
        context.lead.message = None;
        context.party.contact_name = None;
        context.party.company_name = None;
        context.party.company_industry = None;

        let (_, user) = compose_prompt(&context, Cta::Nurture, &Config::default());
        assert!(user.contains("there"));
        assert!(user.contains("their company"));
        assert!(user.contains("unknown"));
    }

    #[tokio::test]
    async fn write_draft_postprocesses_sandbox_output() {
        let registry = crate::connector::ConnectorRegistry::sandbox();
        let outcome = write_draft(
            registry.llm.as_ref(),
            &base_context(),
            Cta::Nurture,
            &Config::default(),
        )
        .await;

        let draft = outcome.ok().expect("draft written");
        assert!(draft.subject.contains("Acme"));
        assert!(!draft.body.contains('\u{2014}'));
        assert!(draft.body.len() >= 40);
    }
}

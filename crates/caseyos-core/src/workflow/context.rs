//! Context-gathering steps of the draft pipeline (steps 1–7).
//!
//! Step 2 must complete before 3–7 because later steps need the resolved
//! contact; the orchestrator runs 3–7 concurrently and joins before
//! planning. Every step returns a [`StepOutcome`] so failures are data, not
//! control flow.

use crate::config::Config;
use crate::connector::{
    with_backoff, AssetConnector, AssetRef, CalendarConnector, ConnectorRegistry, EmailConnector,
    MeetingSlot, ThreadRef,
};
use crate::ingest::SignalSource;
use crate::storage::{companies, contacts, new_id, signals, DbPool};
use crate::workflow::{
    with_deadline, LeadPayload, MemoryStore, ResolvedParty, StepOutcome, ThreadContext,
};

/// Domains that identify a person, not a company.
const FREEMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "icloud.com",
    "proton.me",
];

/// Industry lookup table keyed by domain keyword. Deliberately a table, not
/// an inference call.
const INDUSTRY_KEYWORDS: &[(&str, &str)] = &[
    ("bank", "financial services"),
    ("capital", "financial services"),
    ("health", "healthcare"),
    ("med", "healthcare"),
    ("shop", "retail"),
    ("store", "retail"),
    ("law", "legal"),
    ("agency", "marketing"),
    ("labs", "software"),
    ("soft", "software"),
    ("tech", "software"),
    ("ai", "software"),
];

/// Guess an industry from a company domain. Returns `None` when no keyword
/// matches; callers keep their explicit default.
pub fn detect_industry(domain: &str) -> Option<&'static str> {
    let name = domain.split('.').next().unwrap_or(domain).to_lowercase();
    INDUSTRY_KEYWORDS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|(_, industry)| *industry)
}

/// Step 1: validate the signal payload into a lead.
///
/// A malformed payload is a permanent failure; the workflow goes dead.
pub fn validate_payload(signal: &signals::Signal) -> StepOutcome<LeadPayload> {
    let payload: serde_json::Value = match serde_json::from_str(&signal.payload) {
        Ok(value) => value,
        Err(e) => {
            return StepOutcome::Failed {
                detail: format!("payload is not JSON: {e}"),
                transient: false,
            }
        }
    };

    let get = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let Some(email) = get("email").map(|e| e.to_lowercase()) else {
        return StepOutcome::Failed {
            detail: "missing required field: email".to_string(),
            transient: false,
        };
    };
    if !email.contains('@') || !email.rsplit('@').next().is_some_and(|d| d.contains('.')) {
        return StepOutcome::Failed {
            detail: format!("unparseable email: {email}"),
            transient: false,
        };
    }

    StepOutcome::Ok(LeadPayload {
        email,
        first_name: get("firstname").or_else(|| get("first_name")),
        last_name: get("lastname").or_else(|| get("last_name")),
        company_name: get("company"),
        message: get("message"),
        timezone: get("timezone"),
    })
}

/// Step 2: resolve contact and company, creating local shells when the CRM
/// has nothing.
///
/// Transient CRM failures fail the step (the runtime retries); permanent
/// ones downgrade to the local shell and the pipeline continues.
pub async fn resolve_contact(
    pool: &DbPool,
    registry: &ConnectorRegistry,
    config: &Config,
    lead: &LeadPayload,
    source: SignalSource,
) -> StepOutcome<ResolvedParty> {
    let name = match (&lead.first_name, &lead.last_name) {
        (None, None) => None,
        _ => Some(lead.display_name()),
    };

    let contact = match contacts::upsert_by_email(
        pool,
        &new_id(),
        &lead.email,
        name.as_deref(),
        lead.company_name.as_deref(),
    )
    .await
    {
        Ok(contact) => contact,
        Err(e) => {
            return StepOutcome::Failed {
                detail: format!("contact upsert failed: {e}"),
                transient: true,
            }
        }
    };

    // Inbound leads join the inbound segment, which the default scoring
    // strategy counts as a target segment.
    if matches!(source, SignalSource::Form) {
        if let Err(e) = contacts::add_segment(pool, &contact.id, "inbound").await {
            return StepOutcome::Failed {
                detail: format!("segment update failed: {e}"),
                transient: true,
            };
        }
    }

    let timeout = config.runtime.connector_timeout_seconds;
    let mut party = ResolvedParty {
        contact_id: contact.id.clone(),
        contact_email: contact.email.clone(),
        contact_name: contact.name.clone().or(name),
        contact_timezone: lead.timezone.clone().or(contact.timezone.clone()),
        company_id: None,
        company_domain: None,
        company_name: lead.company_name.clone(),
        company_industry: None,
        icp_score: None,
        deal_amount: None,
    };

    // Local company shell from the email domain, unless it's freemail.
    let domain = contact.email.rsplit('@').next().unwrap_or("").to_string();
    let is_company_domain = !domain.is_empty() && !FREEMAIL_DOMAINS.contains(&domain.as_str());
    if is_company_domain {
        let industry = detect_industry(&domain);
        match companies::upsert_by_domain(
            pool,
            &new_id(),
            &domain,
            lead.company_name.as_deref(),
            industry,
        )
        .await
        {
            Ok(company) => {
                party.company_id = Some(company.id);
                party.company_domain = Some(company.domain);
                party.company_name = company.name.or(party.company_name);
                party.company_industry = company.industry;
                party.icp_score = company.icp_score;
            }
            Err(e) => {
                return StepOutcome::Failed {
                    detail: format!("company upsert failed: {e}"),
                    transient: true,
                }
            }
        }
    }

    // Enrich from the CRM. Permanent failures downgrade to the local shell.
    let crm = registry.crm.as_ref();
    let crm_contact = with_backoff(|| {
        with_deadline(
            "crm",
            "find_contact_by_email",
            timeout,
            crm.find_contact_by_email(&contact.email),
        )
    })
    .await;

    match crm_contact {
        Ok(Some(remote)) => {
            if let Err(e) =
                contacts::set_external_id(pool, &contact.id, "crm", &remote.external_id).await
            {
                return StepOutcome::Failed {
                    detail: format!("external id update failed: {e}"),
                    transient: true,
                };
            }
            if party.contact_name.is_none() {
                party.contact_name = remote.name;
            }

            let associations = with_backoff(|| {
                with_deadline(
                    "crm",
                    "associations",
                    timeout,
                    crm.associations(&remote.external_id),
                )
            })
            .await;
            match associations {
                Ok(associations) => party.deal_amount = associations.open_deal_amount,
                Err(e) if e.is_retryable() => {
                    return StepOutcome::Failed {
                        detail: e.to_string(),
                        transient: true,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "CRM associations unavailable, continuing");
                }
            }
        }
        Ok(None) => {}
        Err(e) if e.is_retryable() => {
            return StepOutcome::Failed {
                detail: e.to_string(),
                transient: true,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "CRM contact lookup failed permanently, using local shell");
        }
    }

    if is_company_domain {
        let crm_company = with_backoff(|| {
            with_deadline(
                "crm",
                "find_company_by_domain",
                timeout,
                crm.find_company_by_domain(&domain),
            )
        })
        .await;
        match crm_company {
            Ok(Some(remote)) => {
                if party.company_name.is_none() {
                    party.company_name = remote.name;
                }
                if party.company_industry.is_none() {
                    party.company_industry = remote.industry;
                }
                if let Some(icp) = remote.icp_score {
                    party.icp_score = Some(icp);
                    if let Some(company_id) = &party.company_id {
                        if let Err(e) = companies::set_icp_score(pool, company_id, icp).await {
                            return StepOutcome::Failed {
                                detail: format!("icp update failed: {e}"),
                                transient: true,
                            };
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                return StepOutcome::Failed {
                    detail: e.to_string(),
                    transient: true,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "CRM company lookup failed permanently, using local shell");
            }
        }
    }

    StepOutcome::Ok(party)
}

/// Step 3: search prior threads with the contact.
pub async fn search_threads(
    email: &dyn EmailConnector,
    contact_email: &str,
    timeout: u64,
) -> StepOutcome<Vec<ThreadRef>> {
    let query = format!("from:{contact_email}");
    match with_backoff(|| with_deadline("email", "search_threads", timeout, email.search_threads(&query, 10)))
        .await
    {
        Ok(refs) => StepOutcome::Ok(refs),
        Err(e) => StepOutcome::Failed {
            detail: e.to_string(),
            transient: e.is_retryable(),
        },
    }
}

/// Step 4: read the top thread's recent context. Skipped when step 3 found
/// nothing.
pub async fn read_thread_context(
    email: &dyn EmailConnector,
    threads: &[ThreadRef],
    timeout: u64,
) -> StepOutcome<ThreadContext> {
    let Some(top) = threads.first() else {
        return StepOutcome::Skipped("no prior threads".to_string());
    };

    match with_deadline("email", "get_thread", timeout, email.get_thread(&top.thread_id)).await {
        Ok(thread) => {
            let recent_messages: Vec<String> = thread
                .messages
                .iter()
                .rev()
                .take(3)
                .rev()
                .map(|m| format!("{}: {}", m.from, m.snippet))
                .collect();
            StepOutcome::Ok(ThreadContext {
                thread_id: thread.thread_id,
                subject: thread.subject,
                recent_messages,
            })
        }
        Err(e) => StepOutcome::Skipped(format!("thread fetch failed: {e}")),
    }
}

/// Step 5: recall prior successful patterns from the optional memory store.
pub async fn recall_patterns(
    memory: Option<&dyn MemoryStore>,
    topic: &str,
) -> StepOutcome<Vec<String>> {
    let Some(memory) = memory else {
        return StepOutcome::Skipped("no memory store configured".to_string());
    };
    match memory.recall_similar(topic, 3).await {
        Ok(patterns) => StepOutcome::Ok(patterns),
        Err(e) => StepOutcome::Skipped(format!("memory recall failed: {e}")),
    }
}

/// Step 6: hunt shareable assets for this company/industry, capped.
pub async fn hunt_assets(
    assets: &dyn AssetConnector,
    config: &Config,
    party: &ResolvedParty,
) -> StepOutcome<Vec<AssetRef>> {
    let query = format!(
        "{} {}",
        party.company_name.as_deref().unwrap_or(""),
        party.company_industry.as_deref().unwrap_or("")
    );
    match with_deadline(
        "assets",
        "search",
        config.runtime.connector_timeout_seconds,
        assets.search(query.trim(), &config.draft.asset_allowlist),
    )
    .await
    {
        Ok(mut refs) => {
            refs.truncate(config.draft.asset_cap);
            StepOutcome::Ok(refs)
        }
        Err(e) => StepOutcome::Skipped(format!("asset search failed: {e}")),
    }
}

/// Step 7: propose meeting slots in the contact's timezone.
pub async fn propose_slots(
    calendar: &dyn CalendarConnector,
    config: &Config,
    party: &ResolvedParty,
) -> StepOutcome<Vec<MeetingSlot>> {
    let timezone = party
        .contact_timezone
        .as_deref()
        .unwrap_or(&config.draft.default_timezone);
    match with_deadline(
        "calendar",
        "propose_slots",
        config.runtime.connector_timeout_seconds,
        calendar.propose_slots(
            config.draft.slot_duration_minutes,
            config.draft.slot_count,
            (config.draft.business_start_hour, config.draft.business_end_hour),
            timezone,
        ),
    )
    .await
    {
        Ok(slots) => StepOutcome::Ok(slots),
        Err(e) => StepOutcome::Skipped(format!("slot proposal failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::sandbox::SandboxWorld;
    use crate::connector::{CrmAssociations, CrmContact};
    use crate::storage::init_test_db;

    fn signal_with(payload: &str) -> signals::Signal {
        signals::Signal {
            id: "sig-1".to_string(),
            source: "form".to_string(),
            kind: "lead".to_string(),
            dedupe_hash: "h".to_string(),
            payload: payload.to_string(),
            received_at: "2026-07-01T00:00:00Z".to_string(),
            processed_at: None,
            workflow_id: None,
            created_at: "2026-07-01T00:00:00Z".to_string(),
            updated_at: "2026-07-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn validate_accepts_form_lead() {
        let signal = signal_with(
            r#"{"form_id":"f1","email":"Ann@Acme.com","firstname":"Ann","company":"Acme"}"#,
        );
        let lead = validate_payload(&signal).ok().expect("valid lead");
        assert_eq!(lead.email, "ann@acme.com");
        assert_eq!(lead.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn validate_rejects_missing_email_permanently() {
        let signal = signal_with(r#"{"form_id":"f1"}"#);
        match validate_payload(&signal) {
            StepOutcome::Failed { transient, detail } => {
                assert!(!transient);
                assert!(detail.contains("email"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_unparseable_email() {
        let signal = signal_with(r#"{"email":"not-an-email"}"#);
        assert!(matches!(
            validate_payload(&signal),
            StepOutcome::Failed { transient: false, .. }
        ));
    }

    #[test]
    fn industry_lookup_table() {
        assert_eq!(detect_industry("firstbank.com"), Some("financial services"));
        assert_eq!(detect_industry("acmetech.io"), Some("software"));
        assert_eq!(detect_industry("example.com"), None);
    }

    fn lead(email: &str, company: Option<&str>) -> LeadPayload {
        LeadPayload {
            email: email.to_string(),
            first_name: Some("Ann".to_string()),
            last_name: None,
            company_name: company.map(String::from),
            message: None,
            timezone: None,
        }
    }

    #[tokio::test]
    async fn resolve_creates_local_shells_and_inbound_segment() {
        let pool = init_test_db().await.expect("init db");
        let registry = ConnectorRegistry::sandbox();
        let config = Config::default();

        let party = resolve_contact(
            &pool,
            &registry,
            &config,
            &lead("ann@acme.com", Some("Acme")),
            SignalSource::Form,
        )
        .await
        .ok()
        .expect("resolved");

        assert_eq!(party.contact_email, "ann@acme.com");
        assert_eq!(party.company_domain.as_deref(), Some("acme.com"));

        let contact = contacts::get_by_id(&pool, &party.contact_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(contact.segment_list().expect("segments"), vec!["inbound"]);
        assert!(companies::get_by_domain(&pool, "acme.com")
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn resolve_skips_company_for_freemail() {
        let pool = init_test_db().await.expect("init db");
        let registry = ConnectorRegistry::sandbox();
        let config = Config::default();

        let party = resolve_contact(
            &pool,
            &registry,
            &config,
            &lead("ann@gmail.com", None),
            SignalSource::Form,
        )
        .await
        .ok()
        .expect("resolved");

        assert!(party.company_id.is_none());
        assert!(companies::get_by_domain(&pool, "gmail.com")
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn resolve_enriches_from_crm() {
        let pool = init_test_db().await.expect("init db");
        let world = SandboxWorld::shared();
        world.seed_crm_contact(CrmContact {
            external_id: "crm-7".to_string(),
            email: "ann@acme.com".to_string(),
            name: Some("Ann Lee".to_string()),
            title: Some("VP Ops".to_string()),
            company_domain: Some("acme.com".to_string()),
        });
        world.seed_associations(
            "crm-7",
            CrmAssociations {
                company_id: Some("co-1".to_string()),
                deal_ids: vec!["deal-1".to_string()],
                open_deal_amount: Some(12_000.0),
            },
        );
        let registry = ConnectorRegistry::sandbox_with(world);
        let config = Config::default();

        let party = resolve_contact(
            &pool,
            &registry,
            &config,
            &lead("ann@acme.com", Some("Acme")),
            SignalSource::Crm,
        )
        .await
        .ok()
        .expect("resolved");

        assert_eq!(party.deal_amount, Some(12_000.0));
        let contact = contacts::get_by_id(&pool, &party.contact_id)
            .await
            .expect("get")
            .expect("exists");
        let external: serde_json::Value =
            serde_json::from_str(&contact.external_ids).expect("json");
        assert_eq!(external["crm"], "crm-7");
    }

    #[tokio::test]
    async fn thread_context_skips_when_empty() {
        let registry = ConnectorRegistry::sandbox();
        let outcome = read_thread_context(registry.email.as_ref(), &[], 60).await;
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn recall_without_memory_is_skipped() {
        let outcome = recall_patterns(None, "acme outreach").await;
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
    }
}

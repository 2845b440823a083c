//! Draft safety post-processing.
//!
//! Every LLM-written draft body passes through [`postprocess_draft`] before
//! it is persisted: em-dashes are stripped (idempotently), length bounds are
//! enforced, banned phrases are rejected, and a PII scan refuses bodies that
//! leak identifiers. A PII hit is a permanent safety rejection, never retried.

pub mod redact;

use std::sync::OnceLock;

use regex::Regex;

use crate::config::DraftConfig;
use crate::error::SafetyError;

fn ssn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn regex must compile"))
}

fn card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\d[ -]?){13,16}\b").expect("card number regex must compile")
    })
}

/// Strip em-dashes from generated text.
///
/// Idempotent: applying it twice is the same as applying it once.
pub fn strip_em_dashes(text: &str) -> String {
    text.replace(" \u{2014} ", ", ").replace('\u{2014}', "-")
}

/// Scan text for PII patterns. Returns the pattern class that matched.
pub fn scan_pii(text: &str) -> Option<&'static str> {
    if ssn_re().is_match(text) {
        return Some("ssn");
    }
    if card_re().is_match(text) {
        return Some("card");
    }
    None
}

/// Find the first banned phrase appearing in the text (case-insensitive).
pub fn find_banned_phrase(text: &str, banned: &[String]) -> Option<String> {
    let text_lower = text.to_lowercase();
    banned
        .iter()
        .find(|phrase| !phrase.is_empty() && text_lower.contains(&phrase.to_lowercase()))
        .cloned()
}

/// Post-process a drafted body: strip em-dashes, then enforce length bounds,
/// banned phrases, and the PII scan.
pub fn postprocess_draft(body: &str, config: &DraftConfig) -> Result<String, SafetyError> {
    let cleaned = strip_em_dashes(body);
    let trimmed = cleaned.trim().to_string();

    let length = trimmed.chars().count();
    if length < config.min_length || length > config.max_length {
        return Err(SafetyError::LengthOutOfBounds {
            length,
            min: config.min_length,
            max: config.max_length,
        });
    }

    if let Some(phrase) = find_banned_phrase(&trimmed, &config.banned_phrases) {
        return Err(SafetyError::BannedPhrase { phrase });
    }

    if let Some(pattern) = scan_pii(&trimmed) {
        return Err(SafetyError::PiiDetected {
            pattern: pattern.to_string(),
        });
    }

    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DraftConfig {
        DraftConfig {
            min_length: 10,
            max_length: 200,
            banned_phrases: vec!["act now".to_string()],
            ..DraftConfig::default()
        }
    }

    #[test]
    fn em_dash_strip_is_idempotent() {
        let input = "We ship fast \u{2014} and we mean it\u{2014}always.";
        let once = strip_em_dashes(input);
        let twice = strip_em_dashes(&once);
        assert_eq!(once, twice);
        assert!(!once.contains('\u{2014}'));
    }

    #[test]
    fn postprocess_accepts_clean_body() {
        let body = "Hi Ann, thanks for reaching out about pricing.";
        let result = postprocess_draft(body, &config()).expect("clean body");
        assert_eq!(result, body);
    }

    #[test]
    fn postprocess_rejects_short_body() {
        let err = postprocess_draft("Hi.", &config()).expect_err("too short");
        assert!(matches!(err, SafetyError::LengthOutOfBounds { .. }));
    }

    #[test]
    fn postprocess_rejects_ssn() {
        let err = postprocess_draft("Your SSN 123-45-6789 is on file with us.", &config())
            .expect_err("ssn");
        assert!(matches!(err, SafetyError::PiiDetected { .. }));
    }

    #[test]
    fn postprocess_rejects_card_number() {
        let err = postprocess_draft(
            "Card 4111 1111 1111 1111 was charged for your plan.",
            &config(),
        )
        .expect_err("card");
        assert!(matches!(err, SafetyError::PiiDetected { .. }));
    }

    #[test]
    fn postprocess_rejects_banned_phrase() {
        let err =
            postprocess_draft("Limited offer, ACT NOW and save big today.", &config())
                .expect_err("banned");
        match err {
            SafetyError::BannedPhrase { phrase } => assert_eq!(phrase, "act now"),
            other => panic!("expected banned phrase, got {other:?}"),
        }
    }

    #[test]
    fn plain_meeting_times_pass_the_card_scan() {
        let body = "Would Tuesday at 10:30 or Wednesday at 14:00 work for you?";
        assert!(scan_pii(body).is_none());
    }
}

//! Connector capability set.
//!
//! Each external system is reached through a narrow async trait; any
//! provider satisfying the capability can be swapped. All operations fail
//! with [`ConnectorError`], whose kind drives retry policy: `transient` and
//! `rate_limited` retry with backoff, everything else surfaces immediately.
//!
//! Providers are held in a [`ConnectorRegistry`] built once at process start
//! and injected into workers; there are no global connector singletons.

pub mod assets;
pub mod calendar;
pub mod crm;
pub mod email;
pub mod sandbox;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

pub use assets::{AssetConnector, AssetRef};
pub use calendar::{BusyInterval, CalendarConnector, MeetingSlot};
pub use crm::{CrmAssociations, CrmCompany, CrmConnector, CrmContact};
pub use email::{EmailConnector, EmailThread, SentMessage, ThreadMessage, ThreadRef};

/// Classification of a connector failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorErrorKind {
    /// Network failure, provider 5xx, or other retryable condition.
    Transient,
    /// Provider 4xx that will not succeed on retry.
    Permanent,
    /// Provider rate limit; retry after the hinted delay.
    RateLimited,
    /// Credentials expired; surfaces to the operator, never auto-retried.
    AuthExpired,
    /// The referenced remote object does not exist.
    NotFound,
}

/// Error from any connector operation.
#[derive(Debug, thiserror::Error)]
#[error("connector {connector} {operation} failed ({kind:?}): {message}")]
pub struct ConnectorError {
    /// Which capability failed (e.g. "email", "crm").
    pub connector: &'static str,
    /// Which operation failed (e.g. "search_threads").
    pub operation: &'static str,
    /// Failure classification.
    pub kind: ConnectorErrorKind,
    /// Provider-reported detail.
    pub message: String,
    /// Seconds to wait, when the provider hinted one.
    pub retry_after: Option<u64>,
}

impl ConnectorError {
    /// Build an error with no retry hint.
    pub fn new(
        connector: &'static str,
        operation: &'static str,
        kind: ConnectorErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            operation,
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether the retry helper may re-attempt this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ConnectorErrorKind::Transient | ConnectorErrorKind::RateLimited
        )
    }
}

/// Base delay for connector retries.
const RETRY_BASE_SECS: u64 = 60;

/// Maximum attempts (initial call + retries).
const RETRY_ATTEMPTS: u32 = 3;

/// Retry an async connector operation with exponential backoff and jitter.
///
/// Retries only `transient` and `rate_limited` failures, honoring a
/// provider `retry_after` hint when present. Backoff is
/// `base * 2^attempt + jitter(0..=base/2)`.
pub async fn with_backoff<T, F, Fut>(operation: F) -> Result<T, ConnectorError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, ConnectorError>>,
{
    let mut last_err = None;

    for attempt in 0..RETRY_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < RETRY_ATTEMPTS => {
                let backoff = err.retry_after.unwrap_or_else(|| {
                    let base = RETRY_BASE_SECS * 2u64.pow(attempt);
                    base + rand::thread_rng().gen_range(0..=RETRY_BASE_SECS / 2)
                });
                tracing::warn!(
                    connector = err.connector,
                    op = err.operation,
                    attempt,
                    backoff_secs = backoff,
                    error = %err,
                    "Connector call failed, retrying"
                );
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    // Unreachable in practice: the loop either returns Ok or the final Err.
    Err(last_err.unwrap_or_else(|| {
        ConnectorError::new(
            "unknown",
            "with_backoff",
            ConnectorErrorKind::Permanent,
            "retry loop exhausted without an error",
        )
    }))
}

/// The injected set of connector capabilities.
///
/// Built once at process start; workers receive it by `Arc`.
#[derive(Clone)]
pub struct ConnectorRegistry {
    pub email: Arc<dyn EmailConnector>,
    pub crm: Arc<dyn CrmConnector>,
    pub calendar: Arc<dyn CalendarConnector>,
    pub assets: Arc<dyn AssetConnector>,
    pub llm: Arc<dyn crate::llm::LlmConnector>,
}

impl ConnectorRegistry {
    /// A registry backed entirely by in-memory sandbox providers.
    ///
    /// This is the draft-only deployment and the test fixture: every
    /// capability works, nothing leaves the process.
    pub fn sandbox() -> Self {
        Self::sandbox_with(sandbox::SandboxWorld::shared())
    }

    /// A sandbox registry over an existing world, so callers can seed and
    /// inspect its state.
    pub fn sandbox_with(world: sandbox::SandboxWorld) -> Self {
        Self {
            email: Arc::new(sandbox::SandboxEmail::new(world.clone())),
            crm: Arc::new(sandbox::SandboxCrm::new(world.clone())),
            calendar: Arc::new(sandbox::SandboxCalendar::new()),
            assets: Arc::new(sandbox::SandboxAssets::new(world)),
            llm: Arc::new(sandbox::SandboxLlm::new()),
        }
    }
}

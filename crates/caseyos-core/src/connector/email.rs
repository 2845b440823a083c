//! Email capability: thread search, draft creation, sending.

use std::collections::HashMap;

use super::ConnectorError;

/// A thread reference returned by search.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThreadRef {
    pub thread_id: String,
    pub subject: String,
    /// Most recent activity timestamp, ISO-8601.
    pub last_message_at: String,
}

/// A single message within a thread.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThreadMessage {
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub sent_at: String,
    pub snippet: String,
}

/// A full thread with its messages, oldest first.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EmailThread {
    pub thread_id: String,
    pub subject: String,
    pub messages: Vec<ThreadMessage>,
}

/// Result of a successful send.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SentMessage {
    pub message_id: String,
    pub thread_id: String,
}

/// Email provider capability.
#[async_trait::async_trait]
pub trait EmailConnector: Send + Sync {
    /// Search threads matching a provider query string.
    async fn search_threads(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ThreadRef>, ConnectorError>;

    /// Fetch a full thread by id.
    async fn get_thread(&self, thread_id: &str) -> Result<EmailThread, ConnectorError>;

    /// Create a provider-side draft. Returns the external draft id.
    async fn create_draft(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_headers: &HashMap<String, String>,
    ) -> Result<String, ConnectorError>;

    /// Send a previously created draft.
    async fn send(&self, external_draft_id: &str) -> Result<SentMessage, ConnectorError>;

    /// Delete a provider-side draft. Idempotent: deleting a missing draft
    /// succeeds.
    async fn delete_draft(&self, external_draft_id: &str) -> Result<(), ConnectorError>;

    /// Apply a label to a thread. Best-effort bookkeeping.
    async fn label_thread(&self, thread_id: &str, label: &str) -> Result<(), ConnectorError>;
}

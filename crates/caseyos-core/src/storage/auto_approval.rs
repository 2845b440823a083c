//! Storage for auto-approval rules, the recipient whitelist, and the
//! decision log.
//!
//! The three built-in rules are seeded with stable readable ids so the
//! equal-priority tie-break (lower id wins) is deterministic across
//! deployments.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// A whitelist rule evaluated against drafts.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct AutoApprovalRule {
    pub id: String,
    /// One of `replied_before`, `known_good_recipient`, `high_icp_score`.
    pub kind: String,
    /// JSON map of rule parameters (e.g. `{"days": 90}`).
    pub conditions: String,
    pub confidence: f64,
    pub priority: i64,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl AutoApprovalRule {
    /// Read an integer condition with a default.
    pub fn condition_i64(&self, key: &str, default: i64) -> i64 {
        serde_json::from_str::<serde_json::Value>(&self.conditions)
            .ok()
            .and_then(|v| v.get(key).and_then(serde_json::Value::as_i64))
            .unwrap_or(default)
    }

    /// Read a float condition with a default.
    pub fn condition_f64(&self, key: &str, default: f64) -> f64 {
        serde_json::from_str::<serde_json::Value>(&self.conditions)
            .ok()
            .and_then(|v| v.get(key).and_then(serde_json::Value::as_f64))
            .unwrap_or(default)
    }
}

/// Seed the built-in rules. `INSERT OR IGNORE` preserves operator edits.
pub async fn seed_default_rules(pool: &DbPool) -> Result<(), StorageError> {
    let defaults: [(&str, &str, &str, f64, i64); 3] = [
        ("replied_before", "replied_before", r#"{"days": 90}"#, 0.95, 10),
        ("known_good_recipient", "known_good_recipient", "{}", 0.90, 20),
        ("high_icp_score", "high_icp_score", r#"{"min_icp": 0.9}"#, 0.85, 30),
    ];

    for (id, kind, conditions, confidence, priority) in defaults {
        sqlx::query(
            "INSERT OR IGNORE INTO auto_approval_rules (id, kind, conditions, confidence, priority)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(kind)
        .bind(conditions)
        .bind(confidence)
        .bind(priority)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    }

    Ok(())
}

/// Fetch enabled rules, ascending priority then id (the evaluation order).
pub async fn enabled_rules(pool: &DbPool) -> Result<Vec<AutoApprovalRule>, StorageError> {
    sqlx::query_as::<_, AutoApprovalRule>(
        "SELECT * FROM auto_approval_rules WHERE enabled = 1 ORDER BY priority ASC, id ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Fetch all rules for the admin view.
pub async fn all_rules(pool: &DbPool) -> Result<Vec<AutoApprovalRule>, StorageError> {
    sqlx::query_as::<_, AutoApprovalRule>(
        "SELECT * FROM auto_approval_rules ORDER BY priority ASC, id ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Insert an operator-defined rule.
pub async fn insert_rule(
    pool: &DbPool,
    id: &str,
    kind: &str,
    conditions: &str,
    confidence: f64,
    priority: i64,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO auto_approval_rules (id, kind, conditions, confidence, priority)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(kind)
    .bind(conditions)
    .bind(confidence)
    .bind(priority)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Enable or disable a rule. Returns `false` when the rule does not exist.
pub async fn set_rule_enabled(
    pool: &DbPool,
    id: &str,
    enabled: bool,
) -> Result<bool, StorageError> {
    let result =
        sqlx::query("UPDATE auto_approval_rules SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(now_iso())
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() == 1)
}

/// A whitelisted recipient.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ApprovedRecipient {
    pub email: String,
    pub added_at: String,
    pub reason: String,
}

/// Add a recipient to the whitelist. A no-op when already present, so
/// repeated positive outcomes stay associative.
pub async fn add_approved_recipient(
    pool: &DbPool,
    email: &str,
    reason: &str,
) -> Result<(), StorageError> {
    sqlx::query("INSERT OR IGNORE INTO approved_recipients (email, reason) VALUES (?, ?)")
        .bind(email.to_lowercase())
        .bind(reason)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Whether a recipient is whitelisted.
pub async fn is_approved_recipient(pool: &DbPool, email: &str) -> Result<bool, StorageError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT email FROM approved_recipients WHERE email = ?")
            .bind(email.to_lowercase())
            .fetch_optional(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.is_some())
}

/// List the whitelist, newest first.
pub async fn list_approved_recipients(
    pool: &DbPool,
) -> Result<Vec<ApprovedRecipient>, StorageError> {
    sqlx::query_as::<_, ApprovedRecipient>(
        "SELECT * FROM approved_recipients ORDER BY added_at DESC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Remove a recipient from the whitelist. Returns `false` when absent.
pub async fn remove_approved_recipient(pool: &DbPool, email: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM approved_recipients WHERE email = ?")
        .bind(email.to_lowercase())
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() == 1)
}

/// A recorded approval decision.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct AutoApprovalLogEntry {
    pub id: String,
    pub draft_id: String,
    /// `auto_approved` or `needs_review`.
    pub decision: String,
    pub rule_id: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub at: String,
}

/// Record an approval decision.
pub async fn log_decision(
    pool: &DbPool,
    id: &str,
    draft_id: &str,
    decision: &str,
    rule_id: Option<&str>,
    confidence: f64,
    reasoning: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO auto_approval_log (id, draft_id, decision, rule_id, confidence, reasoning)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(draft_id)
    .bind(decision)
    .bind(rule_id)
    .bind(confidence)
    .bind(reasoning)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch the decision log for a draft, newest first.
pub async fn decisions_for_draft(
    pool: &DbPool,
    draft_id: &str,
) -> Result<Vec<AutoApprovalLogEntry>, StorageError> {
    sqlx::query_as::<_, AutoApprovalLogEntry>(
        "SELECT * FROM auto_approval_log WHERE draft_id = ? ORDER BY at DESC, id DESC",
    )
    .bind(draft_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

//! Storage operations for contacts.
//!
//! Contacts are created on first unseen email (lowercased, unique).
//! Suppression is terminal for outbound sends: once set, the executor
//! refuses the contact and the timestamp bounds invariant checks.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// Why a contact may no longer receive outbound email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suppression {
    None,
    Bounce,
    Complaint,
    Unsub,
}

impl Suppression {
    /// Canonical stored string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bounce => "bounce",
            Self::Complaint => "complaint",
            Self::Unsub => "unsub",
        }
    }

    /// Parse a stored suppression string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "bounce" => Some(Self::Bounce),
            "complaint" => Some(Self::Complaint),
            "unsub" => Some(Self::Unsub),
            _ => None,
        }
    }
}

/// A persisted contact row.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Contact {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    /// IANA timezone, when known.
    pub timezone: Option<String>,
    /// JSON map: source name to external id.
    pub external_ids: String,
    /// JSON array of segment names.
    pub segments: String,
    pub last_reply_at: Option<String>,
    pub suppressed: String,
    pub suppressed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Contact {
    /// Whether outbound email to this contact is forbidden.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed != "none"
    }

    /// Decode the segment list.
    pub fn segment_list(&self) -> Result<Vec<String>, StorageError> {
        serde_json::from_str(&self.segments).map_err(|e| StorageError::Corrupt {
            table: "contacts".to_string(),
            column: "segments".to_string(),
            message: e.to_string(),
        })
    }
}

/// Fetch a contact by lowercased email.
pub async fn get_by_email(pool: &DbPool, email: &str) -> Result<Option<Contact>, StorageError> {
    sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE email = ?")
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Fetch a contact by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<Contact>, StorageError> {
    sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Create a contact if the email is unseen, otherwise return the existing row.
pub async fn upsert_by_email(
    pool: &DbPool,
    id: &str,
    email: &str,
    name: Option<&str>,
    company: Option<&str>,
) -> Result<Contact, StorageError> {
    let email = email.to_lowercase();
    sqlx::query(
        "INSERT INTO contacts (id, email, name, company) VALUES (?, ?, ?, ?)
         ON CONFLICT (email) DO UPDATE SET
            name = COALESCE(contacts.name, excluded.name),
            company = COALESCE(contacts.company, excluded.company),
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
    )
    .bind(id)
    .bind(&email)
    .bind(name)
    .bind(company)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    get_by_email(pool, &email)
        .await?
        .ok_or_else(|| StorageError::Corrupt {
            table: "contacts".to_string(),
            column: "email".to_string(),
            message: format!("upserted contact {email} not found"),
        })
}

/// Merge an external id mapping (`source -> id`) into a contact.
pub async fn set_external_id(
    pool: &DbPool,
    contact_id: &str,
    source: &str,
    external_id: &str,
) -> Result<(), StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    let row: (String,) = sqlx::query_as("SELECT external_ids FROM contacts WHERE id = ?")
        .bind(contact_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let mut map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&row.0)
        .map_err(|e| StorageError::Corrupt {
            table: "contacts".to_string(),
            column: "external_ids".to_string(),
            message: e.to_string(),
        })?;
    map.insert(
        source.to_string(),
        serde_json::Value::String(external_id.to_string()),
    );
    let encoded = serde_json::Value::Object(map).to_string();

    sqlx::query("UPDATE contacts SET external_ids = ?, updated_at = ? WHERE id = ?")
        .bind(&encoded)
        .bind(now_iso())
        .bind(contact_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    Ok(())
}

/// Add a segment to a contact if not already present.
pub async fn add_segment(
    pool: &DbPool,
    contact_id: &str,
    segment: &str,
) -> Result<(), StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    let row: (String,) = sqlx::query_as("SELECT segments FROM contacts WHERE id = ?")
        .bind(contact_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let mut segments: Vec<String> =
        serde_json::from_str(&row.0).map_err(|e| StorageError::Corrupt {
            table: "contacts".to_string(),
            column: "segments".to_string(),
            message: e.to_string(),
        })?;

    if !segments.iter().any(|s| s == segment) {
        segments.push(segment.to_string());
        let encoded = serde_json::to_string(&segments).map_err(|e| StorageError::Corrupt {
            table: "contacts".to_string(),
            column: "segments".to_string(),
            message: e.to_string(),
        })?;
        sqlx::query("UPDATE contacts SET segments = ?, updated_at = ? WHERE id = ?")
            .bind(&encoded)
            .bind(now_iso())
            .bind(contact_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
    }

    tx.commit()
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    Ok(())
}

/// Record the most recent inbound reply time.
pub async fn set_last_reply_at(
    pool: &DbPool,
    contact_id: &str,
    at: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE contacts SET last_reply_at = MAX(COALESCE(last_reply_at, ''), ?),
         updated_at = ? WHERE id = ?",
    )
    .bind(at)
    .bind(now_iso())
    .bind(contact_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Suppress a contact. Once suppressed, only a stronger reason replaces a
/// weaker one; `none` never replaces an existing suppression.
pub async fn suppress(
    pool: &DbPool,
    contact_id: &str,
    reason: Suppression,
) -> Result<(), StorageError> {
    if reason == Suppression::None {
        return Ok(());
    }
    sqlx::query(
        "UPDATE contacts SET suppressed = ?,
         suppressed_at = COALESCE(suppressed_at, ?),
         updated_at = ? WHERE id = ? AND suppressed = 'none'",
    )
    .bind(reason.as_str())
    .bind(now_iso())
    .bind(now_iso())
    .bind(contact_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, new_id};

    #[tokio::test]
    async fn upsert_lowercases_and_reuses() {
        let pool = init_test_db().await.expect("init db");
        let first = upsert_by_email(&pool, &new_id(), "Ann@Acme.Com", Some("Ann"), None)
            .await
            .expect("first upsert");
        assert_eq!(first.email, "ann@acme.com");

        let second = upsert_by_email(&pool, &new_id(), "ANN@ACME.COM", None, Some("Acme"))
            .await
            .expect("second upsert");
        assert_eq!(second.id, first.id, "same email must reuse the contact");
        assert_eq!(second.name.as_deref(), Some("Ann"), "existing name kept");
        assert_eq!(second.company.as_deref(), Some("Acme"), "gap filled");
    }

    #[tokio::test]
    async fn external_ids_merge() {
        let pool = init_test_db().await.expect("init db");
        let contact = upsert_by_email(&pool, &new_id(), "a@b.c", None, None)
            .await
            .expect("upsert");

        set_external_id(&pool, &contact.id, "crm", "crm-9")
            .await
            .expect("set crm id");
        set_external_id(&pool, &contact.id, "email", "em-2")
            .await
            .expect("set email id");

        let contact = get_by_id(&pool, &contact.id)
            .await
            .expect("get")
            .expect("exists");
        let map: serde_json::Value = serde_json::from_str(&contact.external_ids).expect("json");
        assert_eq!(map["crm"], "crm-9");
        assert_eq!(map["email"], "em-2");
    }

    #[tokio::test]
    async fn add_segment_is_idempotent() {
        let pool = init_test_db().await.expect("init db");
        let contact = upsert_by_email(&pool, &new_id(), "a@b.c", None, None)
            .await
            .expect("upsert");

        add_segment(&pool, &contact.id, "inbound").await.expect("1");
        add_segment(&pool, &contact.id, "inbound").await.expect("2");

        let contact = get_by_id(&pool, &contact.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(contact.segment_list().expect("segments"), vec!["inbound"]);
    }

    #[tokio::test]
    async fn suppression_is_terminal() {
        let pool = init_test_db().await.expect("init db");
        let contact = upsert_by_email(&pool, &new_id(), "a@b.c", None, None)
            .await
            .expect("upsert");

        suppress(&pool, &contact.id, Suppression::Bounce)
            .await
            .expect("suppress");
        suppress(&pool, &contact.id, Suppression::Unsub)
            .await
            .expect("second suppress");

        let contact = get_by_id(&pool, &contact.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(contact.suppressed, "bounce", "first suppression wins");
        assert!(contact.is_suppressed());
        assert!(contact.suppressed_at.is_some());
    }

    #[tokio::test]
    async fn last_reply_at_is_monotone() {
        let pool = init_test_db().await.expect("init db");
        let contact = upsert_by_email(&pool, &new_id(), "a@b.c", None, None)
            .await
            .expect("upsert");

        set_last_reply_at(&pool, &contact.id, "2026-07-10T00:00:00Z")
            .await
            .expect("newer");
        set_last_reply_at(&pool, &contact.id, "2026-07-01T00:00:00Z")
            .await
            .expect("older");

        let contact = get_by_id(&pool, &contact.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(
            contact.last_reply_at.as_deref(),
            Some("2026-07-10T00:00:00Z"),
            "older reply must not rewind the marker"
        );
    }

    #[test]
    fn suppression_round_trip() {
        for s in [
            Suppression::None,
            Suppression::Bounce,
            Suppression::Complaint,
            Suppression::Unsub,
        ] {
            assert_eq!(Suppression::parse(s.as_str()), Some(s));
        }
    }
}

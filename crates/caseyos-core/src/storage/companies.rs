//! Storage operations for companies.

use super::{now_iso, DbPool};
use crate::error::StorageError;

/// A persisted company row, keyed by domain.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Company {
    pub id: String,
    pub domain: String,
    pub name: Option<String>,
    pub industry: Option<String>,
    /// Ideal-customer-profile fit, 0..1, when known.
    pub icp_score: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fetch a company by lowercased domain.
pub async fn get_by_domain(pool: &DbPool, domain: &str) -> Result<Option<Company>, StorageError> {
    sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE domain = ?")
        .bind(domain.to_lowercase())
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Fetch a company by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<Company>, StorageError> {
    sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}

/// Create a company shell if the domain is unseen, otherwise return the
/// existing row with any gaps filled in.
pub async fn upsert_by_domain(
    pool: &DbPool,
    id: &str,
    domain: &str,
    name: Option<&str>,
    industry: Option<&str>,
) -> Result<Company, StorageError> {
    let domain = domain.to_lowercase();
    sqlx::query(
        "INSERT INTO companies (id, domain, name, industry) VALUES (?, ?, ?, ?)
         ON CONFLICT (domain) DO UPDATE SET
            name = COALESCE(companies.name, excluded.name),
            industry = COALESCE(companies.industry, excluded.industry),
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
    )
    .bind(id)
    .bind(&domain)
    .bind(name)
    .bind(industry)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    get_by_domain(pool, &domain)
        .await?
        .ok_or_else(|| StorageError::Corrupt {
            table: "companies".to_string(),
            column: "domain".to_string(),
            message: format!("upserted company {domain} not found"),
        })
}

/// Set a company's ICP score.
pub async fn set_icp_score(pool: &DbPool, id: &str, score: f64) -> Result<(), StorageError> {
    sqlx::query("UPDATE companies SET icp_score = ?, updated_at = ? WHERE id = ?")
        .bind(score.clamp(0.0, 1.0))
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

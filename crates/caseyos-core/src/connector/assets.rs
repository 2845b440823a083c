//! Asset store capability: searching shareable collateral.

use super::ConnectorError;

/// A reference to a shareable asset.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Which store the asset lives in; checked against the allowlist.
    pub source: String,
}

/// Asset store capability.
///
/// Implementations must enforce the allowlist: results whose `source` is not
/// listed are dropped before returning. An empty allowlist yields no results.
#[async_trait::async_trait]
pub trait AssetConnector: Send + Sync {
    /// Search for assets matching a query, restricted to allowlisted sources.
    async fn search(
        &self,
        query: &str,
        allowlist: &[String],
    ) -> Result<Vec<AssetRef>, ConnectorError>;
}

//! CRM capability: contacts, companies, tasks, deals.

use super::ConnectorError;

/// A CRM-side contact.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrmContact {
    pub external_id: String,
    pub email: String,
    pub name: Option<String>,
    pub title: Option<String>,
    pub company_domain: Option<String>,
}

/// A CRM-side company.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrmCompany {
    pub external_id: String,
    pub domain: String,
    pub name: Option<String>,
    pub industry: Option<String>,
    pub icp_score: Option<f64>,
}

/// Associations for a contact: open deals and their amounts.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CrmAssociations {
    pub company_id: Option<String>,
    pub deal_ids: Vec<String>,
    /// Largest open deal amount, when any deal exists.
    pub open_deal_amount: Option<f64>,
}

/// CRM provider capability.
#[async_trait::async_trait]
pub trait CrmConnector: Send + Sync {
    /// Look up a contact by email.
    async fn find_contact_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CrmContact>, ConnectorError>;

    /// Look up a company by domain.
    async fn find_company_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<CrmCompany>, ConnectorError>;

    /// Fetch deal/company associations for a contact.
    async fn associations(&self, contact_id: &str) -> Result<CrmAssociations, ConnectorError>;

    /// Create a follow-up task. Returns the task id.
    async fn create_task(
        &self,
        contact_id: &str,
        title: &str,
        due_at: &str,
    ) -> Result<String, ConnectorError>;

    /// Update a task's title or due date.
    async fn update_task(
        &self,
        task_id: &str,
        title: Option<&str>,
        due_at: Option<&str>,
    ) -> Result<(), ConnectorError>;

    /// Delete a task. Idempotent: deleting a missing task succeeds.
    async fn delete_task(&self, task_id: &str) -> Result<(), ConnectorError>;

    /// Update a deal property (stage, amount).
    async fn update_deal(
        &self,
        deal_id: &str,
        property: &str,
        value: &str,
    ) -> Result<(), ConnectorError>;
}

use chrono::DateTime;
use chrono::Utc;
use reqwest::Client;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Serialize;
use uuid::Uuid;

use super::StoreError;
use crate::configuration::StoreSettings;
use crate::domain::Lead;
use crate::domain::LeadEmail;

/// Client for the hosted store's auto-generated REST API (PostgREST
/// dialect): rows are filtered with `?column=eq.value`, inserted with `POST`
/// and updated with `PATCH`.
#[derive(Clone)]
pub struct RestLeadStore {
    http_client: Client,
    base_url: String,
    service_key: Secret<String>,
}

#[derive(Serialize)]
struct ResubmissionPatch<'a> {
    updated_at: DateTime<Utc>,
    notes: &'a str,
}

#[derive(Serialize)]
struct ChecklistPatch {
    checklist_sent: bool,
}

impl RestLeadStore {
    pub fn new(cfg: &StoreSettings) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            http_client,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            service_key: cfg.service_key.clone(),
        })
    }

    fn table_url(&self) -> String { format!("{}/rest/v1/leads", self.base_url) }

    /// Both headers are required: `apikey` selects the project, the bearer
    /// token selects the role (service role bypasses row level security)
    fn authorized(
        &self,
        request: RequestBuilder,
    ) -> RequestBuilder {
        let key = self.service_key.expose_secret();
        request.header("apikey", key).bearer_auth(key)
    }

    pub async fn find_by_email(
        &self,
        email: &LeadEmail,
    ) -> Result<Option<Lead>, StoreError> {
        let request = self
            .http_client
            .get(self.table_url())
            .query(&[("select", "*".to_string()), ("email", format!("eq.{email}"))]);
        let resp = check(self.authorized(request).send().await?).await?;
        let mut leads: Vec<Lead> = resp.json().await?;
        Ok(leads.pop())
    }

    pub async fn insert(
        &self,
        lead: &Lead,
    ) -> Result<(), StoreError> {
        let request = self
            .http_client
            .post(self.table_url())
            .header("Prefer", "return=minimal")
            .json(lead);
        check(self.authorized(request).send().await?).await?;
        Ok(())
    }

    pub async fn record_resubmission(
        &self,
        email: &LeadEmail,
        updated_at: DateTime<Utc>,
        notes: &str,
    ) -> Result<(), StoreError> {
        let request = self
            .http_client
            .patch(self.table_url())
            .query(&[("email", format!("eq.{email}"))])
            .header("Prefer", "return=minimal")
            .json(&ResubmissionPatch { updated_at, notes });
        check(self.authorized(request).send().await?).await?;
        Ok(())
    }

    pub async fn mark_checklist_sent(
        &self,
        lead_id: Uuid,
    ) -> Result<(), StoreError> {
        let request = self
            .http_client
            .patch(self.table_url())
            .query(&[("id", format!("eq.{lead_id}"))])
            .header("Prefer", "return=minimal")
            .json(&ChecklistPatch {
                checklist_sent: true,
            });
        check(self.authorized(request).send().await?).await?;
        Ok(())
    }
}

/// Map non-2xx responses to `StoreError`; 409 is the REST API's rendering of
/// a unique key violation
async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::CONFLICT {
        return Err(StoreError::Conflict);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::error!(%status, %body, "lead store rejected request");
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

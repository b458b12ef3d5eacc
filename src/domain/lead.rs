use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use super::LeadEmail;

/// Channel a lead arrived through; stored as a fixed tag in `leads.source`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadSource {
    /// `POST /api/collect-lead`
    LandingPage,
    /// `POST /api/webhook-lead`
    Webhook,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::LandingPage => "landing_page",
            LeadSource::Webhook => "webhook",
        }
    }
}

/// A row in the `leads` table. Field names double as column names for both
/// store backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lead {
    pub id: Uuid,
    pub email: String,
    pub source: String,
    pub checklist_sent: bool,
    pub marketing_consent: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Lead {
    /// A lead as first accepted: checklist not yet sent, consent implied by
    /// the submission itself.
    pub fn new(
        email: &LeadEmail,
        source: LeadSource,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.as_ref().to_owned(),
            source: source.as_str().to_owned(),
            checklist_sent: false,
            marketing_consent: true,
            created_at,
            updated_at: None,
            notes: None,
        }
    }
}

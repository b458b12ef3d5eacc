mod postgres;
mod rest;

use std::fmt::Debug;

use chrono::DateTime;
use chrono::Utc;
pub use postgres::PgLeadStore;
pub use rest::RestLeadStore;
use uuid::Uuid;

use crate::configuration::Settings;
use crate::configuration::StoreBackend;
use crate::domain::Lead;
use crate::domain::LeadEmail;
use crate::startup::get_connection_pool;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum StoreError {
    /// Unique key violation on `email`; another submission got there first
    #[error("A lead with this email already exists")]
    Conflict,
    #[error("Could not reach the lead store")]
    Transport(#[from] reqwest::Error),
    #[error("Lead store rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Database query failed")]
    Database(#[source] sqlx::Error),
}

impl Debug for StoreError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        // https://www.postgresql.org/docs/current/errcodes-appendix.html
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Conflict;
            }
        }
        StoreError::Database(e)
    }
}

/// The `leads` table, behind whichever backend is configured. Cheap to clone:
/// both variants wrap an `Arc`-backed pool/client.
#[derive(Clone)]
pub enum LeadStore {
    Rest(RestLeadStore),
    Postgres(PgLeadStore),
}

impl LeadStore {
    pub fn from_settings(cfg: &Settings) -> Result<Self, anyhow::Error> {
        let store = match cfg.store.backend {
            StoreBackend::Rest => Self::Rest(RestLeadStore::new(&cfg.store)?),
            StoreBackend::Postgres => {
                Self::Postgres(PgLeadStore::new(get_connection_pool(&cfg.database)))
            }
        };
        Ok(store)
    }

    #[tracing::instrument(name = "Looking up lead by email", skip(self))]
    pub async fn find_by_email(
        &self,
        email: &LeadEmail,
    ) -> Result<Option<Lead>, StoreError> {
        match self {
            LeadStore::Rest(s) => s.find_by_email(email).await,
            LeadStore::Postgres(s) => s.find_by_email(email).await,
        }
    }

    /// Fails with `StoreError::Conflict` if the email is already present
    #[tracing::instrument(name = "Inserting new lead", skip(self, lead), fields(lead_id = %lead.id))]
    pub async fn insert(
        &self,
        lead: &Lead,
    ) -> Result<(), StoreError> {
        match self {
            LeadStore::Rest(s) => s.insert(lead).await,
            LeadStore::Postgres(s) => s.insert(lead).await,
        }
    }

    /// Update, never duplicate, a lead that was submitted again
    #[tracing::instrument(name = "Recording lead resubmission", skip(self))]
    pub async fn record_resubmission(
        &self,
        email: &LeadEmail,
        updated_at: DateTime<Utc>,
        notes: &str,
    ) -> Result<(), StoreError> {
        match self {
            LeadStore::Rest(s) => s.record_resubmission(email, updated_at, notes).await,
            LeadStore::Postgres(s) => s.record_resubmission(email, updated_at, notes).await,
        }
    }

    #[tracing::instrument(name = "Marking checklist as sent", skip(self))]
    pub async fn mark_checklist_sent(
        &self,
        lead_id: Uuid,
    ) -> Result<(), StoreError> {
        match self {
            LeadStore::Rest(s) => s.mark_checklist_sent(lead_id).await,
            LeadStore::Postgres(s) => s.mark_checklist_sent(lead_id).await,
        }
    }
}

use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::StoreError;
use crate::domain::Lead;
use crate::domain::LeadEmail;

/// Direct connection to the `leads` table (see `migrations/`).
///
/// `PgPool` is used over `PgConnection` as the former has a `Mutex` 'built-in'
/// and is cheap to clone.
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

// `sqlx::query!` would check these at compile time, but needs either a live
// db or a `.sqlx` offline cache at build time; the runtime-checked variants
// keep the `rest` backend buildable without postgres

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn find_by_email(
        &self,
        email: &LeadEmail,
    ) -> Result<Option<Lead>, StoreError> {
        let lead = sqlx::query_as::<_, Lead>(
            r#"
            SELECT id, email, source, checklist_sent, marketing_consent,
                created_at, updated_at, notes
            FROM leads
            WHERE email = $1
            "#,
        )
        .bind(email.as_ref())
        .fetch_optional(&self.pool)
        .await?;
        Ok(lead)
    }

    pub async fn insert(
        &self,
        lead: &Lead,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO leads (id, email, source, checklist_sent, marketing_consent,
                created_at, updated_at, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(lead.id)
        .bind(&lead.email)
        .bind(&lead.source)
        .bind(lead.checklist_sent)
        .bind(lead.marketing_consent)
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .bind(&lead.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_resubmission(
        &self,
        email: &LeadEmail,
        updated_at: DateTime<Utc>,
        notes: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE leads SET updated_at = $2, notes = $3
            WHERE email = $1
            "#,
        )
        .bind(email.as_ref())
        .bind(updated_at)
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_checklist_sent(
        &self,
        lead_id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE leads SET checklist_sent = TRUE WHERE id = $1")
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

use actix_web::web;
use actix_web::HttpResponse;
use anyhow::Context;
use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::Lead;
use crate::domain::LeadEmail;
use crate::domain::LeadSource;
use crate::store::LeadStore;
use crate::store::StoreError;

/// What the form provider POSTs for each submission
#[derive(Deserialize, Debug)]
pub struct WebhookPayload {
    #[serde(default)]
    email: Option<String>,
    /// Submission time as recorded by the provider
    #[serde(default, rename = "_time")]
    time: Option<String>,
}

impl WebhookPayload {
    /// Provider JSON first, then form encoding; all we know is that it is a
    /// POST body
    fn parse(body: &[u8]) -> Result<Self, anyhow::Error> {
        serde_json::from_slice(body)
            .or_else(|_| serde_urlencoded::from_bytes(body))
            .context("webhook body is neither JSON nor form encoded")
    }

    /// `_time` if it is a valid RFC 3339 timestamp
    fn submitted_at(&self) -> Option<DateTime<Utc>> {
        let time = self.time.as_deref()?;
        DateTime::parse_from_rfc3339(time)
            .map(|t| t.with_timezone(&Utc))
            .ok()
    }
}

#[derive(Debug)]
enum WebhookOutcome {
    Stored,
    Updated,
}

#[derive(thiserror::Error, Debug)]
enum WebhookError {
    #[error("Email is required")]
    MissingEmail,
    #[error("Invalid email format")]
    InvalidEmail,
    #[error("Payload too large")]
    TooLarge,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct WebhookResponse<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

/// `POST /api/webhook-lead`
///
/// Called by the external form provider instead of the landing page. Same
/// presence check and persistence as `collect_lead`, without the rate limit,
/// honeypot or spam heuristic, and without sending any email.
///
/// Always answers 200, even when something went wrong: the provider retries
/// anything else, and we do not trust its retry policy to ever give up. The
/// `success` flag in the body tells the truth; failures are logged at error
/// level and are otherwise silent.
#[tracing::instrument(name = "Receiving webhook lead", skip_all)]
pub async fn webhook_lead(
    body: web::Payload,
    store: web::Data<LeadStore>,
) -> HttpResponse {
    let body = match read_body(body).await {
        Ok(b) => b,
        Err(e) => return acknowledge_failure(&e, None),
    };
    let payload = match WebhookPayload::parse(&body) {
        Ok(p) => p,
        Err(e) => return acknowledge_failure(&WebhookError::Unexpected(e), None),
    };

    match ingest(&payload, &store).await {
        Ok((outcome, email)) => {
            tracing::info!(?outcome, lead_email = %email, "webhook lead received");
            let message = match outcome {
                WebhookOutcome::Stored => "Lead stored successfully",
                WebhookOutcome::Updated => "Lead updated",
            };
            HttpResponse::Ok().json(WebhookResponse {
                success: true,
                message,
                email: Some(email.as_ref()),
            })
        }
        Err(e) => acknowledge_failure(&e, payload.email.as_deref()),
    }
}

/// Largest body we bother parsing
const WEBHOOK_BODY_LIMIT: usize = 256 * 1024;

/// The whole request body, up to `WEBHOOK_BODY_LIMIT`. A longer body is still
/// read to the end before `TooLarge` is returned.
async fn read_body(mut payload: web::Payload) -> Result<web::Bytes, WebhookError> {
    let mut body = web::BytesMut::new();
    let mut too_large = false;
    while let Some(chunk) = payload.next().await {
        let chunk = chunk
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("failed to read webhook body")?;
        if too_large {
            continue;
        }
        if body.len() + chunk.len() > WEBHOOK_BODY_LIMIT {
            too_large = true;
            body.clear();
            continue;
        }
        body.extend_from_slice(&chunk);
    }
    match too_large {
        true => Err(WebhookError::TooLarge),
        false => Ok(body.freeze()),
    }
}

fn acknowledge_failure(
    e: &WebhookError,
    email: Option<&str>,
) -> HttpResponse {
    tracing::error!(
        error.cause_chain = ?e,
        error.message = %e,
        "webhook lead was not stored; acknowledging anyway"
    );
    HttpResponse::Ok().json(WebhookResponse {
        success: false,
        message: &e.to_string(),
        email,
    })
}

async fn ingest(
    payload: &WebhookPayload,
    store: &LeadStore,
) -> Result<(WebhookOutcome, LeadEmail), WebhookError> {
    let email = payload
        .email
        .clone()
        .filter(|e| !e.trim().is_empty())
        .ok_or(WebhookError::MissingEmail)?;
    let email = LeadEmail::parse(email).map_err(|_| WebhookError::InvalidEmail)?;

    let submitted_at = payload.submitted_at();
    if store.find_by_email(&email).await?.is_some() {
        let now = Utc::now();
        let notes = format!(
            "Resubmitted via webhook at {}",
            submitted_at.unwrap_or(now).to_rfc3339()
        );
        store.record_resubmission(&email, now, &notes).await?;
        return Ok((WebhookOutcome::Updated, email));
    }

    let lead = Lead::new(
        &email,
        LeadSource::Webhook,
        submitted_at.unwrap_or_else(Utc::now),
    );
    match store.insert(&lead).await {
        Ok(()) => Ok((WebhookOutcome::Stored, email)),
        // someone else inserted it between our lookup and insert
        Err(StoreError::Conflict) => Ok((WebhookOutcome::Updated, email)),
        Err(e) => Err(e.into()),
    }
}

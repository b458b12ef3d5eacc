use std::fmt::Debug;

use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::notifications::AdminNotifier;
use crate::notifications::LeadSummary;
use crate::utils::error_chain_fmt;

/// Database webhook payload sent by the store on every `INSERT` into `leads`.
/// Only `record` is read; `type`, `table`, `schema` and `old_record` are
/// ignored.
#[derive(Deserialize, Debug)]
pub struct LeadCreatedEvent {
    #[serde(default)]
    record: Option<LeadRecord>,
}

#[derive(Deserialize, Debug)]
struct LeadRecord {
    #[serde(default)]
    email: Option<String>,
    /// `timestamptz` columns arrive with an offset, `timestamp` ones without;
    /// anything else is shown as unknown rather than rejected
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    source: Option<String>,
}

impl LeadRecord {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_ref()
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }
}

/// RFC 3339 first, then a naive timestamp (`T` or space separated) taken as
/// UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.and_utc())
}

#[derive(thiserror::Error)]
pub enum DispatchError {
    #[error("No email found")]
    NoEmail,
    /// Not even JSON; there is no record to read an email from
    #[error("No email found")]
    UnreadableEvent(#[source] serde_json::Error),
    #[error("Error sending email")]
    SendFailed(#[source] reqwest::Error),
}

impl Debug for DispatchError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for DispatchError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NoEmail | Self::UnreadableEvent(_) => StatusCode::BAD_REQUEST,
            Self::SendFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

/// `POST /functions/send-lead-notification`
///
/// Triggered by the store (not the landing page) whenever a lead row is
/// created. Sends exactly one admin notification; a failed send is terminal
/// for this invocation and surfaces as 500, leaving any retry to the caller.
#[tracing::instrument(name = "Dispatching lead notification", skip_all)]
pub async fn send_lead_notification(
    body: web::Bytes,
    notifier: web::Data<AdminNotifier>,
) -> Result<HttpResponse, DispatchError> {
    let event: LeadCreatedEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error.message = %e, "unreadable lead event");
        DispatchError::UnreadableEvent(e)
    })?;
    let record = event
        .record
        .filter(|r| r.email.as_deref().is_some_and(|e| !e.trim().is_empty()))
        .ok_or(DispatchError::NoEmail)?;

    let summary = LeadSummary {
        email: record.email.as_deref().unwrap_or_default(),
        created_at: record.created_at(),
        source: record.source.as_deref(),
    };

    notifier.notify(&summary).await.map_err(|e| {
        tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            "failed to send admin notification"
        );
        DispatchError::SendFailed(e)
    })?;

    Ok(HttpResponse::Ok().body("Email sent"))
}

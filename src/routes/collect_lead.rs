use std::fmt::Debug;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::time::Duration;

use actix_web::http::header;
use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpMessage;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_aux::field_attributes::deserialize_bool_from_anything;

use crate::configuration::IntakeSettings;
use crate::domain::spam_reason;
use crate::domain::Lead;
use crate::domain::LeadEmail;
use crate::domain::LeadSource;
use crate::notifications::NotificationJob;
use crate::notifications::NotificationQueue;
use crate::rate_limit::RateLimitDecision;
use crate::rate_limit::RateLimiter;
use crate::store::LeadStore;
use crate::store::StoreError;
use crate::utils::error_chain_fmt;
use crate::utils::json_error;

/// Body of `POST /api/collect-lead`, either JSON or a plain HTML form
#[derive(Deserialize, Default, Debug)]
pub struct LeadSubmission {
    #[serde(default)]
    email: Option<String>,
    /// Honeypot: hidden from humans by the landing page's css, so only bots
    /// fill it in
    #[serde(default, alias = "_gotcha")]
    website: Option<String>,
    /// Accepts `true`, `"true"`, `1` and friends; forms only ever send strings
    #[serde(
        default,
        alias = "testMode",
        deserialize_with = "deserialize_bool_from_anything"
    )]
    test_mode: bool,
}

impl LeadSubmission {
    /// Form encoding if the client says so, JSON otherwise. An empty body is
    /// a submission without an email.
    fn parse(
        content_type: &str,
        body: &[u8],
    ) -> Result<Self, IntakeError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        match content_type == FORM_CONTENT_TYPE {
            true => serde_urlencoded::from_bytes(body).map_err(invalid_body),
            false => serde_json::from_slice(body).map_err(invalid_body),
        }
    }

    /// Any value at all, whitespace included
    fn honeypot_filled(&self) -> bool { self.website.as_deref().is_some_and(|v| !v.is_empty()) }
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

fn invalid_body(e: impl std::fmt::Display) -> IntakeError {
    tracing::warn!(error.message = %e, "unreadable submission");
    IntakeError::InvalidBody(e.to_string())
}

#[derive(thiserror::Error)]
pub enum IntakeError {
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Too many submissions, please try again later")]
    RateLimited { retry_after: Duration },
    #[error("Email is required")]
    MissingEmail,
    #[error("Invalid email format")]
    InvalidEmail(String),
    #[error("Invalid request body")]
    InvalidBody(String),
    #[error("Failed to save email")]
    StoreFailure(#[source] StoreError),
}

impl Debug for IntakeError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for IntakeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::MissingEmail | Self::InvalidEmail(_) | Self::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::StoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut resp = json_error(self.status_code(), &self.to_string());
        if let Self::RateLimited { retry_after } = self {
            // round up, so that a client retrying exactly on time is admitted
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        resp
    }
}

/// Success body. Spam and honeypot submissions get the `new` body too, so a
/// bot cannot tell it was discarded.
#[derive(Serialize)]
struct IntakeResponse {
    success: bool,
    message: &'static str,
    existing: bool,
}

impl IntakeResponse {
    fn subscribed() -> HttpResponse {
        HttpResponse::Ok().json(Self {
            success: true,
            message: "Successfully subscribed!",
            existing: false,
        })
    }

    fn already_subscribed() -> HttpResponse {
        HttpResponse::Ok().json(Self {
            success: true,
            message: "Already subscribed!",
            existing: true,
        })
    }
}

/// What happened to a submission that was not rejected
#[derive(Debug)]
enum IntakeOutcome {
    Accepted,
    AlreadySubscribed,
    /// Discarded without touching the store; the reason is only logged
    Suppressed(String),
}

/// Last `X-Forwarded-For` hop if present, otherwise the peer address. Earlier
/// hops are whatever the client chose to send; only the last one was appended
/// by our own proxy. Ports are dropped, since every new connection gets a
/// fresh one.
fn client_identifier(req: &HttpRequest) -> String {
    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').map(str::trim).find(|hop| !hop.is_empty()));
    match forwarded {
        Some(hop) => strip_port(hop),
        None => req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

fn strip_port(addr: &str) -> String {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return socket.ip().to_string();
    }
    match addr.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => addr.to_owned(),
    }
}

/// `POST /api/collect-lead`
///
/// Pipeline, short-circuiting at the first step that decides:
///     1. rate limit per client (429)
///     2. honeypot (silent success)
///     3. spam heuristic, unless in test mode (silent success)
///     4. email present (400), then well-formed (400)
///     5. already in the store (success, `existing: true`)
///     6. insert (500 on failure), then queue the checklist + admin emails
///
/// The rate limit counter is advanced in step 1, before the body is even
/// parsed, so a submission that later fails still counts.
///
/// # Request example
///
/// ```sh
///     curl -v --json '{"email": "john@foo.com"}' http://127.0.0.1:8000/api/collect-lead
/// ```
#[tracing::instrument(
    name = "Collecting lead",
    skip_all,
    fields(
        client = tracing::field::Empty,
        lead_email = tracing::field::Empty,
        outcome = tracing::field::Empty,
    )
)]
pub async fn collect_lead(
    req: HttpRequest,
    body: web::Bytes,
    store: web::Data<LeadStore>,
    limiter: web::Data<RateLimiter>,
    queue: web::Data<NotificationQueue>,
    intake: web::Data<IntakeSettings>,
) -> Result<HttpResponse, IntakeError> {
    let client = client_identifier(&req);
    tracing::Span::current().record("client", tracing::field::display(&client));

    if let RateLimitDecision::Limited { retry_after } = limiter.check(&client) {
        tracing::warn!(?retry_after, "rate limit exceeded");
        return Err(IntakeError::RateLimited { retry_after });
    }

    let submission = LeadSubmission::parse(req.content_type(), &body)?;

    let outcome = intake_lead(submission, &store, &queue, &intake).await?;
    tracing::Span::current().record("outcome", tracing::field::debug(&outcome));

    Ok(match outcome {
        IntakeOutcome::Accepted | IntakeOutcome::Suppressed(_) => IntakeResponse::subscribed(),
        IntakeOutcome::AlreadySubscribed => IntakeResponse::already_subscribed(),
    })
}

/// Everything after the rate limit; independent of how the request arrived
async fn intake_lead(
    submission: LeadSubmission,
    store: &LeadStore,
    queue: &NotificationQueue,
    intake: &IntakeSettings,
) -> Result<IntakeOutcome, IntakeError> {
    if submission.honeypot_filled() {
        tracing::info!("honeypot filled, discarding submission");
        return Ok(IntakeOutcome::Suppressed("honeypot".to_string()));
    }

    let bypass_spam_check = submission.test_mode && intake.allow_test_mode;
    if !bypass_spam_check {
        let raw = submission.email.as_deref().unwrap_or_default();
        if let Some(reason) = spam_reason(raw, &intake.extra_disposable_domains) {
            tracing::info!(%reason, "spam heuristic matched, discarding submission");
            return Ok(IntakeOutcome::Suppressed(reason.to_string()));
        }
    }

    let email = submission
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or(IntakeError::MissingEmail)?;
    let email = LeadEmail::parse(email).map_err(IntakeError::InvalidEmail)?;
    tracing::Span::current().record("lead_email", tracing::field::display(&email));

    if store
        .find_by_email(&email)
        .await
        .map_err(IntakeError::StoreFailure)?
        .is_some()
    {
        return Ok(IntakeOutcome::AlreadySubscribed);
    }

    let lead = Lead::new(&email, LeadSource::LandingPage, Utc::now());
    match store.insert(&lead).await {
        Ok(()) => {}
        // lost a race with a concurrent submission of the same email
        Err(StoreError::Conflict) => return Ok(IntakeOutcome::AlreadySubscribed),
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "failed to insert lead"
            );
            return Err(IntakeError::StoreFailure(e));
        }
    }

    queue.enqueue(NotificationJob::NewLead(lead));
    Ok(IntakeOutcome::Accepted)
}

/// `OPTIONS /api/collect-lead`; the CORS headers themselves are added to every
/// response of the resource
pub async fn collect_lead_preflight() -> HttpResponse { HttpResponse::Ok().finish() }

/// Any other method on an intake route
pub async fn method_not_allowed() -> Result<HttpResponse, IntakeError> {
    Err(IntakeError::MethodNotAllowed)
}

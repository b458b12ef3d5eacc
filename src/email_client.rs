use std::time::Duration;

use reqwest::Client;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::LeadEmail;

/// Which transactional email API a client talks to. Both take a bearer token
/// and a JSON body, but the body shapes differ.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    /// `POST /emails`
    Resend,
    /// `POST /v3/mail/send`
    SendGrid,
}

impl EmailProvider {
    fn endpoint(&self) -> &'static str {
        match self {
            EmailProvider::Resend => "emails",
            EmailProvider::SendGrid => "v3/mail/send",
        }
    }
}

// establishing a HTTP connection is expensive, so the `Client` is built once
// and kept for the lifetime of the app; cloning it only clones an `Arc`
pub struct EmailClient {
    provider: EmailProvider,
    http_client: Client,
    base_url: String,
    sender: LeadEmail,
    sender_name: Option<String>,
    authorization_token: Secret<String>,
}

#[derive(Serialize)]
struct ResendEmailRequest<'a> {
    from: String,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct SendGridAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct SendGridPersonalization<'a> {
    to: [SendGridAddress<'a>; 1],
}

#[derive(Serialize)]
struct SendGridContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Serialize)]
struct SendGridEmailRequest<'a> {
    personalizations: [SendGridPersonalization<'a>; 1],
    from: SendGridAddress<'a>,
    subject: &'a str,
    // sendgrid requires text/plain before text/html
    content: [SendGridContent<'a>; 2],
}

impl EmailClient {
    pub fn new(
        provider: EmailProvider,
        base_url: String,
        sender: LeadEmail,
        sender_name: Option<String>,
        authorization_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            provider,
            http_client,
            base_url,
            sender,
            sender_name,
            authorization_token,
        })
    }

    /// `Display Name <address>` when a sender name is configured
    fn from_header(&self) -> String {
        match &self.sender_name {
            Some(name) => format!("{name} <{}>", self.sender),
            None => self.sender.to_string(),
        }
    }

    #[tracing::instrument(
        name = "Sending email",
        skip(self, recipient, html_content, text_content),
        fields(provider = ?self.provider, recipient = %recipient)
    )]
    pub async fn send_email(
        &self,
        recipient: &LeadEmail,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), reqwest::Error> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.provider.endpoint()
        );
        let request = self
            .http_client
            .post(&url)
            .bearer_auth(self.authorization_token.expose_secret());

        let request = match self.provider {
            EmailProvider::Resend => request.json(&ResendEmailRequest {
                from: self.from_header(),
                to: [recipient.as_ref()],
                subject,
                html: html_content,
                text: text_content,
            }),
            EmailProvider::SendGrid => request.json(&SendGridEmailRequest {
                personalizations: [SendGridPersonalization {
                    to: [SendGridAddress {
                        email: recipient.as_ref(),
                        name: None,
                    }],
                }],
                from: SendGridAddress {
                    email: self.sender.as_ref(),
                    name: self.sender_name.as_deref(),
                },
                subject,
                content: [
                    SendGridContent {
                        kind: "text/plain",
                        value: text_content,
                    },
                    SendGridContent {
                        kind: "text/html",
                        value: html_content,
                    },
                ],
            }),
        };

        request.send().await?.error_for_status()?;
        Ok(())
    }
}

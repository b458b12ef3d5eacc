// post-commit side effects of accepting a lead. the intake handler only
// enqueues; the worker sends, and every failure ends up in the logs rather
// than in a response. a persisted lead whose emails failed is a valid final
// state

use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::domain::Lead;
use crate::domain::LeadEmail;
use crate::domain::LeadSource;
use crate::email_client::EmailClient;
use crate::store::LeadStore;

/// An email ready to hand to `EmailClient::send_email`
#[derive(Debug)]
pub struct ComposedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// The subset of a lead the admin notification shows. Deliberately loose: the
/// notification dispatcher builds it from an untyped store event.
#[derive(Debug)]
pub struct LeadSummary<'a> {
    pub email: &'a str,
    pub created_at: Option<DateTime<Utc>>,
    pub source: Option<&'a str>,
}

impl<'a> From<&'a Lead> for LeadSummary<'a> {
    fn from(lead: &'a Lead) -> Self {
        Self {
            email: &lead.email,
            created_at: Some(lead.created_at),
            source: Some(lead.source.as_str()),
        }
    }
}

/// Sends the welcome email (with the checklist link) to a new lead
pub struct ChecklistMailer {
    client: EmailClient,
    product_name: String,
    checklist_url: String,
}

impl ChecklistMailer {
    pub fn new(
        client: EmailClient,
        product_name: String,
        checklist_url: String,
    ) -> Self {
        Self {
            client,
            product_name,
            checklist_url,
        }
    }

    pub fn compose(&self) -> ComposedEmail {
        let product = htmlescape::encode_minimal(&self.product_name);
        let url = htmlescape::encode_minimal(&self.checklist_url);
        ComposedEmail {
            subject: format!("Your {} checklist", self.product_name),
            html: format!(
                "<h2>Thanks for signing up!</h2>\
                 <p>Here is your {product} checklist: \
                 <a href=\"{url}\">download it here</a>.</p>\
                 <p>We'll be in touch with the occasional update. \
                 Reply to this email any time if you have questions.</p>"
            ),
            text: format!(
                "Thanks for signing up!\n\n\
                 Here is your {} checklist: {}\n\n\
                 We'll be in touch with the occasional update. \
                 Reply to this email any time if you have questions.",
                self.product_name, self.checklist_url
            ),
        }
    }

    pub async fn send(
        &self,
        recipient: &LeadEmail,
    ) -> Result<(), reqwest::Error> {
        let email = self.compose();
        self.client
            .send_email(recipient, &email.subject, &email.html, &email.text)
            .await
    }
}

/// Tells the site owner about a new lead. Shared by the notification worker
/// and `POST /functions/send-lead-notification`.
pub struct AdminNotifier {
    client: EmailClient,
    recipient: LeadEmail,
    product_name: String,
    dashboard_url: Option<String>,
}

impl AdminNotifier {
    pub fn new(
        client: EmailClient,
        recipient: LeadEmail,
        product_name: String,
        dashboard_url: Option<String>,
    ) -> Self {
        Self {
            client,
            recipient,
            product_name,
            dashboard_url,
        }
    }

    pub fn compose(
        &self,
        lead: &LeadSummary<'_>,
    ) -> ComposedEmail {
        // en-GB style, e.g. 23/04/2024, 07:48:23
        let time = lead
            .created_at
            .map(|t| t.format("%d/%m/%Y, %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let source = lead.source.unwrap_or(LeadSource::LandingPage.as_str());

        // the email comes straight from a web form
        let email_html = htmlescape::encode_minimal(lead.email);
        let source_html = htmlescape::encode_minimal(source);

        let mut html = format!(
            "<h2>New lead signed up!</h2>\
             <p><strong>Email:</strong> {email_html}</p>\
             <p><strong>Time:</strong> {time}</p>\
             <p><strong>Source:</strong> {source_html}</p>"
        );
        let mut text = format!(
            "New lead signed up!\n\nEmail: {}\nTime: {time}\nSource: {source}\n",
            lead.email
        );
        if let Some(url) = &self.dashboard_url {
            html.push_str(&format!(
                "<hr><p><a href=\"{}\">View all leads</a></p>",
                htmlescape::encode_minimal(url)
            ));
            text.push_str(&format!("\nView all leads: {url}\n"));
        }

        ComposedEmail {
            subject: format!("New {} lead!", self.product_name),
            html,
            text,
        }
    }

    #[tracing::instrument(name = "Sending admin notification", skip(self))]
    pub async fn notify(
        &self,
        lead: &LeadSummary<'_>,
    ) -> Result<(), reqwest::Error> {
        let email = self.compose(lead);
        self.client
            .send_email(&self.recipient, &email.subject, &email.html, &email.text)
            .await
    }
}

#[derive(Debug)]
pub enum NotificationJob {
    NewLead(Lead),
}

/// Sending half of the notification queue; one clone per actix worker
#[derive(Clone)]
pub struct NotificationQueue(mpsc::UnboundedSender<NotificationJob>);

impl NotificationQueue {
    /// Never fails the caller: if the worker has stopped, the job is logged
    /// and dropped
    pub fn enqueue(
        &self,
        job: NotificationJob,
    ) {
        if let Err(e) = self.0.send(job) {
            tracing::error!(job = ?e.0, "notification worker is gone, dropping job");
        }
    }
}

pub struct NotificationWorker {
    receiver: mpsc::UnboundedReceiver<NotificationJob>,
    store: LeadStore,
    checklist: ChecklistMailer,
    admin: Arc<AdminNotifier>,
}

pub fn notification_queue(
    store: LeadStore,
    checklist: ChecklistMailer,
    admin: Arc<AdminNotifier>,
) -> (NotificationQueue, NotificationWorker) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let worker = NotificationWorker {
        receiver,
        store,
        checklist,
        admin,
    };
    (NotificationQueue(sender), worker)
}

impl NotificationWorker {
    /// To be run as a separate task, next to the server. Returns once every
    /// `NotificationQueue` has been dropped and the queue is drained.
    pub async fn run(mut self) -> Result<(), anyhow::Error> {
        while let Some(job) = self.receiver.recv().await {
            self.process(job).await;
        }
        Ok(())
    }

    #[tracing::instrument(
        name = "Processing notification job",
        skip_all,
        fields(lead_id = tracing::field::Empty, lead_email = tracing::field::Empty)
    )]
    async fn process(
        &self,
        job: NotificationJob,
    ) {
        let NotificationJob::NewLead(lead) = job;
        tracing::Span::current()
            .record("lead_id", tracing::field::display(lead.id))
            .record("lead_email", tracing::field::display(&lead.email));

        // the checklist and the admin notification are independent; one failing
        // does not stop the other
        self.send_checklist(&lead).await;

        if let Err(e) = self.admin.notify(&LeadSummary::from(&lead)).await {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "failed to send admin notification"
            );
        }
    }

    async fn send_checklist(
        &self,
        lead: &Lead,
    ) {
        let recipient = match LeadEmail::parse(lead.email.clone()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error.message = %e, "skipping checklist for invalid email");
                return;
            }
        };

        if let Err(e) = self.checklist.send(&recipient).await {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "failed to send checklist email"
            );
            return;
        }

        match self.store.mark_checklist_sent(lead.id).await {
            Ok(()) => tracing::info!("checklist sent"),
            Err(e) => tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "checklist sent, but could not record it"
            ),
        }
    }
}

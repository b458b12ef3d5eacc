use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use lead_intake::configuration::get_configuration;
use lead_intake::configuration::Settings;
use lead_intake::configuration::StoreBackend;
use lead_intake::startup::Application;
use lead_intake::telemetry::get_subscriber;
use lead_intake::telemetry::init_subscriber;
use once_cell::sync::Lazy;
use serde_json::Value;
use uuid::Uuid;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::Respond;
use wiremock::ResponseTemplate;

/// Init the subscriber once per test binary.
///
/// To opt in to verbose logging, use the env var `TEST_LOG`:
///
/// ```sh
///      TEST_LOG=true cargo test [test_name] | bunyan
/// ```
static TRACING: Lazy<()> = Lazy::new(|| {
    // two different closure types cannot share a binding, hence the match arms
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber).unwrap();
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber).unwrap();
        }
    };
});

pub const LEADS_PATH: &str = "/rest/v1/leads";
pub const RESEND_PATH: &str = "/emails";
pub const SENDGRID_PATH: &str = "/v3/mail/send";
pub const ADMIN_EMAIL: &str = "hello@simplemtd.co.uk";

/// In-memory stand-in for the `leads` table behind the store's REST API.
/// Understands just enough of the dialect for `RestLeadStore`: `eq.` filters
/// on `email`/`id`, a unique `email` on insert, and `PATCH` merges.
#[derive(Clone, Default)]
pub struct FakeLeadsTable {
    rows: Arc<Mutex<Vec<Value>>>,
}

impl FakeLeadsTable {
    pub fn rows(&self) -> Vec<Value> { self.rows.lock().unwrap().clone() }

    pub fn find(
        &self,
        email: &str,
    ) -> Option<Value> {
        self.rows()
            .into_iter()
            .find(|r| r["email"].as_str() == Some(email))
    }
}

/// `(column, value)` of the first `column=eq.value` query pair
fn eq_filter(request: &Request) -> Option<(String, String)> {
    request.url.query_pairs().find_map(|(k, v)| {
        let value = v.strip_prefix("eq.")?;
        Some((k.into_owned(), value.to_owned()))
    })
}

fn matches(
    row: &Value,
    filter: &Option<(String, String)>,
) -> bool {
    match filter {
        Some((column, value)) => row[column.as_str()].as_str() == Some(value.as_str()),
        None => true,
    }
}

impl Respond for FakeLeadsTable {
    fn respond(
        &self,
        request: &Request,
    ) -> ResponseTemplate {
        let mut rows = self.rows.lock().unwrap();
        let filter = eq_filter(request);

        match request.method.as_str() {
            "GET" => {
                let found: Vec<Value> = rows
                    .iter()
                    .filter(|r| matches(r, &filter))
                    .cloned()
                    .collect();
                ResponseTemplate::new(200).set_body_json(found)
            }
            "POST" => {
                let row: Value = serde_json::from_slice(&request.body).unwrap();
                match rows.iter().any(|r| r["email"] == row["email"]) {
                    true => ResponseTemplate::new(409).set_body_json(serde_json::json!({
                        "code": "23505",
                        "message": "duplicate key value violates unique constraint \"leads_email_key\"",
                    })),
                    false => {
                        rows.push(row);
                        ResponseTemplate::new(201)
                    }
                }
            }
            "PATCH" => {
                let patch: serde_json::Map<String, Value> =
                    serde_json::from_slice(&request.body).unwrap();
                for row in rows.iter_mut().filter(|r| matches(r, &filter)) {
                    for (k, v) in &patch {
                        row[k.as_str()] = v.clone();
                    }
                }
                ResponseTemplate::new(204)
            }
            _ => ResponseTemplate::new(405),
        }
    }
}

pub struct TestApp {
    pub addr: String,
    pub leads: FakeLeadsTable,
    pub store_server: MockServer,
    pub email_server: MockServer,
    pub api_client: reqwest::Client,
}

impl TestApp {
    /// `POST /api/collect-lead` as JSON, from a fresh client address so the
    /// rate limit never gets in the way
    pub async fn post_lead(
        &self,
        body: &Value,
    ) -> reqwest::Response {
        self.post_lead_from(&Uuid::new_v4().to_string(), body).await
    }

    /// `POST /api/collect-lead` as JSON, from a given client address
    pub async fn post_lead_from(
        &self,
        client_addr: &str,
        body: &Value,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/api/collect-lead", self.addr))
            .header("X-Forwarded-For", client_addr)
            .json(body)
            .send()
            .await
            .expect("execute request")
    }

    pub async fn post_lead_form(
        &self,
        body: &str,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/api/collect-lead", self.addr))
            .header("X-Forwarded-For", Uuid::new_v4().to_string())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body.to_owned())
            .send()
            .await
            .expect("execute request")
    }

    /// `POST /api/webhook-lead`, with a raw body and content type
    pub async fn post_webhook(
        &self,
        content_type: &str,
        body: String,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/api/webhook-lead", self.addr))
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await
            .expect("execute request")
    }

    pub async fn post_lead_notification(
        &self,
        body: &Value,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/functions/send-lead-notification", self.addr))
            .json(body)
            .send()
            .await
            .expect("execute request")
    }

    /// Both providers accept everything
    pub async fn mount_email_ok(&self) {
        Mock::given(path(RESEND_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.email_server)
            .await;
        Mock::given(path(SENDGRID_PATH))
            .respond_with(ResponseTemplate::new(202))
            .mount(&self.email_server)
            .await;
    }

    /// Email requests received so far, polling until at least `n` have arrived
    /// (emails are sent by a background worker, after the response)
    pub async fn wait_for_emails(
        &self,
        n: usize,
    ) -> Vec<Request> {
        for _ in 0..100 {
            let received = self.email_server.received_requests().await.unwrap();
            if received.len() >= n {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {n} email requests")
    }

    /// The stored row for `email`, once `checklist_sent` has been set
    pub async fn wait_for_checklist_sent(
        &self,
        email: &str,
    ) -> Value {
        for _ in 0..100 {
            if let Some(row) = self.leads.find(email) {
                if row["checklist_sent"] == Value::Bool(true) {
                    return row;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("checklist_sent was never set for {email}")
    }

    /// Give the notification worker a chance to (not) do something
    pub async fn settle(&self) { tokio::time::sleep(Duration::from_millis(200)).await }
}

/// Email requests sent to one provider
pub fn requests_to<'a>(
    received: &'a [Request],
    provider_path: &str,
) -> Vec<&'a Request> {
    received
        .iter()
        .filter(|r| r.url.path() == provider_path)
        .collect()
}

pub fn json_body(request: &Request) -> Value { serde_json::from_slice(&request.body).unwrap() }

pub async fn spawn_app() -> TestApp { spawn_app_with(|_| {}).await }

/// Spawn the app against mocked store and email providers, on a random port.
/// `customise` runs last, on top of the local config.
pub async fn spawn_app_with(customise: impl FnOnce(&mut Settings)) -> TestApp {
    Lazy::force(&TRACING);

    let store_server = MockServer::start().await;
    let email_server = MockServer::start().await;

    let leads = FakeLeadsTable::default();
    Mock::given(path(LEADS_PATH))
        .respond_with(leads.clone())
        .mount(&store_server)
        .await;

    let cfg = {
        let mut cfg = get_configuration().unwrap();

        // port 0: the OS picks a random available port
        cfg.application.port = 0;

        cfg.store.backend = StoreBackend::Rest;
        cfg.store.base_url = store_server.uri();
        cfg.store.timeout_milliseconds = 2000;

        cfg.checklist_email.delivery.base_url = email_server.uri();
        cfg.checklist_email.delivery.timeout_milliseconds = 2000;
        cfg.notification_email.delivery.base_url = email_server.uri();
        cfg.notification_email.delivery.timeout_milliseconds = 2000;
        cfg.notification_email.recipient = ADMIN_EMAIL.to_string();

        customise(&mut cfg);
        cfg
    };

    let app = Application::build(cfg).await.unwrap();
    let addr = format!("http://127.0.0.1:{}", app.get_port());
    tokio::spawn(app.run_until_stopped());

    TestApp {
        addr,
        leads,
        store_server,
        email_server,
        api_client: reqwest::Client::new(),
    }
}

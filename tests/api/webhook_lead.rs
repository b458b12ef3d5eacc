use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use serde_json::json;
use serde_json::Value;
use wiremock::matchers::any;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;
use crate::helpers::TestApp;
use crate::helpers::LEADS_PATH;

async fn no_emails(app: &TestApp) {
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;
}

fn created_at(row: &Value) -> DateTime<Utc> {
    serde_json::from_value(row["created_at"].clone()).unwrap()
}

#[tokio::test]
async fn json_webhook_lead_is_stored() {
    let app = spawn_app().await;
    no_emails(&app).await;

    let body = json!({"email": "John@Foo.com", "_time": "2024-04-23T07:48:23Z"});
    let resp = app
        .post_webhook("application/json", body.to_string())
        .await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.json::<Value>().await.unwrap(),
        json!({
            "success": true,
            "message": "Lead stored successfully",
            "email": "john@foo.com",
        })
    );

    let row = app.leads.find("john@foo.com").unwrap();
    assert_eq!(row["source"], "webhook");
    assert_eq!(row["checklist_sent"], false);
    // the provider's submission time, not ours
    assert_eq!(
        created_at(&row),
        Utc.with_ymd_and_hms(2024, 4, 23, 7, 48, 23).unwrap()
    );
}

#[tokio::test]
async fn form_webhook_lead_is_stored() {
    let app = spawn_app().await;

    let before = Utc::now();
    let resp = app
        .post_webhook(
            "application/x-www-form-urlencoded",
            "email=jane%40foo.com".to_string(),
        )
        .await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap()["success"], true);

    // no `_time`: stamped on arrival
    let row = app.leads.find("jane@foo.com").unwrap();
    assert!(created_at(&row) >= before);
}

#[tokio::test]
async fn resubmission_updates_the_existing_lead() {
    let app = spawn_app().await;
    no_emails(&app).await;

    let body = json!({"email": "john@foo.com", "_time": "2024-04-23T07:48:23Z"}).to_string();
    app.post_webhook("application/json", body).await;

    let body = json!({"email": "john@foo.com", "_time": "2024-05-01T09:00:00Z"}).to_string();
    let resp = app.post_webhook("application/json", body).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.json::<Value>().await.unwrap(),
        json!({
            "success": true,
            "message": "Lead updated",
            "email": "john@foo.com",
        })
    );

    let rows = app.leads.rows();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(!row["updated_at"].is_null());
    assert!(row["notes"]
        .as_str()
        .unwrap()
        .starts_with("Resubmitted via webhook at 2024-05-01T09:00:00"));
    // the original submission time is kept
    assert_eq!(
        created_at(row),
        Utc.with_ymd_and_hms(2024, 4, 23, 7, 48, 23).unwrap()
    );
}

#[tokio::test]
async fn failures_are_acknowledged_with_200() {
    let app = spawn_app().await;

    for (body, message) in [
        (json!({}), "Email is required"),
        (json!({"email": ""}), "Email is required"),
        (json!({"email": "not-an-email"}), "Invalid email format"),
    ] {
        let resp = app
            .post_webhook("application/json", body.to_string())
            .await;
        assert_eq!(resp.status().as_u16(), 200, "{message}");
        let resp = resp.json::<Value>().await.unwrap();
        assert_eq!(resp["success"], false, "{message}");
        assert_eq!(resp["message"], message);
    }
    assert!(app.leads.rows().is_empty());
}

#[tokio::test]
async fn store_failure_is_acknowledged_with_200() {
    let app = spawn_app().await;
    Mock::given(path(LEADS_PATH))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&app.store_server)
        .await;

    let body = json!({"email": "john@foo.com"}).to_string();
    let resp = app.post_webhook("application/json", body).await;
    assert_eq!(resp.status().as_u16(), 200);
    let resp = resp.json::<Value>().await.unwrap();
    assert_eq!(resp["success"], false);
    assert_eq!(resp["email"], "john@foo.com");
}

#[tokio::test]
async fn webhook_is_not_rate_limited() {
    let app = spawn_app().await;

    for i in 0..5 {
        let body = json!({"email": format!("lead{i}@foo.com")}).to_string();
        let resp = app.post_webhook("application/json", body).await;
        assert_eq!(resp.status().as_u16(), 200);
    }
    assert_eq!(app.leads.rows().len(), 5);
}

#[tokio::test]
async fn oversized_body_is_still_acknowledged() {
    let app = spawn_app().await;

    let body = json!({
        "email": "john@foo.com",
        "message": "x".repeat(300 * 1024),
    })
    .to_string();
    let resp = app.post_webhook("application/json", body).await;

    assert_eq!(resp.status().as_u16(), 200);
    let resp = resp.json::<Value>().await.unwrap();
    assert_eq!(resp["success"], false);
    assert_eq!(resp["message"], "Payload too large");
    assert!(app.leads.rows().is_empty());

    // a normal body on the same app is unaffected
    let body = json!({"email": "john@foo.com"}).to_string();
    let resp = app.post_webhook("application/json", body).await;
    assert_eq!(resp.json::<Value>().await.unwrap()["success"], true);
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let app = spawn_app().await;

    let resp = app
        .api_client
        .get(format!("{}/api/webhook-lead", app.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 405);
}

use serde_json::json;
use wiremock::matchers::any;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::json_body;
use crate::helpers::spawn_app;
use crate::helpers::ADMIN_EMAIL;
use crate::helpers::RESEND_PATH;

#[tokio::test]
async fn insert_event_sends_one_admin_notification() {
    let app = spawn_app().await;
    Mock::given(path(RESEND_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let event = json!({
        "type": "INSERT",
        "table": "leads",
        "schema": "public",
        "record": {
            "id": "6f1c2b1e-7c1a-4a55-9a3e-2f0d5b8f6d11",
            "email": "john@foo.com",
            "source": "webhook",
            "created_at": "2024-04-23T07:48:23.123456+00:00",
        },
        "old_record": null,
    });
    let resp = app.post_lead_notification(&event).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "Email sent");

    let received = app.email_server.received_requests().await.unwrap();
    let body = json_body(&received[0]);
    assert_eq!(body["to"][0], ADMIN_EMAIL);
    assert_eq!(body["subject"], "New SimpleMTD lead!");
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("john@foo.com"));
    assert!(text.contains("23/04/2024, 07:48:23"));
    assert!(text.contains("Source: webhook"));
}

#[tokio::test]
async fn event_without_email_is_rejected() {
    let app = spawn_app().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;

    for event in [
        json!({}),
        json!({"record": null}),
        json!({"record": {"source": "landing_page"}}),
        json!({"record": {"email": ""}}),
    ] {
        let resp = app.post_lead_notification(&event).await;
        assert_eq!(resp.status().as_u16(), 400, "{event}");
        assert_eq!(resp.text().await.unwrap(), "No email found");
    }
}

#[tokio::test]
async fn provider_failure_is_reported() {
    let app = spawn_app().await;
    Mock::given(path(RESEND_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.email_server)
        .await;

    let event = json!({"record": {"email": "john@foo.com"}});
    let resp = app.post_lead_notification(&event).await;
    assert_eq!(resp.status().as_u16(), 500);
    assert_eq!(resp.text().await.unwrap(), "Error sending email");
}

#[tokio::test]
async fn timestamp_without_time_zone_is_still_sent() {
    let app = spawn_app().await;
    Mock::given(path(RESEND_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&app.email_server)
        .await;

    for (created_at, shown) in [
        ("2024-04-23T07:48:23.123456", "Time: 23/04/2024, 07:48:23"),
        ("not a date", "Time: unknown"),
    ] {
        let event = json!({
            "record": {"email": "john@foo.com", "created_at": created_at, "source": "webhook"},
        });
        let resp = app.post_lead_notification(&event).await;
        assert_eq!(resp.status().as_u16(), 200, "{created_at}");
        assert_eq!(resp.text().await.unwrap(), "Email sent");

        let received = app.email_server.received_requests().await.unwrap();
        let body = json_body(received.last().unwrap());
        assert!(body["text"].as_str().unwrap().contains(shown), "{created_at}");
    }
}

#[tokio::test]
async fn unreadable_event_is_rejected() {
    let app = spawn_app().await;

    let resp = app
        .api_client
        .post(format!("{}/functions/send-lead-notification", app.addr))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(resp.text().await.unwrap(), "No email found");
}

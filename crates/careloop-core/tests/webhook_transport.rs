//! Webhook transport against a mock provider.

use careloop_core::config::TransportSettings;
use careloop_core::dispatch::webhook::{sign, SIGNATURE_HEADER};
use careloop_core::{
    Alert, AlertType, DeliveryError, NotificationChannel, NotificationPayload,
    NotificationTransport, Severity, WebhookTransport,
};
use chrono::Utc;
use mockito::Matcher;

fn payload() -> NotificationPayload {
    let alert = Alert::new(
        AlertType::TaskMissed,
        "Missed reminder: Take medication",
        "Take medication was not marked done",
        Severity::Urgent,
        ["m1".to_string()],
        Utc::now(),
    );
    NotificationPayload::for_recipient(&alert, "m1", "Member m1")
}

fn transport(email_url: String, secret: Option<&str>) -> WebhookTransport {
    WebhookTransport::from_settings(&TransportSettings {
        email_webhook_url: Some(email_url),
        sms_webhook_url: None,
        signing_secret: secret.map(str::to_string),
        timeout_secs: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn success_posts_signed_envelope() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/email")
        .match_header("content-type", "application/json")
        .match_header(SIGNATURE_HEADER, Matcher::Regex("^[0-9a-f]{64}$".into()))
        .match_body(Matcher::PartialJson(serde_json::json!({
            "channel": "email",
            "to": "m1@example.com",
            "payload": { "recipient_id": "m1", "severity": "urgent" }
        })))
        .with_status(200)
        .create_async()
        .await;

    let t = transport(format!("{}/email", server.url()), Some("s3cret"));
    t.send(NotificationChannel::Email, "m1@example.com", &payload())
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn unsigned_when_no_secret() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/email")
        .match_header(SIGNATURE_HEADER, Matcher::Missing)
        .with_status(202)
        .create_async()
        .await;

    let t = transport(format!("{}/email", server.url()), None);
    t.send(NotificationChannel::Email, "m1@example.com", &payload())
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn server_error_is_transient() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/email")
        .with_status(503)
        .create_async()
        .await;

    let t = transport(format!("{}/email", server.url()), None);
    let err = t
        .send(NotificationChannel::Email, "m1@example.com", &payload())
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Transient(_)));
    assert!(err.is_retryable());
    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limit_is_transient() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/email")
        .with_status(429)
        .create_async()
        .await;

    let t = transport(format!("{}/email", server.url()), None);
    let err = t
        .send(NotificationChannel::Email, "m1@example.com", &payload())
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Transient(_)));
}

#[tokio::test]
async fn client_error_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/email")
        .with_status(400)
        .with_body(r#"{"error":"bad address"}"#)
        .create_async()
        .await;

    let t = transport(format!("{}/email", server.url()), None);
    let err = t
        .send(NotificationChannel::Email, "m1@example.com", &payload())
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Rejected(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unreachable_provider_is_transient() {
    let t = transport("http://127.0.0.1:1/email".into(), None);
    let err = t
        .send(NotificationChannel::Email, "m1@example.com", &payload())
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Transient(_)));
}

#[tokio::test]
async fn unconfigured_channel_is_not_supported() {
    let t = transport("http://127.0.0.1:1/email".into(), None);
    assert!(t.supports(NotificationChannel::Email));
    assert!(!t.supports(NotificationChannel::Sms));

    let err = t
        .send(NotificationChannel::Sms, "+15550101", &payload())
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Rejected(_)));
}

#[test]
fn signature_is_over_the_exact_body() {
    let body = br#"{"channel":"sms"}"#;
    let a = sign("key", body);
    assert_eq!(a.len(), 64);
    assert_eq!(a, sign("key", body));
    assert_ne!(a, sign("other", body));
    assert_ne!(a, sign("key", br#"{"channel":"email"}"#));
}

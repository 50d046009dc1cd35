//! WebhookChat adapter against a local mock server.

use std::time::Duration;

use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use autopr::adapters::webhook::WebhookChat;
use autopr::adapters::ChatAdapter;
use autopr::error::ErrorKind;
use autopr::util::Deadline;

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

#[tokio::test]
async fn test_post_message_delivers_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/T000"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let chat = WebhookChat::new(format!("{}/hooks/T000", server.uri())).unwrap();
    let result = chat
        .post_message("#reviews", "merge blocked", &deadline())
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_signed_payload_carries_signature_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("X-Signature"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let chat = WebhookChat::new(server.uri())
        .unwrap()
        .with_signing_secret("whsec_outbound");
    chat.post_message("#reviews", "signed", &deadline())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_status_codes_map_to_taxonomy() {
    for (code, kind) in [
        (401u16, ErrorKind::AuthFailed),
        (403, ErrorKind::Forbidden),
        (429, ErrorKind::RateLimited),
        (500, ErrorKind::Transport),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(code))
            .mount(&server)
            .await;

        let chat = WebhookChat::new(server.uri()).unwrap();
        let err = chat
            .post_message("#reviews", "x", &deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), kind, "status {}", code);
    }
}

#[tokio::test]
async fn test_deadline_bounds_slow_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let chat = WebhookChat::new(server.uri()).unwrap();
    let short = Deadline::after(Duration::from_millis(100));
    let err = chat
        .post_message("#reviews", "slow", &short)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deadline);
}

#[tokio::test]
async fn test_expired_deadline_never_sends() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let chat = WebhookChat::new(server.uri()).unwrap();
    let expired = Deadline::after(Duration::ZERO);
    let err = chat
        .post_message("#reviews", "late", &expired)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deadline);
}

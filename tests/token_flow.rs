//! Token endpoint round trips against a stubbed Xero identity server.

use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xero_bridge::{config::Config, error::AuthenticationError, token::TokenManager, AppState};

fn manager_for(token_url: String) -> TokenManager {
    let mut config = Config::new("abc", "shh", "https://app/cb");
    config.token_url = token_url;
    config.http_timeout = std::time::Duration::from_secs(5);
    AppState::new(config).unwrap().tokens
}

async fn stub_server() -> (MockServer, TokenManager) {
    let server = MockServer::start().await;
    let manager = manager_for(format!("{}/connect/token", server.uri()));
    (server, manager)
}

fn token_body(expires_in: u64) -> serde_json::Value {
    json!({
        "access_token": "tok",
        "refresh_token": "ref",
        "expires_in": expires_in,
        "token_type": "Bearer"
    })
}

#[tokio::test]
async fn authorize_then_exchange_yields_token_set() {
    let (server, manager) = stub_server().await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(header("authorization", "Basic YWJjOnNoaA=="))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=validcode"))
        .and(body_string_contains("redirect_uri=https%3A%2F%2Fapp%2Fcb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(1800)))
        .expect(1)
        .mount(&server)
        .await;

    let request = manager.build_authorization_url();
    let params: HashMap<String, String> = Url::parse(&request.url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect();
    assert_eq!(params["client_id"], "abc");
    assert_eq!(params["redirect_uri"], "https://app/cb");

    let tokens = manager.exchange_code("validcode").await.unwrap();
    assert_eq!(tokens.access_token, "tok");
    assert_eq!(tokens.refresh_token.as_deref(), Some("ref"));
    assert_eq!(tokens.token_type, "Bearer");

    let expected = Utc::now() + Duration::seconds(1800);
    let drift = (tokens.expires_at - expected).num_milliseconds().abs();
    assert!(drift <= 1000, "expiry off by {}ms", drift);
}

#[tokio::test]
async fn expiry_follows_latest_response() {
    let (server, manager) = stub_server().await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(1800)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(60)))
        .mount(&server)
        .await;

    let first = manager.exchange_code("validcode").await.unwrap();
    let second = manager.exchange_code("validcode").await.unwrap();

    assert_eq!(first.expires_in, 1800);
    assert_eq!(second.expires_in, 60);
    assert!(first.expires_at - second.expires_at > Duration::seconds(1700));
}

#[tokio::test]
async fn refresh_sends_refresh_grant() {
    let (server, manager) = stub_server().await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-ref"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "new-ref",
            "expires_in": 1800,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = manager.refresh_token("old-ref").await.unwrap();
    assert_eq!(tokens.access_token, "fresh");
    assert_eq!(tokens.refresh_token.as_deref(), Some("new-ref"));
}

#[tokio::test]
async fn unauthorized_status_is_reported() {
    let (server, manager) = stub_server().await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"invalid_client\"}"))
        .mount(&server)
        .await;

    let err = manager.exchange_code("validcode").await.unwrap_err();
    assert!(matches!(
        err,
        AuthenticationError::UpstreamError { status: 401, .. }
    ));
    assert!(err.to_string().contains("401"));
    assert!(err.to_string().contains("invalid_client"));

    let err = manager.refresh_token("ref").await.unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn rejected_code_is_invalid_grant() {
    let (server, manager) = stub_server().await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .mount(&server)
        .await;

    let err = manager.exchange_code("used-code").await.unwrap_err();
    assert!(matches!(err, AuthenticationError::InvalidGrant { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn garbage_body_is_malformed_response() {
    let (server, manager) = stub_server().await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = manager.exchange_code("validcode").await.unwrap_err();
    assert!(matches!(err, AuthenticationError::MalformedResponse(_)));
}

#[tokio::test]
async fn out_of_range_lifetime_is_malformed_response() {
    let (server, manager) = stub_server().await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(10_000_000_000_000_000)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(u64::MAX)))
        .mount(&server)
        .await;

    // The first lifetime is past chrono's range, the second past i64
    let (beyond_chrono, beyond_i64) = tokio::spawn(async move {
        let first = manager.exchange_code("validcode").await;
        let second = manager.refresh_token("ref").await;
        (first, second)
    })
    .await
    .expect("token exchange task panicked");

    assert!(matches!(
        beyond_chrono,
        Err(AuthenticationError::MalformedResponse(_))
    ));
    assert!(matches!(
        beyond_i64,
        Err(AuthenticationError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn connection_refused_is_network_failure() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager = manager_for(format!("http://{}/connect/token", addr));
    let err = manager.exchange_code("validcode").await.unwrap_err();
    assert!(matches!(err, AuthenticationError::NetworkFailure(_)));
    assert!(err.is_retryable());
}

//! Integration tests for `ReqwestUaaClient` against a mocked UAA endpoint.
//!
//! The production `UaaClient` trait is behind a mock HTTP server rather than
//! a live UAA deployment, the same way the teacher's own frontend tests stub
//! an upstream provider with `wiremock`.

use nozzle_rust::firehose::{ReqwestUaaClient, UaaClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn successful_exchange_returns_bearer_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "abc123",
            "token_type": "bearer"
        })))
        .mount(&mock_server)
        .await;

    let client = ReqwestUaaClient::new(mock_server.uri());
    let token = client
        .get_auth_token("user", "pw", true)
        .await
        .expect("auth exchange should succeed");

    assert_eq!(token, "bearer abc123");
}

#[tokio::test]
async fn non_success_status_is_upstream_auth_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let client = ReqwestUaaClient::new(mock_server.uri());
    let result = client.get_auth_token("user", "wrong", true).await;

    assert!(matches!(
        result,
        Err(nozzle_rust::error::NozzleError::UpstreamAuth(_))
    ));
}

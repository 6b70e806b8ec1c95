//! End-to-end REST scenarios driven through `RestEndpoint::start`, binding a
//! real (ephemeral) TCP port rather than exercising the router in isolation
//! — the unit-level router tests already live in `src/server.rs`, so this
//! file covers the things only a live bind exercises: the TLS/plain-HTTP
//! branch selection and the process of talking to the endpoint over an
//! actual socket.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use nozzle_rust::cache::MetricCache;
use nozzle_rust::firehose::{Envelope, EventPayload};
use nozzle_rust::server::RestEndpoint;
use nozzle_rust::token::TokenRegistry;

fn free_port() -> u16 {
    StdTcpListener::bind(("127.0.0.1", 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn plain_http_endpoint_serves_token_and_origin_routes() {
    let port = free_port();
    let registry = TokenRegistry::new();
    let cache = Arc::new(MetricCache::new());
    cache.ingest(&Envelope {
        origin: "gorouter".to_string(),
        deployment: "d".to_string(),
        job: "j".to_string(),
        index: "0".to_string(),
        ip: "127.0.0.1".to_string(),
        payload: EventPayload::ValueMetric {
            name: "m".to_string(),
            value: 1.0,
        },
    });

    let endpoint = RestEndpoint::new(
        registry,
        cache,
        "user".to_string(),
        "pw".to_string(),
        port as u32,
        false,
    );
    let mut server_errors = endpoint.start("", "").await;

    // Give the spawned listener task a moment to bind before connecting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let token_response = client
        .get(format!("{base}/token"))
        .header("username", "user")
        .header("password", "pw")
        .send()
        .await
        .unwrap();
    assert_eq!(token_response.status(), reqwest::StatusCode::OK);
    let token = token_response
        .headers()
        .get("token")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let resource_response = client
        .get(format!("{base}/gorouters"))
        .header("token", token)
        .send()
        .await
        .unwrap();
    assert_eq!(resource_response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resource_response.json().await.unwrap();
    assert_eq!(body[0]["ValueMetrics"]["m"], 1.0);

    assert!(server_errors.try_recv().is_err(), "no server error expected");
}

//! `RestEndpoint`: the TLS-terminating REST surface scrapers poll.
//!
//! Exposes `GET /token` for credential exchange and a fixed table of
//! origin-mapped resource endpoints. Shares the [`TokenRegistry`] and
//! [`MetricCache`] with the rest of the process via `Arc`s in [`AppState`].

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use tokio::sync::mpsc;

use crate::cache::MetricCache;
use crate::config::resolve_cert_path;
use crate::error::NozzleError;
use crate::token::TokenRegistry;

const HEADER_USERNAME: &str = "username";
const HEADER_PASSWORD: &str = "password";
const HEADER_TOKEN: &str = "token";

/// The literal path -> origin key table from the external interface spec.
pub const ORIGIN_ROUTES: &[(&str, &str)] = &[
    ("/metron_agents", "MetronAgent"),
    ("/syslog_drains", "syslog_drain_binder"),
    ("/tps_watchers", "tps_watcher"),
    ("/tps_listeners", "tps_listener"),
    ("/stagers", "stager"),
    ("/ssh_proxies", "ssh-proxy"),
    ("/senders", "sender"),
    ("/route_emitters", "route_emitter"),
    ("/reps", "rep"),
    ("/receptors", "receptor"),
    ("/nsync_listeners", "nsync_listener"),
    ("/nsync_bulkers", "nsync_bulker"),
    ("/garden_linuxs", "garden-linux"),
    ("/file_servers", "file_server"),
    ("/fetchers", "fetcher"),
    ("/convergers", "converger"),
    ("/cc_uploaders", "cc_uploader"),
    ("/bbs", "bbs"),
    ("/auctioneers", "auctioneer"),
    ("/etcds", "etcd"),
    ("/doppler_servers", "DopplerServer"),
    ("/cloud_controllers", "cc"),
    ("/traffic_controllers", "LoggregatorTrafficController"),
    ("/gorouters", "gorouter"),
];

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TokenRegistry>,
    pub cache: Arc<MetricCache>,
    pub uaa_username: Arc<str>,
    pub uaa_password: Arc<str>,
}

pub struct RestEndpoint {
    state: AppState,
    port: u32,
    use_ssl: bool,
}

impl RestEndpoint {
    pub fn new(
        registry: Arc<TokenRegistry>,
        cache: Arc<MetricCache>,
        uaa_username: String,
        uaa_password: String,
        port: u32,
        use_ssl: bool,
    ) -> Self {
        RestEndpoint {
            state: AppState {
                registry,
                cache,
                uaa_username: uaa_username.into(),
                uaa_password: uaa_password.into(),
            },
            port,
            use_ssl,
        }
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new().route("/token", any(token_handler));
        for (path, origin) in ORIGIN_ROUTES {
            let origin = origin.to_string();
            router = router.route(
                path,
                any(move |method: Method, headers: HeaderMap, State(state): State<AppState>| {
                    let origin = origin.clone();
                    async move { resource_handler(method, headers, state, origin).await }
                }),
            );
        }
        router.with_state(self.state.clone())
    }

    /// Starts listening on the configured port. Resolves `key_path`/
    /// `cert_path` to absolute form and terminates TLS, unless
    /// `WebServerUseSSL` is false, in which case it binds plain HTTP — a
    /// debugging affordance, logged loudly since it is security relevant.
    /// Returns a single-element error stream yielding the terminating
    /// error, closed cleanly on shutdown.
    pub async fn start(&self, key_path: &str, cert_path: &str) -> mpsc::Receiver<NozzleError> {
        let (tx, rx) = mpsc::channel(1);
        let router = self.router();
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.port as u16));

        if self.use_ssl {
            let key: PathBuf = resolve_cert_path(key_path);
            let cert: PathBuf = resolve_cert_path(cert_path);
            tracing::info!(%addr, ?cert, ?key, "starting TLS REST endpoint");

            tokio::spawn(async move {
                let config =
                    match axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key).await
                    {
                        Ok(c) => c,
                        Err(e) => {
                            let _ = tx
                                .send(NozzleError::ServerFatal(format!(
                                    "failed to load TLS cert/key: {e}"
                                )))
                                .await;
                            return;
                        }
                    };

                if let Err(e) = axum_server::bind_rustls(addr, config)
                    .serve(router.into_make_service())
                    .await
                {
                    let _ = tx.send(NozzleError::ServerFatal(e.to_string())).await;
                }
            });
        } else {
            tracing::warn!(%addr, "starting REST endpoint WITHOUT TLS (WebServerUseSSL=false)");
            tokio::spawn(async move {
                match tokio::net::TcpListener::bind(addr).await {
                    Ok(listener) => {
                        if let Err(e) = axum::serve(listener, router).await {
                            let _ = tx.send(NozzleError::ServerFatal(e.to_string())).await;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(NozzleError::ServerFatal(e.to_string())).await;
                    }
                }
            });
        }

        rx
    }
}

fn method_not_allowed(method: &Method) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        format!("method {method} not allowed on this endpoint"),
    )
        .into_response()
}

async fn token_handler(
    method: Method,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if method != Method::GET {
        return method_not_allowed(&method);
    }

    let username = headers
        .get(HEADER_USERNAME)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let password = headers
        .get(HEADER_PASSWORD)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if username.is_empty() || password.is_empty() {
        tracing::debug!("no username or password in header");
        return (
            StatusCode::BAD_REQUEST,
            "username and/or password not found in header",
        )
            .into_response();
    }

    // Conjunctive comparison: both must match. A disjunctive ("either
    // wrong passes") comparison is a known defect in an earlier revision.
    if username == &*state.uaa_username && password == &*state.uaa_password {
        let token = state.registry.issue();
        tracing::debug!(token = %token.value, "successful login generated token");

        let mut response = StatusCode::OK.into_response();
        response.headers_mut().insert(
            HEADER_TOKEN,
            token.value.parse().expect("token alphabet is header-safe"),
        );
        response
    } else {
        tracing::debug!(%username, "wrong username and/or password");
        (StatusCode::UNAUTHORIZED, "Invalid Username and/or Password").into_response()
    }
}

async fn resource_handler(
    method: Method,
    headers: HeaderMap,
    state: AppState,
    origin: String,
) -> Response {
    if method != Method::GET {
        return method_not_allowed(&method);
    }

    let token_value = headers
        .get(HEADER_TOKEN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = match state.registry.lookup(token_value) {
        Some(t) => t,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                format!("Invalid token {token_value} supplied"),
            )
                .into_response();
        }
    };

    if token.use_token().is_err() {
        return (
            StatusCode::UNAUTHORIZED,
            format!("Invalid token {token_value} supplied"),
        )
            .into_response();
    }

    match state.cache.snapshot_origin(&origin) {
        Some(resources) => (StatusCode::OK, Json(resources)).into_response(),
        None => (StatusCode::NO_CONTENT, "{}").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            registry: TokenRegistry::new(),
            cache: Arc::new(MetricCache::new()),
            uaa_username: "user".into(),
            uaa_password: "pw".into(),
        }
    }

    fn router_for(state: AppState) -> Router {
        let mut router = Router::new().route("/token", any(token_handler));
        for (path, origin) in ORIGIN_ROUTES {
            let origin = origin.to_string();
            router = router.route(
                path,
                any(move |method: Method, headers: HeaderMap, State(state): State<AppState>| {
                    let origin = origin.clone();
                    async move { resource_handler(method, headers, state, origin).await }
                }),
            );
        }
        router.with_state(state)
    }

    #[tokio::test]
    async fn token_with_valid_credentials_returns_200_with_token_header() {
        let router = router_for(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/token")
                    .header("username", "user")
                    .header("password", "pw")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let token = response.headers().get("token").unwrap().to_str().unwrap();
        assert_eq!(token.len(), 15);
    }

    #[tokio::test]
    async fn token_with_wrong_password_returns_401() {
        let router = router_for(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/token")
                    .header("username", "user")
                    .header("password", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "Invalid Username and/or Password".as_bytes());
    }

    #[tokio::test]
    async fn token_with_missing_headers_returns_400() {
        let router = router_for(test_state());
        let response = router
            .oneshot(Request::builder().uri("/token").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "username and/or password not found in header".as_bytes());
    }

    #[tokio::test]
    async fn put_on_token_returns_405_naming_method() {
        let router = router_for(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/token")
                    .header("username", "user")
                    .header("password", "pw")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("PUT"));
    }

    #[tokio::test]
    async fn gorouter_snapshot_returns_ingested_resource() {
        let state = test_state();
        let token = state.registry.issue();
        state.cache.ingest(&crate::firehose::Envelope {
            origin: "gorouter".to_string(),
            deployment: "d".to_string(),
            job: "j".to_string(),
            index: "0".to_string(),
            ip: "127.0.0.1".to_string(),
            payload: crate::firehose::EventPayload::ValueMetric {
                name: "m".to_string(),
                value: 100.0,
            },
        });

        let router = router_for(state);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/gorouters")
                    .header("token", token.value.as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed[0]["Deployment"], "d");
        assert_eq!(parsed[0]["ValueMetrics"]["m"], 100.0);
        assert_eq!(parsed[0]["CounterMetrics"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn empty_origin_returns_204_with_empty_object_body() {
        let state = test_state();
        let token = state.registry.issue();
        let router = router_for(state);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/gorouters")
                    .header("token", token.value.as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "{}".as_bytes());
    }

    #[tokio::test]
    async fn unknown_token_returns_401_naming_token() {
        let router = router_for(test_state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/gorouters")
                    .header("token", "not-a-real-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("not-a-real-token"));
    }
}

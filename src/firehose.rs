//! Upstream collaborators: the firehose envelope stream and the UAA bearer
//! token exchange. Both are expressed as traits so [`crate::nozzle::NozzleLoop`]'s
//! concurrency discipline is testable without a live control plane; a
//! concrete WebSocket-based consumer and a `reqwest`-based UAA client are
//! still provided as the production implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::Connector;

use crate::error::NozzleError;

/// A `rustls` server-certificate verifier that accepts anything, wiring
/// `InsecureSSLSkipVerify` into the websocket transport the same way
/// `ReqwestUaaClient::get_auth_token` wires it into `reqwest` via
/// `danger_accept_invalid_certs`. Only ever installed when the operator has
/// explicitly set the flag.
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA1,
            rustls::SignatureScheme::ECDSA_SHA1_Legacy,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Builds the `tokio-tungstenite` connector for this consumer's
/// `InsecureSkipVerify` setting. `None` lets `connect_async_tls_with_config`
/// fall back to the crate's default native-roots `rustls` config; `Some`
/// substitutes a `rustls::ClientConfig` whose verifier accepts any
/// certificate, matching `ReqwestUaaClient`'s `danger_accept_invalid_certs`
/// behavior for the same flag.
fn connector_for(insecure_skip_verify: bool) -> Option<Connector> {
    if !insecure_skip_verify {
        return None;
    }

    // Idempotent: a default CryptoProvider may already be installed by
    // another rustls consumer in-process (e.g. axum-server's TLS listener);
    // installation failure here just means one already won the race.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        .with_no_client_auth();

    Some(Connector::Rustls(Arc::new(config)))
}

/// One unit of measurement emitted by the upstream firehose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    pub deployment: String,
    pub job: String,
    pub index: String,
    pub ip: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// The envelope's measurement payload. `Other` covers any event type
/// outside {ValueMetric, CounterEvent}; it is logged and discarded, never
/// stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    ValueMetric { name: String, value: f64 },
    CounterEvent { name: String, total: u64 },
    #[serde(other)]
    Other,
}

/// Sink for upstream wire-protocol debug output (`SetDebugPrinter`).
/// Forwarded into the structured log at trace level in the production
/// implementation, mirroring `BMDebugPrinter` in the original.
pub type DebugPrinter = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Handle returned alongside a firehose connection's two channels. Dropping
/// it or calling [`FirehoseHandle::close`] tells the background task to
/// disconnect.
pub struct FirehoseHandle {
    close_tx: Option<oneshot::Sender<()>>,
}

impl FirehoseHandle {
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// The upstream firehose client: subscribe with a bearer token and idle
/// timeout, and receive envelopes/errors on two channels.
pub trait FirehoseConsumer: Send + Sync {
    fn set_idle_timeout(&mut self, timeout: Duration);
    fn set_debug_printer(&mut self, sink: DebugPrinter);

    /// Opens the stream. Returns the envelope channel, the error channel
    /// (at most one error is ever sent before the stream ends), and a
    /// handle used to force-close the connection.
    fn firehose(
        &self,
        subscription_id: &str,
        bearer_token: &str,
    ) -> (
        mpsc::Receiver<Envelope>,
        mpsc::Receiver<NozzleError>,
        FirehoseHandle,
    );
}

/// Production firehose consumer speaking newline-delimited JSON envelopes
/// over a WebSocket, in the spirit of the original's
/// `github.com/cloudfoundry/noaa/consumer` (itself a websocket client over
/// the traffic controller's firehose endpoint).
pub struct WebSocketFirehoseConsumer {
    traffic_controller_url: String,
    insecure_skip_verify: bool,
    idle_timeout: Duration,
    debug_printer: Option<DebugPrinter>,
}

impl WebSocketFirehoseConsumer {
    pub fn new(traffic_controller_url: String, insecure_skip_verify: bool) -> Self {
        WebSocketFirehoseConsumer {
            traffic_controller_url,
            insecure_skip_verify,
            idle_timeout: Duration::from_secs(25),
            debug_printer: None,
        }
    }
}

impl FirehoseConsumer for WebSocketFirehoseConsumer {
    fn set_idle_timeout(&mut self, timeout: Duration) {
        self.idle_timeout = timeout;
    }

    fn set_debug_printer(&mut self, sink: DebugPrinter) {
        self.debug_printer = Some(sink);
    }

    fn firehose(
        &self,
        subscription_id: &str,
        bearer_token: &str,
    ) -> (
        mpsc::Receiver<Envelope>,
        mpsc::Receiver<NozzleError>,
        FirehoseHandle,
    ) {
        let url = format!(
            "{}/firehose/{}",
            self.traffic_controller_url.trim_end_matches('/'),
            subscription_id
        );
        let bearer = bearer_token.to_string();
        let idle_timeout = self.idle_timeout;
        let debug_printer = self.debug_printer.clone();
        let insecure_skip_verify = self.insecure_skip_verify;

        let (envelope_tx, envelope_rx) = mpsc::channel(256);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (close_tx, mut close_rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Some(printer) = &debug_printer {
                printer("WEBSOCKET REQUEST", &format!("GET {url}"));
            }

            let mut request = match url.clone().into_client_request() {
                Ok(r) => r,
                Err(e) => {
                    let _ = error_tx
                        .send(NozzleError::UpstreamStream(e.to_string()))
                        .await;
                    return;
                }
            };
            request.headers_mut().insert(
                "Authorization",
                match bearer.parse() {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = error_tx
                            .send(NozzleError::UpstreamStream(format!(
                                "invalid bearer token header: {e}"
                            )))
                            .await;
                        return;
                    }
                },
            );

            if insecure_skip_verify {
                tracing::warn!("firehose consumer configured with InsecureSkipVerify");
            }
            let connector = connector_for(insecure_skip_verify);

            let connect_result = tokio::time::timeout(
                idle_timeout,
                tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector),
            )
            .await;

            let (ws_stream, _) = match connect_result {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    let _ = error_tx
                        .send(NozzleError::UpstreamStream(e.to_string()))
                        .await;
                    return;
                }
                Err(_) => {
                    let _ = error_tx
                        .send(NozzleError::UpstreamStream(
                            "timed out connecting to traffic controller".to_string(),
                        ))
                        .await;
                    return;
                }
            };

            let (mut write, mut read) = ws_stream.split();

            loop {
                tokio::select! {
                    biased;

                    _ = &mut close_rx => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return;
                    }

                    frame = tokio::time::timeout(idle_timeout, read.next()) => {
                        match frame {
                            Err(_) => {
                                let _ = error_tx
                                    .send(NozzleError::UpstreamStream(
                                        "idle timeout waiting for envelope".to_string(),
                                    ))
                                    .await;
                                return;
                            }
                            Ok(None) => {
                                // Stream closed cleanly by the peer.
                                return;
                            }
                            Ok(Some(Err(e))) => {
                                let _ = error_tx
                                    .send(NozzleError::UpstreamStream(e.to_string()))
                                    .await;
                                return;
                            }
                            Ok(Some(Ok(WsMessage::Close(frame)))) => {
                                let detail = frame
                                    .map(|f| format!("code={} reason={}", f.code, f.reason))
                                    .unwrap_or_default();
                                let _ = error_tx
                                    .send(NozzleError::UpstreamStream(format!(
                                        "websocket close: {detail}"
                                    )))
                                    .await;
                                return;
                            }
                            Ok(Some(Ok(WsMessage::Text(text)))) => {
                                if let Some(printer) = &debug_printer {
                                    printer("WEBSOCKET RESPONSE", &text);
                                }
                                match serde_json::from_str::<Envelope>(&text) {
                                    Ok(envelope) => {
                                        if envelope_tx.send(envelope).await.is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!(error = %e, "failed to decode firehose envelope, dropping");
                                    }
                                }
                            }
                            Ok(Some(Ok(_))) => {}
                        }
                    }
                }
            }
        });

        (
            envelope_rx,
            error_rx,
            FirehoseHandle {
                close_tx: Some(close_tx),
            },
        )
    }
}

/// Exchanges operator credentials for a bearer token against the UAA
/// endpoint. Failure here is fatal at startup (see `NozzleError::UpstreamAuth`).
#[async_trait]
pub trait UaaClient: Send + Sync {
    async fn get_auth_token(
        &self,
        username: &str,
        password: &str,
        insecure_skip_verify: bool,
    ) -> Result<String, NozzleError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

pub struct ReqwestUaaClient {
    uaa_url: String,
}

impl ReqwestUaaClient {
    pub fn new(uaa_url: String) -> Self {
        ReqwestUaaClient { uaa_url }
    }
}

#[async_trait]
impl UaaClient for ReqwestUaaClient {
    async fn get_auth_token(
        &self,
        username: &str,
        password: &str,
        insecure_skip_verify: bool,
    ) -> Result<String, NozzleError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()
            .map_err(|e| NozzleError::UpstreamAuth(e.to_string()))?;

        let response = client
            .post(format!("{}/oauth/token", self.uaa_url.trim_end_matches('/')))
            .form(&[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
                ("response_type", "token"),
            ])
            .basic_auth("cf", Some(""))
            .send()
            .await
            .map_err(|e| NozzleError::UpstreamAuth(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NozzleError::UpstreamAuth(format!(
                "UAA returned status {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| NozzleError::UpstreamAuth(e.to_string()))?;

        Ok(format!("{} {}", body.token_type, body.access_token))
    }
}

//! `NozzleLoop`: the select-driven orchestrator tying the firehose
//! consumer, the flush ticker, and the REST endpoint together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::cache::MetricCache;
use crate::config::NozzleConfig;
use crate::error::NozzleError;
use crate::firehose::{DebugPrinter, Envelope, FirehoseConsumer, UaaClient};
use crate::metrics::record_upstream_disconnect;
use crate::server::RestEndpoint;
use crate::token::TokenRegistry;

/// Lifecycle states. Flush ticks and envelope ingests are only valid in
/// `Serving`; `Draining` is entered on any server/upstream error and always
/// transitions unconditionally to `Stopped` once the disconnect handler (if
/// any) has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NozzleState {
    Idle,
    Authenticating,
    Serving,
    Draining,
    Stopped,
}

pub struct NozzleLoop {
    config: NozzleConfig,
    registry: Arc<TokenRegistry>,
    cache: Arc<MetricCache>,
}

impl NozzleLoop {
    pub fn new(config: NozzleConfig) -> Self {
        NozzleLoop {
            config,
            registry: TokenRegistry::new(),
            cache: Arc::new(MetricCache::new()),
        }
    }

    pub fn cache(&self) -> Arc<MetricCache> {
        self.cache.clone()
    }

    /// Drives the full lifecycle: UAA auth (if enabled), REST endpoint
    /// start, firehose connect, then the select loop. Returns the
    /// terminating error, if any.
    pub async fn run(
        &self,
        uaa_client: &dyn UaaClient,
        firehose_consumer: &mut dyn FirehoseConsumer,
        cert_path: &str,
        key_path: &str,
    ) -> Result<(), NozzleError> {
        let mut state = NozzleState::Idle;
        tracing::info!(?state, "nozzle starting");

        state = NozzleState::Authenticating;
        tracing::info!(?state, "authenticating against UAA");

        let bearer_token = if self.config.disable_access_control {
            String::new()
        } else {
            uaa_client
                .get_auth_token(
                    &self.config.uaa_username,
                    &self.config.uaa_password,
                    self.config.insecure_ssl_skip_verify,
                )
                .await?
        };

        let endpoint = RestEndpoint::new(
            self.registry.clone(),
            self.cache.clone(),
            self.config.uaa_username.clone(),
            self.config.uaa_password.clone(),
            self.config.web_server_port,
            self.config.web_server_use_ssl,
        );
        let mut server_errors = endpoint.start(key_path, cert_path).await;

        let idle_timeout = Duration::from_secs(self.config.idle_timeout_seconds as u64);
        let debug_printer: DebugPrinter = Arc::new(|title, body| {
            tracing::trace!(%title, %body, "firehose debug");
        });
        firehose_consumer.set_idle_timeout(idle_timeout);
        firehose_consumer.set_debug_printer(debug_printer);

        let (mut envelopes, mut upstream_errors, mut firehose_handle) =
            firehose_consumer.firehose(&self.config.subscription_id, &bearer_token);

        state = NozzleState::Serving;
        tracing::info!(?state, "nozzle serving");

        let mut flush_ticker =
            tokio::time::interval(Duration::from_secs(self.config.metric_cache_duration_seconds as u64));
        flush_ticker.tick().await; // skip the immediate first tick

        let terminal_error = loop {
            tokio::select! {
                biased;

                _ = flush_ticker.tick() => {
                    self.cache.clear();
                }

                maybe_envelope = envelopes.recv() => {
                    match maybe_envelope {
                        Some(envelope) => self.cache.ingest(&envelope),
                        None => {
                            // Envelope channel closed without an explicit
                            // error; treat as an upstream stream error.
                            break NozzleError::UpstreamStream(
                                "firehose envelope channel closed".to_string(),
                            );
                        }
                    }
                }

                Some(err) = server_errors.recv() => {
                    tracing::error!(error = %err, "REST endpoint fatal error");
                    break err;
                }

                Some(err) = upstream_errors.recv() => {
                    handle_disconnect(&err);
                    firehose_handle.close();
                    self.cache.clear();
                    break err;
                }
            }
        };

        state = NozzleState::Draining;
        tracing::info!(?state, error = %terminal_error, "nozzle draining");

        state = NozzleState::Stopped;
        tracing::info!(?state, "nozzle stopped");

        Err(terminal_error)
    }
}

/// Classifies the upstream error and logs accordingly, per the disconnect
/// handler's close-code branches.
fn handle_disconnect(err: &NozzleError) {
    let message = err.to_string();

    if message.contains("code=1000") {
        tracing::info!("firehose closed normally");
        record_upstream_disconnect("normal_closure");
    } else if message.contains("code=1008") {
        tracing::error!("nozzle not keeping up, scale out");
        record_upstream_disconnect("policy_violation");
    } else if message.contains("websocket close") {
        tracing::error!(error = %message, "firehose closed with unexpected code");
        record_upstream_disconnect("other_close_code");
    } else {
        tracing::error!(error = %message, "firehose stream error");
        record_upstream_disconnect("non_websocket");
    }
}

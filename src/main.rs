use clap::Parser;

use nozzle_rust::cache::MetricCache;
use nozzle_rust::cli::{Cli, Mode};
use nozzle_rust::config::NozzleConfig;
use nozzle_rust::firehose::{ReqwestUaaClient, WebSocketFirehoseConsumer};
use nozzle_rust::logging;
use nozzle_rust::nozzle::NozzleLoop;
use nozzle_rust::server::RestEndpoint;
use nozzle_rust::token::TokenRegistry;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let config = match NozzleConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let cert_path = shellexpand::tilde(&cli.cert).to_string();
    let key_path = shellexpand::tilde(&cli.key).to_string();

    let result = match cli.mode() {
        Mode::Normal => run_normal(config, &cert_path, &key_path).await,
        Mode::Webserver => run_webserver(config, &cert_path, &key_path).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "nozzle exited with a fatal error");
        std::process::exit(1);
    }
}

async fn run_normal(config: NozzleConfig, cert_path: &str, key_path: &str) -> anyhow::Result<()> {
    let uaa_client = ReqwestUaaClient::new(config.uaa_url.clone());
    let mut firehose_consumer = WebSocketFirehoseConsumer::new(
        config.traffic_controller_url.clone(),
        config.insecure_ssl_skip_verify,
    );

    let nozzle_loop = NozzleLoop::new(config);
    nozzle_loop
        .run(&uaa_client, &mut firehose_consumer, cert_path, key_path)
        .await?;

    Ok(())
}

/// Debug mode: runs only the REST endpoint against an empty cache, for
/// manual scraping without a live control plane or UAA.
async fn run_webserver(
    config: NozzleConfig,
    cert_path: &str,
    key_path: &str,
) -> anyhow::Result<()> {
    tracing::info!("starting in webserver-only debug mode, no firehose or UAA involved");

    let registry = TokenRegistry::new();
    let cache = std::sync::Arc::new(MetricCache::new());

    let endpoint = RestEndpoint::new(
        registry,
        cache,
        config.uaa_username.clone(),
        config.uaa_password.clone(),
        config.web_server_port,
        config.web_server_use_ssl,
    );

    let mut server_errors = endpoint.start(key_path, cert_path).await;
    match server_errors.recv().await {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

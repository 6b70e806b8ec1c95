//! `tracing` initialization, in the teacher's `main.rs` style
//! (`registry().with(EnvFilter).with(fmt::layer()).init()`), with the
//! default level overridable by `--log-level` unless `NOZZLE_LOG_LEVEL` is
//! already set in the environment.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init(cli_log_level: &str) {
    let filter = std::env::var("NOZZLE_LOG_LEVEL").unwrap_or_else(|_| cli_log_level.to_string());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("nozzle_rust={filter}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

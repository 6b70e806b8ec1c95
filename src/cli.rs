//! Argument parsing and mode selection, in the teacher's `clap::Parser`
//! derive style.

use clap::{Parser, Subcommand};

pub const DEFAULT_CONFIG_PATH: &str = "~/.nozzle/config.json";

#[derive(Parser)]
#[command(name = "nozzle-rust")]
#[command(about = "Bluemedora-style Cloud Foundry firehose nozzle", long_about = None)]
pub struct Cli {
    /// Path to the nozzle config file.
    #[arg(
        short,
        long,
        env = "NOZZLE_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: String,

    /// Overrides the default tracing filter, unless NOZZLE_LOG_LEVEL is set.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Path to the TLS certificate (PEM) used by the REST endpoint.
    #[arg(long, default_value = "~/.nozzle/cert.pem")]
    pub cert: String,

    /// Path to the TLS private key (PEM) used by the REST endpoint.
    #[arg(long, default_value = "~/.nozzle/key.pem")]
    pub key: String,

    #[command(subcommand)]
    pub mode: Option<Mode>,
}

#[derive(Subcommand)]
pub enum Mode {
    /// Runs the full nozzle: UAA auth, firehose consumption, REST endpoint.
    Normal,
    /// Runs only the REST endpoint against an empty (or seeded) cache, for
    /// manual scraping during development.
    Webserver,
}

impl Cli {
    pub fn mode(&self) -> &Mode {
        self.mode.as_ref().unwrap_or(&Mode::Normal)
    }
}

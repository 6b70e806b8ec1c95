//! Library surface for the nozzle, so integration tests and `main.rs` share
//! the same module tree.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod firehose;
pub mod logging;
pub mod metrics;
pub mod nozzle;
pub mod server;
pub mod token;

//! Typed error taxonomy for the nozzle.
//!
//! Mirrors the error classes in the design: startup-phase errors
//! (`Config`, `UpstreamAuth`) are fatal; `UpstreamStream` and `ServerFatal`
//! terminate the running loop; `InvalidToken` never leaves a request
//! handler and is mapped straight to a 401 response.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NozzleError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to obtain upstream bearer token: {0}")]
    UpstreamAuth(String),

    #[error("upstream firehose stream error: {0}")]
    UpstreamStream(String),

    #[error("REST endpoint fatal error: {0}")]
    ServerFatal(String),

    #[error("invalid token supplied: {0}")]
    InvalidToken(String),
}

pub type Result<T> = std::result::Result<T, NozzleError>;

//! Nozzle configuration: a JSON file on disk, with every field overridable
//! by an environment variable of the same name. Mirrors the original's
//! `NozzleConfiguration` struct field-for-field (same JSON keys, for
//! operator-facing config-file compatibility).

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::NozzleError;

pub const DEFAULT_SUBSCRIPTION_ID: &str = "bluemedora-nozzle";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NozzleConfig {
    #[serde(rename = "UAAURL")]
    pub uaa_url: String,

    #[serde(rename = "UAAUsername")]
    pub uaa_username: String,

    #[serde(rename = "UAAPassword")]
    pub uaa_password: String,

    #[serde(rename = "TrafficControllerURL")]
    pub traffic_controller_url: String,

    #[serde(rename = "SubscriptionID", default = "default_subscription_id")]
    pub subscription_id: String,

    #[serde(rename = "DisableAccessControl", default)]
    pub disable_access_control: bool,

    #[serde(rename = "InsecureSSLSkipVerify", default)]
    pub insecure_ssl_skip_verify: bool,

    #[serde(rename = "IdleTimeoutSeconds")]
    pub idle_timeout_seconds: u32,

    #[serde(rename = "MetricCacheDurationSeconds")]
    pub metric_cache_duration_seconds: u32,

    #[serde(rename = "WebServerPort")]
    pub web_server_port: u32,

    #[serde(rename = "WebServerUseSSL", default = "default_true")]
    pub web_server_use_ssl: bool,
}

fn default_subscription_id() -> String {
    DEFAULT_SUBSCRIPTION_ID.to_string()
}

fn default_true() -> bool {
    true
}

impl NozzleConfig {
    /// Loads the config file at `path`, expanding `~` the way the teacher
    /// expands its own config path, then applies environment-variable
    /// overrides for every field.
    pub fn load(path: &str) -> Result<Self, NozzleError> {
        let expanded = shellexpand::tilde(path).to_string();
        let absolute = resolve_absolute(&expanded);

        let contents = std::fs::read_to_string(&absolute).map_err(|e| {
            NozzleError::Config(format!("unable to read config file {absolute:?}: {e}"))
        })?;

        let mut config: NozzleConfig = serde_json::from_str(&contents)
            .map_err(|e| NozzleError::Config(format!("error parsing config file: {e}")))?;

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), NozzleError> {
        if let Ok(v) = env::var("UAAURL") {
            self.uaa_url = v;
        }
        if let Ok(v) = env::var("UAAUsername") {
            self.uaa_username = v;
        }
        if let Ok(v) = env::var("UAAPassword") {
            self.uaa_password = v;
        }
        if let Ok(v) = env::var("TrafficControllerURL") {
            self.traffic_controller_url = v;
        }
        if let Ok(v) = env::var("SubscriptionID") {
            self.subscription_id = v;
        }
        if let Ok(v) = env::var("DisableAccessControl") {
            self.disable_access_control = parse_bool_env("DisableAccessControl", &v)?;
        }
        if let Ok(v) = env::var("InsecureSSLSkipVerify") {
            self.insecure_ssl_skip_verify = parse_bool_env("InsecureSSLSkipVerify", &v)?;
        }
        if let Ok(v) = env::var("IdleTimeoutSeconds") {
            self.idle_timeout_seconds = parse_u32_env("IdleTimeoutSeconds", &v)?;
        }
        if let Ok(v) = env::var("MetricCacheDurationSeconds") {
            self.metric_cache_duration_seconds = parse_u32_env("MetricCacheDurationSeconds", &v)?;
        }
        if let Ok(v) = env::var("WebServerPort") {
            self.web_server_port = parse_u32_env("WebServerPort", &v)?;
        }
        if let Ok(v) = env::var("WebServerUseSSL") {
            self.web_server_use_ssl = parse_bool_env("WebServerUseSSL", &v)?;
        }
        Ok(())
    }
}

fn parse_bool_env(name: &str, value: &str) -> Result<bool, NozzleError> {
    value
        .parse::<bool>()
        .map_err(|_| NozzleError::Config(format!("{name} env override is not a valid bool: {value}")))
}

fn parse_u32_env(name: &str, value: &str) -> Result<u32, NozzleError> {
    value
        .parse::<u32>()
        .map_err(|_| NozzleError::Config(format!("{name} env override is not a valid uint32: {value}")))
}

/// Resolve a path to absolute form, falling back to the (possibly relative)
/// input on failure, matching `nozzleconfiguration.go`'s `getAbsolutePath`.
fn resolve_absolute(path: &str) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(_) => {
            let p = Path::new(path);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                env::current_dir()
                    .map(|cwd| cwd.join(p))
                    .unwrap_or_else(|_| p.to_path_buf())
            }
        }
    }
}

/// Resolves a TLS cert/key path to absolute form for `axum-server`, the same
/// idiom `resolve_absolute` uses for the config file.
pub fn resolve_cert_path(path: &str) -> PathBuf {
    resolve_absolute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL_JSON: &str = r#"{
        "UAAURL": "https://uaa.example.com",
        "UAAUsername": "user",
        "UAAPassword": "pw",
        "TrafficControllerURL": "wss://doppler.example.com",
        "IdleTimeoutSeconds": 25,
        "MetricCacheDurationSeconds": 30,
        "WebServerPort": 8081
    }"#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_fixture(MINIMAL_JSON);
        let config = NozzleConfig::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.uaa_username, "user");
        assert_eq!(config.subscription_id, DEFAULT_SUBSCRIPTION_ID);
        assert!(!config.disable_access_control);
        assert!(config.web_server_use_ssl);
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = NozzleConfig::load("/nonexistent/path/nozzle.json");
        assert!(matches!(result, Err(NozzleError::Config(_))));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let file = write_fixture("{ not valid json");
        let result = NozzleConfig::load(file.path().to_str().unwrap());
        assert!(matches!(result, Err(NozzleError::Config(_))));
    }

    #[test]
    fn env_override_wins_over_file_value() {
        // SAFETY (test-only): env var access is unsynchronized across the
        // test binary; this test sets and removes its own key only.
        unsafe {
            env::set_var("WebServerPort", "9999");
        }
        let file = write_fixture(MINIMAL_JSON);
        let config = NozzleConfig::load(file.path().to_str().unwrap()).unwrap();
        unsafe {
            env::remove_var("WebServerPort");
        }

        assert_eq!(config.web_server_port, 9999);
    }

    #[test]
    fn invalid_bool_env_override_is_config_error() {
        unsafe {
            env::set_var("DisableAccessControl", "not-a-bool");
        }
        let file = write_fixture(MINIMAL_JSON);
        let result = NozzleConfig::load(file.path().to_str().unwrap());
        unsafe {
            env::remove_var("DisableAccessControl");
        }

        assert!(matches!(result, Err(NozzleError::Config(_))));
    }
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use triage_core::inference::DEFAULT_INFERENCE_TIMEOUT;

/// Startup configuration, read from the environment once.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub storage_path: PathBuf,
    pub api_url: String,
    /// Unset means the simulated classifier is used.
    pub inference_url: Option<String>,
    pub inference_field: String,
    pub inference_timeout: Duration,
    /// Unset means an empty directory.
    pub directory_url: Option<String>,
    pub simulate_auth: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            storage_path: PathBuf::from("triage-storage.json"),
            api_url: "http://localhost:5000/api".to_string(),
            inference_url: None,
            inference_field: "image".to_string(),
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
            directory_url: None,
            simulate_auth: true,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(port) => port.parse().with_context(|| format!("invalid PORT: {}", port))?,
            None => defaults.port,
        };
        let inference_timeout = match get("TRIAGE_INFERENCE_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("invalid TRIAGE_INFERENCE_TIMEOUT_SECS: {}", secs))?,
            ),
            None => defaults.inference_timeout,
        };
        let simulate_auth = match get("TRIAGE_SIMULATE_AUTH") {
            Some(flag) => parse_flag(&flag)
                .with_context(|| format!("invalid TRIAGE_SIMULATE_AUTH: {}", flag))?,
            None => defaults.simulate_auth,
        };

        Ok(Self {
            port,
            storage_path: get("TRIAGE_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            api_url: get("TRIAGE_API_URL").unwrap_or(defaults.api_url),
            inference_url: get("TRIAGE_INFERENCE_URL"),
            inference_field: get("TRIAGE_INFERENCE_FIELD").unwrap_or(defaults.inference_field),
            inference_timeout,
            directory_url: get("TRIAGE_DIRECTORY_URL"),
            simulate_auth,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

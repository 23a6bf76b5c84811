//! Layered configuration loading utilities.

use std::path::Path;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Which venue deployment the adapter talks to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueEnvironment {
    Testnet,
    Mainnet,
}

impl VenueEnvironment {
    /// REST base URL for this environment.
    #[must_use]
    pub fn http_url(self) -> &'static str {
        match self {
            Self::Testnet => "https://api.testnet.paradex.trade",
            Self::Mainnet => "https://api.paradex.trade",
        }
    }

    /// Chain identifier mixed into signed payloads.
    #[must_use]
    pub fn chain_id(self) -> &'static str {
        match self {
            Self::Testnet => "PRIVATE_SN_POTC_SEPOLIA",
            Self::Mainnet => "SN_MAIN",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }
}

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: VenueEnvironment,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Account credentials: the on-chain address plus the private key material
/// used for request signing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub private_key: String,
}

/// Tunables for the execution client and reconciliation loop.
#[derive(Clone, Debug, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Fill queries re-read from this far before the cursor to tolerate
    /// clock skew between local and venue clocks.
    #[serde(default = "default_reconcile_overlap_secs")]
    pub reconcile_overlap_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            reconcile_overlap_secs: default_reconcile_overlap_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

fn default_environment() -> VenueEnvironment {
    VenueEnvironment::Testnet
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_reconcile_overlap_secs() -> u64 {
    5
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    10
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `VERITY_`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("VERITY")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_defaults_match_documented_values() {
        let execution = ExecutionConfig::default();
        assert_eq!(execution.reconcile_interval_secs, 300);
        assert_eq!(execution.http_timeout_secs, 30);
        assert_eq!(execution.max_concurrent_requests, 10);
    }

    #[test]
    fn environment_selects_urls() {
        assert!(VenueEnvironment::Testnet.http_url().contains("testnet"));
        assert!(!VenueEnvironment::Mainnet.http_url().contains("testnet"));
        assert_eq!(VenueEnvironment::Mainnet.chain_id(), "SN_MAIN");
    }

    #[test]
    fn environment_deserializes_lowercase() {
        let env: VenueEnvironment = serde_json::from_str("\"mainnet\"").unwrap();
        assert_eq!(env, VenueEnvironment::Mainnet);
    }
}

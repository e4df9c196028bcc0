//! Layered configuration: defaults, then `Uplift.toml`, then `UPLIFT_*` environment
//! variables, then command line flags.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::{Address, address};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use uplift_deploy::{
    DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_CONFLICT_RETRIES, DeploySettings,
    chain::DEFAULT_POLL_INTERVAL,
};
use url::Url;

/// The default name for the uplift configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "Uplift.toml";

/// Prefix of the environment variables read into the configuration.
pub const ENV_PREFIX: &str = "UPLIFT_";

/// First account of the Anvil and Hardhat development mnemonic.
const DEV_ACCOUNT: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

/// Per-network overrides, keyed by chain id in `[networks.<id>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// JSON-RPC endpoint used when the network has no override.
    pub rpc_url: Url,
    /// Node-managed account that sends every transaction and owns the proxies.
    pub sender: Address,
    /// Directory scanned for compiled artifacts.
    pub artifacts_dir: PathBuf,
    /// Directory holding the deployment ledger.
    pub ledger_dir: PathBuf,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// How many times `deploy` re-plans after a confirmation timeout.
    pub confirmation_retries: usize,
    pub conflict_retries: usize,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: Url::parse("http://127.0.0.1:8545").expect("static URL is valid"),
            sender: DEV_ACCOUNT,
            artifacts_dir: PathBuf::from("build/contracts"),
            ledger_dir: PathBuf::from(".deployments"),
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT.as_secs(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            confirmation_retries: 3,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            networks: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Resolve the configuration from every layer.
    ///
    /// A missing configuration file is not an error.
    pub fn load<T: Serialize>(path: &Path, overrides: &T) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .with_context(|| format!("Invalid configuration (file: {})", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            rpc_url = %config.rpc_url,
            sender = %config.sender,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    fn network(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.get(&chain_id.to_string())
    }

    pub fn rpc_url_for(&self, chain_id: u64) -> Url {
        self.network(chain_id)
            .and_then(|network| network.rpc_url.clone())
            .unwrap_or_else(|| self.rpc_url.clone())
    }

    pub fn sender_for(&self, chain_id: u64) -> Address {
        self.network(chain_id)
            .and_then(|network| network.sender)
            .unwrap_or(self.sender)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deploy_settings(&self) -> DeploySettings {
        DeploySettings {
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            conflict_retries: self.conflict_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[derive(Serialize)]
    struct NoOverrides {}

    #[test]
    fn test_defaults_without_file() {
        let temp_dir = TempDir::new("uplift-config").expect("Failed to create temp dir");
        let config = Config::load(&temp_dir.path().join(DEFAULT_CONFIG_FILE), &NoOverrides {}).unwrap();

        assert_eq!(config.sender, DEV_ACCOUNT);
        assert_eq!(config.rpc_url_for(31337).as_str(), "http://127.0.0.1:8545/");
        assert_eq!(config.deploy_settings(), DeploySettings::default());
    }

    #[test]
    fn test_file_and_overrides() {
        #[derive(Serialize)]
        struct Overrides {
            ledger_dir: PathBuf,
        }

        let temp_dir = TempDir::new("uplift-config").expect("Failed to create temp dir");
        let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
                rpc_url = "http://localhost:9545"
                confirmation_timeout_secs = 30

                [networks.5]
                rpc_url = "https://goerli.example.org"
            "#,
        )
        .unwrap();

        let config = Config::load(
            &path,
            &Overrides {
                ledger_dir: PathBuf::from("/tmp/ledger"),
            },
        )
        .unwrap();

        assert_eq!(config.confirmation_timeout_secs, 30);
        assert_eq!(config.ledger_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.rpc_url_for(5).as_str(), "https://goerli.example.org/");
        assert_eq!(config.rpc_url_for(1).as_str(), "http://localhost:9545/");
        assert_eq!(config.sender_for(5), DEV_ACCOUNT);
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new("uplift-config").expect("Failed to create temp dir");
        let path = temp_dir.path().join(DEFAULT_CONFIG_FILE);

        let mut config = Config::default();
        config.networks.insert(
            "11155111".to_string(),
            NetworkConfig {
                rpc_url: Some(Url::parse("https://sepolia.example.org").unwrap()),
                sender: None,
            },
        );
        config.save_to_file(&path).unwrap();

        assert_eq!(Config::load(&path, &NoOverrides {}).unwrap(), config);
    }
}

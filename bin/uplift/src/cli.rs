use std::{fmt, path::PathBuf, str::FromStr};

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use uplift_deploy::ProxyKind;
use url::Url;

use crate::config::DEFAULT_CONFIG_FILE;

/// Target network, by name or chain id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Goerli,
    Sepolia,
    Holesky,
    Anvil,
    Custom(u64),
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Mainnet => 1,
            Network::Goerli => 5,
            Network::Sepolia => 11155111,
            Network::Holesky => 17000,
            Network::Anvil => 31337,
            Network::Custom(id) => *id,
        }
    }

    fn from_chain_id(id: u64) -> Self {
        match id {
            1 => Network::Mainnet,
            5 => Network::Goerli,
            11155111 => Network::Sepolia,
            17000 => Network::Holesky,
            31337 => Network::Anvil,
            id => Network::Custom(id),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "goerli" => Ok(Network::Goerli),
            "sepolia" => Ok(Network::Sepolia),
            "holesky" => Ok(Network::Holesky),
            "anvil" => Ok(Network::Anvil),
            other => other.parse().map(Network::from_chain_id).map_err(|_| {
                format!(
                    "unknown network `{s}`, expected mainnet, goerli, sepolia, holesky, anvil or a chain id"
                )
            }),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Goerli => f.write_str("goerli"),
            Network::Sepolia => f.write_str("sepolia"),
            Network::Holesky => f.write_str("holesky"),
            Network::Anvil => f.write_str("anvil"),
            Network::Custom(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Parser)]
#[command(name = "uplift")]
#[command(
    author,
    version,
    about = "Deploy and upgrade proxied contracts, idempotently"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "UPLIFT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    #[arg(long, alias = "conf", global = true, env = "UPLIFT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Configuration overrides, applied on top of the file and environment.
    #[clap(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that take precedence over every other configuration layer.
#[derive(Debug, Clone, Default, Args, Serialize)]
pub struct ConfigOverrides {
    /// JSON-RPC endpoint of the node.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,

    /// Node-managed account sending the transactions.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,

    /// Directory containing compiled contract artifacts.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,

    /// Directory holding the deployment ledger.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_dir: Option<PathBuf>,

    /// Seconds to wait for each transaction to be mined.
    #[arg(long = "timeout", global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a logical contract behind a proxy, or upgrade it.
    Deploy(DeployArgs),

    /// Show what `deploy` would do, without submitting anything.
    Plan(DeployArgs),

    /// List recorded deployments.
    List {
        /// Only show deployments on this network.
        network: Option<Network>,
    },

    /// Compare the proxy's on-chain pointer with the ledger.
    Status {
        logical_name: String,
        network: Network,
    },

    /// Write a configuration file with the default settings.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// Name the deployment is recorded under.
    pub logical_name: String,

    /// Network name (mainnet, goerli, sepolia, holesky, anvil) or chain id.
    pub network: Network,

    /// Upgrade pattern.
    #[arg(long, default_value_t = ProxyKind::Uups)]
    pub kind: ProxyKind,

    /// Artifact to deploy. Defaults to the logical name.
    #[arg(long)]
    pub contract: Option<String>,

    /// Initializer signature, e.g. `initialize(address,uint256)`.
    ///
    /// Defaults to the artifact's `initialize` function.
    #[arg(long)]
    pub initializer: Option<String>,

    /// Initializer argument. Repeat for each argument, in order.
    #[arg(long = "init-arg", allow_hyphen_values = true)]
    pub init_args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_names_and_ids() {
        assert_eq!("goerli".parse::<Network>().unwrap().chain_id(), 5);
        assert_eq!("Sepolia".parse::<Network>().unwrap(), Network::Sepolia);
        assert_eq!("5".parse::<Network>().unwrap(), Network::Goerli);
        assert_eq!("8453".parse::<Network>().unwrap(), Network::Custom(8453));
        assert_eq!(Network::Custom(8453).to_string(), "8453");
        assert!("ropsten".parse::<Network>().is_err());
    }

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "uplift",
            "deploy",
            "Reputation",
            "goerli",
            "--contract",
            "ReputationForTesting",
            "--init-arg",
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
            "--init-arg",
            "-1",
            "--rpc-url",
            "http://localhost:8545",
        ])
        .unwrap();

        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy command");
        };
        assert_eq!(args.network, Network::Goerli);
        assert_eq!(args.kind, ProxyKind::Uups);
        assert_eq!(args.contract.as_deref(), Some("ReputationForTesting"));
        assert_eq!(args.init_args.len(), 2);
        assert!(cli.overrides.rpc_url.is_some());
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_overrides_skip_unset_flags() {
        let overrides = ConfigOverrides {
            ledger_dir: Some(PathBuf::from("ledger")),
            ..Default::default()
        };
        let json = serde_json::to_value(&overrides).unwrap();
        assert_eq!(json, serde_json::json!({ "ledger_dir": "ledger" }));
    }

    #[test]
    fn test_parse_kind() {
        let cli = Cli::try_parse_from(["uplift", "plan", "Reputation", "anvil", "--kind", "beacon"])
            .unwrap();
        let Command::Plan(args) = cli.command else {
            panic!("expected plan command");
        };
        assert_eq!(args.kind, ProxyKind::Beacon);
    }
}

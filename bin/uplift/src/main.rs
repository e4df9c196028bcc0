//! uplift deploys contracts behind upgradeable proxies and keeps a ledger of them, so
//! that running the same deployment twice does nothing the second time.

mod cli;
mod config;

use std::{path::Path, process::ExitCode};

use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, DeployArgs, Network};
use config::Config;
use uplift_deploy::{
    ArtifactRegistry, DeployError, DeployRequest, Deployer, DeploymentRecord, FileLedger, Ledger,
    LedgerKey, RpcChainClient, short_hash,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<DeployError>() {
                Some(deploy_err) => eprintln!("{}: {err:#}", deploy_err.kind()),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let load_config = || Config::load(&cli.config, &cli.overrides);

    match cli.command {
        Command::Init { force } => init(&cli.config, force),
        Command::Deploy(args) => deploy(&load_config()?, args).await,
        Command::Plan(args) => plan(&load_config()?, args).await,
        Command::List { network } => list(&load_config()?, network).await,
        Command::Status {
            logical_name,
            network,
        } => status(&load_config()?, logical_name, network).await,
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    Config::default().save_to_file(path)
}

fn build_deployer(config: &Config, network: Network) -> Result<Deployer<RpcChainClient, FileLedger>> {
    let chain_id = network.chain_id();

    let registry = ArtifactRegistry::load_dir(&config.artifacts_dir)?;
    let client = RpcChainClient::new(config.rpc_url_for(chain_id), config.sender_for(chain_id))?
        .with_poll_interval(config.poll_interval());
    let ledger = FileLedger::new(&config.ledger_dir)?;

    tracing::debug!(
        %network,
        rpc_url = %client.url(),
        artifacts = registry.len(),
        ledger = %ledger.root().display(),
        "Deployer ready"
    );

    Ok(Deployer::new(client, ledger, registry).with_settings(config.deploy_settings()))
}

fn request(args: DeployArgs) -> DeployRequest {
    let mut request = DeployRequest::new(args.logical_name, args.network.chain_id(), args.kind)
        .init_args(args.init_args);
    if let Some(contract) = args.contract {
        request = request.contract(contract);
    }
    if let Some(initializer) = args.initializer {
        request = request.initializer(initializer);
    }
    request
}

async fn deploy(config: &Config, args: DeployArgs) -> Result<()> {
    let deployer = build_deployer(config, args.network)?;
    let request = request(args);

    // A timed-out transaction may still be mined: each retry re-plans from the ledger
    // and the journal, so nothing already on chain is submitted again.
    let report = (|| deployer.deploy(&request))
        .retry(
            ConstantBuilder::default()
                .with_delay(config.poll_interval())
                .with_max_times(config.confirmation_retries),
        )
        .when(|err| matches!(err, DeployError::ConfirmationTimeout { .. }))
        .notify(|err, _| {
            tracing::warn!(key = %request.key(), err = %err, "Confirmation timed out, retrying...");
        })
        .await?;

    let record = &report.record;
    println!("{} {}", report.action, record.key());
    println!("  proxy:          {}", record.proxy_address);
    println!("  implementation: {}", record.implementation_address);
    if let Some(beacon) = record.beacon_address {
        println!("  beacon:         {beacon}");
    }
    if let Some(admin) = record.admin_address {
        println!("  admin:          {admin}");
    }
    println!("  abi version:    {}", short_hash(&record.abi_version));

    Ok(())
}

async fn plan(config: &Config, args: DeployArgs) -> Result<()> {
    let deployer = build_deployer(config, args.network)?;
    let plan = deployer.plan(&request(args)).await?;

    println!("{} {} ({})", plan.action, plan.key, plan.proxy_kind);
    println!("  abi version: {}", short_hash(&plan.abi_version));
    if let Some(record) = plan.target_record() {
        println!("  proxy:       {}", record.proxy_address);
        println!(
            "  recorded:    {} ({})",
            short_hash(&record.abi_version),
            record.status
        );
    }

    Ok(())
}

fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn records_table(records: &[DeploymentRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Network",
        "Name",
        "Contract",
        "Kind",
        "Proxy",
        "Implementation",
        "Version",
        "Status",
        "Updated",
    ]);

    for record in records {
        table.add_row(vec![
            record.network_id.to_string(),
            record.logical_name.clone(),
            record.contract_name.clone(),
            record.proxy_kind.to_string(),
            record.proxy_address.to_string(),
            record.implementation_address.to_string(),
            short_hash(&record.abi_version).to_string(),
            record.status.to_string(),
            format_timestamp(record.updated_at),
        ]);
    }

    table
}

async fn list(config: &Config, network: Option<Network>) -> Result<()> {
    let ledger = FileLedger::new(&config.ledger_dir)?;
    let records = ledger
        .list()
        .await?
        .into_iter()
        .filter(|record| network.is_none_or(|network| network.chain_id() == record.network_id))
        .collect::<Vec<_>>();

    if records.is_empty() {
        println!("No deployments recorded in {}", ledger.root().display());
        return Ok(());
    }

    println!("{}", records_table(&records));
    Ok(())
}

async fn status(config: &Config, logical_name: String, network: Network) -> Result<()> {
    let deployer = build_deployer(config, network)?;
    let key = LedgerKey::new(network.chain_id(), logical_name);

    let status = deployer
        .verify(&key)
        .await?
        .with_context(|| format!("No deployment recorded for {key}"))?;

    println!("{key} ({}, {})", status.record.proxy_kind, status.record.status);
    println!("  proxy:    {}", status.record.proxy_address);
    println!("  ledger:   {}", status.expected);
    println!("  on-chain: {}", status.on_chain);

    if !status.is_consistent() {
        anyhow::bail!("on-chain pointer of {key} does not match the ledger");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::Address;
    use uplift_deploy::{ProxyKind, RecordStatus};

    use super::*;

    #[test]
    fn test_records_table() {
        let record = DeploymentRecord {
            network_id: 5,
            logical_name: "Reputation".to_string(),
            contract_name: "ReputationForTesting".to_string(),
            proxy_kind: ProxyKind::Uups,
            proxy_address: Address::repeat_byte(0xaa),
            implementation_address: Address::repeat_byte(0x01),
            abi_version: "0123456789abcdef".to_string(),
            status: RecordStatus::Complete,
            owner: Address::ZERO,
            admin_address: None,
            beacon_address: None,
            deployed_at: 0,
            updated_at: 0,
        };

        let rendered = records_table(&[record]).to_string();
        assert!(rendered.contains("Reputation"));
        assert!(rendered.contains("0123456789ab"));
        assert!(rendered.contains("1970-01-01 00:00:00"));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp_dir = tempdir::TempDir::new("uplift-init").expect("Failed to create temp dir");
        let path = temp_dir.path().join(config::DEFAULT_CONFIG_FILE);

        init(&path, false).unwrap();
        assert!(init(&path, false).is_err());
        assert!(init(&path, true).is_ok());
    }
}

//! uplift-deploy - Idempotent deployment of upgradeable proxy contracts.
//!
//! This crate plans and executes proxy deployments and upgrades (UUPS, transparent and
//! beacon) against an EVM chain, and keeps a durable ledger of what is deployed where so
//! that re-running a deployment only does the work still missing.

pub mod abi;

mod artifact;
pub use artifact::{ArtifactRegistry, ContractArtifact, DEFAULT_INITIALIZER};

pub mod chain;
pub use chain::{ChainClient, MemoryChain, RpcChainClient, Submission, TxReceipt};

mod deployer;
pub use deployer::{
    DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_CONFLICT_RETRIES, DeployRequest, DeploySettings,
    Deployer, DeploymentReport, ProxyStatus,
};

mod deployment_hash;
pub use deployment_hash::{bytecode_hash, short_hash};

mod error;
pub use error::{DeployError, Result};

mod executor;
pub use executor::Executor;

mod fs;

pub mod ledger;
pub use ledger::{
    DeploymentRecord, FileLedger, Journal, Ledger, LedgerKey, MemoryLedger, RecordStatus,
};

mod planner;
pub use planner::{DeploymentAction, DeploymentPlan, Planner, decide};

pub mod proxy;
pub use proxy::{AuthorizationResult, ProxyKind, ProxyStrategy};

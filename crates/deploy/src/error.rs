//! Failure taxonomy for the deployment orchestrator.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use thiserror::Error;

use crate::{ProxyKind, ledger::LedgerKey};

/// Result alias used throughout the crate.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Errors surfaced by the orchestrator.
///
/// Every variant is reported to the caller unmodified. Only
/// [`DeployError::LedgerWriteConflict`] is retried internally, and
/// [`DeployError::ConfirmationTimeout`] may be retried by the CLI after a fresh plan.
#[derive(Debug, Error, strum::IntoStaticStr)]
pub enum DeployError {
    /// No compiled artifact matches the requested name.
    #[error("no compiled artifact named `{0}`")]
    ArtifactNotFound(String),

    /// The initializer arguments do not match the artifact's initializer.
    #[error("initializer `{signature}` rejected its arguments: {reason}")]
    InitializerSignatureMismatch { signature: String, reason: String },

    /// A record exists for the key with a different proxy kind.
    #[error("{key} is recorded as a {recorded} proxy, refusing to deploy it as {requested}")]
    ProxyKindConflict {
        key: LedgerKey,
        recorded: ProxyKind,
        requested: ProxyKind,
    },

    /// The caller lacks the rights to upgrade the proxy.
    #[error("{caller} may not upgrade proxy {proxy}: {reason}")]
    UnauthorizedUpgrade {
        proxy: Address,
        caller: Address,
        reason: String,
    },

    /// A transaction was not confirmed within the caller-supplied timeout.
    ///
    /// The transaction may still be mined later.
    #[error("transaction {tx_hash} was not confirmed within {timeout:?}")]
    ConfirmationTimeout { tx_hash: B256, timeout: Duration },

    /// The chain client rejected a submission, or a submitted transaction reverted.
    #[error("chain submission failed: {0}")]
    ChainSubmissionFailed(String),

    /// The stored record changed underneath a write.
    #[error("ledger record for {0} was modified concurrently")]
    LedgerWriteConflict(LedgerKey),

    /// A compiled artifact is unusable for the requested deployment.
    #[error("artifact `{name}` is not deployable: {reason}")]
    InvalidArtifact { name: String, reason: String },

    /// The chain client is connected to a different network than requested.
    #[error("chain client is connected to network {actual}, expected {expected}")]
    NetworkMismatch { expected: u64, actual: u64 },

    /// Internal ABI encoding failure.
    #[error("abi encoding failed: {0}")]
    Abi(String),

    /// The ledger backend failed to read or write.
    #[error("ledger storage error: {0}")]
    Storage(String),
}

impl DeployError {
    /// Stable name of the failure kind, as printed by the CLI.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }
}

//! Decide what a deployment request requires, by comparing it with the ledger.

use crate::{
    ProxyKind,
    artifact::ContractArtifact,
    error::{DeployError, Result},
    ledger::{DeploymentRecord, Ledger, LedgerKey},
};

/// What has to happen to bring a logical deployment to the requested artifact.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DeploymentAction {
    /// Nothing is recorded: deploy implementation and proxy.
    DeployNew,
    /// The recorded implementation differs: deploy the new one and repoint the proxy.
    UpgradeImplementation(DeploymentRecord),
    /// A previous run stopped before the initializer was confirmed.
    ResumeDeployment(DeploymentRecord),
    /// The recorded implementation already matches.
    NoOp(DeploymentRecord),
}

/// Transient result of planning, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub action: DeploymentAction,
    pub key: LedgerKey,
    pub proxy_kind: ProxyKind,
    /// Bytecode hash of the requested implementation.
    pub abi_version: String,
}

impl DeploymentPlan {
    /// The existing record the action operates on, if any.
    pub fn target_record(&self) -> Option<&DeploymentRecord> {
        match &self.action {
            DeploymentAction::DeployNew => None,
            DeploymentAction::UpgradeImplementation(record)
            | DeploymentAction::ResumeDeployment(record)
            | DeploymentAction::NoOp(record) => Some(record),
        }
    }

    /// Whether executing the plan submits any transaction.
    pub fn is_noop(&self) -> bool {
        matches!(self.action, DeploymentAction::NoOp(_))
    }
}

/// Pure planning decision.
///
/// A kind conflict wins over everything else, then an unfinished deployment is
/// resumed, then bytecode hashes are compared.
pub fn decide(
    key: LedgerKey,
    existing: Option<DeploymentRecord>,
    artifact: &ContractArtifact,
    proxy_kind: ProxyKind,
) -> Result<DeploymentPlan> {
    let abi_version = artifact.bytecode_hash();

    let action = match existing {
        None => DeploymentAction::DeployNew,
        Some(record) if record.proxy_kind != proxy_kind => {
            return Err(DeployError::ProxyKindConflict {
                key,
                recorded: record.proxy_kind,
                requested: proxy_kind,
            });
        }
        Some(record) if !record.is_complete() => {
            DeploymentAction::ResumeDeployment(record)
        }
        Some(record) if record.abi_version == abi_version => DeploymentAction::NoOp(record),
        Some(record) => DeploymentAction::UpgradeImplementation(record),
    };

    Ok(DeploymentPlan {
        action,
        key,
        proxy_kind,
        abi_version,
    })
}

/// Reads the ledger and plans. Never writes.
pub struct Planner<'a, L> {
    ledger: &'a L,
}

impl<'a, L: Ledger> Planner<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    pub async fn plan(
        &self,
        logical_name: &str,
        network_id: u64,
        artifact: &ContractArtifact,
        proxy_kind: ProxyKind,
    ) -> Result<DeploymentPlan> {
        let key = LedgerKey::new(network_id, logical_name);
        let existing = self.ledger.get(&key).await?;
        let plan = decide(key, existing, artifact, proxy_kind)?;

        tracing::debug!(
            key = %plan.key,
            action = %plan.action,
            abi_version = %crate::deployment_hash::short_hash(&plan.abi_version),
            "Planned deployment"
        );

        Ok(plan)
    }
}

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use backon::{ExponentialBuilder, Retryable};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    ProxyKind,
    artifact::{ArtifactRegistry, ContractArtifact},
    chain::ChainClient,
    error::{DeployError, Result},
    executor::Executor,
    ledger::{DeploymentRecord, Ledger, LedgerKey},
    planner::{DeploymentAction, DeploymentPlan, Planner},
    proxy::ProxyStrategy,
};

/// Default time to wait for each transaction to be mined.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Default number of re-plans after a concurrent ledger write.
pub const DEFAULT_CONFLICT_RETRIES: usize = 5;

/// Tuning knobs of a [`Deployer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploySettings {
    pub confirmation_timeout: Duration,
    /// Attempts made after a [`DeployError::LedgerWriteConflict`] before giving up.
    pub conflict_retries: usize,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}

/// A request to bring `logical_name` on `network_id` to the current artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub logical_name: String,
    pub network_id: u64,
    /// Artifact to deploy. Defaults to the logical name.
    pub contract_name: Option<String>,
    pub proxy_kind: ProxyKind,
    /// Overrides the initializer derived from the ABI.
    pub initializer: Option<String>,
    pub init_args: Vec<String>,
}

impl DeployRequest {
    pub fn new(logical_name: impl Into<String>, network_id: u64, proxy_kind: ProxyKind) -> Self {
        Self {
            logical_name: logical_name.into(),
            network_id,
            contract_name: None,
            proxy_kind,
            initializer: None,
            init_args: Vec::new(),
        }
    }

    pub fn contract(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }

    pub fn initializer(mut self, signature: impl Into<String>) -> Self {
        self.initializer = Some(signature.into());
        self
    }

    pub fn init_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.init_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.network_id, self.logical_name.clone())
    }

    fn contract_name(&self) -> &str {
        self.contract_name.as_deref().unwrap_or(&self.logical_name)
    }
}

/// Outcome of [`Deployer::deploy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentReport {
    /// The action that changed the deployment, or `NoOp`.
    pub action: DeploymentAction,
    pub record: DeploymentRecord,
}

/// On-chain pointer of a proxy compared with its ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStatus {
    pub record: DeploymentRecord,
    /// Implementation, or beacon for beacon proxies, according to the ledger.
    pub expected: Address,
    /// Address read from the proxy's EIP-1967 slot.
    pub on_chain: Address,
}

impl ProxyStatus {
    pub fn is_consistent(&self) -> bool {
        self.expected == self.on_chain
    }
}

/// One async mutex per key so that a process never runs two flows for the same key.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: Mutex<HashMap<LedgerKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &LedgerKey) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// Entry point of the orchestrator: resolves artifacts, plans against the ledger and
/// executes plans on the chain.
///
/// Deployments of distinct keys may run concurrently on a shared `Deployer`; calls for
/// the same key are serialized.
pub struct Deployer<C, L> {
    client: C,
    ledger: L,
    registry: ArtifactRegistry,
    settings: DeploySettings,
    locks: KeyLocks,
}

impl<C: ChainClient, L: Ledger> Deployer<C, L> {
    pub fn new(client: C, ledger: L, registry: ArtifactRegistry) -> Self {
        Self {
            client,
            ledger,
            registry,
            settings: DeploySettings::default(),
            locks: KeyLocks::default(),
        }
    }

    pub fn with_settings(mut self, settings: DeploySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    fn resolve_artifact(&self, request: &DeployRequest) -> Result<ContractArtifact> {
        let artifact = self.registry.resolve(request.contract_name())?;
        Ok(match &request.initializer {
            Some(signature) => artifact.with_initializer(signature),
            None => artifact,
        })
    }

    /// Plan `request` without submitting anything.
    pub async fn plan(&self, request: &DeployRequest) -> Result<DeploymentPlan> {
        let artifact = self.resolve_artifact(request)?;
        Planner::new(&self.ledger)
            .plan(
                &request.logical_name,
                request.network_id,
                &artifact,
                request.proxy_kind,
            )
            .await
    }

    /// Deploy or upgrade so the ledger and chain match the requested artifact.
    ///
    /// Running the same request twice is a no-op the second time.
    pub async fn deploy(&self, request: &DeployRequest) -> Result<DeploymentReport> {
        let actual = self.client.chain_id().await?;
        if actual != request.network_id {
            return Err(DeployError::NetworkMismatch {
                expected: request.network_id,
                actual,
            });
        }

        let artifact = self.resolve_artifact(request)?;
        let strategy = request.proxy_kind.strategy(&self.registry)?;
        // Fail before anything is submitted.
        let initializer = strategy.encode_initializer(&artifact, &request.init_args)?;

        let key = request.key();
        let _guard = self.locks.acquire(&key).await;

        let attempt = || self.attempt(&key, &artifact, strategy.as_ref(), &initializer);
        let report = attempt
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(50))
                    .with_max_times(self.settings.conflict_retries),
            )
            .when(|err| matches!(err, DeployError::LedgerWriteConflict(_)))
            .notify(|err, after| {
                tracing::warn!(key = %key, err = %err, ?after, "Ledger changed underneath, re-planning...");
            })
            .await?;

        tracing::info!(
            key = %key,
            action = %report.action,
            proxy = %report.record.proxy_address,
            implementation = %report.record.implementation_address,
            "Deployment finished"
        );

        Ok(report)
    }

    async fn attempt(
        &self,
        key: &LedgerKey,
        artifact: &ContractArtifact,
        strategy: &dyn ProxyStrategy,
        initializer: &Bytes,
    ) -> Result<DeploymentReport> {
        let planner = Planner::new(&self.ledger);
        let executor = Executor::new(&self.client, &self.ledger, self.settings.confirmation_timeout);
        let mut resumed = None;

        loop {
            let plan = planner
                .plan(&key.logical_name, key.network_id, artifact, strategy.kind())
                .await?;
            let record = executor.execute(&plan, strategy, artifact, initializer).await?;

            match plan.action {
                // The finished record may still be behind the requested artifact.
                DeploymentAction::ResumeDeployment(_) => resumed = Some(plan.action),
                DeploymentAction::NoOp(_) => {
                    return Ok(DeploymentReport {
                        action: resumed.unwrap_or(plan.action),
                        record,
                    });
                }
                action => return Ok(DeploymentReport { action, record }),
            }
        }
    }

    /// Compare the proxy's on-chain pointer with the ledger.
    pub async fn verify(&self, key: &LedgerKey) -> Result<Option<ProxyStatus>> {
        let Some(record) = self.ledger.get(key).await? else {
            return Ok(None);
        };

        let expected = match record.beacon_address {
            Some(beacon) => beacon,
            None => record.implementation_address,
        };
        let word = self
            .client
            .storage_at(record.proxy_address, record.proxy_kind.pointer_slot())
            .await?;

        Ok(Some(ProxyStatus {
            on_chain: Address::from_word(word),
            expected,
            record,
        }))
    }

    /// Every recorded deployment.
    pub async fn list(&self) -> Result<Vec<DeploymentRecord>> {
        self.ledger.list().await
    }
}

//! Carry out a [`DeploymentPlan`] against a chain client and record the outcome.
//!
//! Every transaction is journaled before its confirmation wait so that a failed or
//! timed-out run can be retried without submitting the same step twice.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, keccak256};

use crate::{
    artifact::ContractArtifact,
    chain::ChainClient,
    error::{DeployError, Result},
    ledger::{DeployStep, DeploymentRecord, Journal, JournalEntry, Ledger, LedgerKey, RecordStatus},
    planner::{DeploymentAction, DeploymentPlan},
    proxy::{ContractCall, InitCode, ProxyStrategy, UpgradeRequest},
};

/// Transaction submitted by a step.
enum Tx<'a> {
    Create(&'a InitCode),
    Call(&'a ContractCall),
}

impl Tx<'_> {
    /// Identifies this exact transaction when sent by `sender`.
    fn payload_hash(&self, sender: Address) -> B256 {
        match self {
            Tx::Create(code) => keccak256([sender.as_slice(), code.payload().as_ref()].concat()),
            Tx::Call(call) => keccak256(
                [sender.as_slice(), call.to.as_slice(), call.data.as_ref()].concat(),
            ),
        }
    }
}

/// A step whose transaction is known to be mined successfully.
struct Confirmed {
    step: DeployStep,
    tx_hash: B256,
    contract_address: Option<Address>,
}

impl Confirmed {
    fn contract(&self) -> Result<Address> {
        self.contract_address.ok_or_else(|| {
            DeployError::ChainSubmissionFailed(format!(
                "{} transaction {} created no contract",
                self.step, self.tx_hash
            ))
        })
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct Executor<'a, C, L> {
    client: &'a C,
    ledger: &'a L,
    confirmation_timeout: Duration,
}

impl<'a, C: ChainClient, L: Ledger> Executor<'a, C, L> {
    pub fn new(client: &'a C, ledger: &'a L, confirmation_timeout: Duration) -> Self {
        Self {
            client,
            ledger,
            confirmation_timeout,
        }
    }

    /// Execute `plan` and return the resulting record.
    ///
    /// `initializer` is the encoded initializer calldata; empty means no initializer
    /// transaction is sent.
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        strategy: &dyn ProxyStrategy,
        artifact: &ContractArtifact,
        initializer: &Bytes,
    ) -> Result<DeploymentRecord> {
        match &plan.action {
            DeploymentAction::NoOp(record) => {
                tracing::info!(key = %plan.key, proxy = %record.proxy_address, "Deployment up to date");
                Ok(record.clone())
            }
            DeploymentAction::DeployNew => self.deploy_new(plan, strategy, artifact, initializer).await,
            DeploymentAction::ResumeDeployment(record) => self.resume(&plan.key, record, initializer).await,
            DeploymentAction::UpgradeImplementation(record) => {
                self.upgrade(plan, record, strategy, artifact).await
            }
        }
    }

    async fn deploy_new(
        &self,
        plan: &DeploymentPlan,
        strategy: &dyn ProxyStrategy,
        artifact: &ContractArtifact,
        initializer: &Bytes,
    ) -> Result<DeploymentRecord> {
        let key = &plan.key;
        strategy.validate_implementation(artifact)?;

        let mut journal = self.open_journal(key, &plan.abi_version).await?;
        let owner = self.client.sender();

        let implementation = self
            .run_step(
                key,
                &mut journal,
                DeployStep::Implementation,
                Tx::Create(&InitCode::bare(artifact.bytecode.clone())),
            )
            .await?
            .contract()?;
        tracing::info!(key = %key, %implementation, "Implementation deployed");

        let beacon = match strategy.beacon_bytecode(implementation, owner) {
            Some(code) => {
                let beacon = self
                    .run_step(key, &mut journal, DeployStep::Beacon, Tx::Create(&code))
                    .await?
                    .contract()?;
                tracing::info!(key = %key, %beacon, "Beacon deployed");
                Some(beacon)
            }
            None => None,
        };

        let proxy_code = strategy.build_proxy_bytecode(beacon.unwrap_or(implementation), owner)?;
        let proxy = self
            .run_step(key, &mut journal, DeployStep::Proxy, Tx::Create(&proxy_code))
            .await?
            .contract()?;
        tracing::info!(key = %key, %proxy, kind = %plan.proxy_kind, "Proxy deployed");

        let timestamp = now();
        let record = DeploymentRecord {
            network_id: key.network_id,
            logical_name: key.logical_name.clone(),
            contract_name: artifact.name.clone(),
            proxy_kind: plan.proxy_kind,
            proxy_address: proxy,
            implementation_address: implementation,
            abi_version: plan.abi_version.clone(),
            status: if initializer.is_empty() {
                RecordStatus::Complete
            } else {
                RecordStatus::Incomplete
            },
            owner,
            admin_address: strategy.admin_address(proxy),
            beacon_address: beacon,
            deployed_at: timestamp,
            updated_at: timestamp,
        };
        self.ledger.compare_and_put(None, &record).await?;

        let record = if initializer.is_empty() {
            record
        } else {
            self.initialize(&record, &mut journal, initializer).await?
        };

        self.ledger.clear_journal(key).await?;
        Ok(record)
    }

    async fn resume(
        &self,
        key: &LedgerKey,
        record: &DeploymentRecord,
        initializer: &Bytes,
    ) -> Result<DeploymentRecord> {
        tracing::info!(key = %key, proxy = %record.proxy_address, "Resuming unfinished deployment");

        // Submissions of the interrupted run are tagged with the recorded version.
        let mut journal = self.open_journal(key, &record.abi_version).await?;

        let record = if initializer.is_empty() {
            self.mark_complete(record).await?
        } else {
            self.initialize(record, &mut journal, initializer).await?
        };

        self.ledger.clear_journal(key).await?;
        Ok(record)
    }

    async fn upgrade(
        &self,
        plan: &DeploymentPlan,
        record: &DeploymentRecord,
        strategy: &dyn ProxyStrategy,
        artifact: &ContractArtifact,
    ) -> Result<DeploymentRecord> {
        let key = &plan.key;
        let mut journal = self.open_journal(key, &plan.abi_version).await?;

        let implementation = self
            .run_step(
                key,
                &mut journal,
                DeployStep::Implementation,
                Tx::Create(&InitCode::bare(artifact.bytecode.clone())),
            )
            .await?
            .contract()?;

        let request = UpgradeRequest {
            proxy: record.proxy_address,
            new_implementation: implementation,
            caller: self.client.sender(),
            record,
            artifact,
        };
        if let Err(err) = strategy.authorize_upgrade(&request).into_result(&request) {
            tracing::warn!(key = %key, caller = %request.caller, "Upgrade denied");
            return Err(err);
        }

        let call = strategy.upgrade_call(record, implementation)?;
        self.run_step(key, &mut journal, DeployStep::Upgrade, Tx::Call(&call))
            .await?;

        let upgraded = DeploymentRecord {
            contract_name: artifact.name.clone(),
            implementation_address: implementation,
            abi_version: plan.abi_version.clone(),
            updated_at: now(),
            ..record.clone()
        };
        self.ledger.compare_and_put(Some(record), &upgraded).await?;
        self.ledger.clear_journal(key).await?;

        tracing::info!(
            key = %key,
            from = %record.implementation_address,
            to = %implementation,
            "Proxy upgraded"
        );

        Ok(upgraded)
    }

    /// Send the initializer through the proxy and mark the record complete.
    async fn initialize(
        &self,
        record: &DeploymentRecord,
        journal: &mut Journal,
        initializer: &Bytes,
    ) -> Result<DeploymentRecord> {
        let call = ContractCall {
            to: record.proxy_address,
            data: initializer.clone(),
        };
        self.run_step(&record.key(), journal, DeployStep::Initializer, Tx::Call(&call))
            .await?;
        tracing::info!(key = %record.key(), proxy = %record.proxy_address, "Proxy initialized");

        self.mark_complete(record).await
    }

    async fn mark_complete(&self, record: &DeploymentRecord) -> Result<DeploymentRecord> {
        let complete = DeploymentRecord {
            status: RecordStatus::Complete,
            updated_at: now(),
            ..record.clone()
        };
        self.ledger.compare_and_put(Some(record), &complete).await?;
        Ok(complete)
    }

    /// Load the journal for `key`, dropping one left by a run towards another version.
    async fn open_journal(&self, key: &LedgerKey, abi_version: &str) -> Result<Journal> {
        match self.ledger.journal(key).await? {
            Some(journal) if journal.abi_version == abi_version => {
                tracing::debug!(key = %key, entries = journal.entries.len(), "Continuing from journal");
                Ok(journal)
            }
            Some(stale) => {
                tracing::debug!(key = %key, stale = %stale.abi_version, "Discarding stale journal");
                Ok(Journal::new(abi_version))
            }
            None => Ok(Journal::new(abi_version)),
        }
    }

    /// Make sure `step` is mined, reusing a previous submission of the same payload
    /// when the chain shows it went through or is still pending.
    async fn run_step(
        &self,
        key: &LedgerKey,
        journal: &mut Journal,
        step: DeployStep,
        tx: Tx<'_>,
    ) -> Result<Confirmed> {
        let payload_hash = tx.payload_hash(self.client.sender());

        if let Some(entry) = journal.entry(step).cloned() {
            if entry.payload_hash != payload_hash {
                tracing::debug!(key = %key, %step, tx_hash = %entry.tx_hash, "Journaled submission no longer matches, resubmitting");
            } else {
                match self.client.receipt(entry.tx_hash).await? {
                    Some(receipt) if receipt.success => {
                        tracing::debug!(key = %key, %step, tx_hash = %entry.tx_hash, "Reusing confirmed transaction");
                        return Ok(Confirmed {
                            step,
                            tx_hash: entry.tx_hash,
                            contract_address: receipt.contract_address,
                        });
                    }
                    Some(_) => {
                        tracing::warn!(key = %key, %step, tx_hash = %entry.tx_hash, "Previous attempt reverted, resubmitting");
                    }
                    None => {
                        if !self.nonce_taken(entry.contract_address).await? {
                            tracing::debug!(key = %key, %step, tx_hash = %entry.tx_hash, "Waiting for previous attempt");
                            return self.confirm(step, entry.tx_hash).await;
                        }
                        tracing::warn!(key = %key, %step, tx_hash = %entry.tx_hash, "Previous attempt was replaced, resubmitting");
                    }
                }
            }
        }

        let submission = match tx {
            Tx::Create(code) => {
                self.client
                    .deploy_bytecode(&code.bytecode, &code.constructor_args)
                    .await?
            }
            Tx::Call(call) => self.client.call(call.to, &call.data).await?,
        };
        tracing::debug!(key = %key, %step, tx_hash = %submission.tx_hash, "Transaction submitted");

        journal.record(JournalEntry {
            step,
            tx_hash: submission.tx_hash,
            payload_hash,
            contract_address: submission.contract_address,
        });
        self.ledger.put_journal(key, journal).await?;

        self.confirm(step, submission.tx_hash).await
    }

    /// An unmined creation whose predicted address already holds code lost its
    /// nonce to another transaction and will never be mined.
    async fn nonce_taken(&self, predicted: Option<Address>) -> Result<bool> {
        match predicted {
            Some(address) => Ok(!self.client.code_at(address).await?.is_empty()),
            None => Ok(false),
        }
    }

    async fn confirm(&self, step: DeployStep, tx_hash: B256) -> Result<Confirmed> {
        let receipt = self
            .client
            .wait_for_confirmation(tx_hash, self.confirmation_timeout)
            .await?;

        if !receipt.success {
            return Err(DeployError::ChainSubmissionFailed(format!(
                "{step} transaction {tx_hash} reverted in block {}",
                receipt.block_number
            )));
        }

        Ok(Confirmed {
            step,
            tx_hash,
            contract_address: receipt.contract_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ProxyKind,
        chain::MemoryChain,
        ledger::MemoryLedger,
        planner::decide,
        proxy::tests::{UUPS_ABI, artifact, proxy_registry},
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn owner() -> Address {
        Address::repeat_byte(0x0a)
    }

    async fn plan(
        ledger: &MemoryLedger,
        artifact: &ContractArtifact,
        kind: ProxyKind,
    ) -> DeploymentPlan {
        let key = LedgerKey::new(5, "Reputation");
        let existing = ledger.get(&key).await.unwrap();
        decide(key, existing, artifact, kind).unwrap()
    }

    #[tokio::test]
    async fn test_deploy_new_beacon_records_beacon() {
        let chain = MemoryChain::new(5, owner());
        let ledger = MemoryLedger::new();
        let executor = Executor::new(&chain, &ledger, TIMEOUT);
        let strategy = ProxyKind::Beacon.strategy(&proxy_registry()).unwrap();
        let v1 = artifact("ReputationForTesting", &[0x01], UUPS_ABI);

        let plan = plan(&ledger, &v1, ProxyKind::Beacon).await;
        let record = executor
            .execute(&plan, strategy.as_ref(), &v1, &Bytes::new())
            .await
            .unwrap();

        // implementation, beacon, proxy
        assert_eq!(chain.deployments().await.len(), 3);
        assert_eq!(record.implementation_address, owner().create(0));
        assert_eq!(record.beacon_address, Some(owner().create(1)));
        assert_eq!(record.proxy_address, owner().create(2));
        assert_eq!(record.status, RecordStatus::Complete);
        assert!(chain.calls().await.is_empty());
        assert_eq!(ledger.journal(&plan.key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_implementation_is_awaited_not_resubmitted() {
        let chain = MemoryChain::new(5, owner());
        let ledger = MemoryLedger::new();
        let executor = Executor::new(&chain, &ledger, TIMEOUT);
        let strategy = ProxyKind::Uups.strategy(&proxy_registry()).unwrap();
        let v1 = artifact("ReputationForTesting", &[0x01], UUPS_ABI);
        let plan = plan(&ledger, &v1, ProxyKind::Uups).await;

        chain.hold_next_submissions(1).await;
        for _ in 0..2 {
            let err = executor
                .execute(&plan, strategy.as_ref(), &v1, &Bytes::new())
                .await
                .unwrap_err();
            assert!(matches!(err, DeployError::ConfirmationTimeout { .. }));
        }
        assert_eq!(chain.deployments().await.len(), 1);
        assert!(ledger.get(&plan.key).await.unwrap().is_none());

        chain.mine_pending().await;
        let record = executor
            .execute(&plan, strategy.as_ref(), &v1, &Bytes::new())
            .await
            .unwrap();

        assert_eq!(chain.deployments().await.len(), 2);
        assert_eq!(record.implementation_address, owner().create(0));
        assert_eq!(record.proxy_address, owner().create(1));
    }

    #[tokio::test]
    async fn test_reverted_upgrade_keeps_record() {
        let chain = MemoryChain::new(5, owner());
        let ledger = MemoryLedger::new();
        let executor = Executor::new(&chain, &ledger, TIMEOUT);
        let strategy = ProxyKind::Transparent.strategy(&proxy_registry()).unwrap();
        let v1 = artifact("ReputationForTesting", &[0x01], UUPS_ABI);
        let v2 = artifact("ReputationForTesting", &[0x02], UUPS_ABI);

        let deploy_plan = plan(&ledger, &v1, ProxyKind::Transparent).await;
        let deployed = executor
            .execute(&deploy_plan, strategy.as_ref(), &v1, &Bytes::new())
            .await
            .unwrap();

        // The admin address is derived, no code lives there on this chain: the call reverts.
        let upgrade_plan = plan(&ledger, &v2, ProxyKind::Transparent).await;
        let err = executor
            .execute(&upgrade_plan, strategy.as_ref(), &v2, &Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ChainSubmissionFailed(_)));
        assert_eq!(ledger.get(&deployed.key()).await.unwrap(), Some(deployed));
        assert_eq!(chain.calls().await[0].to, owner().create(1).create(1));
    }

    #[tokio::test]
    async fn test_switching_kind_after_timeout_redeploys_proxy() {
        let chain = MemoryChain::new(5, owner());
        let ledger = MemoryLedger::new();
        let executor = Executor::new(&chain, &ledger, TIMEOUT);
        let registry = proxy_registry();
        let v1 = artifact("ReputationForTesting", &[0x01], UUPS_ABI);

        // The implementation confirms, the UUPS proxy confirmation times out.
        chain.time_out_confirmations(1, 1).await;
        let uups = ProxyKind::Uups.strategy(&registry).unwrap();
        let plan_uups = plan(&ledger, &v1, ProxyKind::Uups).await;
        let err = executor
            .execute(&plan_uups, uups.as_ref(), &v1, &Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ConfirmationTimeout { .. }));

        let transparent = ProxyKind::Transparent.strategy(&registry).unwrap();
        let plan_transparent = plan(&ledger, &v1, ProxyKind::Transparent).await;
        let record = executor
            .execute(&plan_transparent, transparent.as_ref(), &v1, &Bytes::new())
            .await
            .unwrap();

        let deployments = chain.deployments().await;
        assert_eq!(deployments.len(), 3);
        assert_eq!(record.implementation_address, owner().create(0));
        assert_eq!(record.proxy_address, owner().create(2));
        assert_eq!(deployments[2].address, record.proxy_address);
        assert!(deployments[2].init_code.starts_with(&[0x7a, 0x11]));
        assert_eq!(record.admin_address, Some(owner().create(2).create(1)));
    }

    #[tokio::test]
    async fn test_journal_for_other_version_is_discarded() {
        let chain = MemoryChain::new(5, owner());
        let ledger = MemoryLedger::new();
        let executor = Executor::new(&chain, &ledger, TIMEOUT);
        let strategy = ProxyKind::Uups.strategy(&proxy_registry()).unwrap();
        let v1 = artifact("ReputationForTesting", &[0x01], UUPS_ABI);
        let v2 = artifact("ReputationForTesting", &[0x02], UUPS_ABI);

        chain.time_out_confirmations(0, 1).await;
        let plan_v1 = plan(&ledger, &v1, ProxyKind::Uups).await;
        executor
            .execute(&plan_v1, strategy.as_ref(), &v1, &Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(
            ledger.journal(&plan_v1.key).await.unwrap().map(|j| j.abi_version),
            Some(v1.bytecode_hash())
        );

        let plan_v2 = plan(&ledger, &v2, ProxyKind::Uups).await;
        let record = executor
            .execute(&plan_v2, strategy.as_ref(), &v2, &Bytes::new())
            .await
            .unwrap();

        assert_eq!(chain.deployments().await.len(), 3);
        assert_eq!(record.implementation_address, owner().create(1));
        assert_eq!(record.abi_version, v2.bytecode_hash());
    }

    #[tokio::test]
    async fn test_receipt_address_wins_over_journaled_prediction() {
        let chain = MemoryChain::new(5, owner());
        let ledger = MemoryLedger::new();
        let executor = Executor::new(&chain, &ledger, TIMEOUT);
        let strategy = ProxyKind::Uups.strategy(&proxy_registry()).unwrap();
        let v1 = artifact("ReputationForTesting", &[0x01], UUPS_ABI);
        let plan = plan(&ledger, &v1, ProxyKind::Uups).await;

        let implementation = InitCode::bare(v1.bytecode.clone());
        let submitted = chain
            .deploy_bytecode(&implementation.bytecode, &implementation.constructor_args)
            .await
            .unwrap();
        let mut journal = Journal::new(plan.abi_version.clone());
        journal.record(JournalEntry {
            step: DeployStep::Implementation,
            tx_hash: submitted.tx_hash,
            payload_hash: Tx::Create(&implementation).payload_hash(owner()),
            contract_address: Some(Address::repeat_byte(0x77)),
        });
        ledger.put_journal(&plan.key, &journal).await.unwrap();

        let record = executor
            .execute(&plan, strategy.as_ref(), &v1, &Bytes::new())
            .await
            .unwrap();

        assert_eq!(chain.deployments().await.len(), 2);
        assert_eq!(record.implementation_address, owner().create(0));
    }

    #[tokio::test]
    async fn test_unmined_submission_with_taken_nonce_is_resubmitted() {
        let chain = MemoryChain::new(5, owner());
        let ledger = MemoryLedger::new();
        let executor = Executor::new(&chain, &ledger, TIMEOUT);
        let strategy = ProxyKind::Uups.strategy(&proxy_registry()).unwrap();
        let v1 = artifact("ReputationForTesting", &[0x01], UUPS_ABI);
        let plan = plan(&ledger, &v1, ProxyKind::Uups).await;

        // Another transaction from the same account created a contract at the
        // address predicted for the journaled, never mined, submission.
        let unrelated = chain
            .deploy_bytecode(&Bytes::from_static(&[0x99]), &Bytes::new())
            .await
            .unwrap();
        let implementation = InitCode::bare(v1.bytecode.clone());
        let mut journal = Journal::new(plan.abi_version.clone());
        journal.record(JournalEntry {
            step: DeployStep::Implementation,
            tx_hash: B256::repeat_byte(0x09),
            payload_hash: Tx::Create(&implementation).payload_hash(owner()),
            contract_address: unrelated.contract_address,
        });
        ledger.put_journal(&plan.key, &journal).await.unwrap();

        let record = executor
            .execute(&plan, strategy.as_ref(), &v1, &Bytes::new())
            .await
            .unwrap();

        assert_ne!(Some(record.implementation_address), unrelated.contract_address);
        assert_eq!(record.implementation_address, owner().create(1));
        assert_eq!(record.proxy_address, owner().create(2));
    }
}

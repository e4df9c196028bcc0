use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, keccak256};
use tokio::sync::Mutex;

use super::{ChainClient, Submission, TxReceipt};
use crate::{
    error::{DeployError, Result},
    proxy::ContractCall,
};

/// A contract created on a [`MemoryChain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub address: Address,
    /// Creation payload: bytecode followed by constructor arguments.
    pub init_code: Bytes,
}

#[derive(Debug, Default)]
struct State {
    nonce: u64,
    block_number: u64,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, B256), B256>,
    receipts: HashMap<B256, TxReceipt>,
    /// Submitted but not mined transactions, with the code they will create.
    pending: Vec<(TxReceipt, Option<Bytes>)>,
    deployments: Vec<DeployedContract>,
    calls: Vec<ContractCall>,
    /// Confirmation waits left to succeed before the injected timeouts start.
    timeout_after: usize,
    timeouts: usize,
    holds: usize,
    reverts: usize,
}

impl State {
    fn next_tx(&mut self, sender: Address) -> (B256, u64) {
        let nonce = self.nonce;
        self.nonce += 1;
        let tx_hash = keccak256([sender.as_slice(), &nonce.to_be_bytes()].concat());
        (tx_hash, nonce)
    }

    fn include(&mut self, mut receipt: TxReceipt, code: Option<Bytes>) {
        self.block_number += 1;
        receipt.block_number = self.block_number;
        if let (true, Some(address), Some(code)) = (receipt.success, receipt.contract_address, code) {
            self.code.insert(address, code);
        }
        self.receipts.insert(receipt.tx_hash, receipt);
    }

    fn submit(&mut self, receipt: TxReceipt, code: Option<Bytes>) {
        if self.holds > 0 {
            self.holds -= 1;
            self.pending.push((receipt, code));
        } else {
            self.include(receipt, code);
        }
    }
}

/// Deterministic in-process chain.
///
/// Every submission is mined instantly into its own block unless a fault was
/// injected. Contract addresses follow the CREATE rule for the sender's nonce, so
/// they match what a real chain would produce. Calls to addresses without code
/// revert. Clones share the same chain.
#[derive(Debug, Clone)]
pub struct MemoryChain {
    chain_id: u64,
    sender: Address,
    state: Arc<Mutex<State>>,
}

impl MemoryChain {
    pub fn new(chain_id: u64, sender: Address) -> Self {
        Self {
            chain_id,
            sender,
            state: Arc::default(),
        }
    }

    /// Same chain, seen from another account.
    pub fn with_sender(&self, sender: Address) -> Self {
        Self {
            sender,
            ..self.clone()
        }
    }

    /// After `after` more successful confirmation waits, the next `count` waits time
    /// out although their transactions are mined.
    pub async fn time_out_confirmations(&self, after: usize, count: usize) {
        let mut state = self.state.lock().await;
        state.timeout_after = after;
        state.timeouts = count;
    }

    /// The next `n` submissions stay pending until [`MemoryChain::mine_pending`].
    pub async fn hold_next_submissions(&self, n: usize) {
        self.state.lock().await.holds += n;
    }

    /// The next `n` calls revert.
    pub async fn revert_next_calls(&self, n: usize) {
        self.state.lock().await.reverts += n;
    }

    /// Mine every held transaction.
    pub async fn mine_pending(&self) {
        let mut state = self.state.lock().await;
        for (receipt, code) in std::mem::take(&mut state.pending) {
            state.include(receipt, code);
        }
    }

    pub async fn set_storage(&self, address: Address, slot: B256, value: B256) {
        self.state.lock().await.storage.insert((address, slot), value);
    }

    /// Every contract creation submitted so far, in order.
    pub async fn deployments(&self) -> Vec<DeployedContract> {
        self.state.lock().await.deployments.clone()
    }

    /// Every call submitted so far, in order.
    pub async fn calls(&self) -> Vec<ContractCall> {
        self.state.lock().await.calls.clone()
    }
}

impl ChainClient for MemoryChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn deploy_bytecode(&self, bytecode: &Bytes, constructor_args: &Bytes) -> Result<Submission> {
        if bytecode.is_empty() {
            return Err(DeployError::ChainSubmissionFailed(
                "contract creation without bytecode".to_string(),
            ));
        }

        let init_code = Bytes::from([bytecode.as_ref(), constructor_args.as_ref()].concat());
        let mut state = self.state.lock().await;
        let (tx_hash, nonce) = state.next_tx(self.sender);
        let address = self.sender.create(nonce);

        state.deployments.push(DeployedContract {
            address,
            init_code: init_code.clone(),
        });
        state.submit(
            TxReceipt {
                tx_hash,
                block_number: 0,
                success: true,
                contract_address: Some(address),
            },
            Some(init_code),
        );

        Ok(Submission {
            tx_hash,
            contract_address: Some(address),
        })
    }

    async fn call(&self, to: Address, data: &Bytes) -> Result<Submission> {
        let mut state = self.state.lock().await;
        let (tx_hash, _) = state.next_tx(self.sender);

        let injected_revert = state.reverts > 0;
        if injected_revert {
            state.reverts -= 1;
        }
        let success = !injected_revert && state.code.contains_key(&to);

        state.calls.push(ContractCall {
            to,
            data: data.clone(),
        });
        state.submit(
            TxReceipt {
                tx_hash,
                block_number: 0,
                success,
                contract_address: None,
            },
            None,
        );

        Ok(Submission {
            tx_hash,
            contract_address: None,
        })
    }

    /// Resolves immediately: an injected timeout or a pending transaction fails
    /// without waiting for `timeout` to elapse.
    async fn wait_for_confirmation(&self, tx_hash: B256, timeout: Duration) -> Result<TxReceipt> {
        let mut state = self.state.lock().await;

        if let Some(receipt) = state.receipts.get(&tx_hash).copied() {
            if state.timeout_after > 0 {
                state.timeout_after -= 1;
            } else if state.timeouts > 0 {
                state.timeouts -= 1;
                return Err(DeployError::ConfirmationTimeout { tx_hash, timeout });
            }
            return Ok(receipt);
        }

        if state.pending.iter().any(|(receipt, _)| receipt.tx_hash == tx_hash) {
            return Err(DeployError::ConfirmationTimeout { tx_hash, timeout });
        }

        Err(DeployError::ChainSubmissionFailed(format!(
            "unknown transaction {tx_hash}"
        )))
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        Ok(self.state.lock().await.receipts.get(&tx_hash).copied())
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        Ok(self
            .state
            .lock()
            .await
            .code
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        Ok(self
            .state
            .lock()
            .await
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }
}

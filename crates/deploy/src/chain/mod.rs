//! Blockchain access.
//!
//! The orchestrator only needs to submit two kinds of transactions (contract creations
//! and calls), wait for them, and read back code and storage to re-check state on
//! retries.

mod memory;
mod rpc;

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

pub use memory::{DeployedContract, MemoryChain};
pub use rpc::{DEFAULT_POLL_INTERVAL, RpcChainClient};

use crate::error::Result;

/// A transaction accepted by the chain client, not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub tx_hash: B256,
    /// Address the contract will live at, for contract creations.
    pub contract_address: Option<Address>,
}

/// A mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// `false` when the transaction reverted.
    pub success: bool,
    pub contract_address: Option<Address>,
}

/// Client able to submit transactions from a single sender account.
pub trait ChainClient: Send + Sync {
    /// Account every transaction is sent from.
    fn sender(&self) -> Address;

    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Submit a contract creation with `constructor_args` appended to `bytecode`.
    fn deploy_bytecode(
        &self,
        bytecode: &Bytes,
        constructor_args: &Bytes,
    ) -> impl Future<Output = Result<Submission>> + Send;

    /// Submit a call to an existing contract.
    fn call(&self, to: Address, data: &Bytes) -> impl Future<Output = Result<Submission>> + Send;

    /// Wait until `tx_hash` is mined, failing with
    /// [`crate::DeployError::ConfirmationTimeout`] after `timeout`.
    ///
    /// A reverted transaction is returned as a receipt with `success == false`.
    fn wait_for_confirmation(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;

    /// Receipt of `tx_hash`, or `None` while it is pending or unknown.
    fn receipt(&self, tx_hash: B256) -> impl Future<Output = Result<Option<TxReceipt>>> + Send;

    /// Runtime code at `address`; empty when no contract lives there.
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send;

    fn storage_at(&self, address: Address, slot: B256)
    -> impl Future<Output = Result<B256>> + Send;
}

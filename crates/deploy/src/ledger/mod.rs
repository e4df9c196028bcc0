//! Persistent mapping from `(network, logical name)` to the current deployment.

mod file;
mod memory;

use std::future::Future;

use alloy_core::primitives::{Address, B256};
use derive_more::Display;
use serde::{Deserialize, Serialize};

pub use file::FileLedger;
pub use memory::MemoryLedger;

use crate::{ProxyKind, error::Result};

/// Identity of a logical deployment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[display("{network_id}/{logical_name}")]
#[serde(rename_all = "camelCase")]
pub struct LedgerKey {
    pub network_id: u64,
    pub logical_name: String,
}

impl LedgerKey {
    pub fn new(network_id: u64, logical_name: impl Into<String>) -> Self {
        Self {
            network_id,
            logical_name: logical_name.into(),
        }
    }
}

/// Whether every step of the deployment has been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum RecordStatus {
    Complete,
    /// The proxy exists but its initializer has not been confirmed yet.
    Incomplete,
}

/// Durable record of a logical deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub network_id: u64,
    pub logical_name: String,
    /// Artifact the current implementation was built from.
    pub contract_name: String,
    pub proxy_kind: ProxyKind,
    pub proxy_address: Address,
    pub implementation_address: Address,
    /// Bytecode hash of the current implementation.
    pub abi_version: String,
    pub status: RecordStatus,
    /// Account holding upgrade rights.
    pub owner: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon_address: Option<Address>,
    /// Unix timestamp of the first confirmed deployment.
    pub deployed_at: i64,
    /// Unix timestamp of the last upgrade or completion.
    pub updated_at: i64,
}

impl DeploymentRecord {
    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.network_id, self.logical_name.clone())
    }

    pub fn is_complete(&self) -> bool {
        self.status == RecordStatus::Complete
    }
}

/// A transaction-producing step of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "kebab-case")]
pub enum DeployStep {
    Implementation,
    Beacon,
    Proxy,
    Initializer,
    Upgrade,
}

/// A submitted transaction not yet reflected in a deployment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub step: DeployStep,
    pub tx_hash: B256,
    /// Hash of the sender and the exact transaction payload. An entry is reused
    /// only for a step that would submit the same payload again.
    #[serde(default)]
    pub payload_hash: B256,
    /// Address predicted at submission; the receipt is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
}

/// Submissions made for one key while moving it to `abi_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Journal {
    pub abi_version: String,
    pub entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new(abi_version: impl Into<String>) -> Self {
        Self {
            abi_version: abi_version.into(),
            entries: Vec::new(),
        }
    }

    pub fn entry(&self, step: DeployStep) -> Option<&JournalEntry> {
        self.entries.iter().find(|entry| entry.step == step)
    }

    /// Record a submission, replacing any earlier entry for the same step.
    pub fn record(&mut self, entry: JournalEntry) {
        self.entries.retain(|existing| existing.step != entry.step);
        self.entries.push(entry);
    }
}

/// Storage for deployment records and their journals.
///
/// Every write replaces the whole record atomically.
pub trait Ledger: Send + Sync {
    fn get(&self, key: &LedgerKey) -> impl Future<Output = Result<Option<DeploymentRecord>>> + Send;

    /// Unconditionally store `record`.
    fn put(&self, record: &DeploymentRecord) -> impl Future<Output = Result<()>> + Send;

    /// Store `record` only if the stored record still equals `expected`.
    ///
    /// Fails with [`crate::DeployError::LedgerWriteConflict`] otherwise.
    fn compare_and_put(
        &self,
        expected: Option<&DeploymentRecord>,
        record: &DeploymentRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// All records, ordered by key.
    fn list(&self) -> impl Future<Output = Result<Vec<DeploymentRecord>>> + Send;

    fn journal(&self, key: &LedgerKey) -> impl Future<Output = Result<Option<Journal>>> + Send;

    fn put_journal(
        &self,
        key: &LedgerKey,
        journal: &Journal,
    ) -> impl Future<Output = Result<()>> + Send;

    fn clear_journal(&self, key: &LedgerKey) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_layout() {
        let record = crate::proxy::tests::record(ProxyKind::Uups, Address::repeat_byte(0x0a));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["networkId"], 5);
        assert_eq!(json["logicalName"], "Reputation");
        assert_eq!(json["proxyKind"], "uups");
        assert_eq!(json["status"], "Complete");
        assert!(json.get("adminAddress").is_none());
        assert!(json.get("beaconAddress").is_none());

        let parsed: DeploymentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_journal_replaces_step() {
        let mut journal = Journal::new("h1");
        journal.record(JournalEntry {
            step: DeployStep::Proxy,
            tx_hash: B256::repeat_byte(1),
            payload_hash: B256::repeat_byte(0xaa),
            contract_address: Some(Address::repeat_byte(1)),
        });
        journal.record(JournalEntry {
            step: DeployStep::Proxy,
            tx_hash: B256::repeat_byte(2),
            payload_hash: B256::repeat_byte(0xbb),
            contract_address: Some(Address::repeat_byte(2)),
        });

        assert_eq!(journal.entries.len(), 1);
        assert_eq!(
            journal.entry(DeployStep::Proxy).map(|e| e.tx_hash),
            Some(B256::repeat_byte(2))
        );
        assert!(journal.entry(DeployStep::Initializer).is_none());
    }

    #[test]
    fn test_journal_entry_without_payload_hash() {
        let entry: JournalEntry = serde_json::from_value(serde_json::json!({
            "step": "proxy",
            "txHash": B256::repeat_byte(1),
        }))
        .unwrap();

        assert_eq!(entry.payload_hash, B256::ZERO);
        assert_eq!(entry.contract_address, None);
    }
}

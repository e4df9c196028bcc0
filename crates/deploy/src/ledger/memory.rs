use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Mutex;

use super::{DeploymentRecord, Journal, Ledger, LedgerKey};
use crate::error::{DeployError, Result};

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<LedgerKey, DeploymentRecord>,
    journals: BTreeMap<LedgerKey, Journal>,
}

/// Process-local ledger, for tests and dry runs. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<State>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for MemoryLedger {
    async fn get(&self, key: &LedgerKey) -> Result<Option<DeploymentRecord>> {
        Ok(self.state.lock().await.records.get(key).cloned())
    }

    async fn put(&self, record: &DeploymentRecord) -> Result<()> {
        self.state
            .lock()
            .await
            .records
            .insert(record.key(), record.clone());
        Ok(())
    }

    async fn compare_and_put(
        &self,
        expected: Option<&DeploymentRecord>,
        record: &DeploymentRecord,
    ) -> Result<()> {
        let key = record.key();
        let mut state = self.state.lock().await;

        if state.records.get(&key) != expected {
            return Err(DeployError::LedgerWriteConflict(key));
        }

        state.records.insert(key, record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>> {
        Ok(self.state.lock().await.records.values().cloned().collect())
    }

    async fn journal(&self, key: &LedgerKey) -> Result<Option<Journal>> {
        Ok(self.state.lock().await.journals.get(key).cloned())
    }

    async fn put_journal(&self, key: &LedgerKey, journal: &Journal) -> Result<()> {
        self.state
            .lock()
            .await
            .journals
            .insert(key.clone(), journal.clone());
        Ok(())
    }

    async fn clear_journal(&self, key: &LedgerKey) -> Result<()> {
        self.state.lock().await.journals.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::Address;

    use super::*;
    use crate::{ProxyKind, proxy::tests::record};

    #[tokio::test]
    async fn test_clones_share_state() {
        let ledger = MemoryLedger::new();
        let record = record(ProxyKind::Transparent, Address::ZERO);

        ledger.clone().put(&record).await.unwrap();
        assert_eq!(ledger.list().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_compare_and_put_requires_expected_state() {
        let ledger = MemoryLedger::new();
        let record = record(ProxyKind::Uups, Address::ZERO);

        let mut other = record.clone();
        other.abi_version = "h2".to_string();
        assert!(matches!(
            ledger.compare_and_put(Some(&other), &record).await,
            Err(DeployError::LedgerWriteConflict(_))
        ));

        ledger.compare_and_put(None, &record).await.unwrap();
        ledger.compare_and_put(Some(&record), &other).await.unwrap();
        assert_eq!(ledger.get(&record.key()).await.unwrap(), Some(other));
    }
}

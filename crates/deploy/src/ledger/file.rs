use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};

use super::{DeploymentRecord, Journal, Ledger, LedgerKey};
use crate::{
    error::{DeployError, Result},
    fs::FsHandler,
};

/// Ledger stored as pretty JSON files, one per logical deployment:
///
/// ```text
/// <root>/<network_id>/<logical_name>.json
/// <root>/<network_id>/<logical_name>.journal.json
/// <root>/<network_id>/<logical_name>.lock
/// ```
///
/// Writes hold an exclusive lock on the key's lock file so separate processes
/// sharing the directory serialize.
#[derive(Debug, Clone)]
pub struct FileLedger {
    root: PathBuf,
}

struct KeyPaths {
    dir: PathBuf,
    record: PathBuf,
    journal: PathBuf,
    lock: PathBuf,
}

/// Map a logical name to a file stem that is safe on every platform.
///
/// Bytes outside `[A-Za-z0-9_-]` are written as `%XX`, so distinct names never
/// share a file and no name can end in `.journal`.
fn file_stem(logical_name: &str) -> String {
    logical_name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_') {
                char::from(b).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect()
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    FsHandler::read_optional(path)?
        .map(|content| {
            serde_json::from_str(&content)
                .map_err(|e| DeployError::storage(&format!("Corrupt {}", path.display()), e))
        })
        .transpose()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_vec_pretty(value)
        .map_err(|e| DeployError::storage("Failed to serialize ledger entry", e))?;
    content.push(b'\n');
    FsHandler::write_atomic(path, &content)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DeployError::storage("Ledger task failed", e))?
}

impl FileLedger {
    /// Open a ledger rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        FsHandler::ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the JSON file holding the record for `key`.
    pub fn record_path(&self, key: &LedgerKey) -> PathBuf {
        self.paths(key).record
    }

    fn paths(&self, key: &LedgerKey) -> KeyPaths {
        let dir = self.root.join(key.network_id.to_string());
        let stem = file_stem(&key.logical_name);
        KeyPaths {
            record: dir.join(format!("{stem}.json")),
            journal: dir.join(format!("{stem}.journal.json")),
            lock: dir.join(format!("{stem}.lock")),
            dir,
        }
    }

    /// Run `f` while holding the key's exclusive lock.
    async fn locked<T, F>(&self, key: &LedgerKey, f: F) -> Result<T>
    where
        F: FnOnce(&KeyPaths) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let paths = self.paths(key);
        blocking(move || {
            FsHandler::ensure_dir(&paths.dir)?;
            let _lock = FsHandler::lock_exclusive(&paths.lock)?;
            f(&paths)
        })
        .await
    }
}

impl Ledger for FileLedger {
    async fn get(&self, key: &LedgerKey) -> Result<Option<DeploymentRecord>> {
        let path = self.paths(key).record;
        let record: Option<DeploymentRecord> = blocking(move || read_json(&path)).await?;

        match record {
            Some(record) if record.key() != *key => Err(DeployError::storage(
                &format!("Ledger file for {key} holds another deployment"),
                record.key(),
            )),
            record => Ok(record),
        }
    }

    async fn put(&self, record: &DeploymentRecord) -> Result<()> {
        let record = record.clone();
        self.locked(&record.key(), move |paths| write_json(&paths.record, &record))
            .await
    }

    async fn compare_and_put(
        &self,
        expected: Option<&DeploymentRecord>,
        record: &DeploymentRecord,
    ) -> Result<()> {
        let key = record.key();
        let status = record.status;
        let expected = expected.cloned();
        let record = record.clone();

        let conflict_key = key.clone();
        self.locked(&key, move |paths| {
            let current: Option<DeploymentRecord> = read_json(&paths.record)?;
            if current != expected {
                return Err(DeployError::LedgerWriteConflict(conflict_key));
            }
            write_json(&paths.record, &record)
        })
        .await?;

        tracing::debug!(key = %key, %status, "Ledger record written");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>> {
        let root = self.root.clone();
        blocking(move || {
            let mut records = Vec::new();

            let networks = std::fs::read_dir(&root)
                .map_err(|e| DeployError::storage("Failed to read ledger directory", e))?;

            for network in networks.filter_map(|entry| entry.ok()) {
                let dir = network.path();
                if !dir.is_dir() {
                    continue;
                }

                let files = std::fs::read_dir(&dir)
                    .map_err(|e| DeployError::storage("Failed to read ledger directory", e))?;

                for path in files.filter_map(|entry| entry.ok().map(|e| e.path())) {
                    let name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default();
                    if !name.ends_with(".json") || name.ends_with(".journal.json") {
                        continue;
                    }
                    if let Some(record) = read_json::<DeploymentRecord>(&path)? {
                        records.push(record);
                    }
                }
            }

            records.sort_by_key(DeploymentRecord::key);
            Ok(records)
        })
        .await
    }

    async fn journal(&self, key: &LedgerKey) -> Result<Option<Journal>> {
        let path = self.paths(key).journal;
        blocking(move || read_json(&path)).await
    }

    async fn put_journal(&self, key: &LedgerKey, journal: &Journal) -> Result<()> {
        let journal = journal.clone();
        self.locked(key, move |paths| write_json(&paths.journal, &journal))
            .await
    }

    async fn clear_journal(&self, key: &LedgerKey) -> Result<()> {
        self.locked(key, |paths| FsHandler::remove_optional(&paths.journal))
            .await
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, B256};
    use tempdir::TempDir;

    use super::*;
    use crate::{
        ProxyKind,
        ledger::{DeployStep, JournalEntry, RecordStatus},
        proxy::tests::record,
    };

    fn ledger() -> (TempDir, FileLedger) {
        let temp_dir = TempDir::new("uplift-ledger").expect("Failed to create temp dir");
        let ledger = FileLedger::new(temp_dir.path().join("deployments")).unwrap();
        (temp_dir, ledger)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_temp_dir, ledger) = ledger();
        let record = record(ProxyKind::Uups, Address::repeat_byte(0x0a));

        assert_eq!(ledger.get(&record.key()).await.unwrap(), None);
        ledger.put(&record).await.unwrap();

        assert_eq!(ledger.get(&record.key()).await.unwrap(), Some(record.clone()));
        assert!(ledger.root().join("5/Reputation.json").is_file());
    }

    #[tokio::test]
    async fn test_compare_and_put_detects_conflict() {
        let (_temp_dir, ledger) = ledger();
        let original = record(ProxyKind::Uups, Address::repeat_byte(0x0a));
        ledger.compare_and_put(None, &original).await.unwrap();

        let err = ledger.compare_and_put(None, &original).await.unwrap_err();
        assert!(matches!(err, DeployError::LedgerWriteConflict(key) if key == original.key()));

        let mut upgraded = original.clone();
        upgraded.abi_version = "h2".to_string();
        ledger
            .compare_and_put(Some(&original), &upgraded)
            .await
            .unwrap();

        let mut stale = original.clone();
        stale.status = RecordStatus::Incomplete;
        assert!(ledger.compare_and_put(Some(&original), &stale).await.is_err());
        assert_eq!(ledger.get(&original.key()).await.unwrap(), Some(upgraded));
    }

    #[tokio::test]
    async fn test_list_skips_journals() {
        let (_temp_dir, ledger) = ledger();

        let mut first = record(ProxyKind::Uups, Address::ZERO);
        first.logical_name = "Voting".to_string();
        let second = record(ProxyKind::Beacon, Address::ZERO);
        let mut third = record(ProxyKind::Transparent, Address::ZERO);
        third.network_id = 1;

        for record in [&first, &second, &third] {
            ledger.put(record).await.unwrap();
        }
        ledger
            .put_journal(
                &second.key(),
                &Journal {
                    abi_version: "h1".to_string(),
                    entries: vec![JournalEntry {
                        step: DeployStep::Implementation,
                        tx_hash: B256::repeat_byte(1),
                        payload_hash: B256::ZERO,
                        contract_address: None,
                    }],
                },
            )
            .await
            .unwrap();

        let keys = ledger
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| r.key().to_string())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["1/Reputation", "5/Reputation", "5/Voting"]);
    }

    #[tokio::test]
    async fn test_journal_lifecycle() {
        let (_temp_dir, ledger) = ledger();
        let key = LedgerKey::new(5, "Reputation");

        assert_eq!(ledger.journal(&key).await.unwrap(), None);

        let journal = Journal::new("h1");
        ledger.put_journal(&key, &journal).await.unwrap();
        assert_eq!(ledger.journal(&key).await.unwrap(), Some(journal));

        ledger.clear_journal(&key).await.unwrap();
        ledger.clear_journal(&key).await.unwrap();
        assert_eq!(ledger.journal(&key).await.unwrap(), None);
    }

    #[test]
    fn test_file_stem_escapes_separators() {
        assert_eq!(file_stem("Reputation"), "Reputation");
        assert_eq!(file_stem("team_Rep-v2"), "team_Rep-v2");
        assert_eq!(
            file_stem("../tokens/Reputation v2"),
            "%2E%2E%2Ftokens%2FReputation%20v2"
        );
        assert_ne!(file_stem("team/Rep"), file_stem("team_Rep"));
        assert_ne!(file_stem("a%2F"), file_stem("a/"));
    }

    #[tokio::test]
    async fn test_similar_names_keep_separate_records() {
        let (_temp_dir, ledger) = ledger();

        let mut records = Vec::new();
        for name in ["team/Rep", "team_Rep", "Rep", "Rep.journal"] {
            let mut record = record(ProxyKind::Uups, Address::ZERO);
            record.logical_name = name.to_string();
            ledger.put(&record).await.unwrap();
            records.push(record);
        }
        ledger
            .put_journal(&LedgerKey::new(5, "Rep"), &Journal::new("h1"))
            .await
            .unwrap();

        for record in &records {
            assert_eq!(ledger.get(&record.key()).await.unwrap().as_ref(), Some(record));
        }
        assert_eq!(ledger.list().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_get_rejects_file_of_another_key() {
        let (_temp_dir, ledger) = ledger();
        let record = record(ProxyKind::Uups, Address::ZERO);
        ledger.put(&record).await.unwrap();

        let other = LedgerKey::new(5, "Voting");
        std::fs::copy(ledger.record_path(&record.key()), ledger.record_path(&other)).unwrap();

        assert!(matches!(
            ledger.get(&other).await,
            Err(DeployError::Storage(_))
        ));
    }
}

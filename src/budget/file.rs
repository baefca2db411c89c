//! Durable single-node budget store
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<owner>/<cycle>.json   committed BudgetRecord
//! <root>/<owner>/<cycle>.lock   advisory lock for the key
//! ```
//!
//! Every consume takes the key's exclusive lock, re-reads the committed
//! record, and replaces it atomically. After a restart the remaining budget is
//! whatever the last committed document says.

use std::path::{Path, PathBuf};

use chrono::Utc;
use futures_util::future::FutureExt;

use super::store::{BudgetKey, BudgetRecord, BudgetStore, ConsumeOutcome};
use crate::durable::{read_json, run_blocking, sanitize_component, write_json_atomic, KeyLock};
use crate::errors::IntakeResult;
use crate::record::StoreFuture;

/// File-backed budget counters
#[derive(Debug, Clone)]
pub struct FileBudgetStore {
    root: PathBuf,
}

impl FileBudgetStore {
    /// Create a store rooted at `root` (created on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(root: &Path, key: &BudgetKey) -> PathBuf {
        root.join(sanitize_component(&key.owner))
            .join(format!("{}.json", sanitize_component(&key.cycle)))
    }

    fn lock_path(root: &Path, key: &BudgetKey) -> PathBuf {
        root.join(sanitize_component(&key.owner))
            .join(format!("{}.lock", sanitize_component(&key.cycle)))
    }

    /// Read the committed record for a key
    pub fn load(&self, key: &BudgetKey) -> IntakeResult<Option<BudgetRecord>> {
        read_json(&Self::record_path(&self.root, key))
    }

    fn consume_blocking(
        root: &Path,
        key: &BudgetKey,
        budget: u64,
        amount: u64,
    ) -> IntakeResult<ConsumeOutcome> {
        let _lock = KeyLock::acquire(&Self::lock_path(root, key))?;
        let path = Self::record_path(root, key);

        let mut record = read_json::<BudgetRecord>(&path)?
            .unwrap_or_else(|| BudgetRecord::empty(key, budget));
        let outcome = ConsumeOutcome::decide(record.used, budget, amount);
        if let ConsumeOutcome::Consumed { used } = outcome {
            record.used = used;
            record.budget = budget;
            record.updated_at = Utc::now();
            write_json_atomic(&path, &record)?;
        }
        Ok(outcome)
    }
}

impl BudgetStore for FileBudgetStore {
    fn try_consume(&self, key: BudgetKey, budget: u64, amount: u64) -> StoreFuture<'_, ConsumeOutcome> {
        let root = self.root.clone();
        run_blocking(move || Self::consume_blocking(&root, &key, budget, amount)).boxed()
    }

    fn used(&self, key: BudgetKey) -> StoreFuture<'_, u64> {
        let root = self.root.clone();
        run_blocking(move || {
            Ok(read_json::<BudgetRecord>(&Self::record_path(&root, &key))?
                .map(|r| r.used)
                .unwrap_or(0))
        })
        .boxed()
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_usage_survives_restart() {
        let tmp = TempDir::new().unwrap();
        let key = BudgetKey::new("council", "2026-10");
        {
            let store = FileBudgetStore::new(tmp.path());
            store.try_consume(key.clone(), 3, 1).await.unwrap();
            store.try_consume(key.clone(), 3, 1).await.unwrap();
        }

        let reopened = FileBudgetStore::new(tmp.path());
        assert_eq!(reopened.used(key.clone()).await.unwrap(), 2);
        assert_eq!(
            reopened.try_consume(key.clone(), 3, 1).await.unwrap(),
            ConsumeOutcome::Consumed { used: 3 }
        );
        assert_eq!(
            reopened.try_consume(key.clone(), 3, 1).await.unwrap(),
            ConsumeOutcome::Exceeded { used: 3 }
        );

        let record = reopened.load(&key).unwrap().unwrap();
        assert_eq!(record.used, 3);
        assert_eq!(record.budget, 3);
    }

    #[tokio::test]
    async fn test_refused_consume_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = FileBudgetStore::new(tmp.path());
        let key = BudgetKey::new("small", "c1");
        assert_eq!(
            store.try_consume(key.clone(), 1, 2).await.unwrap(),
            ConsumeOutcome::Exceeded { used: 0 }
        );
        assert!(store.load(&key).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hostile_keys_stay_under_root() {
        let tmp = TempDir::new().unwrap();
        let store = FileBudgetStore::new(tmp.path().join("ledger"));
        let key = BudgetKey::new("../escape", "../../cycle");
        store.try_consume(key.clone(), 5, 1).await.unwrap();

        let path = FileBudgetStore::record_path(store.root(), &key);
        assert!(path.starts_with(store.root()));
        assert!(path.exists());
    }
}

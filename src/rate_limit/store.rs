//! Rate-limit bucket storage
//!
//! Buckets are `(identity, minute) -> count`, where `minute` counts whole
//! minutes since the Unix epoch.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::future::{self, FutureExt};
use serde::{Deserialize, Serialize};

use crate::durable::{read_json, run_blocking, sanitize_component, write_json_atomic, KeyLock};
use crate::errors::{IntakeError, IntakeResult};
use crate::record::StoreFuture;

/// One minute bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub minute: i64,
    pub count: u64,
}

/// Per-identity minute counters
pub trait RateLimitStore: Send + Sync {
    /// Atomically add one to the bucket, creating it if needed; returns the new count
    fn increment(&self, identity: String, minute: i64) -> StoreFuture<'_, u64>;

    /// Buckets with `minute > after_minute`, oldest first
    fn buckets_since(&self, identity: String, after_minute: i64) -> StoreFuture<'_, Vec<RateLimitBucket>>;

    /// Delete buckets with `minute < cutoff_minute`; returns how many went
    fn delete_older_than(&self, cutoff_minute: i64) -> StoreFuture<'_, u64>;
}

/// In-memory buckets, one mutex per identity
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    identities: RwLock<HashMap<String, Arc<Mutex<BTreeMap<i64, u64>>>>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities with at least one bucket
    pub fn tracked_identities(&self) -> usize {
        self.identities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn entry(&self, identity: &str) -> IntakeResult<Arc<Mutex<BTreeMap<i64, u64>>>> {
        if let Some(entry) = self
            .identities
            .read()
            .map_err(|_| IntakeError::storage("rate map lock poisoned"))?
            .get(identity)
        {
            return Ok(Arc::clone(entry));
        }
        let mut identities = self
            .identities
            .write()
            .map_err(|_| IntakeError::storage("rate map lock poisoned"))?;
        Ok(Arc::clone(identities.entry(identity.to_string()).or_default()))
    }

    fn increment_sync(&self, identity: &str, minute: i64) -> IntakeResult<u64> {
        let entry = self.entry(identity)?;
        let mut buckets = entry
            .lock()
            .map_err(|_| IntakeError::storage("rate bucket lock poisoned"))?;
        let count = buckets.entry(minute).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn buckets_since_sync(&self, identity: &str, after_minute: i64) -> IntakeResult<Vec<RateLimitBucket>> {
        let entry = {
            let identities = self
                .identities
                .read()
                .map_err(|_| IntakeError::storage("rate map lock poisoned"))?;
            match identities.get(identity) {
                Some(entry) => Arc::clone(entry),
                None => return Ok(Vec::new()),
            }
        };
        let buckets = entry
            .lock()
            .map_err(|_| IntakeError::storage("rate bucket lock poisoned"))?;
        Ok(in_window(&buckets, after_minute))
    }

    fn delete_sync(&self, cutoff_minute: i64) -> IntakeResult<u64> {
        let mut identities = self
            .identities
            .write()
            .map_err(|_| IntakeError::storage("rate map lock poisoned"))?;
        let mut removed = 0u64;
        identities.retain(|_, entry| match entry.lock() {
            Ok(mut buckets) => {
                removed += evict(&mut buckets, cutoff_minute);
                !buckets.is_empty()
            }
            Err(_) => true,
        });
        Ok(removed)
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn increment(&self, identity: String, minute: i64) -> StoreFuture<'_, u64> {
        future::ready(self.increment_sync(&identity, minute)).boxed()
    }

    fn buckets_since(&self, identity: String, after_minute: i64) -> StoreFuture<'_, Vec<RateLimitBucket>> {
        future::ready(self.buckets_since_sync(&identity, after_minute)).boxed()
    }

    fn delete_older_than(&self, cutoff_minute: i64) -> StoreFuture<'_, u64> {
        future::ready(self.delete_sync(cutoff_minute)).boxed()
    }
}

/// On-disk document for one identity
#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityBuckets {
    identity: String,
    buckets: BTreeMap<i64, u64>,
}

/// Durable buckets: one atomically replaced JSON document per identity
#[derive(Debug, Clone)]
pub struct FileRateLimitStore {
    root: PathBuf,
}

impl FileRateLimitStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn document_path(root: &Path, identity: &str) -> PathBuf {
        root.join(format!("{}.json", sanitize_component(identity)))
    }

    fn lock_path(root: &Path, identity: &str) -> PathBuf {
        root.join(format!("{}.lock", sanitize_component(identity)))
    }

    fn increment_blocking(root: &Path, identity: &str, minute: i64) -> IntakeResult<u64> {
        let _lock = KeyLock::acquire(&Self::lock_path(root, identity))?;
        let path = Self::document_path(root, identity);
        let mut doc = read_json::<IdentityBuckets>(&path)?.unwrap_or_else(|| IdentityBuckets {
            identity: identity.to_string(),
            buckets: BTreeMap::new(),
        });
        let count = {
            let count = doc.buckets.entry(minute).or_insert(0);
            *count += 1;
            *count
        };
        write_json_atomic(&path, &doc)?;
        Ok(count)
    }

    fn buckets_since_blocking(
        root: &Path,
        identity: &str,
        after_minute: i64,
    ) -> IntakeResult<Vec<RateLimitBucket>> {
        let path = Self::document_path(root, identity);
        Ok(read_json::<IdentityBuckets>(&path)?
            .map(|doc| in_window(&doc.buckets, after_minute))
            .unwrap_or_default())
    }

    fn delete_blocking(root: &Path, cutoff_minute: i64) -> IntakeResult<u64> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0u64;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let lock_path = path.with_extension("lock");
            let _lock = KeyLock::acquire(&lock_path)?;
            let Some(mut doc) = read_json::<IdentityBuckets>(&path)? else {
                continue;
            };
            let evicted = evict(&mut doc.buckets, cutoff_minute);
            if evicted == 0 {
                continue;
            }
            removed += evicted;
            if doc.buckets.is_empty() {
                fs::remove_file(&path)?;
            } else {
                write_json_atomic(&path, &doc)?;
            }
        }
        Ok(removed)
    }
}

impl RateLimitStore for FileRateLimitStore {
    fn increment(&self, identity: String, minute: i64) -> StoreFuture<'_, u64> {
        let root = self.root.clone();
        run_blocking(move || Self::increment_blocking(&root, &identity, minute)).boxed()
    }

    fn buckets_since(&self, identity: String, after_minute: i64) -> StoreFuture<'_, Vec<RateLimitBucket>> {
        let root = self.root.clone();
        run_blocking(move || Self::buckets_since_blocking(&root, &identity, after_minute)).boxed()
    }

    fn delete_older_than(&self, cutoff_minute: i64) -> StoreFuture<'_, u64> {
        let root = self.root.clone();
        run_blocking(move || Self::delete_blocking(&root, cutoff_minute)).boxed()
    }
}

fn in_window(buckets: &BTreeMap<i64, u64>, after_minute: i64) -> Vec<RateLimitBucket> {
    buckets
        .range(after_minute.saturating_add(1)..)
        .map(|(minute, count)| RateLimitBucket {
            minute: *minute,
            count: *count,
        })
        .collect()
}

fn evict(buckets: &mut BTreeMap<i64, u64>, cutoff_minute: i64) -> u64 {
    let kept = buckets.split_off(&cutoff_minute);
    let removed = buckets.len() as u64;
    *buckets = kept;
    removed
}

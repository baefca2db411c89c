//! Record store port and the in-memory implementation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use futures_util::future::{self, BoxFuture, FutureExt};
use uuid::Uuid;

use super::model::{FateRequest, PetitionRecord, RecordPatch};
use super::state::{check_fate_cas, FateState};
use crate::errors::{IntakeError, IntakeResult};

/// Boxed future returned by store ports
pub type StoreFuture<'a, T> = BoxFuture<'a, IntakeResult<T>>;

/// Callback that must witness a terminal transition before it commits.
///
/// Invoked with the would-be committed record while the per-record lock is
/// held. An error aborts the transition and nothing is written.
pub type FateWitness<'a> = &'a (dyn Fn(&PetitionRecord) -> IntakeResult<()> + Send + Sync);

/// Durable petition storage.
///
/// Implementations must make `assign_fate_cas` a single-row compare-and-swap:
/// the state check, the witness call and the write happen under one per-record
/// exclusion, and different ids must not contend.
pub trait RecordStore: Send + Sync {
    /// Read a record
    fn get(&self, id: Uuid) -> StoreFuture<'_, Option<PetitionRecord>>;

    /// Insert a new record; the store assigns version 1
    fn save(&self, record: PetitionRecord) -> StoreFuture<'_, PetitionRecord>;

    /// Update non-disposition fields of a non-terminal record
    fn update_non_terminal_fields(
        &self,
        id: Uuid,
        patch: RecordPatch,
    ) -> StoreFuture<'_, PetitionRecord>;

    /// Atomically move a record from `expected` to `next`
    fn assign_fate_cas<'a>(
        &'a self,
        request: FateRequest,
        witness: FateWitness<'a>,
    ) -> StoreFuture<'a, PetitionRecord>;

    /// Write the promotion back-reference; fails if one is already set
    fn set_back_reference(&self, id: Uuid, reference: String) -> StoreFuture<'_, PetitionRecord>;

    /// Number of records per state
    fn count_by_state(&self) -> StoreFuture<'_, HashMap<FateState, u64>>;
}

/// In-memory record store.
///
/// A read-mostly id map holds one mutex per record, so CAS on different
/// petitions never serializes on a shared lock.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<Uuid, Arc<Mutex<PetitionRecord>>>>,
}

impl InMemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        // Counting cannot observe a torn map.
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: Uuid) -> IntakeResult<Arc<Mutex<PetitionRecord>>> {
        let records = self
            .records
            .read()
            .map_err(|_| IntakeError::storage("record map lock poisoned"))?;
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| IntakeError::petition_not_found(id))
    }

    fn with_record<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut PetitionRecord) -> IntakeResult<T>,
    ) -> IntakeResult<T> {
        let slot = self.slot(id)?;
        let mut record = slot
            .lock()
            .map_err(|_| IntakeError::storage("record lock poisoned"))?;
        f(&mut record)
    }

    fn get_sync(&self, id: Uuid) -> IntakeResult<Option<PetitionRecord>> {
        match self.slot(id) {
            Ok(slot) => {
                let record = slot
                    .lock()
                    .map_err(|_| IntakeError::storage("record lock poisoned"))?;
                Ok(Some(record.clone()))
            }
            Err(IntakeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save_sync(&self, mut record: PetitionRecord) -> IntakeResult<PetitionRecord> {
        let mut records = self
            .records
            .write()
            .map_err(|_| IntakeError::storage("record map lock poisoned"))?;
        if records.contains_key(&record.id) {
            return Err(IntakeError::storage(format!(
                "petition {} already exists",
                record.id
            )));
        }
        record.version = 1;
        records.insert(record.id, Arc::new(Mutex::new(record.clone())));
        Ok(record)
    }

    fn update_sync(&self, id: Uuid, patch: RecordPatch) -> IntakeResult<PetitionRecord> {
        self.with_record(id, |record| {
            if record.state.is_terminal() {
                return Err(IntakeError::PetitionAlreadyFated {
                    id,
                    state: record.state,
                });
            }
            if patch.is_empty() {
                return Ok(record.clone());
            }
            patch.apply_to(record);
            record.version += 1;
            record.updated_at = Utc::now();
            Ok(record.clone())
        })
    }

    fn assign_fate_sync(
        &self,
        request: FateRequest,
        witness: FateWitness<'_>,
    ) -> IntakeResult<PetitionRecord> {
        self.with_record(request.id, |record| {
            check_fate_cas(request.id, record.state, request.expected, request.next)?;

            let mut updated = record.clone();
            updated.state = request.next;
            updated.updated_at = Utc::now();
            updated.version += 1;
            if request.next.is_terminal() {
                updated.fate_reason = request.reason.clone();
            }

            witness(&updated)?;
            *record = updated.clone();
            Ok(updated)
        })
    }

    fn set_back_reference_sync(&self, id: Uuid, reference: String) -> IntakeResult<PetitionRecord> {
        self.with_record(id, |record| {
            if let Some(existing) = &record.promoted_to {
                return Err(IntakeError::BackReferenceAlreadySet {
                    id,
                    existing: existing.clone(),
                });
            }
            record.promoted_to = Some(reference);
            record.version += 1;
            record.updated_at = Utc::now();
            Ok(record.clone())
        })
    }

    fn count_sync(&self) -> IntakeResult<HashMap<FateState, u64>> {
        let slots: Vec<_> = {
            let records = self
                .records
                .read()
                .map_err(|_| IntakeError::storage("record map lock poisoned"))?;
            records.values().cloned().collect()
        };
        let mut counts: HashMap<FateState, u64> =
            FateState::ALL.iter().map(|s| (*s, 0)).collect();
        for slot in slots {
            let record = slot
                .lock()
                .map_err(|_| IntakeError::storage("record lock poisoned"))?;
            *counts.entry(record.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, id: Uuid) -> StoreFuture<'_, Option<PetitionRecord>> {
        future::ready(self.get_sync(id)).boxed()
    }

    fn save(&self, record: PetitionRecord) -> StoreFuture<'_, PetitionRecord> {
        future::ready(self.save_sync(record)).boxed()
    }

    fn update_non_terminal_fields(
        &self,
        id: Uuid,
        patch: RecordPatch,
    ) -> StoreFuture<'_, PetitionRecord> {
        future::ready(self.update_sync(id, patch)).boxed()
    }

    fn assign_fate_cas<'a>(
        &'a self,
        request: FateRequest,
        witness: FateWitness<'a>,
    ) -> StoreFuture<'a, PetitionRecord> {
        future::ready(self.assign_fate_sync(request, witness)).boxed()
    }

    fn set_back_reference(&self, id: Uuid, reference: String) -> StoreFuture<'_, PetitionRecord> {
        future::ready(self.set_back_reference_sync(id, reference)).boxed()
    }

    fn count_by_state(&self) -> StoreFuture<'_, HashMap<FateState, u64>> {
        future::ready(self.count_sync()).boxed()
    }
}

/// Sum of pending (non-terminal) records from a per-state count
pub fn pending_depth(counts: &HashMap<FateState, u64>) -> u64 {
    FateState::PENDING
        .iter()
        .map(|state| counts.get(state).copied().unwrap_or(0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_all(_: &PetitionRecord) -> IntakeResult<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_len_survives_poisoned_map() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.save(PetitionRecord::new("h1", None)).await.unwrap();

        let poisoner = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.records.write().unwrap();
            panic!("writer died holding the map");
        })
        .join();

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_save_assigns_first_version() {
        let store = InMemoryRecordStore::new();
        let saved = store
            .save(PetitionRecord::new("h1", Some("alice".into())))
            .await
            .unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(store.get(saved.id).await.unwrap(), Some(saved));
    }

    #[tokio::test]
    async fn test_duplicate_save_rejected() {
        let store = InMemoryRecordStore::new();
        let record = PetitionRecord::new("h1", None);
        store.save(record.clone()).await.unwrap();
        assert!(matches!(
            store.save(record).await,
            Err(IntakeError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_cas_bumps_version_and_reason() {
        let store = InMemoryRecordStore::new();
        let saved = store.save(PetitionRecord::new("h", None)).await.unwrap();

        let fated = store
            .assign_fate_cas(
                FateRequest::new(saved.id, FateState::Received, FateState::Acknowledged)
                    .with_reason("withdrawn"),
                &accept_all,
            )
            .await
            .unwrap();
        assert_eq!(fated.state, FateState::Acknowledged);
        assert_eq!(fated.version, 2);
        assert_eq!(fated.fate_reason.as_deref(), Some("withdrawn"));
    }

    #[tokio::test]
    async fn test_failed_witness_leaves_record_untouched() {
        let store = InMemoryRecordStore::new();
        let saved = store.save(PetitionRecord::new("h", None)).await.unwrap();
        let reject = |_: &PetitionRecord| -> IntakeResult<()> {
            Err(IntakeError::EventEmission("sink down".into()))
        };

        let result = store
            .assign_fate_cas(
                FateRequest::new(saved.id, FateState::Received, FateState::Acknowledged),
                &reject,
            )
            .await;
        assert!(matches!(result, Err(IntakeError::EventEmission(_))));
        assert_eq!(store.get(saved.id).await.unwrap(), Some(saved));
    }

    #[tokio::test]
    async fn test_patch_rejected_after_terminal() {
        let store = InMemoryRecordStore::new();
        let saved = store.save(PetitionRecord::new("h", None)).await.unwrap();
        let patched = store
            .update_non_terminal_fields(saved.id, RecordPatch::annotate("lang", "en"))
            .await
            .unwrap();
        assert_eq!(patched.version, 2);

        store
            .assign_fate_cas(
                FateRequest::new(saved.id, FateState::Received, FateState::Acknowledged),
                &accept_all,
            )
            .await
            .unwrap();
        let result = store
            .update_non_terminal_fields(saved.id, RecordPatch::annotate("lang", "fr"))
            .await;
        assert!(matches!(result, Err(IntakeError::PetitionAlreadyFated { .. })));
    }

    #[tokio::test]
    async fn test_back_reference_immutable() {
        let store = InMemoryRecordStore::new();
        let saved = store.save(PetitionRecord::new("h", None)).await.unwrap();
        store
            .set_back_reference(saved.id, "motion-1".into())
            .await
            .unwrap();
        let err = store
            .set_back_reference(saved.id, "motion-2".into())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::BackReferenceAlreadySet { existing, .. } if existing == "motion-1"));
    }

    #[tokio::test]
    async fn test_count_by_state() {
        let store = InMemoryRecordStore::new();
        for i in 0..3 {
            store
                .save(PetitionRecord::new(format!("h{}", i), None))
                .await
                .unwrap();
        }
        let done = store.save(PetitionRecord::new("done", None)).await.unwrap();
        store
            .assign_fate_cas(
                FateRequest::new(done.id, FateState::Received, FateState::Acknowledged),
                &accept_all,
            )
            .await
            .unwrap();

        let counts = store.count_by_state().await.unwrap();
        assert_eq!(counts[&FateState::Received], 3);
        assert_eq!(counts[&FateState::Acknowledged], 1);
        assert_eq!(pending_depth(&counts), 3);
    }
}

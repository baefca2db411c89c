use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::budget::BudgetLedger;
use crate::errors::{IntakeError, IntakeResult};
use crate::notifier::StatusChangeNotifier;
use crate::observability::IntakeEvent;
use crate::ports::{emit_best_effort, ensure_writable, EventEmitter, HaltChecker, PetitionEvent};
use crate::record::{PetitionRecord, RecordStore, StoreFuture};

/// Who promotes which petition, charged to which cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionRequest {
    pub petition_id: Uuid,
    pub owner: String,
    pub cycle: String,
}

impl PromotionRequest {
    pub fn new(petition_id: Uuid, owner: impl Into<String>, cycle: impl Into<String>) -> Self {
        Self {
            petition_id,
            owner: owner.into(),
            cycle: cycle.into(),
        }
    }
}

/// Creates the dependent artifact and returns its reference
pub trait DownstreamCreator: Send + Sync {
    fn create(&self, petition: PetitionRecord, request: PromotionRequest) -> StoreFuture<'_, String>;
}

/// Outcome of a successful promotion
#[derive(Debug, Clone, Serialize)]
pub struct PromotionReceipt {
    pub petition_id: Uuid,
    pub reference: String,
    /// Budget used in the cycle after this promotion
    pub budget_used: u64,
    #[serde(skip)]
    pub record: PetitionRecord,
}

type ClaimMap = Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>;

/// Exclusive right to promote one petition; the map entry goes with the
/// last holder
struct PromotionClaim<'a> {
    claims: &'a ClaimMap,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PromotionClaim<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
        if claims.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            claims.remove(&self.id);
        }
    }
}

pub struct PromotionService {
    claims: ClaimMap,
    store: Arc<dyn RecordStore>,
    ledger: Arc<BudgetLedger>,
    notifier: Arc<StatusChangeNotifier>,
    emitter: Arc<dyn EventEmitter>,
    halt: Arc<dyn HaltChecker>,
    retry_after_secs: u64,
}

impl PromotionService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<BudgetLedger>,
        notifier: Arc<StatusChangeNotifier>,
        emitter: Arc<dyn EventEmitter>,
        halt: Arc<dyn HaltChecker>,
        retry_after_secs: u64,
    ) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            store,
            ledger,
            notifier,
            emitter,
            halt,
            retry_after_secs,
        }
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// Promotions of one petition run one at a time; a later caller sees the
    /// back-reference the earlier one wrote.
    async fn claim(&self, id: Uuid) -> PromotionClaim<'_> {
        let lock = {
            let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(claims.entry(id).or_default())
        };
        let guard = lock.lock_owned().await;
        PromotionClaim {
            claims: &self.claims,
            id,
            guard: Some(guard),
        }
    }

    pub async fn promote(
        &self,
        request: PromotionRequest,
        creator: &dyn DownstreamCreator,
    ) -> IntakeResult<PromotionReceipt> {
        ensure_writable(self.halt.as_ref(), self.retry_after_secs)?;

        let id = request.petition_id;
        let _claim = self.claim(id).await;
        let petition = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| IntakeError::petition_not_found(id))?;
        // Refuse before spending anything on an already promoted petition.
        if let Some(existing) = petition.promoted_to {
            return Err(IntakeError::BackReferenceAlreadySet { id, existing });
        }

        let budget_used = self
            .ledger
            .consume(&request.owner, &request.cycle, 1)
            .await?;

        let reference = match creator.create(petition, request.clone()).await {
            Ok(reference) => reference,
            Err(e) => {
                tracing::error!(
                    event = %IntakeEvent::PromotionFailed,
                    petition_id = %id,
                    owner = %request.owner,
                    cycle = %request.cycle,
                    stage = "create",
                    error = %e,
                    "downstream creation failed; budget stays spent"
                );
                return Err(e);
            }
        };

        let record = match self.store.set_back_reference(id, reference.clone()).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    event = %IntakeEvent::PromotionFailed,
                    petition_id = %id,
                    owner = %request.owner,
                    cycle = %request.cycle,
                    reference = %reference,
                    stage = "back_reference",
                    error = %e,
                    "back-reference write failed; budget stays spent"
                );
                return Err(e);
            }
        };

        self.notifier.update_version(id, record.version);
        emit_best_effort(
            self.emitter.as_ref(),
            &PetitionEvent::Promoted {
                id,
                owner: request.owner.clone(),
                cycle: request.cycle.clone(),
                reference: reference.clone(),
            },
        );
        tracing::info!(
            event = %IntakeEvent::PromotionCompleted,
            petition_id = %id,
            owner = %request.owner,
            cycle = %request.cycle,
            reference = %reference,
            budget_used,
            "petition promoted"
        );

        Ok(PromotionReceipt {
            petition_id: id,
            reference,
            budget_used,
            record,
        })
    }
}

//! Fate State Machine
//!
//! ```text
//! RECEIVED ──> DELIBERATING ──> ACKNOWLEDGED | REFERRED | ESCALATED
//!     └─────────────────────────> ACKNOWLEDGED   (withdrawal)
//! ```
//!
//! Every transition is a compare-and-swap against the caller's last observed
//! state. Under any number of concurrent callers moving the same petition out
//! of a non-terminal state, exactly one commits; the rest see
//! `ConcurrentModification` or `PetitionAlreadyFated`.
//!
//! A terminal transition commits only once the event emitter has accepted the
//! `FateAssigned` event. If emission fails the record is left unchanged.

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::{IntakeError, IntakeResult};
use crate::notifier::StatusChangeNotifier;
use crate::observability::{IntakeEvent, IntakeMetrics};
use crate::ports::{emit_best_effort, ensure_writable, EventEmitter, HaltChecker, PetitionEvent};
use crate::record::{FateRequest, FateState, PetitionRecord, RecordStore};

pub struct FateStateMachine {
    store: Arc<dyn RecordStore>,
    emitter: Arc<dyn EventEmitter>,
    notifier: Arc<StatusChangeNotifier>,
    halt: Arc<dyn HaltChecker>,
    retry_after_secs: u64,
    metrics: Arc<IntakeMetrics>,
}

impl FateStateMachine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        emitter: Arc<dyn EventEmitter>,
        notifier: Arc<StatusChangeNotifier>,
        halt: Arc<dyn HaltChecker>,
        retry_after_secs: u64,
        metrics: Arc<IntakeMetrics>,
    ) -> Self {
        Self {
            store,
            emitter,
            notifier,
            halt,
            retry_after_secs,
            metrics,
        }
    }

    /// Move `id` from `expected` to `next`
    pub async fn assign_fate(
        &self,
        id: Uuid,
        expected: FateState,
        next: FateState,
        reason: Option<String>,
    ) -> IntakeResult<PetitionRecord> {
        let mut request = FateRequest::new(id, expected, next);
        request.reason = reason;
        self.apply(request).await
    }

    /// Start deliberation on a received petition
    pub async fn begin_deliberation(&self, id: Uuid) -> IntakeResult<PetitionRecord> {
        self.apply(FateRequest::new(id, FateState::Received, FateState::Deliberating))
            .await
    }

    /// Withdraw a petition that was never deliberated
    pub async fn withdraw(&self, id: Uuid, reason: impl Into<String>) -> IntakeResult<PetitionRecord> {
        self.apply(
            FateRequest::new(id, FateState::Received, FateState::Acknowledged).with_reason(reason),
        )
        .await
    }

    pub async fn apply(&self, request: FateRequest) -> IntakeResult<PetitionRecord> {
        if let Err(e) = ensure_writable(self.halt.as_ref(), self.retry_after_secs) {
            self.metrics.increment_halt_rejections();
            return Err(e);
        }

        let id = request.id;
        let from = request.expected;
        let to = request.next;
        let reason = request.reason.clone();
        let emitter = Arc::clone(&self.emitter);

        let witness = move |record: &PetitionRecord| -> IntakeResult<()> {
            let event = PetitionEvent::FateAssigned {
                id: record.id,
                from,
                to: record.state,
                reason: reason.clone(),
                version: record.version,
            };
            if event.is_terminal_fate() {
                emitter.emit(&event)
            } else {
                emit_best_effort(emitter.as_ref(), &event);
                Ok(())
            }
        };

        match self.store.assign_fate_cas(request, &witness).await {
            Ok(record) => {
                self.metrics.increment_fates_assigned();
                self.notifier.update_version(id, record.version);
                tracing::info!(
                    event = %IntakeEvent::FateAssigned,
                    petition_id = %id,
                    from = %from,
                    to = %to,
                    version = record.version,
                    "fate assigned"
                );
                Ok(record)
            }
            Err(e @ IntakeError::EventEmission(_)) => {
                tracing::error!(
                    event = %IntakeEvent::FateWitnessFailed,
                    petition_id = %id,
                    from = %from,
                    to = %to,
                    error = %e,
                    "terminal fate not witnessed; transition rolled back"
                );
                Err(e)
            }
            Err(e) => {
                if matches!(
                    e,
                    IntakeError::ConcurrentModification { .. }
                        | IntakeError::PetitionAlreadyFated { .. }
                ) {
                    self.metrics.increment_fate_conflicts();
                }
                tracing::info!(
                    event = %IntakeEvent::FateRejected,
                    petition_id = %id,
                    from = %from,
                    to = %to,
                    code = e.code(),
                    "fate assignment refused"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{HaltSwitch, RecordingEventEmitter};
    use crate::record::InMemoryRecordStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryRecordStore>,
        emitter: Arc<RecordingEventEmitter>,
        notifier: Arc<StatusChangeNotifier>,
        halt: Arc<HaltSwitch>,
        machine: FateStateMachine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryRecordStore::new());
        let emitter = Arc::new(RecordingEventEmitter::new());
        let notifier = Arc::new(StatusChangeNotifier::default());
        let halt = Arc::new(HaltSwitch::new());
        let machine = FateStateMachine::new(
            store.clone(),
            emitter.clone(),
            Arc::clone(&notifier),
            halt.clone(),
            60,
            Arc::new(IntakeMetrics::new()),
        );
        Fixture {
            store,
            emitter,
            notifier,
            halt,
            machine,
        }
    }

    async fn received(fx: &Fixture) -> PetitionRecord {
        fx.store
            .save(PetitionRecord::new("hash", Some("alice".into())))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let fx = fixture();
        let record = received(&fx).await;

        let deliberating = fx.machine.begin_deliberation(record.id).await.unwrap();
        assert_eq!(deliberating.state, FateState::Deliberating);

        let referred = fx
            .machine
            .assign_fate(
                record.id,
                FateState::Deliberating,
                FateState::Referred,
                Some("to committee".into()),
            )
            .await
            .unwrap();
        assert_eq!(referred.state, FateState::Referred);
        assert_eq!(referred.fate_reason.as_deref(), Some("to committee"));
        assert_eq!(referred.version, 3);
        assert_eq!(fx.emitter.count(), 2);
        assert_eq!(fx.notifier.current_version(record.id), Some(3));
    }

    #[tokio::test]
    async fn test_failure_kinds() {
        let fx = fixture();
        let record = received(&fx).await;

        assert!(matches!(
            fx.machine
                .assign_fate(record.id, FateState::Received, FateState::Referred, None)
                .await,
            Err(IntakeError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            fx.machine
                .assign_fate(record.id, FateState::Deliberating, FateState::Escalated, None)
                .await,
            Err(IntakeError::ConcurrentModification { .. })
        ));

        fx.machine.withdraw(record.id, "withdrawn").await.unwrap();
        assert!(matches!(
            fx.machine
                .assign_fate(record.id, FateState::Acknowledged, FateState::Escalated, None)
                .await,
            Err(IntakeError::PetitionAlreadyFated { .. })
        ));
        assert!(matches!(
            fx.machine
                .assign_fate(Uuid::new_v4(), FateState::Received, FateState::Deliberating, None)
                .await,
            Err(IntakeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unwitnessed_terminal_fate_rolls_back() {
        let fx = fixture();
        let record = received(&fx).await;
        fx.emitter.fail_emits(true);

        // Non-terminal transitions tolerate a failing sink.
        fx.machine.begin_deliberation(record.id).await.unwrap();

        let err = fx
            .machine
            .assign_fate(record.id, FateState::Deliberating, FateState::Escalated, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::EventEmission(_)));

        let stored = fx.store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, FateState::Deliberating);
        assert_eq!(stored.version, 2);

        fx.emitter.fail_emits(false);
        fx.machine
            .assign_fate(record.id, FateState::Deliberating, FateState::Escalated, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_halt_rejects_fate_but_allows_reads() {
        let fx = fixture();
        let record = received(&fx).await;
        fx.halt.halt();

        assert!(matches!(
            fx.machine.begin_deliberation(record.id).await,
            Err(IntakeError::SystemHalted { retry_after_secs: 60 })
        ));
        assert_eq!(
            fx.store.get(record.id).await.unwrap().unwrap().state,
            FateState::Received
        );
    }

    #[tokio::test]
    async fn test_fate_wakes_long_poll() {
        let fx = fixture();
        let record = received(&fx).await;
        fx.notifier.register_or_get(record.id, record.version);

        let notifier = Arc::clone(&fx.notifier);
        let id = record.id;
        let version = record.version;
        let waiter = tokio::spawn(async move {
            notifier.wait_for_change(id, version, Duration::from_secs(5)).await
        });
        while fx.notifier.active_waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        fx.machine.begin_deliberation(record.id).await.unwrap();
        assert!(waiter.await.unwrap());
    }
}

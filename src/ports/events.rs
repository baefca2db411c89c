//! Event emission sink
//!
//! Ordinary events are best-effort: a failed emit is logged and swallowed by
//! [`emit_best_effort`]. Terminal fate transitions are different: the emitter
//! must witness them, and an error aborts the transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{IntakeError, IntakeResult};
use crate::record::FateState;

/// Events produced by the admission core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PetitionEvent {
    Submitted {
        id: Uuid,
        submitter_id: Option<String>,
        at: DateTime<Utc>,
    },
    FieldsUpdated {
        id: Uuid,
        version: u64,
    },
    FateAssigned {
        id: Uuid,
        from: FateState,
        to: FateState,
        reason: Option<String>,
        version: u64,
    },
    Promoted {
        id: Uuid,
        owner: String,
        cycle: String,
        reference: String,
    },
}

impl PetitionEvent {
    pub fn petition_id(&self) -> Uuid {
        match self {
            Self::Submitted { id, .. }
            | Self::FieldsUpdated { id, .. }
            | Self::FateAssigned { id, .. }
            | Self::Promoted { id, .. } => *id,
        }
    }

    /// Whether this event records a terminal fate and must be witnessed
    pub fn is_terminal_fate(&self) -> bool {
        matches!(self, Self::FateAssigned { to, .. } if to.is_terminal())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::FieldsUpdated { .. } => "fields_updated",
            Self::FateAssigned { .. } => "fate_assigned",
            Self::Promoted { .. } => "promoted",
        }
    }
}

/// Downstream event sink
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &PetitionEvent) -> IntakeResult<()>;
}

/// Emit an ordinary event, logging instead of failing
pub fn emit_best_effort(emitter: &dyn EventEmitter, event: &PetitionEvent) {
    if let Err(e) = emitter.emit(event) {
        tracing::warn!(
            petition_id = %event.petition_id(),
            kind = event.kind(),
            error = %e,
            "event emission failed"
        );
    }
}

/// Emitter that writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventEmitter;

impl EventEmitter for TracingEventEmitter {
    fn emit(&self, event: &PetitionEvent) -> IntakeResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| IntakeError::EventEmission(e.to_string()))?;
        tracing::info!(
            target: "petition_intake::events",
            petition_id = %event.petition_id(),
            kind = event.kind(),
            payload = %payload,
            "petition event"
        );
        Ok(())
    }
}

/// Keeps every emitted event in memory; can be armed to fail
#[derive(Debug, Default)]
pub struct RecordingEventEmitter {
    events: Mutex<Vec<PetitionEvent>>,
    fail: AtomicBool,
}

impl RecordingEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent emit fail
    pub fn fail_emits(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<PetitionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl EventEmitter for RecordingEventEmitter {
    fn emit(&self, event: &PetitionEvent) -> IntakeResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IntakeError::EventEmission(format!(
                "sink unavailable for {} event",
                event.kind()
            )));
        }
        self.events
            .lock()
            .map_err(|_| IntakeError::EventEmission("event log lock poisoned".into()))?
            .push(event.clone());
        Ok(())
    }
}

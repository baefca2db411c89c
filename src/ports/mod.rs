//! Collaborator ports
//!
//! The halt flag and the event sink live outside the core; they are injected
//! as trait objects at composition time. The record store port lives in
//! [`crate::record`].

mod events;
mod halt;

pub use events::{
    emit_best_effort, EventEmitter, PetitionEvent, RecordingEventEmitter, TracingEventEmitter,
};
pub use halt::{ensure_writable, FileHaltFlag, HaltChecker, HaltSwitch, NeverHalted};

//! Petition records
//!
//! The record model, its lifecycle graph, and the store port through which
//! every mutation flows.

mod model;
mod state;
mod store;

pub use model::{FateRequest, PetitionRecord, RecordPatch};
pub use state::{check_fate_cas, FateState};
pub use store::{pending_depth, FateWitness, InMemoryRecordStore, RecordStore, StoreFuture};

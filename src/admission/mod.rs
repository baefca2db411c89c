//! Admission and status surfaces
//!
//! - [`AdmissionPipeline`]: accept new petitions and patch pending ones
//! - [`StatusService`]: long-poll reads keyed by opaque status tokens
//! - [`IntakeCore`]: composition root wiring every service

mod intake;
mod pipeline;
mod status;

pub use intake::{IntakeCore, IntakeCoreBuilder};
pub use pipeline::{AdmissionPipeline, Admitted, Submission};
pub use status::{StatusService, StatusSnapshot};

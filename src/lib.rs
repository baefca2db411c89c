//! petition-intake - admission control and lifecycle consistency core
//!
//! Decides whether a new petition is accepted, throttles submitters, keeps
//! exactly one terminal fate per petition under concurrent writers, wakes
//! long-poll readers on change, and spends the scarce promotion budget.
//!
//! Services are constructed explicitly and wired by [`admission::IntakeCore`];
//! nothing here is a process-global singleton.

pub mod admission;
pub mod budget;
pub mod capacity;
pub mod config;
pub mod durable;
pub mod errors;
pub mod fate;
pub mod notifier;
pub mod observability;
pub mod ports;
pub mod promotion;
pub mod rate_limit;
pub mod record;

pub use errors::{IntakeError, IntakeResult, ProblemDetails};

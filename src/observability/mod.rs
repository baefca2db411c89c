//! Observability for the admission core
//!
//! - Structured logs through `tracing`, each line tagged with an
//!   [`IntakeEvent`] code in the `event` field
//! - Monotonic counters in [`IntakeMetrics`]
//! - Budget audit lines under the [`AUDIT_TARGET`] target
//!
//! Observability never changes control flow: a failing subscriber cannot fail
//! an admission decision.
//!
//! # Usage
//!
//! ```ignore
//! use petition_intake::observability::{init_logging, IntakeEvent};
//!
//! init_logging(true);
//! tracing::info!(event = %IntakeEvent::CapacityClosed, depth = 10_000, "intake closed");
//! ```

mod events;
mod metrics;

pub use events::IntakeEvent;
pub use metrics::{IntakeMetrics, MetricsSnapshot};

use tracing_subscriber::EnvFilter;

/// Log target for budget audit records
pub const AUDIT_TARGET: &str = "petition_intake::audit";

/// Install the global subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info`. Returns `false` when a subscriber
/// was already installed (tests install their own freely).
pub fn init_logging(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

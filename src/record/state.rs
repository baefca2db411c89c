//! Petition lifecycle states
//!
//! ```text
//! RECEIVED ──► DELIBERATING ──► ACKNOWLEDGED | REFERRED | ESCALATED
//!    │
//!    └──────────────────────► ACKNOWLEDGED (withdrawal)
//! ```
//!
//! Terminal states have no outgoing edges.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{IntakeError, IntakeResult};

/// Lifecycle state of a petition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FateState {
    /// Accepted into the queue, awaiting disposition
    Received,
    /// Under review
    Deliberating,
    /// Terminal: acknowledged (or withdrawn)
    Acknowledged,
    /// Terminal: referred elsewhere
    Referred,
    /// Terminal: escalated
    Escalated,
}

impl FateState {
    /// Every state, in lifecycle order
    pub const ALL: [FateState; 5] = [
        FateState::Received,
        FateState::Deliberating,
        FateState::Acknowledged,
        FateState::Referred,
        FateState::Escalated,
    ];

    /// States that count towards queue depth
    pub const PENDING: [FateState; 2] = [FateState::Received, FateState::Deliberating];

    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FateState::Received => "RECEIVED",
            FateState::Deliberating => "DELIBERATING",
            FateState::Acknowledged => "ACKNOWLEDGED",
            FateState::Referred => "REFERRED",
            FateState::Escalated => "ESCALATED",
        }
    }

    /// Terminal states are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FateState::Acknowledged | FateState::Referred | FateState::Escalated
        )
    }

    /// Non-terminal states are pending work
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Allowed successors of this state
    pub fn successors(&self) -> &'static [FateState] {
        match self {
            FateState::Received => &[FateState::Deliberating, FateState::Acknowledged],
            FateState::Deliberating => &[
                FateState::Acknowledged,
                FateState::Referred,
                FateState::Escalated,
            ],
            FateState::Acknowledged | FateState::Referred | FateState::Escalated => &[],
        }
    }

    /// Check whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: FateState) -> bool {
        self.successors().contains(&next)
    }
}

impl fmt::Display for FateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FateState {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FateState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| IntakeError::InvalidArgument(format!("unknown fate state: {}", s)))
    }
}

/// Decide a compare-and-swap against the persisted state.
///
/// Checked in order: terminal current state, stale expectation, illegal edge.
/// Callers must hold the per-record lock while calling this and applying the
/// result.
pub fn check_fate_cas(
    id: Uuid,
    current: FateState,
    expected: FateState,
    next: FateState,
) -> IntakeResult<()> {
    if current.is_terminal() {
        return Err(IntakeError::PetitionAlreadyFated { id, state: current });
    }
    if current != expected {
        return Err(IntakeError::ConcurrentModification {
            id,
            expected,
            actual: current,
        });
    }
    if !expected.can_transition_to(next) {
        return Err(IntakeError::InvalidStateTransition {
            id,
            from: expected,
            to: next,
        });
    }
    Ok(())
}

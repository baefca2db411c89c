//! Observable events of the admission core
//!
//! Each event has a stable code that is attached to log lines as the
//! `event` field, so operators can filter on it.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeEvent {
    // Admission
    /// Submission persisted and counted
    SubmissionAccepted,
    /// Submission rejected before any write
    SubmissionRejected,
    /// Write refused because of halt
    HaltRejected,

    // Capacity
    /// Governor switched to rejecting
    CapacityClosed,
    /// Governor switched back to accepting
    CapacityReopened,
    /// Depth cache refreshed from the store
    DepthRefreshed,

    // Rate limiting
    /// Identity hit its window limit
    RateLimitExceeded,
    /// Expired buckets deleted
    RateBucketsEvicted,

    // Fate
    /// Fate CAS committed
    FateAssigned,
    /// Fate CAS lost or refused
    FateRejected,
    /// Terminal fate could not be witnessed; transition rolled back
    FateWitnessFailed,

    // Budget
    /// Budget consumed
    BudgetConsumed,
    /// Budget consumption refused
    BudgetExceeded,

    // Long-poll
    /// Waiter woke on a version change
    LongPollWoke,
    /// Waiter timed out
    LongPollTimedOut,

    // Promotion
    /// Downstream record created and linked
    PromotionCompleted,
    /// Downstream creation failed after budget was spent
    PromotionFailed,
}

impl IntakeEvent {
    /// Returns the event code
    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeEvent::SubmissionAccepted => "SUBMISSION_ACCEPTED",
            IntakeEvent::SubmissionRejected => "SUBMISSION_REJECTED",
            IntakeEvent::HaltRejected => "HALT_REJECTED",
            IntakeEvent::CapacityClosed => "CAPACITY_CLOSED",
            IntakeEvent::CapacityReopened => "CAPACITY_REOPENED",
            IntakeEvent::DepthRefreshed => "DEPTH_REFRESHED",
            IntakeEvent::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            IntakeEvent::RateBucketsEvicted => "RATE_BUCKETS_EVICTED",
            IntakeEvent::FateAssigned => "FATE_ASSIGNED",
            IntakeEvent::FateRejected => "FATE_REJECTED",
            IntakeEvent::FateWitnessFailed => "FATE_WITNESS_FAILED",
            IntakeEvent::BudgetConsumed => "BUDGET_CONSUMED",
            IntakeEvent::BudgetExceeded => "BUDGET_EXCEEDED",
            IntakeEvent::LongPollWoke => "LONG_POLL_WOKE",
            IntakeEvent::LongPollTimedOut => "LONG_POLL_TIMED_OUT",
            IntakeEvent::PromotionCompleted => "PROMOTION_COMPLETED",
            IntakeEvent::PromotionFailed => "PROMOTION_FAILED",
        }
    }
}

impl fmt::Display for IntakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

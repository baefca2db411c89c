//! # Intake Errors
//!
//! One error taxonomy for the whole admission core. Every variant carries the
//! context a caller needs to decide what to do next; nothing is coerced into
//! success.

mod problem;

pub use problem::ProblemDetails;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::record::FateState;

/// Result type for intake operations
pub type IntakeResult<T> = Result<T, IntakeError>;

/// Admission, lifecycle and budget errors
#[derive(Debug, Clone, Error)]
pub enum IntakeError {
    // ==================
    // Backpressure
    // ==================
    /// Pending queue is at capacity
    #[error("queue at capacity: {depth} pending (threshold {threshold})")]
    QueueOverflow {
        depth: u64,
        threshold: u64,
        retry_after_secs: u64,
    },

    /// Identity has used its submission quota for the window
    #[error("rate limit exceeded for {identity}: {current_count}/{limit}, resets at {reset_at}")]
    RateLimitExceeded {
        identity: String,
        current_count: u64,
        limit: u64,
        reset_at: DateTime<Utc>,
    },

    /// Writes are rejected during halt/maintenance
    #[error("system halted: writes are rejected")]
    SystemHalted { retry_after_secs: u64 },

    // ==================
    // Fate Errors
    // ==================
    /// Another writer moved the petition first
    #[error("concurrent modification of petition {id}: expected {expected}, found {actual}")]
    ConcurrentModification {
        id: Uuid,
        expected: FateState,
        actual: FateState,
    },

    /// Petition is already in a terminal state
    #[error("petition {id} already fated as {state}")]
    PetitionAlreadyFated { id: Uuid, state: FateState },

    /// Requested edge is not in the lifecycle graph
    #[error("invalid state transition for petition {id}: {from} -> {to}")]
    InvalidStateTransition {
        id: Uuid,
        from: FateState,
        to: FateState,
    },

    /// Back-reference was already written and is immutable
    #[error("petition {id} already references {existing}")]
    BackReferenceAlreadySet { id: Uuid, existing: String },

    // ==================
    // Budget Errors
    // ==================
    /// Consuming would exceed the cycle budget
    #[error("budget exceeded for {owner} in cycle {cycle}: used {used} of {budget}, requested {requested}")]
    BudgetExceeded {
        owner: String,
        cycle: String,
        used: u64,
        budget: u64,
        requested: u64,
    },

    // ==================
    // Client Input
    // ==================
    /// Status token is malformed, tampered with, or for another record
    #[error("invalid status token: {0}")]
    InvalidToken(String),

    /// Status token is older than the configured max age
    #[error("status token expired: age {age_secs}s exceeds {max_age_secs}s")]
    ExpiredToken { age_secs: i64, max_age_secs: u64 },

    /// Argument outside the accepted domain
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    // ==================
    // Internal Errors
    // ==================
    /// Terminal fate could not be witnessed by the event sink
    #[error("event emission failed: {0}")]
    EventEmission(String),

    /// Storage backend failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration rejected at load time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IntakeError {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a not found error for a petition
    pub fn petition_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("petition {}", id))
    }

    /// Stable machine-readable code, also the suffix of the problem `type`
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueueOverflow { .. } => "queue-overflow",
            Self::RateLimitExceeded { .. } => "rate-limit-exceeded",
            Self::SystemHalted { .. } => "system-halted",
            Self::ConcurrentModification { .. } => "concurrent-modification",
            Self::PetitionAlreadyFated { .. } => "petition-already-fated",
            Self::InvalidStateTransition { .. } => "invalid-state-transition",
            Self::BackReferenceAlreadySet { .. } => "back-reference-already-set",
            Self::BudgetExceeded { .. } => "budget-exceeded",
            Self::InvalidToken(_) => "invalid-token",
            Self::ExpiredToken { .. } => "expired-token",
            Self::InvalidArgument(_) => "invalid-argument",
            Self::NotFound(_) => "not-found",
            Self::EventEmission(_) => "event-emission-failed",
            Self::Storage(_) => "storage-error",
            Self::InvalidConfig(_) => "invalid-configuration",
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            Self::InvalidToken(_) => StatusCode::BAD_REQUEST,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            Self::BudgetExceeded { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            Self::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::ConcurrentModification { .. } => StatusCode::CONFLICT,
            Self::PetitionAlreadyFated { .. } => StatusCode::CONFLICT,
            Self::BackReferenceAlreadySet { .. } => StatusCode::CONFLICT,

            // 410 Gone
            Self::ExpiredToken { .. } => StatusCode::GONE,

            // 422 Unprocessable
            Self::InvalidStateTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 503 Service Unavailable
            Self::QueueOverflow { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::SystemHalted { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            Self::EventEmission(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether retrying the same call later can succeed
    ///
    /// `ConcurrentModification` is excluded: the caller must re-read before
    /// deciding whether a retry still makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueOverflow { .. } | Self::RateLimitExceeded { .. } | Self::SystemHalted { .. }
        )
    }

    /// Retry-After hint in seconds, measured from now
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after_at(Utc::now())
    }

    /// Retry-After hint in seconds, measured from `now`
    pub fn retry_after_at(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            Self::QueueOverflow {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            Self::SystemHalted { retry_after_secs } => Some(*retry_after_secs),
            Self::RateLimitExceeded { reset_at, .. } => {
                Some((*reset_at - now).num_seconds().max(1) as u64)
            }
            _ => None,
        }
    }

    /// Returns whether this error is the caller's fault
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<std::io::Error> for IntakeError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_error_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(
            IntakeError::PetitionAlreadyFated {
                id,
                state: FateState::Referred
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            IntakeError::QueueOverflow {
                depth: 10,
                threshold: 10,
                retry_after_secs: 60
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            IntakeError::InvalidToken("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_retry_after_hints() {
        let now = Utc::now();
        let err = IntakeError::RateLimitExceeded {
            identity: "alice".into(),
            current_count: 10,
            limit: 10,
            reset_at: now + Duration::seconds(90),
        };
        assert_eq!(err.retry_after_at(now), Some(90));
        assert!(err.is_retryable());

        let halted = IntakeError::SystemHalted {
            retry_after_secs: 30,
        };
        assert_eq!(halted.retry_after_at(now), Some(30));

        let conflict = IntakeError::ConcurrentModification {
            id: Uuid::new_v4(),
            expected: FateState::Received,
            actual: FateState::Deliberating,
        };
        assert_eq!(conflict.retry_after_at(now), None);
        assert!(!conflict.is_retryable());
    }

    #[test]
    fn test_context_in_message() {
        let err = IntakeError::BudgetExceeded {
            owner: "council".into(),
            cycle: "2026-10".into(),
            used: 3,
            budget: 3,
            requested: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("council"));
        assert!(msg.contains("used 3 of 3"));
    }
}

//! Write path for new submissions
//!
//! Fixed order: halt → capacity → rate-limit check → persist → rate-limit
//! record → notifier register. Every check before the write fails without
//! mutating anything, so rejected attempts never consume quota.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::capacity::CapacityGovernor;
use crate::errors::{IntakeError, IntakeResult};
use crate::notifier::{StatusChangeNotifier, StatusTokenCodec};
use crate::observability::{IntakeEvent, IntakeMetrics};
use crate::ports::{emit_best_effort, EventEmitter, HaltChecker, PetitionEvent};
use crate::rate_limit::{RateLimitStatus, RateLimiter};
use crate::record::{PetitionRecord, RecordPatch, RecordStore};

/// An inbound petition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub content_hash: String,
    pub submitter_id: Option<String>,
    /// Key the rate limiter counts against (account, address, ...)
    pub identity: String,
}

impl Submission {
    pub fn new(content_hash: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            submitter_id: None,
            identity: identity.into(),
        }
    }

    pub fn with_submitter(mut self, submitter_id: impl Into<String>) -> Self {
        self.submitter_id = Some(submitter_id.into());
        self
    }
}

/// Result of an accepted submission
#[derive(Debug, Clone, Serialize)]
pub struct Admitted {
    pub record: PetitionRecord,
    pub status_token: String,
    /// Window usage as seen before this submission was counted
    pub rate_limit: RateLimitStatus,
}

pub struct AdmissionPipeline {
    store: Arc<dyn RecordStore>,
    governor: Arc<CapacityGovernor>,
    limiter: Arc<RateLimiter>,
    notifier: Arc<StatusChangeNotifier>,
    tokens: Arc<StatusTokenCodec>,
    emitter: Arc<dyn EventEmitter>,
    halt: Arc<dyn HaltChecker>,
    retry_after_secs: u64,
    metrics: Arc<IntakeMetrics>,
}

impl AdmissionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RecordStore>,
        governor: Arc<CapacityGovernor>,
        limiter: Arc<RateLimiter>,
        notifier: Arc<StatusChangeNotifier>,
        tokens: Arc<StatusTokenCodec>,
        emitter: Arc<dyn EventEmitter>,
        halt: Arc<dyn HaltChecker>,
        retry_after_secs: u64,
        metrics: Arc<IntakeMetrics>,
    ) -> Self {
        Self {
            store,
            governor,
            limiter,
            notifier,
            tokens,
            emitter,
            halt,
            retry_after_secs,
            metrics,
        }
    }

    fn refuse_if_halted(&self, operation: &'static str) -> IntakeResult<()> {
        if self.halt.is_halted() {
            self.metrics.increment_halt_rejections();
            tracing::warn!(event = %IntakeEvent::HaltRejected, operation, "write refused: system halted");
            return Err(IntakeError::SystemHalted {
                retry_after_secs: self.retry_after_secs,
            });
        }
        Ok(())
    }

    fn rejected(&self, identity: &str, err: IntakeError) -> IntakeError {
        tracing::info!(
            event = %IntakeEvent::SubmissionRejected,
            identity,
            code = err.code(),
            "submission rejected"
        );
        err
    }

    /// Admit a new petition
    pub async fn submit(&self, submission: Submission) -> IntakeResult<Admitted> {
        if submission.identity.is_empty() {
            return Err(IntakeError::InvalidArgument("identity must not be empty".into()));
        }
        if submission.content_hash.is_empty() {
            return Err(IntakeError::InvalidArgument(
                "content hash must not be empty".into(),
            ));
        }

        self.refuse_if_halted("submit")?;
        self.governor
            .check()
            .await
            .map_err(|e| self.rejected(&submission.identity, e))?;
        let rate_limit = self
            .limiter
            .enforce(&submission.identity)
            .await
            .map_err(|e| self.rejected(&submission.identity, e))?;

        let record = self
            .store
            .save(PetitionRecord::new(
                submission.content_hash,
                submission.submitter_id,
            ))
            .await?;

        // The petition exists now; a counting failure must not turn it into an error.
        if let Err(e) = self.limiter.record_submission(&submission.identity).await {
            tracing::error!(
                petition_id = %record.id,
                identity = %submission.identity,
                error = %e,
                "accepted submission was not counted against the rate limit"
            );
        }

        self.notifier.register_or_get(record.id, record.version);
        emit_best_effort(
            self.emitter.as_ref(),
            &PetitionEvent::Submitted {
                id: record.id,
                submitter_id: record.submitter_id.clone(),
                at: Utc::now(),
            },
        );
        self.metrics.increment_submissions_accepted();
        tracing::info!(
            event = %IntakeEvent::SubmissionAccepted,
            petition_id = %record.id,
            identity = %submission.identity,
            "submission accepted"
        );

        let status_token = self.tokens.issue(record.id, record.version);
        Ok(Admitted {
            record,
            status_token,
            rate_limit,
        })
    }

    /// Patch non-disposition fields of a pending petition
    pub async fn update_fields(&self, id: Uuid, patch: RecordPatch) -> IntakeResult<PetitionRecord> {
        if patch.is_empty() {
            return Err(IntakeError::InvalidArgument("empty patch".into()));
        }
        self.refuse_if_halted("update_fields")?;

        let record = self.store.update_non_terminal_fields(id, patch).await?;
        self.notifier.update_version(id, record.version);
        emit_best_effort(
            self.emitter.as_ref(),
            &PetitionEvent::FieldsUpdated {
                id,
                version: record.version,
            },
        );
        Ok(record)
    }
}

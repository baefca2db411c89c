//! Sliding-window rate limiter
//!
//! The window is approximated by minute buckets: a bucket counts toward the
//! window when its minute boundary lies strictly after `now - window`.
//! Quota is only spent by [`RateLimiter::record_submission`], which callers
//! invoke after the guarded write has succeeded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::store::RateLimitStore;
use crate::config::RateLimitConfig;
use crate::errors::{IntakeError, IntakeResult};
use crate::observability::{IntakeEvent, IntakeMetrics};
use crate::ports::{ensure_writable, HaltChecker};

/// Result of a rate-limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub current_count: u64,
    pub limit: u64,
}

/// Minute bucket containing `at`
pub fn minute_of(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

/// Per-identity throttle
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    halt: Arc<dyn HaltChecker>,
    retry_after_secs: u64,
    metrics: Arc<IntakeMetrics>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        config: RateLimitConfig,
        halt: Arc<dyn HaltChecker>,
        retry_after_secs: u64,
        metrics: Arc<IntakeMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            halt,
            retry_after_secs,
            metrics,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window_secs(&self) -> i64 {
        i64::try_from(self.config.window_minutes.saturating_mul(60)).unwrap_or(i64::MAX)
    }

    /// Current window usage for `identity`
    pub async fn check_rate_limit(&self, identity: &str) -> IntakeResult<RateLimitStatus> {
        self.check_rate_limit_at(identity, Utc::now()).await
    }

    /// [`Self::check_rate_limit`] evaluated at an explicit instant
    pub async fn check_rate_limit_at(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> IntakeResult<RateLimitStatus> {
        let window = self.window_secs();
        let window_start = now.timestamp().saturating_sub(window);
        let after_minute = window_start.div_euclid(60);

        let buckets = self
            .store
            .buckets_since(identity.to_string(), after_minute)
            .await?;

        let current_count: u64 = buckets.iter().map(|b| b.count).sum();
        let limit = self.config.limit_per_window;

        let reset_at = match buckets.iter().map(|b| b.minute).min() {
            Some(oldest) => Utc
                .timestamp_opt(oldest.saturating_mul(60).saturating_add(window), 0)
                .single()
                .unwrap_or(now),
            None => now + chrono::Duration::seconds(window),
        };

        Ok(RateLimitStatus {
            allowed: current_count < limit,
            remaining: limit.saturating_sub(current_count),
            reset_at,
            current_count,
            limit,
        })
    }

    /// Check and turn a refusal into `RateLimitExceeded`. Spends no quota.
    pub async fn enforce(&self, identity: &str) -> IntakeResult<RateLimitStatus> {
        self.enforce_at(identity, Utc::now()).await
    }

    pub async fn enforce_at(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> IntakeResult<RateLimitStatus> {
        let status = self.check_rate_limit_at(identity, now).await?;
        if status.allowed {
            return Ok(status);
        }

        self.metrics.increment_rate_limit_rejections();
        tracing::info!(
            event = %IntakeEvent::RateLimitExceeded,
            identity,
            current_count = status.current_count,
            limit = status.limit,
            reset_at = %status.reset_at,
            "rate limit exceeded"
        );
        Err(IntakeError::RateLimitExceeded {
            identity: identity.to_string(),
            current_count: status.current_count,
            limit: status.limit,
            reset_at: status.reset_at,
        })
    }

    /// Count one accepted submission against `identity`
    pub async fn record_submission(&self, identity: &str) -> IntakeResult<u64> {
        self.record_submission_at(identity, Utc::now()).await
    }

    pub async fn record_submission_at(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> IntakeResult<u64> {
        ensure_writable(self.halt.as_ref(), self.retry_after_secs)?;
        let count = self
            .store
            .increment(identity.to_string(), minute_of(now))
            .await?;
        tracing::debug!(identity, minute = minute_of(now), count, "submission recorded");
        Ok(count)
    }

    /// Delete buckets older than the retention TTL
    pub async fn cleanup(&self) -> IntakeResult<u64> {
        self.cleanup_at(Utc::now()).await
    }

    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> IntakeResult<u64> {
        let ttl_secs =
            i64::try_from(self.config.bucket_ttl_hours.saturating_mul(3600)).unwrap_or(i64::MAX);
        let cutoff_minute = now.timestamp().saturating_sub(ttl_secs).div_euclid(60);

        let removed = self.store.delete_older_than(cutoff_minute).await?;
        if removed > 0 {
            self.metrics.add_rate_buckets_evicted(removed);
            tracing::info!(
                event = %IntakeEvent::RateBucketsEvicted,
                removed,
                cutoff_minute,
                "expired rate-limit buckets deleted"
            );
        }
        Ok(removed)
    }

    /// Run [`Self::cleanup`] every `interval` until the handle is aborted
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.cleanup().await {
                    tracing::error!(error = %e, "rate-limit cleanup failed");
                }
            }
        })
    }
}

//! Capacity Governor
//!
//! Backpressure on new submissions based on the number of pending petitions.
//! The depth is cached for `cache_ttl` and refreshed from the record store
//! without holding the cache lock across the query, so a reading may be stale
//! by up to one TTL. The signal is advisory.
//!
//! Two thresholds prevent flapping near the boundary:
//!
//! ```text
//! accepting --(depth >= threshold)--------------> rejecting
//! rejecting --(depth <  threshold - hysteresis)--> accepting
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::config::QueueConfig;
use crate::errors::{IntakeError, IntakeResult};
use crate::observability::{IntakeEvent, IntakeMetrics};
use crate::record::{pending_depth, RecordStore};

/// Process-local view of queue depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepthCache {
    pub depth: u64,
    pub last_refreshed_at: Option<Instant>,
    pub is_rejecting: bool,
}

pub struct CapacityGovernor {
    store: Arc<dyn RecordStore>,
    config: QueueConfig,
    cache: Mutex<QueueDepthCache>,
    metrics: Arc<IntakeMetrics>,
}

impl CapacityGovernor {
    pub fn new(store: Arc<dyn RecordStore>, config: QueueConfig, metrics: Arc<IntakeMetrics>) -> Self {
        Self {
            store,
            config,
            cache: Mutex::new(QueueDepthCache::default()),
            metrics,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn cache(&self) -> MutexGuard<'_, QueueDepthCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> QueueDepthCache {
        *self.cache()
    }

    /// Force the next check to re-read the store
    pub fn invalidate(&self) {
        self.cache().last_refreshed_at = None;
    }

    fn is_stale(&self) -> bool {
        match self.cache().last_refreshed_at {
            Some(at) => at.elapsed() >= self.config.cache_ttl(),
            None => true,
        }
    }

    /// Whether new submissions are admitted, refreshing the depth when stale
    pub async fn is_accepting(&self) -> IntakeResult<bool> {
        if self.is_stale() {
            let counts = self.store.count_by_state().await?;
            let depth = pending_depth(&counts);
            tracing::debug!(event = %IntakeEvent::DepthRefreshed, depth, "queue depth refreshed");
            return Ok(self.observe_depth(depth));
        }
        Ok(!self.cache().is_rejecting)
    }

    /// Feed a depth reading through the hysteresis rule; returns whether accepting
    pub fn observe_depth(&self, depth: u64) -> bool {
        let mut cache = self.cache();
        cache.depth = depth;
        cache.last_refreshed_at = Some(Instant::now());

        let threshold = self.config.threshold;
        let resume_below = self.config.resume_below();

        if !cache.is_rejecting && depth >= threshold {
            cache.is_rejecting = true;
            self.metrics.increment_capacity_flips();
            tracing::warn!(
                event = %IntakeEvent::CapacityClosed,
                depth, threshold,
                "intake closed: queue depth at threshold"
            );
        } else if cache.is_rejecting && depth < resume_below {
            cache.is_rejecting = false;
            self.metrics.increment_capacity_flips();
            tracing::info!(
                event = %IntakeEvent::CapacityReopened,
                depth, resume_below,
                "intake reopened"
            );
        }
        !cache.is_rejecting
    }

    /// Admit or fail with `QueueOverflow` carrying the retry hint
    pub async fn check(&self) -> IntakeResult<()> {
        if self.is_accepting().await? {
            return Ok(());
        }
        self.metrics.increment_capacity_rejections();
        Err(IntakeError::QueueOverflow {
            depth: self.cache().depth,
            threshold: self.config.threshold,
            retry_after_secs: self.config.retry_after_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FateRequest, FateState, InMemoryRecordStore, PetitionRecord};

    fn accept_all(_: &PetitionRecord) -> IntakeResult<()> {
        Ok(())
    }

    fn governor(store: Arc<InMemoryRecordStore>, threshold: u64, hysteresis: u64) -> CapacityGovernor {
        let config = QueueConfig {
            threshold,
            hysteresis,
            cache_ttl_seconds: 0,
            ..QueueConfig::default()
        };
        CapacityGovernor::new(store, config, Arc::new(IntakeMetrics::new()))
    }

    #[test]
    fn test_hysteresis_sequence() {
        let governor = governor(Arc::new(InMemoryRecordStore::new()), 100, 10);
        let observed: Vec<bool> = [100, 95, 90, 89]
            .into_iter()
            .map(|d| governor.observe_depth(d))
            .collect();
        assert_eq!(observed, vec![false, false, false, true]);
    }

    #[test]
    fn test_accepting_below_threshold() {
        let governor = governor(Arc::new(InMemoryRecordStore::new()), 100, 10);
        assert!(governor.observe_depth(99));
        assert!(governor.observe_depth(0));
        assert!(!governor.snapshot().is_rejecting);
    }

    #[tokio::test]
    async fn test_refresh_counts_only_pending() {
        let store = Arc::new(InMemoryRecordStore::new());
        let governor = governor(Arc::clone(&store), 2, 1);

        let first = store.save(PetitionRecord::new("h1", None)).await.unwrap();
        assert!(governor.is_accepting().await.unwrap());

        store.save(PetitionRecord::new("h2", None)).await.unwrap();
        let err = governor.check().await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::QueueOverflow { depth: 2, threshold: 2, retry_after_secs: 60 }
        ));

        // A terminal petition leaves the queue; 1 is not below 2 - 1.
        store
            .assign_fate_cas(
                FateRequest::new(first.id, FateState::Received, FateState::Acknowledged),
                &accept_all,
            )
            .await
            .unwrap();
        assert!(!governor.is_accepting().await.unwrap());
        assert_eq!(governor.snapshot().depth, 1);
    }

    #[tokio::test]
    async fn test_cached_depth_within_ttl() {
        let store = Arc::new(InMemoryRecordStore::new());
        let config = QueueConfig {
            threshold: 1,
            hysteresis: 0,
            cache_ttl_seconds: 3600,
            ..QueueConfig::default()
        };
        let governor =
            CapacityGovernor::new(Arc::clone(&store) as Arc<dyn RecordStore>, config, Arc::new(IntakeMetrics::new()));

        assert!(governor.is_accepting().await.unwrap());
        store.save(PetitionRecord::new("h", None)).await.unwrap();
        // Cached reading until the TTL passes.
        assert!(governor.is_accepting().await.unwrap());

        governor.invalidate();
        assert!(!governor.is_accepting().await.unwrap());
    }
}

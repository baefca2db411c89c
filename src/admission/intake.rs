//! Composition root
//!
//! [`IntakeCore`] owns one instance of every service, wired from an
//! [`IntakeConfig`] and the injected ports. Anything not injected falls back
//! to the in-memory implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::pipeline::AdmissionPipeline;
use super::status::StatusService;
use crate::budget::{BudgetLedger, BudgetStore, InMemoryBudgetStore};
use crate::capacity::CapacityGovernor;
use crate::config::IntakeConfig;
use crate::errors::IntakeResult;
use crate::fate::FateStateMachine;
use crate::notifier::{StatusChangeNotifier, StatusTokenCodec};
use crate::observability::{IntakeMetrics, MetricsSnapshot};
use crate::ports::{EventEmitter, HaltChecker, NeverHalted, TracingEventEmitter};
use crate::promotion::PromotionService;
use crate::rate_limit::{InMemoryRateLimitStore, RateLimitStore, RateLimiter};
use crate::record::{InMemoryRecordStore, RecordStore};

/// Fully wired admission core
pub struct IntakeCore {
    config: IntakeConfig,
    metrics: Arc<IntakeMetrics>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<StatusChangeNotifier>,
    governor: Arc<CapacityGovernor>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<BudgetLedger>,
    fate: FateStateMachine,
    admission: AdmissionPipeline,
    status: StatusService,
    promotion: PromotionService,
}

impl IntakeCore {
    pub fn builder() -> IntakeCoreBuilder {
        IntakeCoreBuilder::new()
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn admission(&self) -> &AdmissionPipeline {
        &self.admission
    }

    pub fn status(&self) -> &StatusService {
        &self.status
    }

    pub fn fate(&self) -> &FateStateMachine {
        &self.fate
    }

    pub fn promotion(&self) -> &PromotionService {
        &self.promotion
    }

    pub fn governor(&self) -> &CapacityGovernor {
        &self.governor
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    pub fn notifier(&self) -> &StatusChangeNotifier {
        &self.notifier
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Start periodic rate-limit bucket cleanup
    pub fn spawn_rate_limit_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        Arc::clone(&self.limiter).spawn_cleanup(interval)
    }

    /// Start periodic eviction of idle long-poll entries
    pub fn spawn_notifier_sweep(&self, interval: Duration) -> JoinHandle<()> {
        Arc::clone(&self.notifier).spawn_sweeper(interval, self.config.status.notifier_idle())
    }
}

/// Builder for [`IntakeCore`]
pub struct IntakeCoreBuilder {
    config: IntakeConfig,
    record_store: Option<Arc<dyn RecordStore>>,
    rate_limit_store: Option<Arc<dyn RateLimitStore>>,
    budget_store: Option<Arc<dyn BudgetStore>>,
    halt: Option<Arc<dyn HaltChecker>>,
    emitter: Option<Arc<dyn EventEmitter>>,
    token_secret: Option<Vec<u8>>,
    metrics: Option<Arc<IntakeMetrics>>,
}

impl Default for IntakeCoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IntakeCoreBuilder {
    pub fn new() -> Self {
        Self {
            config: IntakeConfig::default(),
            record_store: None,
            rate_limit_store: None,
            budget_store: None,
            halt: None,
            emitter: None,
            token_secret: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: IntakeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    pub fn rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limit_store = Some(store);
        self
    }

    pub fn budget_store(mut self, store: Arc<dyn BudgetStore>) -> Self {
        self.budget_store = Some(store);
        self
    }

    pub fn halt(mut self, halt: Arc<dyn HaltChecker>) -> Self {
        self.halt = Some(halt);
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Fixed token secret so tokens survive restarts; random otherwise
    pub fn token_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.token_secret = Some(secret.into());
        self
    }

    pub fn metrics(mut self, metrics: Arc<IntakeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and wire every service
    pub fn build(self) -> IntakeResult<IntakeCore> {
        self.config.validate()?;
        let config = self.config;
        let retry_after = config.queue.retry_after_seconds;

        let metrics = self.metrics.unwrap_or_default();
        let store = self
            .record_store
            .unwrap_or_else(|| Arc::new(InMemoryRecordStore::new()));
        let rate_store = self
            .rate_limit_store
            .unwrap_or_else(|| Arc::new(InMemoryRateLimitStore::new()));
        let budget_store = self
            .budget_store
            .unwrap_or_else(|| Arc::new(InMemoryBudgetStore::new()));
        let halt = self.halt.unwrap_or_else(|| Arc::new(NeverHalted));
        let emitter = self
            .emitter
            .unwrap_or_else(|| Arc::new(TracingEventEmitter));

        let max_age = config.status.token_max_age_seconds;
        let tokens = Arc::new(match &self.token_secret {
            Some(secret) => StatusTokenCodec::new(secret, max_age),
            None => StatusTokenCodec::generate(max_age),
        });

        let notifier = Arc::new(StatusChangeNotifier::new(Arc::clone(&metrics)));
        let governor = Arc::new(CapacityGovernor::new(
            Arc::clone(&store),
            config.queue.clone(),
            Arc::clone(&metrics),
        ));
        let limiter = Arc::new(RateLimiter::new(
            rate_store,
            config.rate_limit.clone(),
            Arc::clone(&halt),
            retry_after,
            Arc::clone(&metrics),
        ));
        let ledger = Arc::new(BudgetLedger::new(
            budget_store,
            config.budget.clone(),
            Arc::clone(&halt),
            retry_after,
            Arc::clone(&metrics),
        ));

        let fate = FateStateMachine::new(
            Arc::clone(&store),
            Arc::clone(&emitter),
            Arc::clone(&notifier),
            Arc::clone(&halt),
            retry_after,
            Arc::clone(&metrics),
        );
        let admission = AdmissionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&governor),
            Arc::clone(&limiter),
            Arc::clone(&notifier),
            Arc::clone(&tokens),
            Arc::clone(&emitter),
            Arc::clone(&halt),
            retry_after,
            Arc::clone(&metrics),
        );
        let status = StatusService::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            tokens,
            config.status.long_poll_timeout(),
        );
        let promotion = PromotionService::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&notifier),
            emitter,
            halt,
            retry_after,
        );

        tracing::info!(
            threshold = config.queue.threshold,
            limit_per_window = config.rate_limit.limit_per_window,
            default_budget = config.budget.default_budget,
            "intake core ready"
        );

        Ok(IntakeCore {
            config,
            metrics,
            store,
            notifier,
            governor,
            limiter,
            ledger,
            fate,
            admission,
            status,
            promotion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IntakeError;

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = IntakeConfig::default();
        config.queue.hysteresis = config.queue.threshold;
        assert!(matches!(
            IntakeCore::builder().config(config).build(),
            Err(IntakeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_defaults_wire_in_memory_ports() {
        let core = IntakeCore::builder().build().unwrap();
        assert_eq!(core.config().budget.default_budget, 3);
        assert_eq!(core.metrics().submissions_accepted, 0);
        assert_eq!(core.notifier().tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_notifier_sweep_evicts_idle_petitions() {
        let mut config = IntakeConfig::default();
        config.status.notifier_idle_seconds = 0;
        let core = IntakeCore::builder().config(config).build().unwrap();
        let admitted = core
            .admission()
            .submit(crate::admission::Submission::new("h", "alice"))
            .await
            .unwrap();
        assert_eq!(core.notifier().tracked_count(), 1);

        let sweeper = core.spawn_notifier_sweep(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();
        assert_eq!(core.notifier().tracked_count(), 0);

        // Polling still works after eviction.
        let snapshot = core
            .status()
            .poll(admitted.record.id, Some(&admitted.status_token), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(!snapshot.changed);
    }
}

//! Budget ledger service
//!
//! Policy on top of a [`BudgetStore`]: budget resolution, halt gating, audit
//! logging, metrics. Consumption is all-or-nothing per call and final; there is
//! no refund operation.

use std::sync::Arc;

use serde::Serialize;

use super::store::{BudgetKey, BudgetStore, ConsumeOutcome};
use crate::config::BudgetConfig;
use crate::errors::{IntakeError, IntakeResult};
use crate::observability::{IntakeEvent, IntakeMetrics, AUDIT_TARGET};
use crate::ports::HaltChecker;

/// Usage view for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetUsage {
    pub budget: u64,
    pub used: u64,
    pub remaining: u64,
}

/// Promotion budget ledger
pub struct BudgetLedger {
    store: Arc<dyn BudgetStore>,
    config: BudgetConfig,
    halt: Arc<dyn HaltChecker>,
    retry_after_secs: u64,
    metrics: Arc<IntakeMetrics>,
}

impl BudgetLedger {
    pub fn new(
        store: Arc<dyn BudgetStore>,
        config: BudgetConfig,
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

    /// Budget granted to `owner` per cycle
    pub fn budget(&self, owner: &str) -> u64 {
        self.config.budget_for(owner)
    }

    /// Units spent by `owner` in `cycle`
    pub async fn usage(&self, owner: &str, cycle: &str) -> IntakeResult<u64> {
        self.store.used(BudgetKey::new(owner, cycle)).await
    }

    /// Budget, usage and remainder together
    pub async fn status(&self, owner: &str, cycle: &str) -> IntakeResult<BudgetUsage> {
        let budget = self.budget(owner);
        let used = self.usage(owner, cycle).await?;
        Ok(BudgetUsage {
            budget,
            used,
            remaining: budget.saturating_sub(used),
        })
    }

    /// Advisory check; a later `consume` may still lose a race
    pub async fn can_consume(&self, owner: &str, cycle: &str, amount: u64) -> IntakeResult<bool> {
        let used = self.usage(owner, cycle).await?;
        Ok(used
            .checked_add(amount)
            .map(|next| next <= self.budget(owner))
            .unwrap_or(false))
    }

    /// Atomically spend `amount` units, returning the new usage
    pub async fn consume(&self, owner: &str, cycle: &str, amount: u64) -> IntakeResult<u64> {
        let budget = self.budget(owner);

        if amount == 0 {
            tracing::warn!(
                target: AUDIT_TARGET,
                owner, cycle, amount, budget,
                outcome = "invalid",
                "budget consume refused"
            );
            return Err(IntakeError::InvalidArgument(
                "budget amount must be positive".into(),
            ));
        }
        if self.halt.is_halted() {
            self.metrics.increment_halt_rejections();
            tracing::warn!(
                target: AUDIT_TARGET,
                event = %IntakeEvent::HaltRejected,
                owner, cycle, amount, budget,
                outcome = "halted",
                "budget consume refused"
            );
            return Err(IntakeError::SystemHalted {
                retry_after_secs: self.retry_after_secs,
            });
        }

        let result = self
            .store
            .try_consume(BudgetKey::new(owner, cycle), budget, amount)
            .await;

        match result {
            Ok(ConsumeOutcome::Consumed { used }) => {
                self.metrics.add_budget_consumed(amount);
                tracing::info!(
                    target: AUDIT_TARGET,
                    event = %IntakeEvent::BudgetConsumed,
                    backend = self.store.backend(),
                    owner, cycle, amount, used, budget,
                    outcome = "consumed",
                    "budget consumed"
                );
                Ok(used)
            }
            Ok(ConsumeOutcome::Exceeded { used }) => {
                self.metrics.increment_budget_exceeded();
                tracing::warn!(
                    target: AUDIT_TARGET,
                    event = %IntakeEvent::BudgetExceeded,
                    backend = self.store.backend(),
                    owner, cycle, amount, used, budget,
                    outcome = "exceeded",
                    "budget consume refused"
                );
                Err(IntakeError::BudgetExceeded {
                    owner: owner.to_string(),
                    cycle: cycle.to_string(),
                    used,
                    budget,
                    requested: amount,
                })
            }
            Err(e) => {
                tracing::error!(
                    target: AUDIT_TARGET,
                    backend = self.store.backend(),
                    owner, cycle, amount, budget,
                    outcome = "error",
                    error = %e,
                    "budget consume failed"
                );
                Err(e)
            }
        }
    }
}

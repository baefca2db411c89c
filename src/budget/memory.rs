//! Non-durable budget store for tests and development

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{self, FutureExt};

use super::store::{BudgetKey, BudgetStore, ConsumeOutcome};
use crate::errors::{IntakeError, IntakeResult};
use crate::record::StoreFuture;

/// In-memory counters with one mutex per key
#[derive(Debug, Default)]
pub struct InMemoryBudgetStore {
    counters: Mutex<HashMap<BudgetKey, Arc<Mutex<u64>>>>,
}

impl InMemoryBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, key: &BudgetKey) -> IntakeResult<Arc<Mutex<u64>>> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| IntakeError::storage("budget map lock poisoned"))?;
        Ok(Arc::clone(counters.entry(key.clone()).or_default()))
    }

    fn consume_sync(&self, key: &BudgetKey, budget: u64, amount: u64) -> IntakeResult<ConsumeOutcome> {
        let counter = self.counter(key)?;
        let mut used = counter
            .lock()
            .map_err(|_| IntakeError::storage("budget counter lock poisoned"))?;
        let outcome = ConsumeOutcome::decide(*used, budget, amount);
        if let ConsumeOutcome::Consumed { used: next } = outcome {
            *used = next;
        }
        Ok(outcome)
    }

    fn used_sync(&self, key: &BudgetKey) -> IntakeResult<u64> {
        let counter = {
            let counters = self
                .counters
                .lock()
                .map_err(|_| IntakeError::storage("budget map lock poisoned"))?;
            match counters.get(key) {
                Some(counter) => Arc::clone(counter),
                None => return Ok(0),
            }
        };
        let used = counter
            .lock()
            .map_err(|_| IntakeError::storage("budget counter lock poisoned"))?;
        Ok(*used)
    }
}

impl BudgetStore for InMemoryBudgetStore {
    fn try_consume(&self, key: BudgetKey, budget: u64, amount: u64) -> StoreFuture<'_, ConsumeOutcome> {
        future::ready(self.consume_sync(&key, budget, amount)).boxed()
    }

    fn used(&self, key: BudgetKey) -> StoreFuture<'_, u64> {
        future::ready(self.used_sync(&key)).boxed()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

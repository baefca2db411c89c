//! Budget store port

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::StoreFuture;

/// Ledger key: one counter per owner per cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BudgetKey {
    pub owner: String,
    pub cycle: String,
}

impl BudgetKey {
    pub fn new(owner: impl Into<String>, cycle: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            cycle: cycle.into(),
        }
    }
}

impl fmt::Display for BudgetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.owner, self.cycle)
    }
}

/// Persisted counter for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub owner: String,
    pub cycle: String,
    /// Budget in force at the last consume
    pub budget: u64,
    /// Units spent; never exceeds `budget`
    pub used: u64,
    pub updated_at: DateTime<Utc>,
}

impl BudgetRecord {
    pub fn empty(key: &BudgetKey, budget: u64) -> Self {
        Self {
            owner: key.owner.clone(),
            cycle: key.cycle.clone(),
            budget,
            used: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Result of an atomic check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Units were added; `used` is the new total
    Consumed { used: u64 },
    /// Nothing was added; `used` is the unchanged total
    Exceeded { used: u64 },
}

impl ConsumeOutcome {
    /// Decide an increment against a budget
    pub fn decide(used: u64, budget: u64, amount: u64) -> Self {
        match used.checked_add(amount) {
            Some(next) if next <= budget => ConsumeOutcome::Consumed { used: next },
            _ => ConsumeOutcome::Exceeded { used },
        }
    }
}

/// Storage for budget counters.
///
/// `try_consume` must be atomic per key across every concurrent caller the
/// backend can see: with budget B, N concurrent single-unit calls commit
/// exactly `min(N, B)` increments. Distinct keys must not serialize on each
/// other.
pub trait BudgetStore: Send + Sync {
    /// Add `amount` to the key's usage iff the result stays within `budget`
    fn try_consume(&self, key: BudgetKey, budget: u64, amount: u64) -> StoreFuture<'_, ConsumeOutcome>;

    /// Units spent so far for a key (0 if never touched)
    fn used(&self, key: BudgetKey) -> StoreFuture<'_, u64>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}

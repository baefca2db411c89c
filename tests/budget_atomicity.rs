//! Budget Atomicity Tests
//!
//! Every backend honors the same contract: with budget B and N concurrent
//! single-unit consumers, exactly min(N, B) succeed and the rest fail with
//! `BudgetExceeded`. Usage never passes the budget.

use std::sync::Arc;
use std::time::Duration;

use petition_intake::budget::{
    BudgetLedger, BudgetStore, FileBudgetStore, InMemoryBudgetStore, InProcessScriptHost,
    ScriptBudgetStore,
};
use petition_intake::config::BudgetConfig;
use petition_intake::observability::IntakeMetrics;
use petition_intake::ports::NeverHalted;
use petition_intake::IntakeError;
use tempfile::TempDir;

fn ledger(store: Arc<dyn BudgetStore>) -> Arc<BudgetLedger> {
    Arc::new(BudgetLedger::new(
        store,
        BudgetConfig::default(),
        Arc::new(NeverHalted),
        60,
        Arc::new(IntakeMetrics::new()),
    ))
}

/// Fire `n` concurrent consume(1) calls and return (successes, exceeded)
async fn race(ledger: Arc<BudgetLedger>, owner: &str, cycle: &str, n: usize) -> (usize, usize) {
    let mut handles = Vec::new();
    for _ in 0..n {
        let ledger = Arc::clone(&ledger);
        let owner = owner.to_string();
        let cycle = cycle.to_string();
        handles.push(tokio::spawn(async move {
            ledger.consume(&owner, &cycle, 1).await
        }));
    }

    let mut ok = 0;
    let mut exceeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(IntakeError::BudgetExceeded { used, budget, .. }) => {
                assert!(used <= budget);
                exceeded += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    (ok, exceeded)
}

// =============================================================================
// Per-backend contract
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_in_memory_exactly_budget_succeeds() {
    let ledger = ledger(Arc::new(InMemoryBudgetStore::new()));
    assert_eq!(race(Arc::clone(&ledger), "alice", "c1", 5).await, (3, 2));
    assert_eq!(ledger.usage("alice", "c1").await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_file_exactly_budget_succeeds() {
    let tmp = TempDir::new().unwrap();
    let ledger = ledger(Arc::new(FileBudgetStore::new(tmp.path())));
    assert_eq!(race(Arc::clone(&ledger), "alice", "c1", 5).await, (3, 2));
    assert_eq!(ledger.usage("alice", "c1").await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_script_exactly_budget_succeeds() {
    let host = Arc::new(InProcessScriptHost::with_latency(Duration::from_millis(2)));
    let ledger = ledger(Arc::new(ScriptBudgetStore::new(host)));
    assert_eq!(race(Arc::clone(&ledger), "alice", "c1", 5).await, (3, 2));
    assert_eq!(ledger.usage("alice", "c1").await.unwrap(), 3);
}

// =============================================================================
// Wider races and key isolation
// =============================================================================

/// Many racers against a larger budget still stop exactly at the budget.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_large_race_on_file_backend() {
    let tmp = TempDir::new().unwrap();
    let mut config = BudgetConfig::default();
    config.overrides.insert("council".into(), 10);
    let ledger = Arc::new(BudgetLedger::new(
        Arc::new(FileBudgetStore::new(tmp.path())),
        config,
        Arc::new(NeverHalted),
        60,
        Arc::new(IntakeMetrics::new()),
    ));

    assert_eq!(race(Arc::clone(&ledger), "council", "2026-10", 40).await, (10, 30));

    // A fresh store over the same directory sees the committed usage.
    let reopened = FileBudgetStore::new(tmp.path());
    assert_eq!(
        reopened
            .used(petition_intake::budget::BudgetKey::new("council", "2026-10"))
            .await
            .unwrap(),
        10
    );
}

/// Cycles and owners are separate keys.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_keys_are_isolated() {
    let ledger = ledger(Arc::new(InMemoryBudgetStore::new()));
    let (a, b, c) = tokio::join!(
        race(Arc::clone(&ledger), "alice", "c1", 4),
        race(Arc::clone(&ledger), "alice", "c2", 4),
        race(Arc::clone(&ledger), "bob", "c1", 4),
    );
    assert_eq!(a, (3, 1));
    assert_eq!(b, (3, 1));
    assert_eq!(c, (3, 1));
}

/// A multi-unit request that does not fit spends nothing.
#[tokio::test]
async fn test_multi_unit_all_or_nothing() {
    let host = Arc::new(InProcessScriptHost::new());
    let ledger = ledger(Arc::new(ScriptBudgetStore::new(host)));
    ledger.consume("alice", "c1", 2).await.unwrap();
    assert!(matches!(
        ledger.consume("alice", "c1", 2).await,
        Err(IntakeError::BudgetExceeded { used: 2, budget: 3, requested: 2, .. })
    ));
    assert_eq!(ledger.consume("alice", "c1", 1).await.unwrap(), 3);
}

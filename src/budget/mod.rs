//! Promotion Budget
//!
//! A scarce per-(owner, cycle) allowance spent atomically before any
//! dependent artifact is created. Three interchangeable backends share one
//! contract: with budget B and N concurrent single-unit consumers, exactly
//! `min(N, B)` succeed.
//!
//! - [`InMemoryBudgetStore`]: per-key mutex, non-durable (tests/dev)
//! - [`FileBudgetStore`]: per-key advisory lock + atomic file replace
//! - [`ScriptBudgetStore`]: server-side check-and-increment script

mod distributed;
mod file;
mod ledger;
mod memory;
mod store;

pub use distributed::{
    AtomicScriptHost, InProcessScriptHost, ScriptBudgetStore, ScriptReply, CONSUME_SCRIPT,
};
pub use file::FileBudgetStore;
pub use ledger::{BudgetLedger, BudgetUsage};
pub use memory::InMemoryBudgetStore;
pub use store::{BudgetKey, BudgetRecord, BudgetStore, ConsumeOutcome};

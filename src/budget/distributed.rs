//! Distributed budget store
//!
//! The check and the increment run as one server-side script, so any number
//! of intake processes can share a ledger without a shared process lock. The
//! script host is a port: a Redis-backed host loads [`CONSUME_SCRIPT`] and
//! evaluates it with `KEYS[1] = key`, `ARGV = [budget, amount]`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::FutureExt;

use super::store::{BudgetKey, BudgetStore, ConsumeOutcome};
use crate::durable::sanitize_component;
use crate::errors::IntakeError;
use crate::record::StoreFuture;

/// Check-then-increment, executed atomically by the server.
///
/// Returns `{applied, used}` where `applied` is 1 when the increment happened.
pub const CONSUME_SCRIPT: &str = r#"
local used = tonumber(redis.call('GET', KEYS[1]) or '0')
local budget = tonumber(ARGV[1])
local amount = tonumber(ARGV[2])
if used + amount > budget then
  return {0, used}
end
used = redis.call('INCRBY', KEYS[1], amount)
return {1, used}
"#;

/// Reply of the consume script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptReply {
    pub applied: bool,
    pub value: u64,
}

/// Remote counter server able to run the consume script in one round trip
pub trait AtomicScriptHost: Send + Sync {
    /// Evaluate [`CONSUME_SCRIPT`] against `key`
    fn eval_consume(&self, key: String, budget: u64, amount: u64) -> StoreFuture<'_, ScriptReply>;

    /// Plain read of a counter (0 when absent)
    fn read_counter(&self, key: String) -> StoreFuture<'_, u64>;
}

/// Budget store backed by an [`AtomicScriptHost`]
#[derive(Clone)]
pub struct ScriptBudgetStore {
    host: Arc<dyn AtomicScriptHost>,
    namespace: String,
}

impl ScriptBudgetStore {
    pub fn new(host: Arc<dyn AtomicScriptHost>) -> Self {
        Self::with_namespace(host, "budget")
    }

    pub fn with_namespace(host: Arc<dyn AtomicScriptHost>, namespace: impl Into<String>) -> Self {
        Self {
            host,
            namespace: namespace.into(),
        }
    }

    /// Server key for a ledger key.
    ///
    /// Owner and cycle are percent-encoded so neither can contain the `:`
    /// separator or a brace. The braces form a cluster hash tag, so one key's
    /// reads and writes always land on the same shard.
    pub fn server_key(&self, key: &BudgetKey) -> String {
        format!(
            "{}:{{{}:{}}}",
            self.namespace,
            sanitize_component(&key.owner),
            sanitize_component(&key.cycle)
        )
    }
}

impl BudgetStore for ScriptBudgetStore {
    fn try_consume(&self, key: BudgetKey, budget: u64, amount: u64) -> StoreFuture<'_, ConsumeOutcome> {
        let server_key = self.server_key(&key);
        async move {
            let reply = self.host.eval_consume(server_key, budget, amount).await?;
            Ok(if reply.applied {
                ConsumeOutcome::Consumed { used: reply.value }
            } else {
                ConsumeOutcome::Exceeded { used: reply.value }
            })
        }
        .boxed()
    }

    fn used(&self, key: BudgetKey) -> StoreFuture<'_, u64> {
        self.host.read_counter(self.server_key(&key))
    }

    fn backend(&self) -> &'static str {
        "script"
    }
}

/// In-process stand-in for a script server.
///
/// Like a single-threaded script server it runs one script at a time; the
/// optional latency is spent before the script, as a network round trip
/// would be, so concurrent callers interleave.
#[derive(Debug, Default)]
pub struct InProcessScriptHost {
    counters: Mutex<HashMap<String, u64>>,
    latency: Option<Duration>,
}

impl InProcessScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            latency: Some(latency),
        }
    }

    fn run_consume(&self, key: &str, budget: u64, amount: u64) -> Result<ScriptReply, IntakeError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| IntakeError::storage("script host lock poisoned"))?;
        let used = counters.get(key).copied().unwrap_or(0);
        match ConsumeOutcome::decide(used, budget, amount) {
            ConsumeOutcome::Consumed { used } => {
                counters.insert(key.to_string(), used);
                Ok(ScriptReply {
                    applied: true,
                    value: used,
                })
            }
            ConsumeOutcome::Exceeded { used } => Ok(ScriptReply {
                applied: false,
                value: used,
            }),
        }
    }
}

impl AtomicScriptHost for InProcessScriptHost {
    fn eval_consume(&self, key: String, budget: u64, amount: u64) -> StoreFuture<'_, ScriptReply> {
        async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.run_consume(&key, budget, amount)
        }
        .boxed()
    }

    fn read_counter(&self, key: String) -> StoreFuture<'_, u64> {
        async move {
            let counters = self
                .counters
                .lock()
                .map_err(|_| IntakeError::storage("script host lock poisoned"))?;
            Ok(counters.get(&key).copied().unwrap_or(0))
        }
        .boxed()
    }
}

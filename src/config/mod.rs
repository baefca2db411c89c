//! Intake Configuration
//!
//! Every knob has a serde default so partial documents load, and every knob
//! can be overridden from an `INTAKE_*` environment variable.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{IntakeError, IntakeResult};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub status: StatusConfig,
}

/// Capacity governor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pending depth at which intake starts rejecting (default: 10000)
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// Depth must drop below `threshold - hysteresis` to reopen (default: 500)
    #[serde(default = "default_hysteresis")]
    pub hysteresis: u64,

    /// Depth cache lifetime in seconds (default: 5)
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Hint returned to rejected callers (default: 60)
    #[serde(default = "default_retry_after_seconds")]
    pub retry_after_seconds: u64,
}

fn default_threshold() -> u64 {
    10_000
}

fn default_hysteresis() -> u64 {
    500
}

fn default_cache_ttl_seconds() -> u64 {
    5
}

fn default_retry_after_seconds() -> u64 {
    60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            hysteresis: default_hysteresis(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            retry_after_seconds: default_retry_after_seconds(),
        }
    }
}

impl QueueConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Depth below which a rejecting governor reopens
    pub fn resume_below(&self) -> u64 {
        self.threshold.saturating_sub(self.hysteresis)
    }

    pub fn validate(&self) -> IntakeResult<()> {
        if self.threshold == 0 {
            return Err(IntakeError::InvalidConfig(
                "queue threshold must be positive".into(),
            ));
        }
        if self.hysteresis >= self.threshold {
            return Err(IntakeError::InvalidConfig(format!(
                "queue hysteresis ({}) must be less than threshold ({})",
                self.hysteresis, self.threshold
            )));
        }
        Ok(())
    }
}

/// Rate limiter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Submissions allowed per identity per window (default: 10)
    #[serde(default = "default_limit_per_window")]
    pub limit_per_window: u64,

    /// Sliding window size in minutes (default: 60)
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,

    /// Bucket retention in hours; must outlive the window (default: 2)
    #[serde(default = "default_bucket_ttl_hours")]
    pub bucket_ttl_hours: u64,
}

fn default_limit_per_window() -> u64 {
    10
}

fn default_window_minutes() -> u64 {
    60
}

fn default_bucket_ttl_hours() -> u64 {
    2
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit_per_window: default_limit_per_window(),
            window_minutes: default_window_minutes(),
            bucket_ttl_hours: default_bucket_ttl_hours(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> IntakeResult<()> {
        if self.limit_per_window == 0 {
            return Err(IntakeError::InvalidConfig(
                "rate limit per window must be positive".into(),
            ));
        }
        if self.window_minutes == 0 {
            return Err(IntakeError::InvalidConfig(
                "rate limit window must be positive".into(),
            ));
        }
        // Buckets evicted inside the window would under-count.
        if self.bucket_ttl_hours.saturating_mul(60) <= self.window_minutes {
            return Err(IntakeError::InvalidConfig(format!(
                "bucket ttl ({}h) must exceed window ({}m)",
                self.bucket_ttl_hours, self.window_minutes
            )));
        }
        Ok(())
    }
}

/// Promotion budget settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Budget per owner per cycle (default: 3)
    #[serde(default = "default_budget")]
    pub default_budget: u64,

    /// Per-owner budget overrides
    #[serde(default)]
    pub overrides: HashMap<String, u64>,
}

fn default_budget() -> u64 {
    3
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_budget: default_budget(),
            overrides: HashMap::new(),
        }
    }
}

impl BudgetConfig {
    /// Budget granted to `owner` each cycle
    pub fn budget_for(&self, owner: &str) -> u64 {
        self.overrides
            .get(owner)
            .copied()
            .unwrap_or(self.default_budget)
    }
}

/// Status token and long-poll settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Tokens older than this are rejected as expired (default: 300)
    #[serde(default = "default_token_max_age_seconds")]
    pub token_max_age_seconds: u64,

    /// Upper bound on a single long-poll wait (default: 30)
    #[serde(default = "default_long_poll_timeout_seconds")]
    pub long_poll_timeout_seconds: u64,

    /// Notifier entries with no waiter and no update for this long are
    /// swept (default: 600)
    #[serde(default = "default_notifier_idle_seconds")]
    pub notifier_idle_seconds: u64,
}

fn default_token_max_age_seconds() -> u64 {
    300
}

fn default_long_poll_timeout_seconds() -> u64 {
    30
}

fn default_notifier_idle_seconds() -> u64 {
    600
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            token_max_age_seconds: default_token_max_age_seconds(),
            long_poll_timeout_seconds: default_long_poll_timeout_seconds(),
            notifier_idle_seconds: default_notifier_idle_seconds(),
        }
    }
}

impl StatusConfig {
    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_seconds)
    }

    pub fn notifier_idle(&self) -> Duration {
        Duration::from_secs(self.notifier_idle_seconds)
    }
}

impl IntakeConfig {
    /// Defaults overridden by `INTAKE_*` environment variables
    pub fn from_env() -> IntakeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> IntakeResult<Self> {
        let mut config = Self::default();

        override_from(&lookup, "INTAKE_QUEUE_THRESHOLD", &mut config.queue.threshold)?;
        override_from(&lookup, "INTAKE_QUEUE_HYSTERESIS", &mut config.queue.hysteresis)?;
        override_from(
            &lookup,
            "INTAKE_QUEUE_CACHE_TTL_SECONDS",
            &mut config.queue.cache_ttl_seconds,
        )?;
        override_from(
            &lookup,
            "INTAKE_QUEUE_RETRY_AFTER_SECONDS",
            &mut config.queue.retry_after_seconds,
        )?;
        override_from(
            &lookup,
            "INTAKE_RATE_LIMIT_PER_WINDOW",
            &mut config.rate_limit.limit_per_window,
        )?;
        override_from(
            &lookup,
            "INTAKE_RATE_LIMIT_WINDOW_MINUTES",
            &mut config.rate_limit.window_minutes,
        )?;
        override_from(
            &lookup,
            "INTAKE_RATE_LIMIT_BUCKET_TTL_HOURS",
            &mut config.rate_limit.bucket_ttl_hours,
        )?;
        override_from(&lookup, "INTAKE_BUDGET_DEFAULT", &mut config.budget.default_budget)?;
        override_from(
            &lookup,
            "INTAKE_STATUS_TOKEN_MAX_AGE_SECONDS",
            &mut config.status.token_max_age_seconds,
        )?;
        override_from(
            &lookup,
            "INTAKE_STATUS_LONG_POLL_TIMEOUT_SECONDS",
            &mut config.status.long_poll_timeout_seconds,
        )?;
        override_from(
            &lookup,
            "INTAKE_STATUS_NOTIFIER_IDLE_SECONDS",
            &mut config.status.notifier_idle_seconds,
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> IntakeResult<()> {
        self.queue.validate()?;
        self.rate_limit.validate()?;
        if self.status.token_max_age_seconds == 0 {
            return Err(IntakeError::InvalidConfig(
                "token max age must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn override_from<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> IntakeResult<()> {
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| IntakeError::InvalidConfig(format!("{} has invalid value {:?}", key, raw)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IntakeConfig::default();
        assert_eq!(config.queue.threshold, 10_000);
        assert_eq!(config.queue.hysteresis, 500);
        assert_eq!(config.queue.cache_ttl_seconds, 5);
        assert_eq!(config.queue.retry_after_seconds, 60);
        assert_eq!(config.rate_limit.limit_per_window, 10);
        assert_eq!(config.rate_limit.window_minutes, 60);
        assert_eq!(config.rate_limit.bucket_ttl_hours, 2);
        assert_eq!(config.status.token_max_age_seconds, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: IntakeConfig =
            serde_json::from_str(r#"{"queue": {"threshold": 100}}"#).unwrap();
        assert_eq!(config.queue.threshold, 100);
        assert_eq!(config.queue.hysteresis, 500);
        // 500 >= 100
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hysteresis_must_be_below_threshold() {
        let queue = QueueConfig {
            threshold: 100,
            hysteresis: 100,
            ..Default::default()
        };
        assert!(matches!(queue.validate(), Err(IntakeError::InvalidConfig(_))));
    }

    #[test]
    fn test_bucket_ttl_must_exceed_window() {
        let rate = RateLimitConfig {
            window_minutes: 120,
            bucket_ttl_hours: 2,
            ..Default::default()
        };
        assert!(rate.validate().is_err());

        let rate = RateLimitConfig {
            window_minutes: 119,
            bucket_ttl_hours: 2,
            ..Default::default()
        };
        assert!(rate.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("INTAKE_QUEUE_THRESHOLD", "100"),
            ("INTAKE_QUEUE_HYSTERESIS", "10"),
            ("INTAKE_BUDGET_DEFAULT", "5"),
        ]
        .into_iter()
        .collect();
        let config = IntakeConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.queue.threshold, 100);
        assert_eq!(config.queue.hysteresis, 10);
        assert_eq!(config.queue.resume_below(), 90);
        assert_eq!(config.budget.default_budget, 5);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let result = IntakeConfig::from_lookup(|k| {
            (k == "INTAKE_RATE_LIMIT_PER_WINDOW").then(|| "ten".to_string())
        });
        assert!(matches!(result, Err(IntakeError::InvalidConfig(_))));
    }

    #[test]
    fn test_budget_overrides() {
        let mut budget = BudgetConfig::default();
        budget.overrides.insert("council".into(), 7);
        assert_eq!(budget.budget_for("council"), 7);
        assert_eq!(budget.budget_for("anyone"), 3);
    }
}

//! Intake counters
//!
//! Counters only, monotonic, reset on process start. Relaxed ordering: the
//! values are exact per counter but not a consistent cut across counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for the admission core
#[derive(Debug, Default)]
pub struct IntakeMetrics {
    submissions_accepted: AtomicU64,
    capacity_rejections: AtomicU64,
    rate_limit_rejections: AtomicU64,
    halt_rejections: AtomicU64,
    fates_assigned: AtomicU64,
    fate_conflicts: AtomicU64,
    budget_consumed: AtomicU64,
    budget_exceeded: AtomicU64,
    long_poll_wakeups: AtomicU64,
    long_poll_timeouts: AtomicU64,
    capacity_flips: AtomicU64,
    rate_buckets_evicted: AtomicU64,
}

impl IntakeMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_submissions_accepted(&self) {
        self.submissions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_capacity_rejections(&self) {
        self.capacity_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rate_limit_rejections(&self) {
        self.rate_limit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_halt_rejections(&self) {
        self.halt_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fates_assigned(&self) {
        self.fates_assigned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fate_conflicts(&self) {
        self.fate_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Add consumed budget units
    pub fn add_budget_consumed(&self, units: u64) {
        self.budget_consumed.fetch_add(units, Ordering::Relaxed);
    }

    pub fn increment_budget_exceeded(&self) {
        self.budget_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_long_poll_wakeups(&self) {
        self.long_poll_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_long_poll_timeouts(&self) {
        self.long_poll_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_capacity_flips(&self) {
        self.capacity_flips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rate_buckets_evicted(&self, buckets: u64) {
        self.rate_buckets_evicted.fetch_add(buckets, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions_accepted: self.submissions_accepted.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            rate_limit_rejections: self.rate_limit_rejections.load(Ordering::Relaxed),
            halt_rejections: self.halt_rejections.load(Ordering::Relaxed),
            fates_assigned: self.fates_assigned.load(Ordering::Relaxed),
            fate_conflicts: self.fate_conflicts.load(Ordering::Relaxed),
            budget_consumed: self.budget_consumed.load(Ordering::Relaxed),
            budget_exceeded: self.budget_exceeded.load(Ordering::Relaxed),
            long_poll_wakeups: self.long_poll_wakeups.load(Ordering::Relaxed),
            long_poll_timeouts: self.long_poll_timeouts.load(Ordering::Relaxed),
            capacity_flips: self.capacity_flips.load(Ordering::Relaxed),
            rate_buckets_evicted: self.rate_buckets_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`IntakeMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub submissions_accepted: u64,
    pub capacity_rejections: u64,
    pub rate_limit_rejections: u64,
    pub halt_rejections: u64,
    pub fates_assigned: u64,
    pub fate_conflicts: u64,
    pub budget_consumed: u64,
    pub budget_exceeded: u64,
    pub long_poll_wakeups: u64,
    pub long_poll_timeouts: u64,
    pub capacity_flips: u64,
    pub rate_buckets_evicted: u64,
}

//! Per-record version registry with long-poll wake-ups

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::observability::{IntakeEvent, IntakeMetrics};

#[derive(Debug)]
struct Entry {
    version: u64,
    signal: Arc<Notify>,
    touched: Instant,
}

impl Entry {
    fn new(version: u64) -> Self {
        Self {
            version,
            signal: Arc::new(Notify::new()),
            touched: Instant::now(),
        }
    }

    /// Nobody is waiting on the current signal
    fn is_unwatched(&self) -> bool {
        Arc::strong_count(&self.signal) == 1
    }
}

/// Decrements the waiter count on every exit path, including cancellation
struct WaiterGuard<'a> {
    count: &'a AtomicUsize,
}

impl<'a> WaiterGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Status change notifier.
///
/// Each tracked record has a version and a wait signal. A version change
/// broadcasts to every current waiter and installs a fresh signal under the
/// same lock, so a signal is fired at most once. Versions only move forward.
///
/// Entries are a cache of the record store's versions. Idle ones are swept by
/// [`Self::sweep_idle`]; callers re-register from the store before waiting.
#[derive(Debug)]
pub struct StatusChangeNotifier {
    entries: Mutex<HashMap<Uuid, Entry>>,
    active_waiters: AtomicUsize,
    metrics: Arc<IntakeMetrics>,
}

impl Default for StatusChangeNotifier {
    fn default() -> Self {
        Self::new(Arc::new(IntakeMetrics::new()))
    }
}

impl StatusChangeNotifier {
    pub fn new(metrics: Arc<IntakeMetrics>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            active_waiters: AtomicUsize::new(0),
            metrics,
        }
    }

    // The map only holds plain data; a panicked holder cannot leave it torn.
    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track `id` starting at `initial_version`; returns the tracked version
    pub fn register_or_get(&self, id: Uuid, initial_version: u64) -> u64 {
        let mut entries = self.entries();
        let entry = entries
            .entry(id)
            .or_insert_with(|| Entry::new(initial_version));
        entry.touched = Instant::now();
        entry.version
    }

    pub fn current_version(&self, id: Uuid) -> Option<u64> {
        self.entries().get(&id).map(|e| e.version)
    }

    /// Publish a new version, waking all waiters if it moved forward.
    ///
    /// Publishers run after their store commit, so two of them may arrive
    /// out of order; a version at or below the stored one is ignored.
    /// Returns whether the stored version changed.
    pub fn update_version(&self, id: Uuid, new_version: u64) -> bool {
        let mut entries = self.entries();
        let entry = match entries.get_mut(&id) {
            Some(entry) => entry,
            None => {
                entries.insert(id, Entry::new(new_version));
                return true;
            }
        };
        if new_version <= entry.version {
            return false;
        }

        entry.version = new_version;
        entry.touched = Instant::now();
        let fired = std::mem::replace(&mut entry.signal, Arc::new(Notify::new()));
        fired.notify_waiters();
        tracing::debug!(petition_id = %id, version = new_version, "status version published");
        true
    }

    /// Wait until the version of `id` differs from `known_version`.
    ///
    /// Returns `true` at once when it already differs, `true` when woken by a
    /// change, `false` on timeout. Dropping the future cancels the wait.
    pub async fn wait_for_change(&self, id: Uuid, known_version: u64, timeout: Duration) -> bool {
        let signal = {
            let mut entries = self.entries();
            let entry = entries
                .entry(id)
                .or_insert_with(|| Entry::new(known_version));
            if entry.version != known_version {
                self.metrics.increment_long_poll_wakeups();
                return true;
            }
            entry.touched = Instant::now();
            Arc::clone(&entry.signal)
        };

        let _guard = WaiterGuard::enter(&self.active_waiters);
        let notified = signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        // A publish between releasing the lock and enabling fired the signal
        // before we were listening.
        if self.changed_since(id, known_version) {
            self.metrics.increment_long_poll_wakeups();
            return true;
        }

        let woke = match tokio::time::timeout(timeout, notified).await {
            Ok(()) => true,
            Err(_) => self.changed_since(id, known_version),
        };

        if woke {
            self.metrics.increment_long_poll_wakeups();
            tracing::debug!(event = %IntakeEvent::LongPollWoke, petition_id = %id, known_version, "long-poll woke");
        } else {
            self.metrics.increment_long_poll_timeouts();
            tracing::debug!(event = %IntakeEvent::LongPollTimedOut, petition_id = %id, known_version, "long-poll timed out");
        }
        woke
    }

    fn changed_since(&self, id: Uuid, known_version: u64) -> bool {
        // A forgotten entry counts as a change: the caller should re-read.
        self.current_version(id)
            .map(|v| v != known_version)
            .unwrap_or(true)
    }

    /// Stop tracking `id`, releasing anyone still waiting on it
    pub fn forget(&self, id: Uuid) -> bool {
        match self.entries().remove(&id) {
            Some(entry) => {
                entry.signal.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Drop entries nobody waits on that have not been touched for `idle_for`.
    ///
    /// Returns how many were removed.
    pub fn sweep_idle(&self, idle_for: Duration) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !(entry.is_unwatched() && entry.touched.elapsed() >= idle_for));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "idle status entries swept");
        }
        removed
    }

    /// Run [`Self::sweep_idle`] every `interval` until the handle is aborted
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, idle_for: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_idle(idle_for);
            }
        })
    }

    pub fn active_waiter_count(&self) -> usize {
        self.active_waiters.load(Ordering::SeqCst)
    }

    pub fn tracked_count(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_stale_version_returns_immediately() {
        let notifier = StatusChangeNotifier::default();
        let id = Uuid::new_v4();
        notifier.register_or_get(id, 3);

        let started = Instant::now();
        assert!(notifier.wait_for_change(id, 2, Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(notifier.active_waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_register_does_not_overwrite() {
        let notifier = StatusChangeNotifier::default();
        let id = Uuid::new_v4();
        assert_eq!(notifier.register_or_get(id, 1), 1);
        notifier.update_version(id, 4);
        assert_eq!(notifier.register_or_get(id, 1), 4);
        assert!(!notifier.update_version(id, 4));
    }

    #[tokio::test]
    async fn test_older_version_never_replaces_newer() {
        let notifier = StatusChangeNotifier::default();
        let id = Uuid::new_v4();
        notifier.register_or_get(id, 1);

        assert!(notifier.update_version(id, 5));
        assert!(!notifier.update_version(id, 4));
        assert_eq!(notifier.current_version(id), Some(5));

        // A reader holding the newest version really waits.
        let started = Instant::now();
        assert!(!notifier.wait_for_change(id, 5, Duration::from_millis(30)).await);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_sweep_keeps_watched_entries() {
        let notifier = Arc::new(StatusChangeNotifier::default());
        let idle = Uuid::new_v4();
        let watched = Uuid::new_v4();
        notifier.register_or_get(idle, 1);
        notifier.register_or_get(watched, 1);

        let task = {
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move { notifier.wait_for_change(watched, 1, Duration::from_secs(30)).await })
        };
        while notifier.active_waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(notifier.sweep_idle(Duration::from_secs(60)), 0);
        assert_eq!(notifier.sweep_idle(Duration::ZERO), 1);
        assert_eq!(notifier.current_version(idle), None);
        assert_eq!(notifier.current_version(watched), Some(1));

        assert!(notifier.update_version(watched, 2));
        assert!(task.await.unwrap());
        assert_eq!(notifier.sweep_idle(Duration::ZERO), 1);
        assert_eq!(notifier.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_swept_entry_is_rebuilt_on_register() {
        let notifier = StatusChangeNotifier::default();
        let id = Uuid::new_v4();
        notifier.register_or_get(id, 1);
        notifier.update_version(id, 3);
        notifier.sweep_idle(Duration::ZERO);

        assert_eq!(notifier.register_or_get(id, 3), 3);
        assert!(notifier.update_version(id, 4));
        assert!(notifier.wait_for_change(id, 3, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_timeout_returns_false() {
        let notifier = StatusChangeNotifier::default();
        let id = Uuid::new_v4();
        notifier.register_or_get(id, 1);
        assert!(!notifier.wait_for_change(id, 1, Duration::from_millis(20)).await);
        assert_eq!(notifier.active_waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_update_wakes_every_waiter() {
        let notifier = Arc::new(StatusChangeNotifier::default());
        let id = Uuid::new_v4();
        notifier.register_or_get(id, 1);

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let notifier = Arc::clone(&notifier);
                tokio::spawn(async move {
                    notifier.wait_for_change(id, 1, Duration::from_secs(5)).await
                })
            })
            .collect();

        while notifier.active_waiter_count() < 4 {
            tokio::task::yield_now().await;
        }
        assert!(notifier.update_version(id, 2));

        for waiter in waiters {
            assert!(waiter.await.unwrap());
        }
        assert_eq!(notifier.active_waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_releases_count() {
        let notifier = Arc::new(StatusChangeNotifier::default());
        let id = Uuid::new_v4();
        notifier.register_or_get(id, 1);

        let task = {
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move { notifier.wait_for_change(id, 1, Duration::from_secs(30)).await })
        };
        while notifier.active_waiter_count() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(notifier.active_waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_forget_releases_waiters() {
        let notifier = Arc::new(StatusChangeNotifier::default());
        let id = Uuid::new_v4();
        notifier.register_or_get(id, 1);

        let task = {
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move { notifier.wait_for_change(id, 1, Duration::from_secs(30)).await })
        };
        while notifier.active_waiter_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(notifier.forget(id));
        assert!(task.await.unwrap());
        assert_eq!(notifier.tracked_count(), 0);
    }
}

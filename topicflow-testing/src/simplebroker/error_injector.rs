//! Error injection controller for testing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Controller for injecting errors during testing.
///
/// This allows tests to force specific error conditions like consume errors reported by the
/// broker, failing commits or a broken connection.
#[derive(Debug, Default)]
pub struct ErrorInjector {
    /// Report the next N records as consume errors (the records are skipped).
    consume_errors: AtomicUsize,
    /// Fail the next N polls with a non-recoverable error.
    fail_next_polls: AtomicUsize,
    /// Fail the next N commits.
    fail_next_commits: AtomicUsize,
    /// Fail the next N metadata requests.
    fail_next_metadata: AtomicUsize,
    /// Artificial poll latency in milliseconds.
    poll_latency_ms: AtomicU64,
}

impl ErrorInjector {
    /// Create a new error injector with all errors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the next N records as consume errors.
    pub fn consume_errors(&self, count: usize) {
        self.consume_errors.store(count, Ordering::Relaxed);
    }

    /// Fail the next N polls.
    pub fn fail_polls(&self, count: usize) {
        self.fail_next_polls.store(count, Ordering::Relaxed);
    }

    /// Fail the next N commits.
    pub fn fail_commits(&self, count: usize) {
        self.fail_next_commits.store(count, Ordering::Relaxed);
    }

    /// Fail the next N metadata requests.
    pub fn fail_metadata(&self, count: usize) {
        self.fail_next_metadata.store(count, Ordering::Relaxed);
    }

    /// Set artificial poll latency.
    pub fn set_poll_latency(&self, ms: u64) {
        self.poll_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn should_report_consume_error(&self) -> bool {
        Self::decrement_counter(&self.consume_errors)
    }

    pub(crate) fn should_fail_poll(&self) -> bool {
        Self::decrement_counter(&self.fail_next_polls)
    }

    pub(crate) fn should_fail_commit(&self) -> bool {
        Self::decrement_counter(&self.fail_next_commits)
    }

    pub(crate) fn should_fail_metadata(&self) -> bool {
        Self::decrement_counter(&self.fail_next_metadata)
    }

    /// Decrements the counter if positive, returns whether it was.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok()
    }

    pub(crate) async fn apply_poll_latency(&self) {
        let ms = self.poll_latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

//! Cooperative progress reporting and cancellation.
//!
//! Transports poll a [`Progress`] observer between transfer chunks;
//! returning `true` from [`Progress::report_progress`] or
//! [`Progress::is_canceled`] aborts the transfer. The client facade
//! uses the same observer to surface a "retry later" signal: on a
//! recoverable error it sets a retry delay and cancels the callback,
//! and the caller's scheduler reads both.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Observer consulted during a transfer.
///
/// All methods take `&self`; implementations use interior mutability so
/// a single observer can be shared across the transport and the
/// caller's scheduler.
pub trait Progress: Send + Sync {
    /// Reports bytes transferred so far. Returning `true` cancels the
    /// transfer.
    fn report_progress(&self, done: u64, total: u64) -> bool;

    /// Returns true if the operation was canceled out-of-band.
    fn is_canceled(&self) -> bool;

    /// Requests cancellation.
    fn cancel(&self);

    /// Suggests how long the caller should wait before retrying.
    fn set_retry_delay(&self, seconds: f64);

    /// Returns the suggested retry delay in seconds.
    fn retry_delay(&self) -> f64;

    /// Replaces the status message.
    fn set_message(&self, message: &str);

    /// Returns the current status message.
    fn message(&self) -> String;
}

/// Default [`Progress`] implementation backed by atomics.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    canceled: AtomicBool,
    done: AtomicU64,
    total: AtomicU64,
    /// Retry delay in milliseconds; stored integrally to stay atomic.
    retry_delay_ms: AtomicU64,
    message: Mutex<String>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last reported (done, total) byte counts.
    pub fn reported(&self) -> (u64, u64) {
        (
            self.done.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        )
    }
}

impl Progress for ProgressTracker {
    fn report_progress(&self, done: u64, total: u64) -> bool {
        self.done.store(done, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
        self.is_canceled()
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    fn set_retry_delay(&self, seconds: f64) {
        let ms = (seconds.max(0.0) * 1000.0) as u64;
        self.retry_delay_ms.store(ms, Ordering::Relaxed);
    }

    fn retry_delay(&self) -> f64 {
        self.retry_delay_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }

    fn set_message(&self, message: &str) {
        if let Ok(mut guard) = self.message.lock() {
            *guard = message.to_string();
        }
    }

    fn message(&self) -> String {
        self.message.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_progress_returns_cancel_state() {
        let tracker = ProgressTracker::new();
        assert!(!tracker.report_progress(10, 100));
        tracker.cancel();
        assert!(tracker.report_progress(20, 100));
        assert_eq!(tracker.reported(), (20, 100));
    }

    #[test]
    fn test_retry_delay_round_trip() {
        let tracker = ProgressTracker::new();
        tracker.set_retry_delay(1.5);
        assert!((tracker.retry_delay() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_message() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.message(), "");
        tracker.set_message("Server deferral");
        assert_eq!(tracker.message(), "Server deferral");
    }
}

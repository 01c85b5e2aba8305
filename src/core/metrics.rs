//! Appender counters
//!
//! Every appender wrapper owns one [`LoggerMetrics`] so callers can see how many
//! events were written, filtered out, dropped or lost to write failures.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    const fn new() -> Self {
        Counter(AtomicU64::new(0))
    }

    /// Returns the value before the increment
    #[inline]
    fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic counters for one appender
///
/// The `record_*` methods return the count before the event, which lets
/// callers report the first occurrence and every Nth one after it.
///
/// ```
/// use rust_log_pipeline::LoggerMetrics;
///
/// let metrics = LoggerMetrics::new();
/// assert_eq!(metrics.record_dropped(), 0);
/// metrics.record_logged();
///
/// let snapshot = metrics.snapshot();
/// assert_eq!((snapshot.logged, snapshot.dropped), (1, 1));
/// ```
#[derive(Debug, Default)]
pub struct LoggerMetrics {
    logged: Counter,
    dropped: Counter,
    filtered: Counter,
    write_errors: Counter,
    queue_full: Counter,
    blocked: Counter,
}

/// Point-in-time copy of [`LoggerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Handed to the destination successfully
    pub logged: u64,
    /// Discarded by a full queue, the discard threshold or quarantine
    pub dropped: u64,
    /// Rejected by the filter chain
    pub filtered: u64,
    pub write_errors: u64,
    /// Producer found the queue full
    pub queue_full: u64,
    /// Producer waited for queue space
    pub blocked: u64,
}

impl LoggerMetrics {
    pub const fn new() -> Self {
        Self {
            logged: Counter::new(),
            dropped: Counter::new(),
            filtered: Counter::new(),
            write_errors: Counter::new(),
            queue_full: Counter::new(),
            blocked: Counter::new(),
        }
    }

    pub fn total_logged(&self) -> u64 {
        self.logged.get()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }

    pub fn filtered_count(&self) -> u64 {
        self.filtered.get()
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.get()
    }

    pub fn queue_full_events(&self) -> u64 {
        self.queue_full.get()
    }

    pub fn block_events(&self) -> u64 {
        self.blocked.get()
    }

    pub fn record_logged(&self) -> u64 {
        self.logged.bump()
    }

    pub fn record_dropped(&self) -> u64 {
        self.dropped.bump()
    }

    pub fn record_filtered(&self) -> u64 {
        self.filtered.bump()
    }

    pub fn record_write_error(&self) -> u64 {
        self.write_errors.bump()
    }

    pub fn record_queue_full(&self) -> u64 {
        self.queue_full.bump()
    }

    pub fn record_block(&self) -> u64 {
        self.blocked.bump()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            logged: self.total_logged(),
            dropped: self.dropped_count(),
            filtered: self.filtered_count(),
            write_errors: self.write_errors(),
            queue_full: self.queue_full_events(),
            blocked: self.block_events(),
        }
    }
}

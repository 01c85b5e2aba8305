//! Diagnostic channel for the logging framework itself
//!
//! Components never write framework problems through the pipeline they belong
//! to. They report a [`Status`] to the context's [`StatusManager`] instead, which
//! keeps a bounded record and forwards each entry to registered listeners.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Number of earliest entries always retained
pub const MAX_HEAD_SIZE: usize = 150;
/// Number of most recent entries retained after the head is full
pub const MAX_TAIL_SIZE: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            StatusLevel::Info => "INFO",
            StatusLevel::Warn => "WARN",
            StatusLevel::Error => "ERROR",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub level: StatusLevel,
    pub timestamp: DateTime<Utc>,
    pub origin: String,
    pub message: String,
    /// Rendered cause chain, outermost first
    pub causes: Vec<String>,
}

impl Status {
    pub fn new(level: StatusLevel, origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            origin: origin.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn info(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, origin, message)
    }

    pub fn warn(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warn, origin, message)
    }

    pub fn error(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, origin, message)
    }

    /// Attach `err` and its `source()` chain
    #[must_use]
    pub fn with_cause(mut self, err: &(dyn Error + 'static)) -> Self {
        let mut current = Some(err);
        while let Some(e) = current {
            self.causes.push(e.to_string());
            current = e.source();
        }
        self
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[LOGGER {}] {} - {}", self.level, self.origin, self.message)?;
        for cause in &self.causes {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

/// Receives every status as it is added
pub trait StatusListener: Send + Sync {
    fn on_status(&self, status: &Status);
}

/// Prints each status to stderr
#[derive(Debug, Default)]
pub struct OnConsoleStatusListener {
    min_level: Option<StatusLevel>,
}

impl OnConsoleStatusListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only print entries at or above `level`
    #[must_use]
    pub fn with_min_level(mut self, level: StatusLevel) -> Self {
        self.min_level = Some(level);
        self
    }
}

impl StatusListener for OnConsoleStatusListener {
    fn on_status(&self, status: &Status) {
        if self.min_level.map_or(true, |min| status.level >= min) {
            eprintln!("{}", status);
        }
    }
}

/// Collects entries in memory, useful for assertions
#[derive(Debug, Default)]
pub struct CollectingStatusListener {
    entries: Mutex<Vec<Status>>,
}

impl CollectingStatusListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Status> {
        self.entries.lock().clone()
    }

    pub fn count(&self, level: StatusLevel) -> usize {
        self.entries.lock().iter().filter(|s| s.level == level).count()
    }
}

impl StatusListener for CollectingStatusListener {
    fn on_status(&self, status: &Status) {
        self.entries.lock().push(status.clone());
    }
}

#[derive(Default)]
struct Inner {
    head: Vec<Status>,
    tail: VecDeque<Status>,
    count: u64,
    highest: Option<StatusLevel>,
    listeners: Vec<Arc<dyn StatusListener>>,
}

/// Append-only, bounded status log
///
/// The first [`MAX_HEAD_SIZE`] entries are kept forever; later entries go to a
/// cyclic tail of [`MAX_TAIL_SIZE`].
#[derive(Default)]
pub struct StatusManager {
    inner: Mutex<Inner>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, status: Status) {
        let listeners = {
            let mut inner = self.inner.lock();
            inner.count += 1;
            inner.highest = inner.highest.max(Some(status.level));
            let listeners = inner.listeners.clone();
            if inner.head.len() < MAX_HEAD_SIZE {
                inner.head.push(status.clone());
            } else {
                if inner.tail.len() == MAX_TAIL_SIZE {
                    inner.tail.pop_front();
                }
                inner.tail.push_back(status.clone());
            }
            listeners
        };
        // listeners run outside the lock so they may query the manager
        for listener in listeners {
            listener.on_status(&status);
        }
    }

    /// Retained entries in insertion order
    pub fn statuses(&self) -> Vec<Status> {
        let inner = self.inner.lock();
        inner.head.iter().chain(inner.tail.iter()).cloned().collect()
    }

    /// Total number of entries ever added
    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    pub fn highest_level(&self) -> Option<StatusLevel> {
        self.inner.lock().highest
    }

    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) {
        self.inner.lock().listeners.push(listener);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.head.clear();
        inner.tail.clear();
        inner.count = 0;
        inner.highest = None;
    }
}

impl fmt::Debug for StatusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StatusManager")
            .field("count", &inner.count)
            .field("highest", &inner.highest)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_read_back() {
        let sm = StatusManager::new();
        sm.add(Status::info("ctx", "started"));
        sm.add(Status::warn("appender", "slow"));

        let all = sm.statuses();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].origin, "appender");
        assert_eq!(sm.highest_level(), Some(StatusLevel::Warn));
    }

    #[test]
    fn test_bounded_head_and_tail() {
        let sm = StatusManager::new();
        let total = MAX_HEAD_SIZE + MAX_TAIL_SIZE + 50;
        for i in 0..total {
            sm.add(Status::info("loop", format!("{}", i)));
        }
        let all = sm.statuses();
        assert_eq!(all.len(), MAX_HEAD_SIZE + MAX_TAIL_SIZE);
        assert_eq!(sm.count(), total as u64);
        assert_eq!(all[0].message, "0");
        assert_eq!(all[MAX_HEAD_SIZE - 1].message, format!("{}", MAX_HEAD_SIZE - 1));
        // oldest tail entries were evicted
        assert_eq!(all[MAX_HEAD_SIZE].message, format!("{}", MAX_HEAD_SIZE + 50));
        assert_eq!(all.last().unwrap().message, format!("{}", total - 1));
    }

    #[test]
    fn test_listener_receives_entries() {
        let sm = StatusManager::new();
        let listener = Arc::new(CollectingStatusListener::new());
        sm.add_listener(listener.clone());
        sm.add(Status::error("x", "boom"));
        assert_eq!(listener.count(StatusLevel::Error), 1);
    }

    #[test]
    fn test_status_display_with_cause() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let status = Status::error("FILE", "write failed").with_cause(&io_err);
        assert_eq!(
            status.to_string(),
            "[LOGGER ERROR] FILE - write failed (caused by: disk full)"
        );
    }
}

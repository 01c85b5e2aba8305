//! Appender traits and the synchronous appender wrapper
//!
//! Destinations implement the small [`Appender`] trait. Loggers only see
//! [`EventAppender`]s, usually a [`SyncAppender`] around a destination, which adds
//! lifecycle checks, the filter chain, write serialisation, panic isolation and
//! the error quarantine.

use super::context::{ContextHandle, LifeCycle};
use super::error::Result;
use super::log_event::LogEvent;
use super::metrics::LoggerMetrics;
use super::scheduler::ScheduledTask;
use crate::filter::{Filter, FilterChain, FilterReply};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Consecutive write failures before an appender is quarantined
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;
/// First delay before reopening a quarantined destination
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound for the reopen delay
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A log destination: formats and writes single events
pub trait Appender: Send {
    fn name(&self) -> &str;

    /// Open resources; called once before the first append
    fn start(&mut self, _context: &ContextHandle) -> Result<()> {
        Ok(())
    }

    fn append(&mut self, event: &LogEvent) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn stop(&mut self) {
        let _ = self.flush();
    }

    /// Reacquire the destination after repeated failures
    fn reopen(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What loggers dispatch to
pub trait EventAppender: LifeCycle {
    /// Deliver one event; never fails and never panics towards the caller
    fn do_append(&self, event: &Arc<LogEvent>);

    fn flush(&self) {}

    fn metrics(&self) -> &LoggerMetrics;
}

pub type AppenderRef = Arc<dyn EventAppender>;

struct Inner {
    name: String,
    context: ContextHandle,
    destination: Mutex<Box<dyn Appender>>,
    filters: RwLock<FilterChain>,
    started: AtomicBool,
    not_started_reported: AtomicBool,
    quarantined: AtomicBool,
    consecutive_errors: AtomicU32,
    error_threshold: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    reopen_task: Mutex<Option<ScheduledTask>>,
    metrics: LoggerMetrics,
}

/// Serialising wrapper that turns an [`Appender`] into an [`EventAppender`]
///
/// After `error_threshold` consecutive failures the destination is quarantined:
/// events are discarded and counted while reopen attempts run on the context
/// scheduler with exponential backoff. A successful reopen lifts the quarantine.
///
/// The `with_*` builders other than [`with_filter`](Self::with_filter) only take
/// effect before the appender is in use; once a reopen task refers to it they
/// are ignored and a warning is added to the status log.
pub struct SyncAppender {
    inner: Arc<Inner>,
}

impl SyncAppender {
    pub fn new(destination: impl Appender + 'static) -> Self {
        Self::from_boxed(Box::new(destination))
    }

    pub fn from_boxed(destination: Box<dyn Appender>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: destination.name().to_string(),
                context: ContextHandle::detached(),
                destination: Mutex::new(destination),
                filters: RwLock::new(FilterChain::new()),
                started: AtomicBool::new(false),
                not_started_reported: AtomicBool::new(false),
                quarantined: AtomicBool::new(false),
                consecutive_errors: AtomicU32::new(0),
                error_threshold: DEFAULT_ERROR_THRESHOLD,
                initial_backoff: DEFAULT_INITIAL_BACKOFF,
                max_backoff: DEFAULT_MAX_BACKOFF,
                reopen_task: Mutex::new(None),
                metrics: LoggerMetrics::new(),
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut Inner)) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => f(inner),
            None => self
                .inner
                .context
                .add_warn(&self.inner.name, "Appender already in use, configuration ignored"),
        }
        self
    }

    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.configure(|inner| inner.name = name)
    }

    #[must_use]
    pub fn with_context(self, context: ContextHandle) -> Self {
        self.configure(|inner| inner.context = context)
    }

    #[must_use]
    pub fn with_filter(self, filter: Box<dyn Filter>) -> Self {
        self.inner.filters.write().add(filter);
        self
    }

    #[must_use]
    pub fn with_error_threshold(self, threshold: u32) -> Self {
        self.configure(|inner| inner.error_threshold = threshold.max(1))
    }

    #[must_use]
    pub fn with_backoff(self, initial: Duration, max: Duration) -> Self {
        self.configure(|inner| {
            inner.initial_backoff = initial;
            inner.max_backoff = max.max(initial);
        })
    }

    pub fn add_filter(&self, filter: Box<dyn Filter>) {
        self.inner.filters.write().add(filter);
    }

    pub fn is_quarantined(&self) -> bool {
        self.inner.quarantined.load(Ordering::Acquire)
    }

    /// Run `f` against the destination under the appender lock
    pub fn with_destination<T>(&self, f: impl FnOnce(&mut dyn Appender) -> T) -> T {
        let mut dest = self.inner.destination.lock();
        f(dest.as_mut())
    }
}

impl Inner {
    fn record_failure(self: &Arc<Self>, reason: String) {
        self.metrics.record_write_error();
        let errors = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
        if errors < self.error_threshold {
            self.context
                .add_warn(&self.name, format!("Append failed ({}): {}", errors, reason));
            return;
        }
        if self.quarantined.swap(true, Ordering::AcqRel) {
            return;
        }
        self.context.add_error(
            &self.name,
            format!(
                "Appender quarantined after {} consecutive failures, last: {}",
                errors, reason
            ),
        );
        self.schedule_reopen(self.initial_backoff);
    }

    fn schedule_reopen(self: &Arc<Self>, delay: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let task = self.context.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.try_reopen(delay);
            }
        });
        if task.is_none() {
            self.context.add_warn(
                &self.name,
                "No scheduler available, destination will stay quarantined",
            );
        }
        *self.reopen_task.lock() = task;
    }

    fn try_reopen(self: &Arc<Self>, last_delay: Duration) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        let outcome = {
            let mut dest = self.destination.lock();
            catch_unwind(AssertUnwindSafe(|| dest.reopen()))
        };
        match outcome {
            Ok(Ok(())) => {
                self.consecutive_errors.store(0, Ordering::Release);
                self.quarantined.store(false, Ordering::Release);
                self.context.add_info(&self.name, "Destination reopened, quarantine lifted");
            }
            Ok(Err(e)) => {
                let next = (last_delay * 2).min(self.max_backoff);
                self.context.add_warn(
                    &self.name,
                    format!("Reopen failed: {}, retrying in {:?}", e, next),
                );
                self.schedule_reopen(next);
            }
            Err(_) => {
                let next = (last_delay * 2).min(self.max_backoff);
                self.context
                    .add_error(&self.name, "Reopen panicked, retrying later");
                self.schedule_reopen(next);
            }
        }
    }
}

impl LifeCycle for SyncAppender {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.started.load(Ordering::Acquire) {
            return Ok(());
        }
        inner.filters.write().start(&inner.context);
        let outcome = {
            let mut dest = inner.destination.lock();
            dest.start(&inner.context)
        };
        match outcome {
            Ok(()) => {
                inner.consecutive_errors.store(0, Ordering::Release);
                inner.quarantined.store(false, Ordering::Release);
                inner.not_started_reported.store(false, Ordering::Release);
                inner.started.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                inner
                    .context
                    .add_error(&inner.name, format!("Failed to start: {}", e));
                Err(e)
            }
        }
    }

    fn stop(&self) {
        let inner = &self.inner;
        if !inner.started.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = inner.reopen_task.lock().take() {
            task.cancel();
        }
        {
            let mut dest = inner.destination.lock();
            let _ = catch_unwind(AssertUnwindSafe(|| dest.stop()));
        }
        inner.filters.write().stop();
    }

    fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }
}

impl EventAppender for SyncAppender {
    fn do_append(&self, event: &Arc<LogEvent>) {
        let inner = &self.inner;
        if !inner.started.load(Ordering::Acquire) {
            if !inner.not_started_reported.swap(true, Ordering::AcqRel) {
                inner.context.add_error(
                    &inner.name,
                    "Attempted to append to a non-started appender",
                );
            }
            return;
        }

        if inner.filters.read().decide(event) == FilterReply::Deny {
            inner.metrics.record_filtered();
            return;
        }

        if inner.quarantined.load(Ordering::Acquire) {
            inner.metrics.record_dropped();
            return;
        }

        let outcome = {
            let mut dest = inner.destination.lock();
            catch_unwind(AssertUnwindSafe(|| dest.append(event)))
        };
        match outcome {
            Ok(Ok(())) => {
                inner.consecutive_errors.store(0, Ordering::Release);
                inner.metrics.record_logged();
            }
            Ok(Err(e)) => inner.record_failure(e.to_string()),
            Err(_) => inner.record_failure("destination panicked".to_string()),
        }
    }

    fn flush(&self) {
        let mut dest = self.inner.destination.lock();
        if let Ok(Err(e)) = catch_unwind(AssertUnwindSafe(|| dest.flush())) {
            self.inner
                .context
                .add_warn(&self.inner.name, format!("Flush failed: {}", e));
        }
    }

    fn metrics(&self) -> &LoggerMetrics {
        &self.inner.metrics
    }
}

impl fmt::Debug for SyncAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncAppender")
            .field("name", &self.inner.name)
            .field("started", &self.is_started())
            .field("quarantined", &self.is_quarantined())
            .finish()
    }
}

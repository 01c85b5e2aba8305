//! Queue-backed appender that hands events to a slower downstream appender on
//! a dedicated worker thread

use crate::core::appender::{AppenderRef, EventAppender};
use crate::core::context::{ContextHandle, LifeCycle};
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use crate::core::metrics::LoggerMetrics;
use crate::filter::{Filter, FilterChain, FilterReply};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_QUEUE_SIZE: usize = 256;
pub const DEFAULT_MAX_FLUSH_TIME: Duration = Duration::from_millis(1000);

/// A drop warning is emitted on the first drop and then every this many drops
const DROP_REPORT_INTERVAL: u64 = 1000;

#[derive(Default)]
struct Queue {
    events: VecDeque<Arc<LogEvent>>,
    /// The front event is being delivered and still owns its slot
    in_flight: bool,
    closed: bool,
    abandoned: bool,
}

/// Queue state of one started period; a worker abandoned by a timed-out stop
/// keeps its own copy and never sees the queue of a later start
struct Shared {
    queue: Mutex<Queue>,
    not_empty: Condvar,
    not_full: Condvar,
    metrics: Arc<LoggerMetrics>,
}

impl Shared {
    fn new(metrics: &Arc<LoggerMetrics>, capacity: usize) -> Arc<Self> {
        let mut queue = Queue::default();
        queue.events.reserve(capacity);
        Arc::new(Shared {
            queue: Mutex::new(queue),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            metrics: Arc::clone(metrics),
        })
    }
}

enum Offer {
    Queued,
    Discarded,
    Rejected,
}

/// Bounded FIFO in front of a downstream appender
///
/// Producers never touch the downstream appender. When less than
/// `discarding_threshold` slots remain, TRACE/DEBUG/INFO events are discarded.
/// A full queue blocks the producer (up to `offer_timeout` when set) unless
/// `never_block` is on, in which case the event is dropped and counted.
///
/// # Example
///
/// ```
/// use rust_log_pipeline::appenders::{AsyncAppender, ListAppender};
/// use rust_log_pipeline::core::appender::SyncAppender;
/// use std::sync::Arc;
///
/// let downstream = Arc::new(SyncAppender::new(ListAppender::new("memory")));
/// let appender = AsyncAppender::new("async", downstream)
///     .with_queue_size(1024)
///     .with_never_block(true);
/// assert_eq!(appender.discarding_threshold(), 1024 / 5);
/// ```
pub struct AsyncAppender {
    name: String,
    context: ContextHandle,
    downstream: AppenderRef,
    capacity: usize,
    discarding_threshold: Option<usize>,
    never_block: bool,
    offer_timeout: Option<Duration>,
    max_flush_time: Duration,
    filters: RwLock<FilterChain>,
    metrics: Arc<LoggerMetrics>,
    shared: RwLock<Arc<Shared>>,
    /// Bumped by every start; guards the deferred downstream stop
    generation: Arc<Mutex<u64>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    not_started_reported: AtomicBool,
}

impl AsyncAppender {
    pub fn new(name: impl Into<String>, downstream: AppenderRef) -> Self {
        let metrics = Arc::new(LoggerMetrics::new());
        Self {
            name: name.into(),
            context: ContextHandle::detached(),
            downstream,
            capacity: DEFAULT_QUEUE_SIZE,
            discarding_threshold: None,
            never_block: false,
            offer_timeout: None,
            max_flush_time: DEFAULT_MAX_FLUSH_TIME,
            filters: RwLock::new(FilterChain::new()),
            shared: RwLock::new(Shared::new(&metrics, 0)),
            metrics,
            generation: Arc::new(Mutex::new(0)),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
            not_started_reported: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: ContextHandle) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_queue_size(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Remaining capacity below which TRACE/DEBUG/INFO events are discarded;
    /// 0 keeps everything
    #[must_use]
    pub fn with_discarding_threshold(mut self, threshold: usize) -> Self {
        self.discarding_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn with_never_block(mut self, never_block: bool) -> Self {
        self.never_block = never_block;
        self
    }

    /// Longest a producer waits for a free slot before its event is dropped
    #[must_use]
    pub fn with_offer_timeout(mut self, timeout: Duration) -> Self {
        self.offer_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_flush_time(mut self, max_flush_time: Duration) -> Self {
        self.max_flush_time = max_flush_time;
        self
    }

    #[must_use]
    pub fn with_filter(self, filter: Box<dyn Filter>) -> Self {
        self.filters.write().add(filter);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn discarding_threshold(&self) -> usize {
        self.discarding_threshold.unwrap_or(self.capacity / 5)
    }

    /// Events waiting or in delivery
    pub fn queue_len(&self) -> usize {
        self.current().queue.lock().events.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.queue_len())
    }

    pub fn downstream(&self) -> &AppenderRef {
        &self.downstream
    }

    fn current(&self) -> Arc<Shared> {
        Arc::clone(&self.shared.read())
    }

    fn offer(&self, event: &Arc<LogEvent>) -> Offer {
        let shared = self.current();
        let mut queue = shared.queue.lock();
        if queue.closed {
            return Offer::Rejected;
        }

        let remaining = self.capacity.saturating_sub(queue.events.len());
        if event.level().is_discardable() && remaining < self.discarding_threshold() {
            return Offer::Discarded;
        }

        if queue.events.len() >= self.capacity {
            shared.metrics.record_queue_full();
            if self.never_block {
                return Offer::Rejected;
            }
            shared.metrics.record_block();
            let deadline = self.offer_timeout.map(|t| Instant::now() + t);
            while queue.events.len() >= self.capacity && !queue.closed {
                match deadline {
                    Some(deadline) => {
                        if shared.not_full.wait_until(&mut queue, deadline).timed_out() {
                            break;
                        }
                    }
                    None => shared.not_full.wait(&mut queue),
                }
            }
            if queue.events.len() >= self.capacity || queue.closed {
                return Offer::Rejected;
            }
        }

        queue.events.push_back(Arc::clone(event));
        drop(queue);
        shared.not_empty.notify_one();
        Offer::Queued
    }

    fn record_drop(&self, reason: &str) {
        let previous = self.metrics.record_dropped();
        let total = previous + 1;
        if previous == 0 || total % DROP_REPORT_INTERVAL == 0 {
            self.context.add_warn(
                &self.name,
                format!("{} events dropped so far ({})", total, reason),
            );
        }
    }

    fn spawn_worker(&self, shared: Arc<Shared>) -> Result<JoinHandle<()>> {
        let downstream = Arc::clone(&self.downstream);
        thread::Builder::new()
            .name(format!("async-{}", self.name))
            .spawn(move || run_worker(shared, downstream))
            .map_err(|e| LoggerError::io_operation("spawning worker", self.name.clone(), e))
    }

    /// Stop the downstream after `worker` exits, unless the appender was
    /// started again in the meantime
    fn defer_downstream_stop(&self, worker: JoinHandle<()>) {
        let downstream = Arc::clone(&self.downstream);
        let generation = Arc::clone(&self.generation);
        let stopped_at = *generation.lock();
        let spawned = thread::Builder::new()
            .name(format!("async-{}-close", self.name))
            .spawn(move || {
                let _ = worker.join();
                let current = generation.lock();
                if *current == stopped_at {
                    downstream.stop();
                }
            });
        if let Err(e) = spawned {
            self.context.add_error(
                &self.name,
                format!("Downstream '{}' left open: {}", self.downstream.name(), e),
            );
        }
    }
}

fn run_worker(shared: Arc<Shared>, downstream: AppenderRef) {
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.abandoned {
                    break None;
                }
                if let Some(front) = queue.events.front() {
                    let event = Arc::clone(front);
                    queue.in_flight = true;
                    break Some(event);
                }
                if queue.closed {
                    break None;
                }
                shared.not_empty.wait(&mut queue);
            }
        };
        let Some(event) = next else { break };

        if catch_unwind(AssertUnwindSafe(|| downstream.do_append(&event))).is_err() {
            shared.metrics.record_write_error();
        } else {
            shared.metrics.record_logged();
        }

        {
            let mut queue = shared.queue.lock();
            queue.events.pop_front();
            queue.in_flight = false;
        }
        shared.not_full.notify_all();
    }
}

impl LifeCycle for AsyncAppender {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        // held until the worker runs so a deferred close cannot slip in between
        let mut generation = self.generation.lock();
        if self.capacity == 0 {
            let err = LoggerError::config(&self.name, "queue size must be at least 1");
            self.context.add_error(&self.name, err.to_string());
            return Err(err);
        }
        if !self.downstream.is_started() {
            if let Err(e) = self.downstream.start() {
                self.context.add_error(
                    &self.name,
                    format!("Downstream appender '{}' failed to start: {}", self.downstream.name(), e),
                );
                return Err(e);
            }
        }
        self.filters.write().start(&self.context);

        *generation += 1;
        let shared = Shared::new(&self.metrics, self.capacity);
        *self.shared.write() = Arc::clone(&shared);
        let handle = self.spawn_worker(shared)?;
        *self.worker.lock() = Some(handle);
        self.not_started_reported.store(false, Ordering::Release);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        let shared = self.current();
        shared.queue.lock().closed = true;
        shared.not_empty.notify_all();
        shared.not_full.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            let deadline = Instant::now() + self.max_flush_time;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    self.context.add_error(&self.name, "Async worker panicked during shutdown");
                }
            } else {
                let residual = {
                    let mut queue = shared.queue.lock();
                    queue.abandoned = true;
                    let keep = usize::from(queue.in_flight);
                    let residual = queue.events.len().saturating_sub(keep);
                    queue.events.truncate(keep);
                    residual
                };
                shared.not_empty.notify_all();
                for _ in 0..residual {
                    self.metrics.record_dropped();
                }
                self.context.add_warn(
                    &self.name,
                    format!(
                        "Max flush time of {:?} exceeded, {} queued events discarded",
                        self.max_flush_time, residual
                    ),
                );
                // the worker still holds the downstream lock; stop it once released
                self.defer_downstream_stop(handle);
                self.filters.write().stop();
                return;
            }
        }

        self.downstream.stop();
        self.filters.write().stop();
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl EventAppender for AsyncAppender {
    fn do_append(&self, event: &Arc<LogEvent>) {
        if !self.started.load(Ordering::Acquire) {
            if !self.not_started_reported.swap(true, Ordering::AcqRel) {
                self.context
                    .add_error(&self.name, "Attempted to append to a non-started appender");
            }
            return;
        }
        if self.filters.read().decide(event) == FilterReply::Deny {
            self.metrics.record_filtered();
            return;
        }
        match self.offer(event) {
            Offer::Queued => {}
            Offer::Discarded => self.record_drop("discarding threshold reached"),
            Offer::Rejected => self.record_drop("queue full"),
        }
    }

    /// Wait (up to the max flush time) until the queue is empty, then flush downstream
    fn flush(&self) {
        let deadline = Instant::now() + self.max_flush_time;
        let shared = self.current();
        {
            let mut queue = shared.queue.lock();
            while !queue.events.is_empty() && !queue.abandoned {
                if shared.not_full.wait_until(&mut queue, deadline).timed_out() {
                    break;
                }
            }
        }
        self.downstream.flush();
    }

    fn metrics(&self) -> &LoggerMetrics {
        &self.metrics
    }
}

impl fmt::Debug for AsyncAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAppender")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("never_block", &self.never_block)
            .field("downstream", &self.downstream.name())
            .finish()
    }
}

impl Drop for AsyncAppender {
    fn drop(&mut self) {
        LifeCycle::stop(self);
    }
}

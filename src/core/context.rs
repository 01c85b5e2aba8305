//! Shared environment of one logging universe
//!
//! A [`Context`] carries the name, birth time, status log, property map,
//! scheduler and component registries. It is owned by whoever created it
//! (usually a [`LoggerContext`](super::LoggerContext) held in a
//! [`ContextSelector`](super::ContextSelector)). Appenders, filters, matchers
//! and evaluators only keep a [`ContextHandle`], a weak reference that never
//! extends the context's lifetime.

use super::error::Result;
use super::scheduler::{ScheduledTask, Scheduler};
use super::status::{Status, StatusManager};
use crate::boolex::EvaluatorHandle;
use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Name given to contexts created without one
pub const DEFAULT_CONTEXT_NAME: &str = "default";

/// Time each component gets to stop during [`Context::stop`]
pub const DEFAULT_STOP_BUDGET: Duration = Duration::from_secs(5);

/// Start/stop contract shared by every pipeline component
pub trait LifeCycle: Send + Sync {
    fn name(&self) -> &str;
    fn start(&self) -> Result<()>;
    fn stop(&self);
    fn is_started(&self) -> bool;
}

struct ContextInner {
    name: RwLock<String>,
    birth_time: DateTime<Utc>,
    properties: RwLock<HashMap<String, String>>,
    status_manager: StatusManager,
    scheduler: Scheduler,
    evaluators: RwLock<HashMap<String, Arc<EvaluatorHandle>>>,
    objects: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    lifecycle: Mutex<Vec<Arc<dyn LifeCycle>>>,
    config_epoch: AtomicU64,
    stop_budget: RwLock<Duration>,
    stopped: AtomicBool,
}

/// Owning handle to a logging universe
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name: RwLock::new(name.into()),
                birth_time: Utc::now(),
                properties: RwLock::new(HashMap::new()),
                status_manager: StatusManager::new(),
                scheduler: Scheduler::new(),
                evaluators: RwLock::new(HashMap::new()),
                objects: RwLock::new(HashMap::new()),
                lifecycle: Mutex::new(Vec::new()),
                config_epoch: AtomicU64::new(0),
                stop_budget: RwLock::new(DEFAULT_STOP_BUDGET),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Non-owning handle for components
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn name(&self) -> String {
        self.inner.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.write() = name.into();
    }

    pub fn birth_time(&self) -> DateTime<Utc> {
        self.inner.birth_time
    }

    pub fn status_manager(&self) -> &StatusManager {
        &self.inner.status_manager
    }

    pub fn add_status(&self, status: Status) {
        self.inner.status_manager.add(status);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.inner.properties.read().get(key).cloned()
    }

    pub fn properties(&self) -> HashMap<String, String> {
        self.inner.properties.read().clone()
    }

    /// Set a property under the context write lock and advance the configuration epoch
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut props = self.inner.properties.write();
        props.insert(key.into(), value.into());
        self.bump_epoch();
    }

    pub fn remove_property(&self, key: &str) -> Option<String> {
        let mut props = self.inner.properties.write();
        let removed = props.remove(key);
        if removed.is_some() {
            self.bump_epoch();
        }
        removed
    }

    /// Current configuration epoch
    pub fn config_epoch(&self) -> u64 {
        self.inner.config_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_epoch(&self) -> u64 {
        self.inner.config_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Bind an evaluator under its name, replacing any previous binding
    pub fn register_evaluator(&self, evaluator: Arc<EvaluatorHandle>) {
        let name = evaluator.name().to_string();
        let previous = self
            .inner
            .evaluators
            .write()
            .insert(name.clone(), evaluator);
        if previous.is_some() {
            self.add_status(Status::warn(
                "Context",
                format!("Evaluator named '{}' replaced an earlier binding", name),
            ));
        }
    }

    pub fn evaluator(&self, name: &str) -> Option<Arc<EvaluatorHandle>> {
        self.inner.evaluators.read().get(name).cloned()
    }

    pub fn put_object<T: Any + Send + Sync>(&self, key: impl Into<String>, value: Arc<T>) {
        self.inner.objects.write().insert(key.into(), value);
    }

    pub fn object<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let object = self.inner.objects.read().get(key).cloned()?;
        object.downcast::<T>().ok()
    }

    /// Track a component so that [`Context::stop`] stops it
    pub fn register_lifecycle(&self, component: Arc<dyn LifeCycle>) {
        let mut components = self.inner.lifecycle.lock();
        if !components.iter().any(|c| Arc::ptr_eq(c, &component)) {
            components.push(component);
        }
    }

    pub fn set_stop_budget(&self, budget: Duration) {
        *self.inner.stop_budget.write() = budget;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Stop every registered component, then the scheduler
    ///
    /// Each component is stopped on a helper thread and given the stop budget.
    /// A component that overruns it is reported and left behind.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let budget = *self.inner.stop_budget.read();
        let components: Vec<_> = std::mem::take(&mut *self.inner.lifecycle.lock());

        for component in components.into_iter().rev() {
            let name = component.name().to_string();
            let (done_tx, done_rx) = bounded::<()>(1);
            let spawned = thread::Builder::new()
                .name(format!("stop-{}", name))
                .spawn(move || {
                    component.stop();
                    let _ = done_tx.send(());
                });
            match spawned {
                Ok(_) => {
                    if done_rx.recv_timeout(budget).is_err() {
                        self.add_status(Status::warn(
                            "Context",
                            format!("Component '{}' did not stop within {:?}", name, budget),
                        ));
                    }
                }
                Err(e) => self.add_status(
                    Status::error("Context", format!("Could not stop component '{}'", name))
                        .with_cause(&e),
                ),
            }
        }

        self.inner.scheduler.shutdown();
        self.add_status(Status::info("Context", format!("Context '{}' stopped", self.name())));
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_NAME)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name())
            .field("birth_time", &self.inner.birth_time)
            .field("config_epoch", &self.config_epoch())
            .finish()
    }
}

/// Non-owning reference from a component back to its context
///
/// Once the context is gone, statuses fall back to stderr and scheduling is refused.
#[derive(Clone, Default)]
pub struct ContextHandle {
    inner: Weak<ContextInner>,
}

impl ContextHandle {
    /// Handle attached to no context
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(|inner| Context { inner })
    }

    pub fn is_attached(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn add_status(&self, status: Status) {
        match self.upgrade() {
            Some(ctx) => ctx.add_status(status),
            None => eprintln!("{}", status),
        }
    }

    pub fn add_info(&self, origin: &str, message: impl Into<String>) {
        self.add_status(Status::info(origin, message));
    }

    pub fn add_warn(&self, origin: &str, message: impl Into<String>) {
        self.add_status(Status::warn(origin, message));
    }

    pub fn add_error(&self, origin: &str, message: impl Into<String>) {
        self.add_status(Status::error(origin, message));
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.upgrade().and_then(|ctx| ctx.property(key))
    }

    /// Schedule on the context's scheduler; `None` when detached or stopped
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Option<ScheduledTask>
    where
        F: FnOnce() + Send + 'static,
    {
        let ctx = self.upgrade()?;
        ctx.scheduler().schedule(delay, task).ok()
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

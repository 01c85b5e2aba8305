//! Logger hierarchy and the logger context
//!
//! Loggers form a tree by dotted name below `ROOT`. The configuration of the
//! whole tree lives in one immutable [`Hierarchy`] snapshot. Every mutation
//! builds a new snapshot, swaps it in and bumps the context's configuration
//! epoch; each [`Logger`] caches its effective level and appender set together
//! with the epoch it was computed at and recomputes when the epoch moves.

use super::appender::AppenderRef;
use super::context::{Context, LifeCycle};
use super::error::Result;
use super::log_event::{LogEvent, LogEventBuilder, Marker};
use super::log_level::LogLevel;
use super::mdc::FieldValue;
use super::status::Status;
use super::throwable::ThrowableProxy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

pub const ROOT_LOGGER_NAME: &str = "ROOT";

/// Level of the root logger unless configured otherwise
pub const DEFAULT_ROOT_LEVEL: LogLevel = LogLevel::Debug;

fn is_root(name: &str) -> bool {
    name.is_empty() || name.eq_ignore_ascii_case(ROOT_LOGGER_NAME)
}

/// Name of the parent logger, `None` for children of ROOT
fn parent_name(name: &str) -> Option<&str> {
    name.rfind('.').map(|i| &name[..i])
}

#[derive(Clone)]
struct LoggerConfig {
    level: Option<LogLevel>,
    additive: bool,
    appenders: Vec<AppenderRef>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: None,
            additive: true,
            appenders: Vec::new(),
        }
    }
}

/// Configuration of a whole logger tree
#[derive(Clone)]
pub struct Hierarchy {
    root_level: LogLevel,
    root_appenders: Vec<AppenderRef>,
    nodes: HashMap<String, LoggerConfig>,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self {
            root_level: DEFAULT_ROOT_LEVEL,
            root_appenders: Vec::new(),
            nodes: HashMap::new(),
        }
    }
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_level(mut self, logger: &str, level: LogLevel) -> Self {
        self.set_level(logger, Some(level));
        self
    }

    #[must_use]
    pub fn with_appender(mut self, logger: &str, appender: AppenderRef) -> Self {
        self.add_appender(logger, appender);
        self
    }

    #[must_use]
    pub fn with_additive(mut self, logger: &str, additive: bool) -> Self {
        self.set_additive(logger, additive);
        self
    }

    /// `None` makes the logger inherit; for ROOT it restores the default level
    pub fn set_level(&mut self, logger: &str, level: Option<LogLevel>) {
        if is_root(logger) {
            self.root_level = level.unwrap_or(DEFAULT_ROOT_LEVEL);
        } else {
            self.nodes.entry(logger.to_string()).or_default().level = level;
        }
    }

    pub fn set_additive(&mut self, logger: &str, additive: bool) {
        if !is_root(logger) {
            self.nodes.entry(logger.to_string()).or_default().additive = additive;
        }
    }

    /// Attach an appender; attaching the same appender twice is a no-op
    pub fn add_appender(&mut self, logger: &str, appender: AppenderRef) {
        let list = if is_root(logger) {
            &mut self.root_appenders
        } else {
            &mut self.nodes.entry(logger.to_string()).or_default().appenders
        };
        if !list.iter().any(|a| Arc::ptr_eq(a, &appender)) {
            list.push(appender);
        }
    }

    /// Detach by appender name; returns whether anything was removed
    pub fn detach_appender(&mut self, logger: &str, appender_name: &str) -> bool {
        let list = if is_root(logger) {
            &mut self.root_appenders
        } else {
            match self.nodes.get_mut(logger) {
                Some(node) => &mut node.appenders,
                None => return false,
            }
        };
        let before = list.len();
        list.retain(|a| a.name() != appender_name);
        list.len() != before
    }

    /// Level configured directly on `logger`
    pub fn level(&self, logger: &str) -> Option<LogLevel> {
        if is_root(logger) {
            Some(self.root_level)
        } else {
            self.nodes.get(logger).and_then(|n| n.level)
        }
    }

    pub fn is_additive(&self, logger: &str) -> bool {
        self.nodes.get(logger).map_or(true, |n| n.additive)
    }

    /// First configured level walking from `logger` toward ROOT
    pub fn effective_level(&self, logger: &str) -> LogLevel {
        let mut current = if is_root(logger) { None } else { Some(logger) };
        while let Some(name) = current {
            if let Some(level) = self.nodes.get(name).and_then(|n| n.level) {
                return level;
            }
            current = parent_name(name);
        }
        self.root_level
    }

    /// Own appenders plus, while additive, those of every ancestor
    pub fn appenders_for(&self, logger: &str) -> Vec<AppenderRef> {
        let mut out: Vec<AppenderRef> = Vec::new();
        let push_all = |list: &[AppenderRef], out: &mut Vec<AppenderRef>| {
            for appender in list {
                if !out.iter().any(|a| Arc::ptr_eq(a, appender)) {
                    out.push(Arc::clone(appender));
                }
            }
        };

        let mut current = if is_root(logger) { None } else { Some(logger) };
        while let Some(name) = current {
            if let Some(node) = self.nodes.get(name) {
                push_all(&node.appenders, &mut out);
                if !node.additive {
                    return out;
                }
            }
            current = parent_name(name);
        }
        push_all(&self.root_appenders, &mut out);
        out
    }

    /// Every appender referenced anywhere in the tree, once each
    pub fn all_appenders(&self) -> Vec<AppenderRef> {
        let mut out: Vec<AppenderRef> = Vec::new();
        let lists = std::iter::once(&self.root_appenders).chain(self.nodes.values().map(|n| &n.appenders));
        for list in lists {
            for appender in list {
                if !out.iter().any(|a| Arc::ptr_eq(a, appender)) {
                    out.push(Arc::clone(appender));
                }
            }
        }
        out
    }

    pub fn contains_appender(&self, appender: &AppenderRef) -> bool {
        self.root_appenders.iter().any(|a| Arc::ptr_eq(a, appender))
            || self
                .nodes
                .values()
                .any(|n| n.appenders.iter().any(|a| Arc::ptr_eq(a, appender)))
    }
}

impl fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hierarchy")
            .field("root_level", &self.root_level)
            .field("root_appenders", &self.root_appenders.iter().map(|a| a.name()).collect::<Vec<_>>())
            .field("loggers", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Stop adapter so appenders can join the context's lifecycle registry
struct AppenderLifeCycle(AppenderRef);

impl LifeCycle for AppenderLifeCycle {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn start(&self) -> Result<()> {
        self.0.start()
    }

    fn stop(&self) {
        self.0.flush();
        self.0.stop();
    }

    fn is_started(&self) -> bool {
        self.0.is_started()
    }
}

struct LoggerContextInner {
    context: Context,
    hierarchy: RwLock<Arc<Hierarchy>>,
    loggers: RwLock<HashMap<String, Logger>>,
}

/// Entry point of a logging universe: owns the [`Context`] and the logger tree
///
/// # Example
///
/// ```
/// use rust_log_pipeline::appenders::ListAppender;
/// use rust_log_pipeline::core::appender::SyncAppender;
/// use rust_log_pipeline::core::{LifeCycle, LoggerContext, LogLevel};
/// use std::sync::Arc;
///
/// let ctx = LoggerContext::new("app");
/// let memory = ListAppender::new("memory");
/// let appender = Arc::new(SyncAppender::new(memory.clone()));
/// appender.start().unwrap();
/// ctx.add_appender("ROOT", appender);
/// ctx.set_level("noisy", Some(LogLevel::Warn));
///
/// ctx.logger("noisy.module").info("suppressed");
/// ctx.logger("app.db").info("connected");
/// assert_eq!(memory.messages(), vec!["connected".to_string()]);
/// ```
#[derive(Clone)]
pub struct LoggerContext {
    inner: Arc<LoggerContextInner>,
}

impl LoggerContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_context(Context::new(name))
    }

    pub fn with_context(context: Context) -> Self {
        Self {
            inner: Arc::new(LoggerContextInner {
                context,
                hierarchy: RwLock::new(Arc::new(Hierarchy::new())),
                loggers: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn name(&self) -> String {
        self.inner.context.name()
    }

    pub fn config_epoch(&self) -> u64 {
        self.inner.context.config_epoch()
    }

    /// Current configuration snapshot
    pub fn hierarchy(&self) -> Arc<Hierarchy> {
        Arc::clone(&self.inner.hierarchy.read())
    }

    /// Logger handle for `name`; the same handle is returned on every call
    pub fn logger(&self, name: &str) -> Logger {
        let name = if is_root(name) { ROOT_LOGGER_NAME } else { name };
        if let Some(logger) = self.inner.loggers.read().get(name) {
            return logger.clone();
        }
        let mut loggers = self.inner.loggers.write();
        loggers
            .entry(name.to_string())
            .or_insert_with(|| Logger {
                inner: Arc::new(LoggerInner {
                    name: name.to_string(),
                    owner: Arc::downgrade(&self.inner),
                    cache: RwLock::new(None),
                }),
            })
            .clone()
    }

    pub fn root_logger(&self) -> Logger {
        self.logger(ROOT_LOGGER_NAME)
    }

    /// Names of every logger handed out so far
    pub fn logger_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.loggers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Apply `f` to a copy of the hierarchy, swap it in and bump the epoch
    pub fn mutate<T>(&self, f: impl FnOnce(&mut Hierarchy) -> T) -> T {
        let mut guard = self.inner.hierarchy.write();
        let mut next = Hierarchy::clone(&guard);
        let out = f(&mut next);
        *guard = Arc::new(next);
        self.inner.context.bump_epoch();
        out
    }

    pub fn set_level(&self, logger: &str, level: Option<LogLevel>) {
        self.mutate(|h| h.set_level(logger, level));
    }

    pub fn set_additive(&self, logger: &str, additive: bool) {
        self.mutate(|h| h.set_additive(logger, additive));
    }

    pub fn add_appender(&self, logger: &str, appender: AppenderRef) {
        self.mutate(|h| h.add_appender(logger, appender));
    }

    /// Detach by name; the appender is stopped once no logger references it
    pub fn detach_appender(&self, logger: &str, appender_name: &str) -> bool {
        let before = self.hierarchy().all_appenders();
        let removed = self.mutate(|h| h.detach_appender(logger, appender_name));
        if removed {
            self.stop_unreferenced(before);
        }
        removed
    }

    /// Replace the whole logger graph at once
    ///
    /// Appenders of the new graph that are not started yet are started first; a
    /// failure is reported and the rest of the graph goes live without it. After
    /// the swap, appenders only the old graph referenced are stopped. Each event
    /// resolves its appenders from exactly one snapshot, so no event is
    /// delivered through both graphs.
    pub fn reconfigure(&self, hierarchy: Hierarchy) {
        for appender in hierarchy.all_appenders() {
            if !appender.is_started() {
                if let Err(e) = appender.start() {
                    self.inner.context.add_status(Status::error(
                        appender.name(),
                        format!("Appender failed to start during reconfiguration: {}", e),
                    ));
                }
            }
        }
        let before = self.hierarchy().all_appenders();
        {
            let mut guard = self.inner.hierarchy.write();
            *guard = Arc::new(hierarchy);
            self.inner.context.bump_epoch();
        }
        self.stop_unreferenced(before);
    }

    fn stop_unreferenced(&self, candidates: Vec<AppenderRef>) {
        let current = self.hierarchy();
        for appender in candidates {
            if !current.contains_appender(&appender) {
                appender.flush();
                appender.stop();
            }
        }
    }

    /// Stop every appender, then the context
    pub fn stop(&self) {
        for appender in self.hierarchy().all_appenders() {
            self.inner
                .context
                .register_lifecycle(Arc::new(AppenderLifeCycle(appender)));
        }
        self.inner.context.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.context.is_stopped()
    }
}

impl Default for LoggerContext {
    fn default() -> Self {
        Self::with_context(Context::default())
    }
}

impl fmt::Debug for LoggerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerContext")
            .field("name", &self.name())
            .field("epoch", &self.config_epoch())
            .field("loggers", &self.inner.loggers.read().len())
            .finish()
    }
}

#[derive(Clone)]
struct Resolved {
    epoch: u64,
    level: LogLevel,
    appenders: Arc<[AppenderRef]>,
}

struct LoggerInner {
    name: String,
    owner: Weak<LoggerContextInner>,
    cache: RwLock<Option<Resolved>>,
}

/// Named emission handle
///
/// Cheap to clone. Stays valid across reconfiguration; once its
/// [`LoggerContext`] is dropped, every call is a no-op.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn owner(&self) -> Option<Arc<LoggerContextInner>> {
        self.inner.owner.upgrade()
    }

    fn resolve(&self) -> Option<Resolved> {
        let owner = self.owner()?;
        let epoch = owner.context.config_epoch();
        if let Some(cached) = self.inner.cache.read().as_ref() {
            if cached.epoch == epoch {
                return Some(cached.clone());
            }
        }

        let hierarchy = Arc::clone(&owner.hierarchy.read());
        let resolved = Resolved {
            epoch,
            level: hierarchy.effective_level(&self.inner.name),
            appenders: hierarchy.appenders_for(&self.inner.name).into(),
        };
        *self.inner.cache.write() = Some(resolved.clone());
        Some(resolved)
    }

    pub fn effective_level(&self) -> LogLevel {
        self.resolve().map_or(DEFAULT_ROOT_LEVEL, |r| r.level)
    }

    /// Level configured on this logger itself
    pub fn level(&self) -> Option<LogLevel> {
        let owner = self.owner()?;
        let level = owner.hierarchy.read().level(&self.inner.name);
        level
    }

    pub fn is_additive(&self) -> bool {
        self.owner()
            .map_or(true, |o| o.hierarchy.read().is_additive(&self.inner.name))
    }

    pub fn is_enabled_for(&self, level: LogLevel) -> bool {
        self.resolve().is_some_and(|r| level >= r.level)
    }

    pub fn appenders(&self) -> Vec<AppenderRef> {
        self.resolve().map_or_else(Vec::new, |r| r.appenders.to_vec())
    }

    fn on_context<T>(&self, f: impl FnOnce(LoggerContext) -> T) -> Option<T> {
        self.owner().map(|inner| f(LoggerContext { inner }))
    }

    pub fn set_level(&self, level: Option<LogLevel>) {
        self.on_context(|ctx| ctx.set_level(&self.inner.name, level));
    }

    pub fn set_additive(&self, additive: bool) {
        self.on_context(|ctx| ctx.set_additive(&self.inner.name, additive));
    }

    pub fn add_appender(&self, appender: AppenderRef) {
        self.on_context(|ctx| ctx.add_appender(&self.inner.name, appender));
    }

    pub fn detach_appender(&self, appender_name: &str) -> bool {
        self.on_context(|ctx| ctx.detach_appender(&self.inner.name, appender_name))
            .unwrap_or(false)
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let Some(resolved) = self.resolve() else { return };
        if level < resolved.level {
            return;
        }
        let event = LogEvent::new(level, self.inner.name.as_str(), message);
        self.dispatch(&resolved.appenders, Arc::new(event));
    }

    #[inline]
    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, message);
    }

    #[inline]
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    #[inline]
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    #[inline]
    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    #[inline]
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Fluent emission with arguments, markers and a throwable
    ///
    /// ```
    /// use rust_log_pipeline::core::{LoggerContext, LogLevel};
    ///
    /// let ctx = LoggerContext::new("docs");
    /// ctx.logger("billing")
    ///     .at(LogLevel::Warn)
    ///     .arg("alice")
    ///     .arg(42)
    ///     .marker("AUDIT")
    ///     .log("user {} charged {} credits");
    /// ```
    pub fn at(&self, level: LogLevel) -> EventBuilder<'_> {
        let resolved = self.resolve().filter(|r| level >= r.level);
        EventBuilder {
            logger: self,
            level,
            resolved,
            args: Vec::new(),
            markers: Vec::new(),
            throwable: None,
            mdc: Vec::new(),
        }
    }

    /// Deliver an already built event to this logger's appenders, skipping the
    /// level check; used to re-inject events received from elsewhere
    pub fn call_appenders(&self, event: LogEvent) {
        if let Some(resolved) = self.resolve() {
            self.dispatch(&resolved.appenders, Arc::new(event));
        }
    }

    /// A panicking appender is reported and does not keep the event from the others
    fn dispatch(&self, appenders: &[AppenderRef], event: Arc<LogEvent>) {
        for appender in appenders {
            if catch_unwind(AssertUnwindSafe(|| appender.do_append(&event))).is_err() {
                if let Some(owner) = self.owner() {
                    owner.context.add_status(Status::error(
                        appender.name(),
                        format!("Appender panicked while handling an event from '{}'", self.inner.name),
                    ));
                }
            }
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("name", &self.inner.name).finish()
    }
}

/// Returned by [`Logger::at`]; does nothing when the level is disabled
#[must_use = "call .log(message) to emit the event"]
pub struct EventBuilder<'a> {
    logger: &'a Logger,
    level: LogLevel,
    resolved: Option<Resolved>,
    args: Vec<FieldValue>,
    markers: Vec<Marker>,
    throwable: Option<ThrowableProxy>,
    mdc: Vec<(String, String)>,
}

impl EventBuilder<'_> {
    pub fn is_enabled(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn arg(mut self, value: impl Into<FieldValue>) -> Self {
        if self.resolved.is_some() {
            self.args.push(value.into());
        }
        self
    }

    pub fn marker(mut self, marker: impl Into<Marker>) -> Self {
        if self.resolved.is_some() {
            self.markers.push(marker.into());
        }
        self
    }

    /// Add an entry to this event's MDC snapshot only
    pub fn mdc(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if self.resolved.is_some() {
            self.mdc.push((key.into(), value.into()));
        }
        self
    }

    pub fn throwable(mut self, proxy: ThrowableProxy) -> Self {
        self.throwable = Some(proxy);
        self
    }

    /// Capture `err` and its source chain
    pub fn error<E: Error + 'static>(mut self, err: &E) -> Self {
        if self.resolved.is_some() {
            self.throwable = Some(ThrowableProxy::from_error(err));
        }
        self
    }

    pub fn log(self, message: impl Into<String>) {
        let Some(resolved) = self.resolved else { return };
        let mut builder: LogEventBuilder =
            LogEvent::builder(self.level, self.logger.name(), message).args(self.args);
        for marker in self.markers {
            builder = builder.marker(marker);
        }
        for (key, value) in self.mdc {
            builder = builder.mdc_entry(key, value);
        }
        if let Some(throwable) = self.throwable {
            builder = builder.throwable(throwable);
        }
        self.logger.dispatch(&resolved.appenders, Arc::new(builder.build()));
    }
}

//! Boolean evaluation over log events
//!
//! This module provides:
//! - `Matcher`: named regex usable from expressions
//! - `EventEvaluator`: the predicate trait, with expression, list and constant variants
//! - `EvaluatorHandle`: shared wrapper applying the consecutive-error quarantine policy

mod expression;
mod lexer;
mod matcher;
mod parser;

pub use expression::ExpressionEvaluator;
pub use matcher::Matcher;

use crate::core::context::{ContextHandle, LifeCycle};
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Consecutive failures tolerated before an evaluator is quarantined
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 4;

const ORIGIN: &str = "EvaluatorHandle";

/// Predicate over a [`LogEvent`]
pub trait EventEvaluator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn start(&mut self, context: &ContextHandle) -> Result<()>;
    fn stop(&mut self);
    fn is_started(&self) -> bool;
    fn evaluate(&self, event: &LogEvent) -> Result<bool>;
}

/// True iff the event's logger name is one of the configured names
#[derive(Debug, Clone)]
pub struct ListEvaluator {
    name: String,
    loggers: HashSet<String>,
    started: bool,
}

impl ListEvaluator {
    pub fn new<I, S>(name: impl Into<String>, loggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            loggers: loggers.into_iter().map(Into::into).collect(),
            started: false,
        }
    }
}

impl EventEvaluator for ListEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        if self.loggers.is_empty() {
            let err = LoggerError::config("ListEvaluator", format!("'{}' has no logger names", self.name));
            context.add_error("ListEvaluator", err.to_string());
            return Err(err);
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn evaluate(&self, event: &LogEvent) -> Result<bool> {
        if !self.started {
            return Err(LoggerError::not_started(&self.name));
        }
        Ok(self.loggers.contains(event.logger_name()))
    }
}

/// Always answers the same value
#[derive(Debug, Clone)]
pub struct ConstantEvaluator {
    name: String,
    value: bool,
    started: bool,
}

impl ConstantEvaluator {
    pub fn new(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            value,
            started: false,
        }
    }

    pub fn always_true(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    pub fn always_false(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }
}

impl EventEvaluator for ConstantEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, _context: &ContextHandle) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn evaluate(&self, _event: &LogEvent) -> Result<bool> {
        Ok(self.value)
    }
}

/// Evaluator variants selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluatorKind {
    #[default]
    Expression,
    List,
    Constant,
}

impl EvaluatorKind {
    /// Kind named by configuration, falling back to the expression evaluator
    pub fn resolve(name: Option<&str>) -> Result<Self> {
        name.map_or(Ok(Self::default()), str::parse)
    }
}

impl FromStr for EvaluatorKind {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expression" | "janino" => Ok(EvaluatorKind::Expression),
            "list" | "bylist" => Ok(EvaluatorKind::List),
            "constant" => Ok(EvaluatorKind::Constant),
            other => Err(LoggerError::config(
                "Evaluator",
                format!("unknown evaluator kind '{}'", other),
            )),
        }
    }
}

/// Outcome of one evaluation through an [`EvaluatorHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Match,
    Mismatch,
    /// The evaluator failed on this event
    Failed,
    /// The evaluator has been taken out of service
    Quarantined,
}

/// Shared, thread-safe evaluator with the error quarantine policy
///
/// A failure counts towards `max_consecutive_errors`; a success resets the count.
/// Once the limit is reached, or if the evaluator fails to start, it is quarantined
/// for good and a single error status is recorded.
pub struct EvaluatorHandle {
    name: String,
    evaluator: RwLock<Box<dyn EventEvaluator>>,
    consecutive_errors: AtomicU32,
    max_consecutive_errors: u32,
    quarantined: AtomicBool,
    context: RwLock<ContextHandle>,
}

impl EvaluatorHandle {
    pub fn new(evaluator: Box<dyn EventEvaluator>) -> Self {
        Self {
            name: evaluator.name().to_string(),
            evaluator: RwLock::new(evaluator),
            consecutive_errors: AtomicU32::new(0),
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            quarantined: AtomicBool::new(false),
            context: RwLock::new(ContextHandle::detached()),
        }
    }

    #[must_use]
    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    #[must_use]
    pub fn with_context(self, context: ContextHandle) -> Self {
        *self.context.write() = context;
        self
    }

    pub fn set_context(&self, context: ContextHandle) {
        *self.context.write() = context;
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined.load(Ordering::Acquire)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    pub fn evaluate(&self, event: &LogEvent) -> Evaluation {
        if self.is_quarantined() {
            return Evaluation::Quarantined;
        }
        let outcome = self.evaluator.read().evaluate(event);
        match outcome {
            Ok(true) => {
                self.consecutive_errors.store(0, Ordering::Release);
                Evaluation::Match
            }
            Ok(false) => {
                self.consecutive_errors.store(0, Ordering::Release);
                Evaluation::Mismatch
            }
            Err(e) => {
                let errors = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                if errors >= self.max_consecutive_errors {
                    self.quarantine(format!(
                        "Evaluator '{}' failed {} consecutive times, last error: {}",
                        self.name, errors, e
                    ));
                    Evaluation::Quarantined
                } else {
                    self.context.read().add_warn(
                        ORIGIN,
                        format!("Evaluator '{}' failed: {}", self.name, e),
                    );
                    Evaluation::Failed
                }
            }
        }
    }

    fn quarantine(&self, reason: String) {
        if !self.quarantined.swap(true, Ordering::AcqRel) {
            self.context.read().add_error(ORIGIN, reason);
        }
    }
}

impl LifeCycle for EvaluatorHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        let context = self.context.read().clone();
        let result = self.evaluator.write().start(&context);
        if let Err(e) = &result {
            self.quarantine(format!("Evaluator '{}' failed to start: {}", self.name, e));
        }
        result
    }

    fn stop(&self) {
        self.evaluator.write().stop();
    }

    fn is_started(&self) -> bool {
        self.evaluator.read().is_started()
    }
}

impl fmt::Debug for EvaluatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorHandle")
            .field("name", &self.name)
            .field("quarantined", &self.is_quarantined())
            .field("consecutive_errors", &self.consecutive_errors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::log_level::LogLevel;
    use crate::core::status::{CollectingStatusListener, StatusLevel};
    use std::sync::Arc;

    fn ev(logger: &str, msg: &str) -> LogEvent {
        LogEvent::new(LogLevel::Info, logger, msg)
    }

    #[test]
    fn test_list_evaluator() {
        let mut list = ListEvaluator::new("byList", ["a.b", "c"]);
        list.start(&ContextHandle::detached()).unwrap();
        assert!(list.evaluate(&ev("a.b", "x")).unwrap());
        assert!(!list.evaluate(&ev("a.b.c", "x")).unwrap());
    }

    #[test]
    fn test_kind_defaults_to_expression() {
        assert_eq!(EvaluatorKind::resolve(None).unwrap(), EvaluatorKind::Expression);
        assert_eq!(EvaluatorKind::resolve(Some("List")).unwrap(), EvaluatorKind::List);
        assert!(EvaluatorKind::resolve(Some("groovy")).is_err());
    }

    #[test]
    fn test_quarantine_after_consecutive_errors() {
        let ctx = Context::new("q");
        let listener = Arc::new(CollectingStatusListener::new());
        ctx.status_manager().add_listener(listener.clone());

        let handle = EvaluatorHandle::new(Box::new(ExpressionEvaluator::new(
            "fragile",
            r#"mdc["k"].contains("x")"#,
        )))
        .with_context(ctx.handle());
        handle.start().unwrap();

        let event = ev("a", "no mdc");
        for _ in 0..DEFAULT_MAX_CONSECUTIVE_ERRORS - 1 {
            assert_eq!(handle.evaluate(&event), Evaluation::Failed);
        }
        assert_eq!(handle.evaluate(&event), Evaluation::Quarantined);
        assert!(handle.is_quarantined());

        // a valid event no longer rescues it
        let good = LogEvent::builder(LogLevel::Info, "a", "m").mdc_entry("k", "x").build();
        assert_eq!(handle.evaluate(&good), Evaluation::Quarantined);
        assert_eq!(listener.count(StatusLevel::Error), 1);
    }

    #[test]
    fn test_success_resets_error_count() {
        let handle = EvaluatorHandle::new(Box::new(ExpressionEvaluator::new(
            "flaky",
            r#"mdc["k"].contains("x")"#,
        )));
        handle.start().unwrap();
        let bad = ev("a", "m");
        let good = LogEvent::builder(LogLevel::Info, "a", "m").mdc_entry("k", "x").build();

        for _ in 0..10 {
            assert_eq!(handle.evaluate(&bad), Evaluation::Failed);
            assert_eq!(handle.evaluate(&good), Evaluation::Match);
        }
        assert!(!handle.is_quarantined());
    }

    #[test]
    fn test_start_failure_quarantines_immediately() {
        let handle = EvaluatorHandle::new(Box::new(ExpressionEvaluator::new("broken", "&&")));
        assert!(handle.start().is_err());
        assert!(handle.is_quarantined());
        assert_eq!(handle.evaluate(&ev("a", "b")), Evaluation::Quarantined);
    }
}

//! Expression evaluator: compiled once at start, interpreted per event

use super::matcher::Matcher;
use super::parser::{parse, CmpOp, Expr, Field, Literal, Method};
use super::EventEvaluator;
use crate::core::context::ContextHandle;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::{LogEvent, Marker};
use crate::core::throwable::ThrowableProxy;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

const ORIGIN: &str = "ExpressionEvaluator";

/// Boolean expression over event fields, e.g. `level >= WARN && mdc["user"] == "admin"`
#[derive(Debug)]
pub struct ExpressionEvaluator {
    name: String,
    expression: String,
    matchers: Vec<Matcher>,
    compiled: Option<Expr>,
    context: ContextHandle,
}

impl ExpressionEvaluator {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            matchers: Vec::new(),
            compiled: None,
            context: ContextHandle::detached(),
        }
    }

    /// Bind `matcher` under its name; it is started together with the evaluator
    #[must_use]
    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn add_matcher(&mut self, matcher: Matcher) {
        self.matchers.push(matcher);
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn compile(&mut self) -> Result<Expr> {
        if self.expression.trim().is_empty() {
            return Err(LoggerError::config(
                ORIGIN,
                format!("empty expression for evaluator '{}'", self.name),
            ));
        }
        for matcher in &mut self.matchers {
            matcher.set_context(self.context.clone());
            matcher.start()?;
        }
        let names: Vec<&str> = self.matchers.iter().filter_map(Matcher::name).collect();
        parse(&self.expression, &names)
    }
}

impl EventEvaluator for ExpressionEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        self.context = context.clone();
        match self.compile() {
            Ok(expr) => {
                self.compiled = Some(expr);
                Ok(())
            }
            Err(e) => {
                self.compiled = None;
                self.context.add_error(
                    ORIGIN,
                    format!("Could not start evaluator '{}': {}", self.name, e),
                );
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        self.compiled = None;
        for matcher in &mut self.matchers {
            matcher.stop();
        }
    }

    fn is_started(&self) -> bool {
        self.compiled.is_some()
    }

    fn evaluate(&self, event: &LogEvent) -> Result<bool> {
        let expr = self
            .compiled
            .as_ref()
            .ok_or_else(|| LoggerError::not_started(&self.name))?;
        let interp = Interpreter {
            name: &self.name,
            event,
            matchers: &self.matchers,
        };
        match interp.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(interp.error(format!(
                "expression produced {} instead of a boolean",
                other.kind()
            ))),
        }
    }
}

#[derive(Debug, Clone)]
enum Value<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Str(Cow<'a, str>),
    Mdc(&'a BTreeMap<String, String>),
    Markers(&'a BTreeSet<Marker>),
    Throwable(&'a ThrowableProxy),
    Matcher(&'a Matcher),
}

impl Value<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Mdc(_) => "mdc",
            Value::Markers(_) => "marker set",
            Value::Throwable(_) => "throwable",
            Value::Matcher(_) => "matcher",
        }
    }

    fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            // an event without markers compares equal to null
            Value::Markers(set) => set.is_empty(),
            _ => false,
        }
    }
}

struct Interpreter<'a> {
    name: &'a str,
    event: &'a LogEvent,
    matchers: &'a [Matcher],
}

impl<'a> Interpreter<'a> {
    fn error(&self, message: impl Into<String>) -> LoggerError {
        LoggerError::evaluation(self.name, message)
    }

    fn eval(&self, expr: &'a Expr) -> Result<Value<'a>> {
        Ok(match expr {
            Expr::Literal(lit) => match lit {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Str(s) => Value::Str(Cow::Borrowed(s.as_str())),
            },
            Expr::Field(field) => self.field(*field),
            Expr::Matcher(index) => match self.matchers.get(*index) {
                Some(m) => Value::Matcher(m),
                None => return Err(self.error("matcher binding out of range")),
            },
            Expr::Not(inner) => Value::Bool(!self.truth(inner)?),
            Expr::And(lhs, rhs) => Value::Bool(self.truth(lhs)? && self.truth(rhs)?),
            Expr::Or(lhs, rhs) => Value::Bool(self.truth(lhs)? || self.truth(rhs)?),
            Expr::Compare(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Value::Bool(self.compare(*op, &lhs, &rhs)?)
            }
            Expr::Index(target, key) => {
                let target = self.eval(target)?;
                let key = self.eval(key)?;
                match (target, key) {
                    (Value::Mdc(map), Value::Str(k)) => map
                        .get(k.as_ref())
                        .map(|v| Value::Str(Cow::Borrowed(v.as_str())))
                        .unwrap_or(Value::Null),
                    (t, k) => {
                        return Err(self.error(format!(
                            "cannot index {} with {}",
                            t.kind(),
                            k.kind()
                        )))
                    }
                }
            }
            Expr::Call {
                target,
                method,
                args,
            } => {
                let target = self.eval(target)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>>>()?;
                self.call(target, *method, &args)?
            }
        })
    }

    fn truth(&self, expr: &'a Expr) -> Result<bool> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(self.error(format!("expected boolean, found {}", other.kind()))),
        }
    }

    fn field(&self, field: Field) -> Value<'a> {
        let event = self.event;
        match field {
            Field::Message => Value::Str(Cow::Borrowed(event.message())),
            Field::FormattedMessage => Value::Str(Cow::Borrowed(event.formatted_message())),
            Field::Logger => Value::Str(Cow::Borrowed(event.logger_name())),
            Field::Level => Value::Int(event.level().as_int()),
            Field::TimeStamp => Value::Int(event.timestamp_millis()),
            Field::Thread => Value::Str(Cow::Borrowed(event.thread_name())),
            Field::Mdc => Value::Mdc(event.mdc()),
            Field::Marker => Value::Markers(event.markers()),
            Field::Throwable => event.throwable().map_or(Value::Null, Value::Throwable),
        }
    }

    fn compare(&self, op: CmpOp, lhs: &Value<'_>, rhs: &Value<'_>) -> Result<bool> {
        let ordering = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.as_ref().cmp(b.as_ref())),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        };
        match (op, ordering) {
            (CmpOp::Eq, Some(o)) => Ok(o == Ordering::Equal),
            (CmpOp::Ne, Some(o)) => Ok(o != Ordering::Equal),
            (CmpOp::Eq, None) => Ok(lhs.is_null() && rhs.is_null()),
            (CmpOp::Ne, None) => Ok(!(lhs.is_null() && rhs.is_null())),
            (CmpOp::Lt, Some(o)) => Ok(o == Ordering::Less),
            (CmpOp::Le, Some(o)) => Ok(o != Ordering::Greater),
            (CmpOp::Gt, Some(o)) => Ok(o == Ordering::Greater),
            (CmpOp::Ge, Some(o)) => Ok(o != Ordering::Less),
            (_, None) => Err(self.error(format!(
                "cannot order {} against {}",
                lhs.kind(),
                rhs.kind()
            ))),
        }
    }

    fn str_arg<'v>(&self, method: Method, args: &'v [Value<'_>], i: usize) -> Result<&'v str> {
        match args.get(i) {
            Some(Value::Str(s)) => Ok(s.as_ref()),
            Some(other) => Err(self.error(format!(
                "{}() expects a string argument, found {}",
                method.as_str(),
                other.kind()
            ))),
            None => Err(self.error(format!("{}() is missing an argument", method.as_str()))),
        }
    }

    fn call(&self, target: Value<'a>, method: Method, args: &[Value<'a>]) -> Result<Value<'a>> {
        let arg_str = |i: usize| self.str_arg(method, args, i);

        if let Value::Throwable(t) = target {
            match method {
                Method::GetMessage => return Ok(Value::Str(Cow::Borrowed(t.message()))),
                Method::GetClassName => return Ok(Value::Str(Cow::Borrowed(t.class_name()))),
                Method::GetCause => return Ok(t.cause().map_or(Value::Null, Value::Throwable)),
                _ => {}
            }
        }

        match (&target, method) {
            (Value::Str(s), Method::Contains) => Ok(Value::Bool(s.contains(arg_str(0)?))),
            (Value::Str(s), Method::StartsWith) => Ok(Value::Bool(s.starts_with(arg_str(0)?))),
            (Value::Str(s), Method::EndsWith) => Ok(Value::Bool(s.ends_with(arg_str(0)?))),
            (Value::Str(s), Method::EqualsIgnoreCase) => Ok(Value::Bool(
                s.to_lowercase() == arg_str(0)?.to_lowercase(),
            )),
            (Value::Str(s), Method::IsEmpty) => Ok(Value::Bool(s.is_empty())),
            (Value::Str(s), Method::Length) => Ok(Value::Int(s.chars().count() as i64)),
            (Value::Markers(set), Method::Contains) => {
                let name = arg_str(0)?;
                Ok(Value::Bool(set.iter().any(|m| m.name() == name)))
            }
            (Value::Markers(set), Method::IsEmpty) => Ok(Value::Bool(set.is_empty())),
            (Value::Mdc(map), Method::Contains) => Ok(Value::Bool(map.contains_key(arg_str(0)?))),
            (Value::Mdc(map), Method::IsEmpty) => Ok(Value::Bool(map.is_empty())),
            (Value::Matcher(m), Method::Matches) => {
                let input = arg_str(0)?;
                m.matches(input).map(Value::Bool).map_err(|e| self.error(e.to_string()))
            }
            _ => Err(self.error(format!(
                "cannot call {}() on {}",
                method.as_str(),
                target.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::log_level::LogLevel;
    use crate::core::status::StatusLevel;

    fn started(expr: &str) -> ExpressionEvaluator {
        let mut ev = ExpressionEvaluator::new("test", expr);
        ev.start(&ContextHandle::detached()).unwrap();
        ev
    }

    fn event(level: LogLevel, msg: &str) -> LogEvent {
        LogEvent::builder(level, "com.acme.Billing", msg)
            .mdc_entry("user", "admin")
            .marker("AUDIT")
            .build()
    }

    #[test]
    fn test_level_and_message_conditions() {
        let ev = started(r#"level >= WARN && message.contains("disk")"#);
        assert!(ev.evaluate(&event(LogLevel::Error, "disk full")).unwrap());
        assert!(!ev.evaluate(&event(LogLevel::Info, "disk full")).unwrap());
        assert!(!ev.evaluate(&event(LogLevel::Warn, "cpu hot")).unwrap());
    }

    #[test]
    fn test_mdc_marker_and_logger() {
        let ev = started(
            r#"mdc["user"] == "admin" && marker.contains("AUDIT") && logger.startsWith("com.acme")"#,
        );
        assert!(ev.evaluate(&event(LogLevel::Info, "x")).unwrap());

        let missing = started(r#"mdc["tenant"] == null"#);
        assert!(missing.evaluate(&event(LogLevel::Info, "x")).unwrap());
    }

    #[test]
    fn test_throwable_presence() {
        let ev = started("throwable != null");
        assert!(!ev.evaluate(&event(LogLevel::Error, "x")).unwrap());
        let with_err = LogEvent::builder(LogLevel::Error, "a", "b")
            .throwable(ThrowableProxy::new("Io", "broken"))
            .build();
        assert!(ev.evaluate(&with_err).unwrap());
    }

    #[test]
    fn test_throwable_methods() {
        let ev = started(
            r#"throwable.getClassName() == "Timeout" && throwable.getMessage().contains("gateway") && throwable.getCause().getMessage() == "refused""#,
        );
        let cause = ThrowableProxy::new("Io", "refused");
        let with_err = LogEvent::builder(LogLevel::Error, "a", "b")
            .throwable(ThrowableProxy::new("Timeout", "gateway timeout").with_cause(cause))
            .build();
        assert!(ev.evaluate(&with_err).unwrap());

        let no_cause = started("throwableProxy.getCause() == null");
        let plain = LogEvent::builder(LogLevel::Error, "a", "b")
            .throwable(ThrowableProxy::new("Io", "broken"))
            .build();
        assert!(no_cause.evaluate(&plain).unwrap());

        // no throwable on the event: calling through null is a runtime error
        let on_null = started(r#"throwable.getMessage() == "x""#);
        assert!(on_null.evaluate(&event(LogLevel::Error, "x")).is_err());
    }

    #[test]
    fn test_matcher_binding() {
        let mut ev = ExpressionEvaluator::new("m", "odd.matches(formattedMessage)")
            .with_matcher(Matcher::with_regex("odd", r"[13579]$"));
        ev.start(&ContextHandle::detached()).unwrap();

        let e1 = LogEvent::builder(LogLevel::Info, "a", "n={}").arg(7).build();
        let e2 = LogEvent::builder(LogLevel::Info, "a", "n={}").arg(8).build();
        assert!(ev.evaluate(&e1).unwrap());
        assert!(!ev.evaluate(&e2).unwrap());
    }

    #[test]
    fn test_runtime_type_errors() {
        let ev = started(r#"mdc["nope"].contains("x")"#);
        assert!(matches!(
            ev.evaluate(&event(LogLevel::Info, "x")),
            Err(LoggerError::Evaluation { .. })
        ));

        let not_bool = started("message");
        assert!(not_bool.evaluate(&event(LogLevel::Info, "x")).is_err());

        let bad_order = started(r#"message > 3"#);
        assert!(bad_order.evaluate(&event(LogLevel::Info, "x")).is_err());
    }

    #[test]
    fn test_compile_failure_leaves_unstarted() {
        let ctx = Context::new("expr");
        let mut ev = ExpressionEvaluator::new("broken", "level >>= 3");
        assert!(ev.start(&ctx.handle()).is_err());
        assert!(!ev.is_started());
        assert_eq!(ctx.status_manager().highest_level(), Some(StatusLevel::Error));
        assert!(matches!(
            ev.evaluate(&event(LogLevel::Info, "x")),
            Err(LoggerError::NotStarted(_))
        ));
    }

    #[test]
    fn test_matcher_failing_to_start_fails_compile() {
        let mut ev = ExpressionEvaluator::new("e", "bad.matches(message)")
            .with_matcher(Matcher::with_regex("bad", "(("));
        assert!(ev.start(&ContextHandle::detached()).is_err());
    }
}

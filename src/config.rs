//! JSON configuration documents
//!
//! A [`Configurator`] turns a document into evaluators, appenders and a logger
//! [`Hierarchy`], then swaps the hierarchy into its [`LoggerContext`] in one
//! step. Problems with single components are reported on the context's status
//! log and the component is skipped; only an unreadable document is an error.
//!
//! ```json
//! {
//!   "name": "shop",
//!   "properties": { "LOG_DIR": "${HOME:-/tmp}/logs" },
//!   "evaluators": [
//!     { "name": "slowQuery", "expression": "message.contains(\"slow\")" }
//!   ],
//!   "appenders": [
//!     { "name": "stdout", "type": "console", "pattern": "%-5level %logger - %msg%n" },
//!     {
//!       "name": "file", "type": "rolling", "file": "${LOG_DIR}/shop.log",
//!       "triggering": { "type": "size", "maxSize": "10MB" }, "maxBackups": 3,
//!       "filters": [ { "type": "threshold", "level": "INFO" } ]
//!     },
//!     { "name": "async", "type": "async", "appenderRef": "file", "queueSize": 512 }
//!   ],
//!   "root": { "level": "INFO", "appenderRefs": ["stdout", "async"] },
//!   "loggers": [ { "name": "shop.db", "level": "DEBUG", "additive": true } ]
//! }
//! ```

use crate::appenders::{
    AsyncAppender, ConsoleAppender, ConsoleTarget, FileAppender, RollingFileAppender,
    RollingPolicy, TriggeringPolicy,
};
use crate::boolex::{
    ConstantEvaluator, EvaluatorHandle, EvaluatorKind, EventEvaluator, ExpressionEvaluator,
    ListEvaluator, Matcher,
};
use crate::core::appender::{AppenderRef, SyncAppender};
use crate::core::context::LifeCycle;
use crate::core::error::{LoggerError, Result};
use crate::core::log_level::LogLevel;
use crate::core::logger::{Hierarchy, LoggerContext, ROOT_LOGGER_NAME};
use crate::core::status::Status;
use crate::encoder::{DateZone, Encoder, JsonEncoder, PatternEncoder};
use crate::filter::{EvaluatorFilter, Filter, FilterReply, LevelFilter, ThresholdFilter};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const ORIGIN: &str = "Configurator";

/// Root of a configuration document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub evaluators: Vec<EvaluatorConfig>,
    #[serde(default)]
    pub appenders: Vec<AppenderConfig>,
    #[serde(default)]
    pub root: Option<LoggerEntry>,
    #[serde(default)]
    pub loggers: Vec<LoggerEntry>,
}

/// Number given either literally or as text, e.g. after `${VAR}` substitution
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(u64),
    Text(String),
}

impl Scalar {
    fn as_u64(&self, field: &str) -> Result<u64> {
        match self {
            Scalar::Int(v) => Ok(*v),
            Scalar::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| LoggerError::config(field, format!("'{}' is not a number", s))),
        }
    }

    /// Byte count; text accepts `KB`, `MB` and `GB` suffixes
    fn as_size(&self, field: &str) -> Result<u64> {
        match self {
            Scalar::Int(v) => Ok(*v),
            Scalar::Text(s) => parse_file_size(s)
                .ok_or_else(|| LoggerError::config(field, format!("'{}' is not a file size", s))),
        }
    }

    fn as_millis(&self, field: &str) -> Result<Duration> {
        self.as_u64(field).map(Duration::from_millis)
    }
}

pub fn parse_file_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1024,
        "MB" | "M" => 1024 * 1024,
        "GB" | "G" => 1024 * 1024 * 1024,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherConfig {
    pub name: String,
    pub regex: String,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorConfig {
    pub name: String,
    /// `expression` when absent
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub matchers: Vec<MatcherConfig>,
    #[serde(default)]
    pub loggers: Vec<String>,
    #[serde(default)]
    pub value: Option<bool>,
    #[serde(default)]
    pub max_consecutive_errors: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum FilterConfig {
    Level {
        level: String,
        #[serde(default)]
        on_match: Option<String>,
        #[serde(default)]
        on_mismatch: Option<String>,
    },
    Threshold {
        level: String,
    },
    /// References a named evaluator or declares an inline expression
    Evaluator {
        #[serde(default)]
        evaluator: Option<String>,
        #[serde(default)]
        expression: Option<String>,
        #[serde(default)]
        on_match: Option<String>,
        #[serde(default)]
        on_mismatch: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EncoderConfig {
    Pattern {
        pattern: String,
        #[serde(default)]
        zone: Option<String>,
        #[serde(default)]
        header: Option<String>,
    },
    Json {
        #[serde(default)]
        pretty: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum TriggeringConfig {
    Size {
        max_size: Scalar,
    },
    Time {
        interval_secs: Scalar,
    },
    Daily {
        #[serde(default)]
        hour: u8,
    },
    Hourly,
    Hybrid {
        max_size: Scalar,
        interval_secs: Scalar,
    },
    Never,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum AppenderKind {
    Console {
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        colors: bool,
    },
    File {
        file: String,
        #[serde(default = "default_true")]
        append: bool,
        #[serde(default = "default_true")]
        immediate_flush: bool,
        #[serde(default)]
        prudent: bool,
    },
    Rolling {
        file: String,
        #[serde(default)]
        triggering: Option<TriggeringConfig>,
        #[serde(default)]
        max_backups: Option<Scalar>,
        #[serde(default)]
        compress: bool,
        #[serde(default = "default_true")]
        immediate_flush: bool,
    },
    Socket {
        host: String,
        port: Scalar,
        #[serde(default)]
        queue_size: Option<Scalar>,
        #[serde(default)]
        reset_frequency: Option<Scalar>,
        #[serde(default)]
        reconnect_delay_ms: Option<Scalar>,
        #[serde(default)]
        max_reconnect_delay_ms: Option<Scalar>,
    },
    Async {
        appender_ref: String,
        #[serde(default)]
        queue_size: Option<Scalar>,
        #[serde(default)]
        discarding_threshold: Option<Scalar>,
        #[serde(default)]
        never_block: bool,
        #[serde(default)]
        max_flush_time_ms: Option<Scalar>,
        #[serde(default)]
        offer_timeout_ms: Option<Scalar>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppenderConfig {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub encoder: Option<EncoderConfig>,
    /// Shorthand for a pattern encoder
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(flatten)]
    pub kind: AppenderKind,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggerEntry {
    #[serde(default)]
    pub name: Option<String>,
    /// A level name, or `INHERITED` / `NULL` to clear the configured level
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub additive: Option<bool>,
    #[serde(default)]
    pub appender_refs: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Replace `${NAME}` and `${NAME:-default}` in `input`
///
/// Names resolve through `lookup`; unresolvable names without a default are
/// rendered as `NAME_IS_UNDEFINED` and returned in the second element.
pub fn substitute(input: &str, lookup: impl Fn(&str) -> Option<String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(input.len());
    let mut undefined = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return (out, undefined);
        };
        let body = &after[..end];
        let (key, default) = match body.find(":-") {
            Some(i) => (&body[..i], Some(&body[i + 2..])),
            None => (body, None),
        };
        match (lookup(key.trim()), default) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => {
                out.push_str(key);
                out.push_str("_IS_UNDEFINED");
                undefined.push(key.to_string());
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    (out, undefined)
}

fn substitute_strings(value: &mut Value, resolve: &mut dyn FnMut(&str) -> String) {
    match value {
        Value::String(s) if s.contains("${") => *s = resolve(s),
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_strings(v, resolve)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_strings(v, resolve)),
        _ => {}
    }
}

fn parse_level(text: &str, component: &str) -> Result<Option<LogLevel>> {
    match text.trim().to_ascii_uppercase().as_str() {
        "INHERITED" | "NULL" => Ok(None),
        _ => text
            .parse::<LogLevel>()
            .map(Some)
            .map_err(|e| LoggerError::config(component, e)),
    }
}

fn parse_reply(text: Option<&str>, component: &str) -> Result<FilterReply> {
    match text {
        None => Ok(FilterReply::Neutral),
        Some(t) => t
            .parse()
            .map_err(|e: LoggerError| LoggerError::config(component, e.to_string())),
    }
}

/// Applies configuration documents to a [`LoggerContext`]
///
/// # Example
///
/// ```
/// use rust_log_pipeline::config::Configurator;
/// use rust_log_pipeline::core::{LoggerContext, LogLevel};
///
/// let ctx = LoggerContext::new("app");
/// Configurator::new(ctx.clone())
///     .configure_str(r#"{ "root": { "level": "WARN" }, "loggers": [ { "name": "app.db", "level": "TRACE" } ] }"#)
///     .unwrap();
///
/// assert_eq!(ctx.logger("app.web").effective_level(), LogLevel::Warn);
/// assert_eq!(ctx.logger("app.db.pool").effective_level(), LogLevel::Trace);
/// ```
#[derive(Debug, Clone)]
pub struct Configurator {
    context: LoggerContext,
}

impl Configurator {
    pub fn new(context: LoggerContext) -> Self {
        Self { context }
    }

    pub fn configure_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoggerError::io_operation("reading configuration", path.display().to_string(), e)
        })?;
        self.configure_str(&text)
    }

    pub fn configure_str(&self, json: &str) -> Result<()> {
        let value: Value = serde_json::from_str(json)?;
        self.configure_value(value)
    }

    /// Substitute variables, deserialise and apply
    pub fn configure_value(&self, mut value: Value) -> Result<()> {
        let ctx = self.context.context();

        // properties first so the rest of the document can refer to them
        if let Some(Value::Object(props)) = value.get("properties").cloned() {
            for (key, raw) in props {
                let Value::String(raw) = raw else {
                    return Err(LoggerError::config(
                        ORIGIN,
                        format!("property '{}' must be a string", key),
                    ));
                };
                let resolved = self.resolve(&raw);
                ctx.set_property(key, resolved);
            }
        }
        substitute_strings(&mut value, &mut |s| self.resolve(s));

        let document: ConfigDocument = serde_json::from_value(value)?;
        self.apply(document);
        Ok(())
    }

    fn resolve(&self, text: &str) -> String {
        let ctx = self.context.context();
        let (resolved, undefined) =
            substitute(text, |key| ctx.property(key).or_else(|| std::env::var(key).ok()));
        for key in undefined {
            ctx.add_status(Status::warn(ORIGIN, format!("Variable '{}' is undefined", key)));
        }
        resolved
    }

    fn report(&self, err: LoggerError, what: String) {
        self.context
            .context()
            .add_status(Status::error(ORIGIN, format!("{}: {}", what, err)));
    }

    /// Build every component of `document` and swap in the resulting hierarchy
    pub fn apply(&self, document: ConfigDocument) {
        let ctx = self.context.context();
        if let Some(name) = &document.name {
            ctx.set_name(name.clone());
        }
        for (key, value) in &document.properties {
            if ctx.property(key).is_none() {
                ctx.set_property(key.clone(), value.clone());
            }
        }

        for config in &document.evaluators {
            match self.build_evaluator(config) {
                Ok(handle) => ctx.register_evaluator(handle),
                Err(e) => self.report(e, format!("Evaluator '{}' skipped", config.name)),
            }
        }

        let mut appenders: HashMap<String, AppenderRef> = HashMap::new();
        let (wrappers, destinations): (Vec<_>, Vec<_>) = document
            .appenders
            .iter()
            .partition(|a| matches!(a.kind, AppenderKind::Async { .. }));
        for config in destinations.into_iter().chain(wrappers) {
            if appenders.contains_key(&config.name) {
                self.report(
                    LoggerError::config(&config.name, "duplicate appender name"),
                    format!("Appender '{}' skipped", config.name),
                );
                continue;
            }
            match self.build_appender(config, &appenders) {
                Ok(appender) => {
                    appenders.insert(config.name.clone(), appender);
                }
                Err(e) => self.report(e, format!("Appender '{}' skipped", config.name)),
            }
        }

        let mut hierarchy = Hierarchy::new();
        if let Some(root) = &document.root {
            self.apply_logger(&mut hierarchy, ROOT_LOGGER_NAME, root, &appenders);
        }
        for entry in &document.loggers {
            match entry.name.as_deref() {
                Some(name) if !name.trim().is_empty() => {
                    self.apply_logger(&mut hierarchy, name.trim(), entry, &appenders)
                }
                _ => self.report(
                    LoggerError::config("logger", "missing name"),
                    "Logger entry skipped".to_string(),
                ),
            }
        }

        let count = hierarchy.all_appenders().len();
        self.context.reconfigure(hierarchy);
        ctx.add_status(Status::info(
            ORIGIN,
            format!("Configuration applied with {} attached appenders", count),
        ));
    }

    fn apply_logger(
        &self,
        hierarchy: &mut Hierarchy,
        name: &str,
        entry: &LoggerEntry,
        appenders: &HashMap<String, AppenderRef>,
    ) {
        if let Some(level) = &entry.level {
            match parse_level(level, name) {
                Ok(level) => hierarchy.set_level(name, level),
                Err(e) => self.report(e, format!("Level of logger '{}' ignored", name)),
            }
        }
        if let Some(additive) = entry.additive {
            hierarchy.set_additive(name, additive);
        }
        for reference in &entry.appender_refs {
            match appenders.get(reference) {
                Some(appender) => hierarchy.add_appender(name, Arc::clone(appender)),
                None => self.report(
                    LoggerError::config(name, format!("no appender named '{}'", reference)),
                    format!("Appender reference of logger '{}' skipped", name),
                ),
            }
        }
    }

    fn build_evaluator(&self, config: &EvaluatorConfig) -> Result<Arc<EvaluatorHandle>> {
        let evaluator: Box<dyn EventEvaluator> = match EvaluatorKind::resolve(config.kind.as_deref())? {
            EvaluatorKind::Expression => {
                let expression = config.expression.as_deref().ok_or_else(|| {
                    LoggerError::config(&config.name, "expression evaluator without an expression")
                })?;
                let mut evaluator = ExpressionEvaluator::new(&config.name, expression);
                for m in &config.matchers {
                    evaluator.add_matcher(
                        Matcher::with_regex(&m.name, &m.regex).case_sensitive(m.case_sensitive),
                    );
                }
                Box::new(evaluator)
            }
            EvaluatorKind::List => Box::new(ListEvaluator::new(&config.name, config.loggers.iter())),
            EvaluatorKind::Constant => {
                Box::new(ConstantEvaluator::new(&config.name, config.value.unwrap_or(true)))
            }
        };

        let mut handle = EvaluatorHandle::new(evaluator).with_context(self.context.context().handle());
        if let Some(max) = config.max_consecutive_errors {
            handle = handle.with_max_consecutive_errors(max);
        }
        let handle = Arc::new(handle);
        handle.start()?;
        self.context.context().register_lifecycle(Arc::clone(&handle) as Arc<dyn LifeCycle>);
        Ok(handle)
    }

    fn build_filter(&self, config: &FilterConfig, owner: &str) -> Result<Box<dyn Filter>> {
        Ok(match config {
            FilterConfig::Level {
                level,
                on_match,
                on_mismatch,
            } => {
                let level = parse_level(level, owner)?
                    .ok_or_else(|| LoggerError::config(owner, "level filter needs a level"))?;
                Box::new(
                    LevelFilter::new(level)
                        .on_match(parse_reply(on_match.as_deref(), owner)?)
                        .on_mismatch(parse_reply(on_mismatch.as_deref(), owner)?),
                )
            }
            FilterConfig::Threshold { level } => {
                let level = parse_level(level, owner)?
                    .ok_or_else(|| LoggerError::config(owner, "threshold filter needs a level"))?;
                Box::new(ThresholdFilter::new(level))
            }
            FilterConfig::Evaluator {
                evaluator,
                expression,
                on_match,
                on_mismatch,
            } => {
                let handle = match (evaluator, expression) {
                    (Some(name), _) => self.context.context().evaluator(name).ok_or_else(|| {
                        LoggerError::config(owner, format!("no evaluator named '{}'", name))
                    })?,
                    (None, Some(expression)) => self.build_evaluator(&EvaluatorConfig {
                        name: format!("{}.evaluator", owner),
                        kind: None,
                        expression: Some(expression.clone()),
                        matchers: Vec::new(),
                        loggers: Vec::new(),
                        value: None,
                        max_consecutive_errors: None,
                    })?,
                    (None, None) => {
                        return Err(LoggerError::config(
                            owner,
                            "evaluator filter needs 'evaluator' or 'expression'",
                        ))
                    }
                };
                Box::new(
                    EvaluatorFilter::new(handle)
                        .on_match(parse_reply(on_match.as_deref(), owner)?)
                        .on_mismatch(parse_reply(on_mismatch.as_deref(), owner)?),
                )
            }
        })
    }

    fn build_encoder(&self, config: &AppenderConfig) -> Result<Box<dyn Encoder>> {
        Ok(match (&config.encoder, &config.pattern) {
            (Some(EncoderConfig::Pattern { pattern, zone, header }), _) => {
                let mut encoder = PatternEncoder::new(pattern);
                if let Some(zone) = zone {
                    encoder = encoder.with_zone(zone.parse::<DateZone>()?);
                }
                if let Some(header) = header {
                    encoder = encoder.with_header(header);
                }
                Box::new(encoder)
            }
            (Some(EncoderConfig::Json { pretty }), _) => Box::new(JsonEncoder::new().pretty(*pretty)),
            (None, Some(pattern)) => Box::new(PatternEncoder::new(pattern)),
            (None, None) => Box::new(PatternEncoder::default()),
        })
    }

    fn build_appender(
        &self,
        config: &AppenderConfig,
        built: &HashMap<String, AppenderRef>,
    ) -> Result<AppenderRef> {
        let name = config.name.as_str();
        let handle = self.context.context().handle();
        let mut filters = Vec::with_capacity(config.filters.len());
        for filter in &config.filters {
            filters.push(self.build_filter(filter, name)?);
        }

        let destination: Box<dyn crate::core::appender::Appender> = match &config.kind {
            AppenderKind::Console { target, colors } => {
                let target = match target {
                    Some(t) => t.parse::<ConsoleTarget>()?,
                    None => ConsoleTarget::default(),
                };
                Box::new(
                    ConsoleAppender::new()
                        .with_name(name)
                        .with_target(target)
                        .with_colors(*colors)
                        .with_encoder(self.build_encoder(config)?),
                )
            }
            AppenderKind::File {
                file,
                append,
                immediate_flush,
                prudent,
            } => {
                let appender = FileAppender::new(file)
                    .with_name(name)
                    .with_append(*append)
                    .with_immediate_flush(*immediate_flush)
                    .with_encoder(self.build_encoder(config)?);
                #[cfg(feature = "file")]
                let appender = appender.with_prudent(*prudent);
                #[cfg(not(feature = "file"))]
                if *prudent {
                    return Err(LoggerError::config(name, "prudent mode needs the 'file' feature"));
                }
                Box::new(appender)
            }
            AppenderKind::Rolling {
                file,
                triggering,
                max_backups,
                compress,
                immediate_flush,
            } => {
                let triggering = match triggering {
                    None => TriggeringPolicy::default(),
                    Some(TriggeringConfig::Size { max_size }) => {
                        TriggeringPolicy::size(max_size.as_size("maxSize")?)
                    }
                    Some(TriggeringConfig::Time { interval_secs }) => TriggeringPolicy::time(
                        Duration::from_secs(interval_secs.as_u64("intervalSecs")?),
                    ),
                    Some(TriggeringConfig::Daily { hour }) => TriggeringPolicy::daily(*hour)?,
                    Some(TriggeringConfig::Hourly) => TriggeringPolicy::hourly(),
                    Some(TriggeringConfig::Hybrid {
                        max_size,
                        interval_secs,
                    }) => TriggeringPolicy::hybrid(
                        max_size.as_size("maxSize")?,
                        Duration::from_secs(interval_secs.as_u64("intervalSecs")?),
                    ),
                    Some(TriggeringConfig::Never) => TriggeringPolicy::never(),
                };
                let mut rolling = RollingPolicy::new().with_compression(*compress);
                if let Some(max) = max_backups {
                    rolling = rolling.with_max_backups(max.as_u64("maxBackups")? as usize);
                }
                Box::new(
                    RollingFileAppender::new(file)
                        .with_name(name)
                        .with_triggering(triggering)
                        .with_rolling(rolling)
                        .with_immediate_flush(*immediate_flush)
                        .with_encoder(self.build_encoder(config)?),
                )
            }
            #[cfg(feature = "network")]
            AppenderKind::Socket {
                host,
                port,
                queue_size,
                reset_frequency,
                reconnect_delay_ms,
                max_reconnect_delay_ms,
            } => {
                let port = u16::try_from(port.as_u64("port")?)
                    .map_err(|_| LoggerError::config(name, "port out of range"))?;
                let mut appender = crate::appenders::SocketAppender::new(host, port).with_name(name);
                if let Some(size) = queue_size {
                    appender = appender.with_queue_size(size.as_u64("queueSize")? as usize);
                }
                if let Some(frequency) = reset_frequency {
                    appender =
                        appender.with_reset_frequency(frequency.as_u64("resetFrequency")? as usize);
                }
                if let Some(initial) = reconnect_delay_ms {
                    let initial = initial.as_millis("reconnectDelayMs")?;
                    let max = match max_reconnect_delay_ms {
                        Some(max) => max.as_millis("maxReconnectDelayMs")?,
                        None => crate::appenders::socket::DEFAULT_MAX_RECONNECT_DELAY,
                    };
                    appender = appender.with_reconnect_delay(initial, max);
                }
                Box::new(appender)
            }
            #[cfg(not(feature = "network"))]
            AppenderKind::Socket { .. } => {
                return Err(LoggerError::config(name, "socket appenders need the 'network' feature"))
            }
            AppenderKind::Async {
                appender_ref,
                queue_size,
                discarding_threshold,
                never_block,
                max_flush_time_ms,
                offer_timeout_ms,
            } => {
                let downstream = built.get(appender_ref).ok_or_else(|| {
                    LoggerError::config(name, format!("no appender named '{}'", appender_ref))
                })?;
                let mut appender = AsyncAppender::new(name, Arc::clone(downstream))
                    .with_context(handle)
                    .with_never_block(*never_block);
                if let Some(size) = queue_size {
                    appender = appender.with_queue_size(size.as_u64("queueSize")? as usize);
                }
                if let Some(threshold) = discarding_threshold {
                    appender =
                        appender.with_discarding_threshold(threshold.as_u64("discardingThreshold")? as usize);
                }
                if let Some(ms) = max_flush_time_ms {
                    appender = appender.with_max_flush_time(ms.as_millis("maxFlushTimeMs")?);
                }
                if let Some(ms) = offer_timeout_ms {
                    appender = appender.with_offer_timeout(ms.as_millis("offerTimeoutMs")?);
                }
                for filter in filters {
                    appender = appender.with_filter(filter);
                }
                return Ok(Arc::new(appender));
            }
        };

        let appender = SyncAppender::from_boxed(destination)
            .with_name(name)
            .with_context(handle);
        for filter in filters {
            appender.add_filter(filter);
        }
        Ok(Arc::new(appender))
    }
}

//! Immutable log event

use super::log_level::LogLevel;
use super::mdc::{FieldValue, Mdc};
use super::throwable::ThrowableProxy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

// Thread-local cache for the thread label to avoid repeated allocations
thread_local! {
    static THREAD_NAME_CACHE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Get cached thread name, falling back to the thread id for unnamed threads
fn current_thread_name() -> String {
    THREAD_NAME_CACHE.with(|cache| {
        cache
            .borrow_mut()
            .get_or_insert_with(|| {
                let thread = std::thread::current();
                thread
                    .name()
                    .map(String::from)
                    .unwrap_or_else(|| format!("{:?}", thread.id()))
            })
            .clone()
    })
}

/// Named tag attached to an event
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

impl Marker {
    pub fn new(name: impl Into<String>) -> Self {
        Marker(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Marker {
    fn from(name: &str) -> Self {
        Marker::new(name)
    }
}

/// One logging emission
///
/// Fields are fixed at construction. The formatted message is rendered lazily
/// and cached, so repeated rendering is free and always yields the same text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    logger_name: String,
    thread_name: String,
    message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    arguments: Vec<FieldValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    mdc: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    markers: BTreeSet<Marker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    throwable: Option<ThrowableProxy>,
    #[serde(skip)]
    formatted: OnceLock<String>,
}

impl LogEvent {
    /// Event stamped with the current time, thread and MDC
    pub fn new(level: LogLevel, logger_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::builder(level, logger_name, message).build()
    }

    pub fn builder(
        level: LogLevel,
        logger_name: impl Into<String>,
        message: impl Into<String>,
    ) -> LogEventBuilder {
        LogEventBuilder {
            event: LogEvent {
                timestamp: Utc::now(),
                level,
                logger_name: logger_name.into(),
                thread_name: current_thread_name(),
                message: message.into(),
                arguments: Vec::new(),
                mdc: Mdc::snapshot(),
                markers: BTreeSet::new(),
                throwable: None,
                formatted: OnceLock::new(),
            },
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn logger_name(&self) -> &str {
        &self.logger_name
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Message template before argument substitution
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn arguments(&self) -> &[FieldValue] {
        &self.arguments
    }

    pub fn mdc(&self) -> &BTreeMap<String, String> {
        &self.mdc
    }

    pub fn markers(&self) -> &BTreeSet<Marker> {
        &self.markers
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.markers.iter().any(|m| m.name() == name)
    }

    pub fn throwable(&self) -> Option<&ThrowableProxy> {
        self.throwable.as_ref()
    }

    /// Message with `{}` placeholders replaced by the arguments
    pub fn formatted_message(&self) -> &str {
        self.formatted
            .get_or_init(|| format_message(&self.message, &self.arguments))
    }
}

impl PartialEq for LogEvent {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.level == other.level
            && self.logger_name == other.logger_name
            && self.thread_name == other.thread_name
            && self.message == other.message
            && self.arguments == other.arguments
            && self.mdc == other.mdc
            && self.markers == other.markers
            && self.throwable == other.throwable
    }
}

/// Builder used by loggers and tests to assemble an event before freezing it
#[derive(Debug)]
pub struct LogEventBuilder {
    event: LogEvent,
}

impl LogEventBuilder {
    #[must_use]
    pub fn arg(mut self, value: impl Into<FieldValue>) -> Self {
        self.event.arguments.push(value.into());
        self
    }

    #[must_use]
    pub fn args(mut self, values: Vec<FieldValue>) -> Self {
        self.event.arguments = values;
        self
    }

    #[must_use]
    pub fn marker(mut self, marker: impl Into<Marker>) -> Self {
        self.event.markers.insert(marker.into());
        self
    }

    #[must_use]
    pub fn mdc_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.event.mdc.insert(key.into(), value.into());
        self
    }

    /// Replace the captured MDC snapshot
    #[must_use]
    pub fn mdc(mut self, mdc: BTreeMap<String, String>) -> Self {
        self.event.mdc = mdc;
        self
    }

    #[must_use]
    pub fn throwable(mut self, proxy: ThrowableProxy) -> Self {
        self.event.throwable = Some(proxy);
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.event.thread_name = name.into();
        self
    }

    pub fn build(self) -> LogEvent {
        self.event
    }
}

/// Substitute `{}` anchors left to right; `\{}` yields a literal `{}`
fn format_message(template: &str, args: &[FieldValue]) -> String {
    if args.is_empty() {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len() + 16 * args.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        let escaped = rest[..pos].ends_with('\\');
        if escaped {
            out.push_str(&rest[..pos - 1]);
            out.push_str("{}");
        } else {
            out.push_str(&rest[..pos]);
            match args.next() {
                Some(arg) => {
                    use std::fmt::Write;
                    let _ = write!(out, "{}", arg);
                }
                None => out.push_str("{}"),
            }
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_message_substitutes_in_order() {
        let event = LogEvent::builder(LogLevel::Info, "a.b", "user {} did {}")
            .arg("alice")
            .arg(3)
            .build();
        assert_eq!(event.formatted_message(), "user alice did 3");
        // cached rendering is stable
        assert_eq!(event.formatted_message(), "user alice did 3");
    }

    #[test]
    fn test_formatted_message_edge_cases() {
        assert_eq!(format_message("no anchors", &[FieldValue::Int(1)]), "no anchors");
        assert_eq!(format_message("{} and {}", &[FieldValue::Int(1)]), "1 and {}");
        assert_eq!(
            format_message("literal \\{} then {}", &[FieldValue::Int(7)]),
            "literal {} then 7"
        );
        assert_eq!(format_message("plain {}", &[]), "plain {}");
    }

    #[test]
    fn test_event_captures_mdc_snapshot() {
        Mdc::clear();
        Mdc::put("user", "bob");
        let event = LogEvent::new(LogLevel::Warn, "svc", "hello");
        Mdc::put("user", "carol");
        assert_eq!(event.mdc().get("user").map(String::as_str), Some("bob"));
        Mdc::clear();
    }

    #[test]
    fn test_markers_and_thread_name() {
        let event = LogEvent::builder(LogLevel::Info, "svc", "m")
            .marker("AUDIT")
            .marker("AUDIT")
            .build();
        assert_eq!(event.markers().len(), 1);
        assert!(event.has_marker("AUDIT"));
        assert!(!event.thread_name().is_empty());
    }

    #[test]
    fn test_serde_roundtrip_ignores_cache() {
        let event = LogEvent::builder(LogLevel::Error, "x.y", "v={}").arg(1).build();
        let _ = event.formatted_message();
        let json = serde_json::to_string(&event).unwrap();
        let back: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.formatted_message(), "v=1");
    }
}

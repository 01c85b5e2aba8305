//! Pattern layout: `%d [%thread] %-5level %logger{36} - %msg%n`

use super::date::{DateFormat, DateZone, DEFAULT_DATE_PATTERN};
use super::Encoder;
use crate::core::context::ContextHandle;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use std::fmt::Write as _;

pub const DEFAULT_PATTERN: &str = "%d [%thread] %-5level %logger{36} - %msg%n";

const ORIGIN: &str = "PatternEncoder";

/// Padding and truncation from `%-5`, `%.10`, `%20.-30` and the like
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FormatInfo {
    min: usize,
    max: Option<usize>,
    left_align: bool,
    /// Truncate by dropping characters from the end instead of the start
    truncate_end: bool,
}

impl FormatInfo {
    fn is_plain(&self) -> bool {
        self.min == 0 && self.max.is_none()
    }

    fn apply(&self, text: &str, out: &mut String) {
        let len = text.chars().count();
        let text: &str = match self.max {
            Some(max) if len > max => {
                if self.truncate_end {
                    let end = text.char_indices().nth(max).map_or(text.len(), |(i, _)| i);
                    &text[..end]
                } else {
                    let start = text
                        .char_indices()
                        .nth(len - max)
                        .map_or(text.len(), |(i, _)| i);
                    &text[start..]
                }
            }
            _ => text,
        };
        let width = text.chars().count();
        let pad = self.min.saturating_sub(width);
        if self.left_align {
            out.push_str(text);
            out.extend(std::iter::repeat(' ').take(pad));
        } else {
            out.extend(std::iter::repeat(' ').take(pad));
            out.push_str(text);
        }
    }
}

#[derive(Debug, Clone)]
enum Converter {
    Literal(String),
    Date(DateFormat),
    Level,
    Logger(Option<usize>),
    Message,
    Newline,
    Thread,
    Mdc(Option<String>),
    Throwable,
    Marker,
}

#[derive(Debug, Clone)]
struct Segment {
    converter: Converter,
    format: FormatInfo,
}

/// Renders events through a compiled pattern
#[derive(Debug, Clone)]
pub struct PatternEncoder {
    pattern: String,
    zone: DateZone,
    header: Option<String>,
    segments: Option<Vec<Segment>>,
}

impl PatternEncoder {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            zone: DateZone::default(),
            header: None,
            segments: None,
        }
    }

    /// Zone used by `%d` converters that do not name one
    #[must_use]
    pub fn with_zone(mut self, zone: DateZone) -> Self {
        self.zone = zone;
        self
    }

    /// Line written once when a destination is opened
    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Render one event to text
    pub fn layout(&self, event: &LogEvent) -> Result<String> {
        let segments = self
            .segments
            .as_ref()
            .ok_or_else(|| LoggerError::not_started(ORIGIN))?;
        let mut out = String::with_capacity(128);
        let mut scratch = String::new();
        for segment in segments {
            if segment.format.is_plain() {
                render(&segment.converter, event, &mut out);
            } else {
                scratch.clear();
                render(&segment.converter, event, &mut scratch);
                segment.format.apply(&scratch, &mut out);
            }
        }
        Ok(out)
    }
}

impl Default for PatternEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN)
    }
}

impl Encoder for PatternEncoder {
    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        match parse_pattern(&self.pattern, self.zone) {
            Ok(segments) => {
                self.segments = Some(segments);
                Ok(())
            }
            Err(e) => {
                context.add_error(
                    ORIGIN,
                    format!("Invalid pattern '{}': {}", self.pattern, e),
                );
                Err(e)
            }
        }
    }

    fn is_started(&self) -> bool {
        self.segments.is_some()
    }

    fn encode(&mut self, event: &LogEvent) -> Result<Vec<u8>> {
        self.layout(event).map(String::into_bytes)
    }

    fn header_bytes(&mut self) -> Vec<u8> {
        match &self.header {
            Some(h) => format!("{}\n", h).into_bytes(),
            None => Vec::new(),
        }
    }
}

fn render(converter: &Converter, event: &LogEvent, out: &mut String) {
    match converter {
        Converter::Literal(text) => out.push_str(text),
        Converter::Date(fmt) => fmt.format_into(event.timestamp(), out),
        Converter::Level => out.push_str(event.level().to_str()),
        Converter::Logger(None) => out.push_str(event.logger_name()),
        Converter::Logger(Some(len)) => abbreviate(event.logger_name(), *len, out),
        Converter::Message => out.push_str(event.formatted_message()),
        Converter::Newline => out.push('\n'),
        Converter::Thread => out.push_str(event.thread_name()),
        Converter::Mdc(Some(key)) => {
            if let Some(value) = event.mdc().get(key) {
                out.push_str(value);
            }
        }
        Converter::Mdc(None) => {
            for (i, (k, v)) in event.mdc().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}={}", k, v);
            }
        }
        Converter::Throwable => {
            if let Some(proxy) = event.throwable() {
                out.push_str(&proxy.render());
            }
        }
        Converter::Marker => {
            for (i, marker) in event.markers().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(marker.name());
            }
        }
    }
}

/// Shorten a dotted name towards `target` characters
///
/// Leading segments collapse to their first character, left to right, until the
/// name fits; the last segment is always kept whole. A target of 0 keeps only
/// the last segment.
fn abbreviate(name: &str, target: usize, out: &mut String) {
    if target == 0 {
        out.push_str(name.rsplit('.').next().unwrap_or(name));
        return;
    }
    if name.len() <= target {
        out.push_str(name);
        return;
    }
    let parts: Vec<&str> = name.split('.').collect();
    let last = parts.len() - 1;
    let mut remaining = name.len();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        if i < last && remaining > target {
            if let Some(first) = part.chars().next() {
                out.push(first);
                remaining -= part.len() - first.len_utf8();
                continue;
            }
        }
        out.push_str(part);
    }
}

fn parse_pattern(pattern: &str, default_zone: DateZone) -> Result<Vec<Segment>> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let flush_literal = |literal: &mut String, segments: &mut Vec<Segment>| {
        if !literal.is_empty() {
            segments.push(Segment {
                converter: Converter::Literal(std::mem::take(literal)),
                format: FormatInfo::default(),
            });
        }
    };

    while i < chars.len() {
        let c = chars[i];
        if c != '%' {
            literal.push(c);
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        if chars.get(i) == Some(&'%') {
            literal.push('%');
            i += 1;
            continue;
        }

        let mut format = FormatInfo::default();
        if chars.get(i) == Some(&'-') {
            format.left_align = true;
            i += 1;
        }
        let (min, next) = read_number(&chars, i);
        format.min = min.unwrap_or(0);
        i = next;
        if chars.get(i) == Some(&'.') {
            i += 1;
            if chars.get(i) == Some(&'-') {
                format.truncate_end = true;
                i += 1;
            }
            let (max, next) = read_number(&chars, i);
            format.max = Some(max.ok_or_else(|| {
                LoggerError::config(ORIGIN, format!("missing truncation width at {}", i))
            })?);
            i = next;
        }

        let keyword_start = i;
        while i < chars.len() && chars[i].is_ascii_alphabetic() {
            i += 1;
        }
        let keyword: String = chars[keyword_start..i].iter().collect();
        if keyword.is_empty() {
            return Err(LoggerError::config(
                ORIGIN,
                format!("dangling '%' at {}", start),
            ));
        }

        let mut options: Vec<String> = Vec::new();
        if chars.get(i) == Some(&'{') {
            let close = chars[i..]
                .iter()
                .position(|c| *c == '}')
                .map(|p| i + p)
                .ok_or_else(|| {
                    LoggerError::config(ORIGIN, format!("unterminated '{{' at {}", i))
                })?;
            let body: String = chars[i + 1..close].iter().collect();
            options = split_options(&body);
            i = close + 1;
        }

        let converter = match keyword.as_str() {
            "d" | "date" => {
                let pattern = options.first().map_or(DEFAULT_DATE_PATTERN, |s| s.as_str());
                let zone = match options.get(1) {
                    Some(z) => z.parse()?,
                    None => default_zone,
                };
                Converter::Date(DateFormat::new(pattern, zone)?)
            }
            "level" | "le" | "p" => Converter::Level,
            "logger" | "lo" | "c" => {
                let len = match options.first() {
                    Some(s) => Some(s.parse::<usize>().map_err(|_| {
                        LoggerError::config(ORIGIN, format!("bad logger length '{}'", s))
                    })?),
                    None => None,
                };
                Converter::Logger(len)
            }
            "msg" | "m" | "message" => Converter::Message,
            "n" => Converter::Newline,
            "thread" | "t" => Converter::Thread,
            "mdc" | "X" => Converter::Mdc(options.first().filter(|k| !k.is_empty()).cloned()),
            "ex" | "exception" | "throwable" => Converter::Throwable,
            "marker" => Converter::Marker,
            other => {
                return Err(LoggerError::config(
                    ORIGIN,
                    format!("unknown conversion word '{}'", other),
                ))
            }
        };

        flush_literal(&mut literal, &mut segments);
        segments.push(Segment { converter, format });
    }
    flush_literal(&mut literal, &mut segments);
    Ok(segments)
}

/// Split converter options on commas outside double quotes, dropping the quotes
fn split_options(body: &str) -> Vec<String> {
    let mut options = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in body.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => options.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    options.push(current.trim().to_string());
    options
}

fn read_number(chars: &[char], mut i: usize) -> (Option<usize>, usize) {
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i == start {
        return (None, i);
    }
    let text: String = chars[start..i].iter().collect();
    (text.parse().ok(), i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;
    use crate::core::throwable::ThrowableProxy;
    use chrono::TimeZone;

    fn event() -> LogEvent {
        let ts = chrono::Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 5)
            .single()
            .expect("valid datetime");
        LogEvent::builder(LogLevel::Warn, "com.example.service.Billing", "charged {}")
            .arg(42)
            .timestamp(ts)
            .thread_name("worker-1")
            .mdc_entry("user", "alice")
            .marker("AUDIT")
            .build()
    }

    fn started(pattern: &str) -> PatternEncoder {
        let mut enc = PatternEncoder::new(pattern).with_zone(DateZone::Utc);
        enc.start(&ContextHandle::detached()).unwrap();
        enc
    }

    #[test]
    fn test_default_pattern() {
        let enc = started(DEFAULT_PATTERN);
        assert_eq!(
            enc.layout(&event()).unwrap(),
            "2024-03-01 12:00:05,000 [worker-1] WARN  com.example.service.Billing - charged 42\n"
        );
    }

    #[test]
    fn test_logger_abbreviation() {
        let mut out = String::new();
        abbreviate("com.example.service.Billing", 20, &mut out);
        assert_eq!(out, "c.e.service.Billing");
        out.clear();
        abbreviate("com.example.service.Billing", 0, &mut out);
        assert_eq!(out, "Billing");
        out.clear();
        abbreviate("com.example.service.Billing", 5, &mut out);
        assert_eq!(out, "c.e.s.Billing");
    }

    #[test]
    fn test_format_modifiers() {
        let enc = started("[%10.10thread][%-7level][%.-3logger][%.5logger]");
        assert_eq!(
            enc.layout(&event()).unwrap(),
            "[  worker-1][WARN   ][com][lling]"
        );
    }

    #[test]
    fn test_mdc_marker_and_escape() {
        let enc = started("%X{user} %X{missing}|%mdc|%marker|100%%");
        assert_eq!(
            enc.layout(&event()).unwrap(),
            "alice |user=alice|AUDIT|100%"
        );
    }

    #[test]
    fn test_date_options() {
        let enc = started("%d{HH:mm:ss, +01:00} %date{yyyy}");
        assert_eq!(enc.layout(&event()).unwrap(), "13:00:05 2024");
    }

    #[test]
    fn test_quoted_date_option_keeps_commas() {
        let enc = started(r#"%d{"HH:mm:ss,SSS", UTC}"#);
        assert_eq!(enc.layout(&event()).unwrap(), "12:00:05,000");
    }

    #[test]
    fn test_throwable_converter() {
        let enc = started("%m%n%ex");
        let ev = LogEvent::builder(LogLevel::Error, "a", "failed")
            .throwable(ThrowableProxy::new("IoError", "pipe"))
            .build();
        assert_eq!(enc.layout(&ev).unwrap(), "failed\nIoError: pipe\n");
    }

    #[test]
    fn test_invalid_patterns() {
        for bad in ["%bogus", "%d{yyyy", "trailing %", "%.level"] {
            let mut enc = PatternEncoder::new(bad);
            assert!(enc.start(&ContextHandle::detached()).is_err(), "{}", bad);
            assert!(!enc.is_started());
        }
    }

    #[test]
    fn test_layout_before_start_fails() {
        let enc = PatternEncoder::default();
        assert!(matches!(enc.layout(&event()), Err(LoggerError::NotStarted(_))));
    }
}

//! Date rendering for the `%d` converter
//!
//! Patterns may use Java-style tokens (`yyyy-MM-dd HH:mm:ss,SSS`), the keyword
//! `ISO8601`, or raw strftime text when they contain `%`. Rendering goes through
//! a per-thread cache keyed by `(pattern, zone)`, so no formatter state is ever
//! shared between threads.

use crate::core::error::{LoggerError, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, Utc};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Pattern used by `%d` without options and by the `ISO8601` keyword
pub const DEFAULT_DATE_PATTERN: &str = "yyyy-MM-dd HH:mm:ss,SSS";

/// Zone a date is rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DateZone {
    Utc,
    #[default]
    Local,
    /// Offset east of UTC, in seconds
    Fixed(i32),
}

impl FromStr for DateZone {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "UTC" | "GMT" | "Z" => return Ok(DateZone::Utc),
            "LOCAL" => return Ok(DateZone::Local),
            _ => {}
        }
        let invalid = || LoggerError::config("DateZone", format!("unrecognised time zone '{}'", s));
        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return Err(invalid()),
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
        let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
        if hours > 23 || minutes > 59 {
            return Err(invalid());
        }
        Ok(DateZone::Fixed(sign * (hours * 3600 + minutes * 60)))
    }
}

impl fmt::Display for DateZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateZone::Utc => f.write_str("UTC"),
            DateZone::Local => f.write_str("local"),
            DateZone::Fixed(secs) => {
                let sign = if *secs < 0 { '-' } else { '+' };
                let abs = secs.abs();
                write!(f, "{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
            }
        }
    }
}

struct Memo {
    key: i64,
    rendered: String,
}

thread_local! {
    static DATE_CACHE: RefCell<HashMap<(String, DateZone), Memo>> = RefCell::new(HashMap::new());
}

/// Compiled date pattern bound to a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    /// (strftime pattern, zone), also the thread-local cache key
    key: (String, DateZone),
    sub_second: bool,
}

impl DateFormat {
    pub fn new(pattern: &str, zone: DateZone) -> Result<Self> {
        let pattern = pattern.trim();
        let strftime = if pattern.is_empty() || pattern.eq_ignore_ascii_case("ISO8601") {
            java_to_strftime(DEFAULT_DATE_PATTERN)?
        } else if pattern.contains('%') {
            pattern.to_string()
        } else {
            java_to_strftime(pattern)?
        };

        if StrftimeItems::new(&strftime).any(|item| matches!(item, Item::Error)) {
            return Err(LoggerError::config(
                "DateFormat",
                format!("invalid date pattern '{}'", pattern),
            ));
        }
        let sub_second = ["%f", "%3f", "%6f", "%9f", "%.f", "%.3f", "%.6f", "%.9f"]
            .iter()
            .any(|spec| strftime.contains(spec));

        Ok(Self {
            key: (strftime, zone),
            sub_second,
        })
    }

    pub fn strftime(&self) -> &str {
        &self.key.0
    }

    pub fn zone(&self) -> DateZone {
        self.key.1
    }

    pub fn format(&self, ts: DateTime<Utc>) -> String {
        let mut out = String::new();
        self.format_into(ts, &mut out);
        out
    }

    /// Append the rendering of `ts` to `out`
    ///
    /// The thread's cache entry remembers the last rendered second (or
    /// millisecond for patterns with fractions) and reuses it when unchanged.
    pub fn format_into(&self, ts: DateTime<Utc>, out: &mut String) {
        let memo_key = if self.sub_second {
            ts.timestamp_millis()
        } else {
            ts.timestamp()
        };
        DATE_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if let Some(memo) = cache.get(&self.key) {
                if memo.key == memo_key {
                    out.push_str(&memo.rendered);
                    return;
                }
            }
            let rendered = self.render(ts);
            out.push_str(&rendered);
            cache.insert(
                self.key.clone(),
                Memo {
                    key: memo_key,
                    rendered,
                },
            );
        });
    }

    fn render(&self, ts: DateTime<Utc>) -> String {
        let pattern = self.key.0.as_str();
        let mut out = String::with_capacity(pattern.len() + 8);
        let result = match self.key.1 {
            DateZone::Utc => write!(out, "{}", ts.format(pattern)),
            DateZone::Local => write!(out, "{}", ts.with_timezone(&Local).format(pattern)),
            DateZone::Fixed(secs) => match FixedOffset::east_opt(secs) {
                Some(offset) => write!(out, "{}", ts.with_timezone(&offset).format(pattern)),
                None => write!(out, "{}", ts.format(pattern)),
            },
        };
        if result.is_err() {
            out.clear();
            out.push_str(&ts.to_rfc3339());
        }
        out
    }
}

/// Translate a Java-style date pattern into strftime text
fn java_to_strftime(pattern: &str) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // quoted literal; '' is an escaped quote
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('a', _) => "%p",
            ('D', _) => "%j",
            ('u', _) => "%u",
            ('Z', _) => "%z",
            ('X', 1) | ('X', 2) => "%z",
            ('X', _) => "%:z",
            ('z', _) => "%Z",
            _ => {
                return Err(LoggerError::config(
                    "DateFormat",
                    format!("unsupported pattern letter '{}' in '{}'", c, pattern),
                ))
            }
        };
        out.push_str(spec);
        i += run;
    }
    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

use super::{Filter, FilterReply};
use crate::core::log_event::LogEvent;
use crate::core::log_level::LogLevel;

/// Exact level match
#[derive(Debug, Clone)]
pub struct LevelFilter {
    level: LogLevel,
    on_match: FilterReply,
    on_mismatch: FilterReply,
}

impl LevelFilter {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            on_match: FilterReply::Neutral,
            on_mismatch: FilterReply::Neutral,
        }
    }

    #[must_use]
    pub fn on_match(mut self, reply: FilterReply) -> Self {
        self.on_match = reply;
        self
    }

    #[must_use]
    pub fn on_mismatch(mut self, reply: FilterReply) -> Self {
        self.on_mismatch = reply;
        self
    }
}

impl Filter for LevelFilter {
    fn name(&self) -> &str {
        "LevelFilter"
    }

    fn decide(&self, event: &LogEvent) -> FilterReply {
        if event.level() == self.level {
            self.on_match
        } else {
            self.on_mismatch
        }
    }
}

/// Denies events below a threshold, stays neutral otherwise
#[derive(Debug, Clone)]
pub struct ThresholdFilter {
    threshold: LogLevel,
}

impl ThresholdFilter {
    pub fn new(threshold: LogLevel) -> Self {
        Self { threshold }
    }
}

impl Filter for ThresholdFilter {
    fn name(&self) -> &str {
        "ThresholdFilter"
    }

    fn decide(&self, event: &LogEvent) -> FilterReply {
        if event.level() < self.threshold {
            FilterReply::Deny
        } else {
            FilterReply::Neutral
        }
    }
}

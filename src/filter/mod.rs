//! Ternary filters and the per-appender filter chain

mod evaluator_filter;
mod level;

pub use evaluator_filter::EvaluatorFilter;
pub use level::{LevelFilter, ThresholdFilter};

use crate::core::context::ContextHandle;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterReply {
    Accept,
    Deny,
    Neutral,
}

impl FromStr for FilterReply {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(FilterReply::Accept),
            "DENY" => Ok(FilterReply::Deny),
            "NEUTRAL" => Ok(FilterReply::Neutral),
            other => Err(LoggerError::config(
                "Filter",
                format!("unknown filter reply '{}'", other),
            )),
        }
    }
}

pub trait Filter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn start(&mut self, _context: &ContextHandle) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn decide(&self, event: &LogEvent) -> FilterReply;
}

/// Ordered filters; the first non-neutral reply wins, an all-neutral chain accepts
#[derive(Debug, Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Start every filter; a filter that fails stays in the chain, its error is recorded
    pub fn start(&mut self, context: &ContextHandle) {
        for filter in &mut self.filters {
            if let Err(e) = filter.start(context) {
                context.add_error(
                    "FilterChain",
                    format!("Filter '{}' failed to start: {}", filter.name(), e),
                );
            }
        }
    }

    pub fn stop(&mut self) {
        for filter in &mut self.filters {
            filter.stop();
        }
    }

    pub fn decide(&self, event: &LogEvent) -> FilterReply {
        self.filters
            .iter()
            .map(|f| f.decide(event))
            .find(|reply| *reply != FilterReply::Neutral)
            .unwrap_or(FilterReply::Accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;

    #[derive(Debug)]
    struct Fixed(FilterReply);

    impl Filter for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn decide(&self, _event: &LogEvent) -> FilterReply {
            self.0
        }
    }

    fn chain(replies: &[FilterReply]) -> FilterChain {
        let mut chain = FilterChain::new();
        for r in replies {
            chain.add(Box::new(Fixed(*r)));
        }
        chain
    }

    #[test]
    fn test_empty_and_all_neutral_accept() {
        let event = LogEvent::new(LogLevel::Info, "a", "b");
        assert_eq!(chain(&[]).decide(&event), FilterReply::Accept);
        assert_eq!(
            chain(&[FilterReply::Neutral, FilterReply::Neutral]).decide(&event),
            FilterReply::Accept
        );
    }

    #[test]
    fn test_first_decision_wins() {
        let event = LogEvent::new(LogLevel::Info, "a", "b");
        assert_eq!(
            chain(&[FilterReply::Neutral, FilterReply::Deny, FilterReply::Accept]).decide(&event),
            FilterReply::Deny
        );
        assert_eq!(
            chain(&[FilterReply::Accept, FilterReply::Deny]).decide(&event),
            FilterReply::Accept
        );
    }

    #[test]
    fn test_reply_parsing() {
        assert_eq!("deny".parse::<FilterReply>().unwrap(), FilterReply::Deny);
        assert!("maybe".parse::<FilterReply>().is_err());
    }
}

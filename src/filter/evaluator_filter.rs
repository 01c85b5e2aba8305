use super::{Filter, FilterReply};
use crate::boolex::{Evaluation, EvaluatorHandle};
use crate::core::context::{ContextHandle, LifeCycle};
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use std::sync::Arc;

/// Maps an evaluator's verdict to `on_match` / `on_mismatch`
///
/// An evaluation error yields NEUTRAL; a quarantined evaluator yields DENY.
#[derive(Debug)]
pub struct EvaluatorFilter {
    name: String,
    evaluator: Arc<EvaluatorHandle>,
    on_match: FilterReply,
    on_mismatch: FilterReply,
}

impl EvaluatorFilter {
    pub fn new(evaluator: Arc<EvaluatorHandle>) -> Self {
        Self {
            name: format!("EvaluatorFilter[{}]", evaluator.name()),
            evaluator,
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

    pub fn evaluator(&self) -> &Arc<EvaluatorHandle> {
        &self.evaluator
    }
}

impl Filter for EvaluatorFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        if self.on_match == FilterReply::Neutral && self.on_mismatch == FilterReply::Neutral {
            context.add_warn(
                "EvaluatorFilter",
                format!(
                    "'{}' answers NEUTRAL on both match and mismatch and has no effect",
                    self.name
                ),
            );
        }
        // evaluators shared through the context registry may already be running
        if !self.evaluator.is_started() && !self.evaluator.is_quarantined() {
            self.evaluator.set_context(context.clone());
            self.evaluator.start()?;
        }
        Ok(())
    }

    fn decide(&self, event: &LogEvent) -> FilterReply {
        match self.evaluator.evaluate(event) {
            Evaluation::Match => self.on_match,
            Evaluation::Mismatch => self.on_mismatch,
            Evaluation::Failed => FilterReply::Neutral,
            Evaluation::Quarantined => FilterReply::Deny,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolex::ExpressionEvaluator;
    use crate::core::context::Context;
    use crate::core::log_level::LogLevel;
    use crate::core::status::StatusLevel;

    fn filter(expr: &str) -> EvaluatorFilter {
        let handle = Arc::new(EvaluatorHandle::new(Box::new(ExpressionEvaluator::new(
            "e", expr,
        ))));
        EvaluatorFilter::new(handle)
            .on_match(FilterReply::Deny)
            .on_mismatch(FilterReply::Neutral)
    }

    #[test]
    fn test_match_maps_to_reply() {
        let mut f = filter(r#"message.contains("secret")"#);
        f.start(&ContextHandle::detached()).unwrap();
        let secret = LogEvent::new(LogLevel::Info, "a", "a secret value");
        let plain = LogEvent::new(LogLevel::Info, "a", "nothing here");
        assert_eq!(f.decide(&secret), FilterReply::Deny);
        assert_eq!(f.decide(&plain), FilterReply::Neutral);
    }

    #[test]
    fn test_neutral_neutral_warns_at_start() {
        let ctx = Context::new("f");
        let handle = Arc::new(EvaluatorHandle::new(Box::new(ExpressionEvaluator::new(
            "e", "true",
        ))));
        let mut f = EvaluatorFilter::new(handle);
        f.start(&ctx.handle()).unwrap();
        assert_eq!(ctx.status_manager().highest_level(), Some(StatusLevel::Warn));
    }

    #[test]
    fn test_failed_start_denies() {
        let mut f = filter("message ==");
        assert!(f.start(&ContextHandle::detached()).is_err());
        assert_eq!(
            f.decide(&LogEvent::new(LogLevel::Info, "a", "b")),
            FilterReply::Deny
        );
    }
}

//! Named regular-expression matcher usable from evaluator expressions

use crate::core::context::ContextHandle;
use crate::core::error::{LoggerError, Result};
use regex::{Regex, RegexBuilder};

const ORIGIN: &str = "Matcher";

/// A named regex, compiled once at `start()`
///
/// Matching uses find semantics: `matches` is true when the pattern occurs
/// anywhere in the input, so `test` and `.*test.*` accept the same strings.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: Option<String>,
    regex: Option<String>,
    case_sensitive: bool,
    compiled: Option<Regex>,
    context: ContextHandle,
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            name: None,
            regex: None,
            case_sensitive: true,
            compiled: None,
            context: ContextHandle::detached(),
        }
    }

    /// Shorthand for a named matcher over `regex`
    pub fn with_regex(name: impl Into<String>, regex: impl Into<String>) -> Self {
        let mut matcher = Self::new();
        matcher.set_name(name);
        matcher.set_regex(regex);
        matcher
    }

    #[must_use]
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.set_case_sensitive(case_sensitive);
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn set_regex(&mut self, regex: impl Into<String>) {
        self.regex = Some(regex.into());
    }

    pub fn set_case_sensitive(&mut self, case_sensitive: bool) {
        self.case_sensitive = case_sensitive;
    }

    pub fn set_context(&mut self, context: ContextHandle) {
        self.context = context;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn regex(&self) -> Option<&str> {
        self.regex.as_deref()
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn is_started(&self) -> bool {
        self.compiled.is_some()
    }

    /// Compile the regex; on failure the matcher stays unstarted and an error status is recorded
    pub fn start(&mut self) -> Result<()> {
        let result = self.compile();
        match &result {
            Ok(regex) => self.compiled = Some(regex.clone()),
            Err(e) => {
                self.compiled = None;
                self.context.add_error(ORIGIN, e.to_string());
            }
        }
        result.map(|_| ())
    }

    fn compile(&self) -> Result<Regex> {
        let name = self
            .name
            .as_deref()
            .ok_or_else(|| LoggerError::config(ORIGIN, "all matchers must be named"))?;
        let pattern = self.regex.as_deref().ok_or_else(|| {
            LoggerError::config(ORIGIN, format!("no regex was set for matcher '{}'", name))
        })?;
        RegexBuilder::new(pattern)
            .case_insensitive(!self.case_sensitive)
            .build()
            .map_err(|source| LoggerError::BadPattern {
                name: name.to_string(),
                source,
            })
    }

    pub fn stop(&mut self) {
        self.compiled = None;
    }

    /// True iff the pattern is found somewhere in `input`
    pub fn matches(&self, input: &str) -> Result<bool> {
        match &self.compiled {
            Some(regex) => Ok(regex.is_match(input)),
            None => Err(LoggerError::not_started(
                self.name.as_deref().unwrap_or("unnamed matcher"),
            )),
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::status::StatusLevel;

    fn started(regex: &str, case_sensitive: bool) -> Matcher {
        let mut matcher = Matcher::with_regex("testMatcher", regex).case_sensitive(case_sensitive);
        matcher.start().unwrap();
        matcher
    }

    #[test]
    fn test_full_region() {
        let matcher = started(".*test.*", true);
        for input in ["test", "xxxxtest", "testxxxx", "xxxxtestxxxx"] {
            assert!(matcher.matches(input).unwrap(), "{}", input);
        }
    }

    #[test]
    fn test_part_region() {
        let matcher = started("test", true);
        for input in ["test", "xxxxtest", "testxxxx", "xxxxtestxxxx"] {
            assert!(matcher.matches(input).unwrap(), "{}", input);
        }
    }

    #[test]
    fn test_case_insensitive() {
        let matcher = started("test", false);
        for input in ["TEST", "tEst", "tESt", "TesT"] {
            assert!(matcher.matches(input).unwrap(), "{}", input);
        }
    }

    #[test]
    fn test_case_sensitive() {
        let matcher = started("test", true);
        for input in ["TEST", "tEst", "tESt", "TesT"] {
            assert!(!matcher.matches(input).unwrap(), "{}", input);
        }
    }

    #[test]
    fn test_matches_before_start_fails() {
        let matcher = Matcher::with_regex("idle", "x");
        assert!(matches!(matcher.matches("x"), Err(LoggerError::NotStarted(_))));
    }

    #[test]
    fn test_bad_pattern_reports_status() {
        let ctx = Context::new("matcher-test");
        let mut matcher = Matcher::with_regex("broken", "(unclosed");
        matcher.set_context(ctx.handle());

        let err = matcher.start().unwrap_err();
        assert!(matches!(err, LoggerError::BadPattern { .. }));
        assert!(!matcher.is_started());
        assert_eq!(ctx.status_manager().highest_level(), Some(StatusLevel::Error));
    }

    #[test]
    fn test_missing_name_or_regex() {
        let mut unnamed = Matcher::new();
        unnamed.set_regex("x");
        assert!(matches!(
            unnamed.start(),
            Err(LoggerError::InvalidConfiguration { .. })
        ));

        let mut no_regex = Matcher::new();
        no_regex.set_name("m");
        assert!(no_regex.start().is_err());
    }

    #[test]
    fn test_stop_then_restart() {
        let mut matcher = started("abc", true);
        matcher.stop();
        assert!(matcher.matches("abc").is_err());
        matcher.start().unwrap();
        assert!(matcher.matches("zabcz").unwrap());
    }
}

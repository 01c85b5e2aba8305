//! Property-based tests for rust_log_pipeline using proptest

use proptest::prelude::*;
use rust_log_pipeline::appenders::ListAppender;
use rust_log_pipeline::boolex::Matcher;
use rust_log_pipeline::encoder::{Encoder, ObjectStreamDecoder, ObjectStreamEncoder};
use rust_log_pipeline::filter::{FilterChain, FilterReply, LevelFilter};
use rust_log_pipeline::prelude::*;
use std::io::Cursor;
use std::sync::Arc;

fn any_level() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Trace),
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warn),
        Just(LogLevel::Error),
    ]
}

fn started(regex: &str, case_sensitive: bool) -> Matcher {
    let mut matcher = Matcher::with_regex("m", regex).case_sensitive(case_sensitive);
    matcher.start().unwrap();
    matcher
}

// ============================================================================
// Matcher Tests
// ============================================================================

proptest! {
    /// Any string containing the literal pattern matches it
    #[test]
    fn test_matcher_partial_match(
        needle in "[a-z0-9]{1,8}",
        prefix in "[ -~]{0,16}",
        suffix in "[ -~]{0,16}",
    ) {
        let matcher = started(&needle, true);
        let haystack = format!("{}{}{}", prefix, needle, suffix);
        prop_assert!(matcher.matches(&haystack).unwrap());
    }

    /// `.*t.*` and `t` agree on every input
    #[test]
    fn test_dot_star_wrapping_is_neutral(
        needle in "[a-z]{1,4}",
        input in "[a-z ]{0,24}",
    ) {
        let plain = started(&needle, true);
        let wrapped = started(&format!(".*{}.*", needle), true);
        prop_assert_eq!(plain.matches(&input).unwrap(), wrapped.matches(&input).unwrap());
    }

    /// A case-insensitive matcher ignores the case of its input
    #[test]
    fn test_case_insensitive_invariance(
        needle in "[a-zA-Z]{1,6}",
        input in "[a-zA-Z ]{0,24}",
    ) {
        let matcher = started(&needle, false);
        let original = matcher.matches(&input).unwrap();
        prop_assert_eq!(original, matcher.matches(&input.to_uppercase()).unwrap());
        prop_assert_eq!(original, matcher.matches(&input.to_lowercase()).unwrap());
    }
}

// ============================================================================
// Filter Chain Tests
// ============================================================================

proptest! {
    /// A chain whose filters all answer NEUTRAL accepts every event
    #[test]
    fn test_all_neutral_chain_accepts(
        filter_levels in prop::collection::vec(any_level(), 0..6),
        event_level in any_level(),
    ) {
        let mut chain = FilterChain::new();
        for level in filter_levels {
            chain.add(Box::new(LevelFilter::new(level)));
        }
        let event = LogEvent::new(event_level, "prop", "m");
        prop_assert_ne!(chain.decide(&event), FilterReply::Deny);
    }
}

// ============================================================================
// Object Stream Tests
// ============================================================================

proptest! {
    /// Exactly one RESET per K writes, on both sides of the stream
    #[test]
    fn test_reset_cadence(k in 1usize..20, writes in 0usize..120) {
        let mut encoder = ObjectStreamEncoder::new().with_reset_frequency(k);
        let mut bytes = encoder.header_bytes();
        for i in 0..writes {
            let logger = format!("logger.{}", i % 3);
            bytes.extend(encoder.encode(&LogEvent::new(LogLevel::Info, logger, "m")).unwrap());
        }
        prop_assert_eq!(encoder.resets(), (writes / k) as u64);

        let mut decoder = ObjectStreamDecoder::new(Cursor::new(bytes)).unwrap();
        let mut decoded = 0;
        while decoder.read_event().unwrap().is_some() {
            decoded += 1;
        }
        prop_assert_eq!(decoded, writes);
        prop_assert_eq!(decoder.resets(), (writes / k) as u64);
    }
}

// ============================================================================
// Logger Hierarchy Tests
// ============================================================================

proptest! {
    /// After any sequence of level changes the next emission sees the last one
    #[test]
    fn test_effective_level_cache_coherence(
        changes in prop::collection::vec((0usize..3, prop::option::of(any_level())), 1..20),
        emitted in any_level(),
    ) {
        let names = ["ROOT", "a", "a.b"];
        let ctx = LoggerContext::new("prop");
        let list = ListAppender::new("mem");
        let appender: AppenderRef = Arc::new(SyncAppender::new(list.clone()));
        appender.start().unwrap();
        ctx.add_appender("ROOT", appender);
        let leaf = ctx.logger("a.b.c");

        for (target, level) in changes {
            let before = ctx.config_epoch();
            ctx.set_level(names[target], level);
            prop_assert!(ctx.config_epoch() > before);

            let expected = ctx.hierarchy().effective_level("a.b.c");
            prop_assert_eq!(leaf.effective_level(), expected);

            list.clear();
            leaf.log(emitted, "sample");
            prop_assert_eq!(list.len(), usize::from(emitted >= expected));
        }
    }

    /// Level names parse back case-insensitively
    #[test]
    fn test_level_parse_roundtrip(level in any_level(), upper in any::<bool>()) {
        let text = if upper { level.to_str().to_uppercase() } else { level.to_str().to_lowercase() };
        prop_assert_eq!(text.parse::<LogLevel>().unwrap(), level);
    }
}

//! Integration tests for the logging pipeline
//!
//! These tests verify:
//! - Matchers and expression evaluators, including quarantine
//! - Async dispatch under a blocked downstream
//! - Socket buffering across an unreachable peer
//! - Size-based rolling without losing or splitting events
//! - Logger hierarchy, reconfiguration and JSON configuration end to end

use rust_log_pipeline::appenders::{
    AsyncAppender, ConnectionState, FileAppender, ListAppender, RollingFileAppender,
    RollingPolicy, SocketAppender, TriggeringPolicy,
};
use rust_log_pipeline::boolex::{Evaluation, EvaluatorHandle, EventEvaluator, ExpressionEvaluator, Matcher};
use rust_log_pipeline::config::Configurator;
use rust_log_pipeline::core::{
    Appender, AppenderRef, CollectingStatusListener, ContextHandle, ContextSelector, EventAppender,
    Hierarchy, LifeCycle, LogEvent, LogLevel, LoggerContext, Mdc, StatusLevel, SyncAppender,
};
use rust_log_pipeline::encoder::{JsonEncoder, ObjectStreamDecoder, PatternEncoder};
use rust_log_pipeline::filter::{EvaluatorFilter, FilterReply};
use std::fs;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

fn memory(name: &str) -> (ListAppender, AppenderRef) {
    let list = ListAppender::new(name);
    let appender: AppenderRef = Arc::new(SyncAppender::new(list.clone()));
    appender.start().expect("memory appender starts");
    (list, appender)
}

#[test]
fn test_case_sensitive_matcher() {
    let mut matcher = Matcher::with_regex("m", "test");
    matcher.start().expect("valid regex");
    assert!(!matcher.matches("TEST").unwrap());
    assert!(matcher.matches("xxxxtest").unwrap());
}

#[test]
fn test_case_insensitive_matcher() {
    let mut matcher = Matcher::with_regex("m", "test").case_sensitive(false);
    matcher.start().expect("valid regex");
    assert!(matcher.matches("TesT").unwrap());
}

#[test]
fn test_expression_with_matcher() {
    let mut evaluator = ExpressionEvaluator::new("errors", "m.matches(message)")
        .with_matcher(Matcher::with_regex("m", "ERROR"));
    evaluator.start(&ContextHandle::detached()).expect("expression compiles");

    let hit = LogEvent::new(LogLevel::Info, "svc", "Got ERROR code");
    let miss = LogEvent::new(LogLevel::Info, "svc", "ok");
    assert!(evaluator.evaluate(&hit).unwrap());
    assert!(!evaluator.evaluate(&miss).unwrap());
}

#[test]
fn test_malformed_expression_never_starts() {
    let ctx = LoggerContext::new("boolex");
    let listener = Arc::new(CollectingStatusListener::new());
    ctx.context().status_manager().add_listener(listener.clone());

    let handle = Arc::new(
        EvaluatorHandle::new(Box::new(ExpressionEvaluator::new("broken", "message.contains(")))
            .with_context(ctx.context().handle()),
    );
    assert!(handle.start().is_err());
    assert!(!handle.is_started());
    assert!(handle.is_quarantined());
    // one from the evaluator, one for the quarantine
    assert_eq!(listener.count(StatusLevel::Error), 2);

    let event = LogEvent::new(LogLevel::Error, "svc", "anything");
    assert_eq!(handle.evaluate(&event), Evaluation::Quarantined);

    // a filter over a quarantined evaluator denies
    let filter = EvaluatorFilter::new(handle).on_match(FilterReply::Accept);
    let list = ListAppender::new("filtered");
    let appender = SyncAppender::new(list.clone());
    appender.add_filter(Box::new(filter));
    appender.start().unwrap();
    appender.do_append(&Arc::new(event));
    assert!(list.is_empty());
}

/// Blocks every append until the release channel is dropped
struct Blocked {
    gate: crossbeam_channel::Receiver<()>,
    inner: ListAppender,
}

impl Appender for Blocked {
    fn name(&self) -> &str {
        "blocked"
    }

    fn append(&mut self, event: &LogEvent) -> rust_log_pipeline::Result<()> {
        let _ = self.gate.recv();
        self.inner.append(event)
    }

    fn flush(&mut self) -> rust_log_pipeline::Result<()> {
        Ok(())
    }
}

#[test]
fn test_async_never_block_against_stuck_downstream() {
    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    let delivered = ListAppender::new("delivered");
    let downstream: AppenderRef = Arc::new(SyncAppender::new(Blocked {
        gate,
        inner: delivered.clone(),
    }));
    let appender = AsyncAppender::new("async", downstream)
        .with_queue_size(8)
        .with_discarding_threshold(0)
        .with_never_block(true);
    appender.start().unwrap();

    for i in 0..100 {
        appender.do_append(&Arc::new(LogEvent::new(LogLevel::Info, "producer", i.to_string())));
    }
    assert_eq!(appender.metrics().dropped_count(), 92);

    drop(release);
    assert!(wait_for(|| delivered.len() == 8));
    appender.stop();
    assert_eq!(delivered.len(), 8);
    assert_eq!(appender.metrics().dropped_count(), 92);
}

#[test]
fn test_socket_buffers_until_peer_is_reachable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let socket = SocketAppender::new("127.0.0.1", port)
        .with_queue_size(16)
        .with_reconnect_delay(Duration::from_millis(20), Duration::from_millis(100));
    let monitor = socket.monitor();
    let appender: AppenderRef = Arc::new(SyncAppender::new(socket));
    appender.start().unwrap();

    for i in 0..20 {
        appender.do_append(&Arc::new(LogEvent::new(LogLevel::Info, "net", format!("e{}", i))));
    }
    assert!(wait_for(|| monitor.state() == ConnectionState::Connecting
        || monitor.state() == ConnectionState::Disconnected));
    // capacity 16: the four oldest were discarded
    assert_eq!(monitor.queue_len(), 16);
    assert_eq!(monitor.dropped(), 4);

    let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
    let (stream, _) = listener.accept().unwrap();
    let mut decoder = ObjectStreamDecoder::new(stream).unwrap();
    let received: Vec<String> = (0..16)
        .map(|_| decoder.read_event().unwrap().unwrap().formatted_message().to_string())
        .collect();
    let expected: Vec<String> = (4..20).map(|i| format!("e{}", i)).collect();
    assert_eq!(received, expected);

    appender.stop();
}

#[test]
fn test_size_rolling_keeps_events_whole() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("roll.log");
    let rolling = RollingFileAppender::new(&path)
        .with_triggering(TriggeringPolicy::size(1024))
        .with_rolling(RollingPolicy::new().with_max_backups(5))
        .with_encoder(PatternEncoder::new("%msg%n"));
    let backups = [rolling.backup_path(2), rolling.backup_path(1)];
    let appender: AppenderRef = Arc::new(SyncAppender::new(rolling));
    appender.start().unwrap();

    // 30 events of exactly 100 bytes each
    for i in 0..30 {
        let message = format!("{:03}-{}", i, "x".repeat(95));
        appender.do_append(&Arc::new(LogEvent::new(LogLevel::Info, "roll", message)));
    }
    appender.stop();

    let mut files = backups.to_vec();
    files.push(path.clone());
    let mut all = Vec::new();
    for file in &files {
        let content = fs::read_to_string(file).expect("three output files");
        assert!(content.len() <= 1024, "{} is over the limit", file.display());
        assert!(content.ends_with('\n'));
        for line in content.lines() {
            assert_eq!(line.len(), 99, "event split across files");
            all.push(line[..3].to_string());
        }
    }
    let expected: Vec<String> = (0..30).map(|i| format!("{:03}", i)).collect();
    assert_eq!(all, expected);
    assert!(!dir.path().join("roll.log.3").exists());
}

#[test]
fn test_hierarchy_and_additivity_end_to_end() {
    let ctx = LoggerContext::new("hier");
    let (root_list, root) = memory("root");
    let (audit_list, audit) = memory("audit");
    ctx.reconfigure(
        Hierarchy::new()
            .with_level("ROOT", LogLevel::Info)
            .with_appender("ROOT", root)
            .with_appender("app.audit", audit)
            .with_additive("app.audit", false)
            .with_level("app.audit", LogLevel::Trace),
    );

    ctx.logger("app.web").debug("dropped by level");
    ctx.logger("app.web").info("web");
    ctx.logger("app.audit.login").trace("audit only");

    assert_eq!(root_list.messages(), vec!["web"]);
    assert_eq!(audit_list.messages(), vec!["audit only"]);
}

#[test]
fn test_mdc_and_markers_reach_encoded_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    let ctx = LoggerContext::new("json");
    let file: AppenderRef = Arc::new(SyncAppender::new(
        FileAppender::new(&path).with_encoder(JsonEncoder::new()),
    ));
    file.start().unwrap();
    ctx.add_appender("ROOT", file);

    {
        let _guard = Mdc::scoped("request", "r-17");
        ctx.logger("api").at(LogLevel::Warn).marker("SLOW").arg(1200).log("took {} ms");
    }
    ctx.logger("api").info("no mdc");
    ctx.stop();

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["message"], "took 1200 ms");
    assert_eq!(lines[0]["mdc"]["request"], "r-17");
    assert!(lines[1]["mdc"].get("request").is_none());
}

#[test]
fn test_reconfigure_while_logging() {
    let ctx = LoggerContext::new("swap");
    let (first_list, first) = memory("first");
    let (second_list, second) = memory("second");
    ctx.add_appender("ROOT", Arc::clone(&first));

    let logger = ctx.logger("busy");
    let producer = {
        let logger = logger.clone();
        thread::spawn(move || {
            for i in 0..2000 {
                logger.info(i.to_string());
            }
        })
    };
    thread::sleep(Duration::from_millis(1));
    // "first" stays referenced elsewhere so in-flight events are not refused
    ctx.reconfigure(
        Hierarchy::new()
            .with_appender("ROOT", second)
            .with_appender("elsewhere", Arc::clone(&first))
            .with_additive("elsewhere", false),
    );
    producer.join().unwrap();

    // each event went through exactly one graph
    assert_eq!(first_list.len() + second_list.len(), 2000);
    assert!(first.is_started());
    logger.info("after");
    assert_eq!(second_list.messages().last().map(String::as_str), Some("after"));
}

#[test]
fn test_selector_owns_contexts() {
    let selector = ContextSelector::new();
    let ctx = selector.init(LoggerContext::new("tenant-a")).unwrap();
    let (list, appender) = memory("mem");
    ctx.add_appender("ROOT", Arc::clone(&appender));
    selector.get("tenant-a").unwrap().logger("x").info("hello");
    assert_eq!(list.messages(), vec!["hello"]);

    selector.teardown("tenant-a");
    assert!(!appender.is_started());
    assert!(selector.get("tenant-a").is_none());
}

#[test]
fn test_configuration_document_drives_pipeline() {
    let dir = TempDir::new().unwrap();
    let ctx = LoggerContext::new("cfg");
    ctx.context()
        .set_property("LOG_DIR", dir.path().display().to_string());

    let doc = r#"{
        "evaluators": [
            { "name": "slow", "expression": "message.contains(\"slow\") || level >= ERROR" }
        ],
        "appenders": [
            { "name": "all", "type": "file", "file": "${LOG_DIR}/all.log", "pattern": "%-5level %logger %msg%n" },
            { "name": "slow", "type": "file", "file": "${LOG_DIR}/slow.log", "pattern": "%msg%n",
              "filters": [ { "type": "evaluator", "evaluator": "slow", "onMatch": "ACCEPT", "onMismatch": "DENY" } ] },
            { "name": "async", "type": "async", "appenderRef": "all", "queueSize": 64 }
        ],
        "root": { "level": "INFO", "appenderRefs": ["async", "slow"] },
        "loggers": [ { "name": "db", "level": "DEBUG" } ]
    }"#;
    Configurator::new(ctx.clone()).configure_str(doc).unwrap();

    ctx.logger("db.pool").debug("slow acquire");
    ctx.logger("web").debug("hidden");
    ctx.logger("web").info("fast request");
    ctx.logger("web").error("boom");
    ctx.stop();

    let all = fs::read_to_string(dir.path().join("all.log")).unwrap();
    assert_eq!(
        all.lines().collect::<Vec<_>>(),
        vec!["DEBUG db.pool slow acquire", "INFO  web fast request", "ERROR web boom"]
    );
    let slow = fs::read_to_string(dir.path().join("slow.log")).unwrap();
    assert_eq!(slow, "slow acquire\nboom\n");
}

//! Criterion benchmarks for rust_log_pipeline

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rust_log_pipeline::boolex::{EventEvaluator, Matcher};
use rust_log_pipeline::core::ContextHandle;
use rust_log_pipeline::encoder::DateFormat;
use rust_log_pipeline::encoder::DateZone;
use rust_log_pipeline::prelude::*;
use std::io;
use std::sync::Arc;

/// Discards everything; isolates the pipeline from I/O
struct NullAppender;

impl Appender for NullAppender {
    fn name(&self) -> &str {
        "null"
    }

    fn append(&mut self, event: &LogEvent) -> Result<()> {
        black_box(event);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn null_context() -> LoggerContext {
    let ctx = LoggerContext::new("bench");
    let appender: AppenderRef = Arc::new(SyncAppender::new(NullAppender));
    appender.start().unwrap();
    ctx.add_appender("ROOT", appender);
    ctx
}

fn sample_event() -> LogEvent {
    LogEvent::builder(LogLevel::Info, "com.example.orders.service", "order {} accepted for {}")
        .arg(12345)
        .arg("alice")
        .mdc_entry("request", "r-42")
        .marker("AUDIT")
        .build()
}

// ============================================================================
// Dispatch Benchmarks
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    let ctx = null_context();
    ctx.set_level("quiet", Some(LogLevel::Error));
    let enabled = ctx.logger("com.example.orders");
    let disabled = ctx.logger("quiet.module");

    group.bench_function("enabled_info", |b| {
        b.iter(|| enabled.info(black_box("order accepted")));
    });

    group.bench_function("disabled_debug", |b| {
        b.iter(|| disabled.debug(black_box("never built")));
    });

    group.bench_function("builder_with_args", |b| {
        b.iter(|| {
            enabled
                .at(LogLevel::Warn)
                .arg(black_box(42))
                .marker("SLOW")
                .log("took {} ms")
        });
    });

    group.bench_function("effective_level_cached", |b| {
        b.iter(|| black_box(enabled.is_enabled_for(LogLevel::Debug)));
    });

    group.finish();
}

fn bench_async(c: &mut Criterion) {
    let mut group = c.benchmark_group("async");
    group.throughput(Throughput::Elements(1));

    let appender = AsyncAppender::new("async", Arc::new(SyncAppender::new(NullAppender)))
        .with_queue_size(8192)
        .with_never_block(true);
    appender.start().unwrap();
    let event = Arc::new(sample_event());

    group.bench_function("offer", |b| {
        b.iter(|| appender.do_append(black_box(&event)));
    });

    appender.stop();
    group.finish();
}

// ============================================================================
// Encoder Benchmarks
// ============================================================================

fn bench_encoders(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoders");
    group.throughput(Throughput::Elements(1));
    let event = sample_event();
    let handle = ContextHandle::detached();

    let mut pattern =
        PatternEncoder::new("%d{yyyy-MM-dd HH:mm:ss.SSS} [%thread] %-5level %logger{20} - %msg%n");
    pattern.start(&handle).unwrap();
    group.bench_function("pattern", |b| {
        b.iter(|| black_box(pattern.encode(black_box(&event)).unwrap()));
    });

    let mut json = JsonEncoder::new();
    group.bench_function("json", |b| {
        b.iter(|| black_box(json.encode(black_box(&event)).unwrap()));
    });

    let mut stream = ObjectStreamEncoder::new();
    group.bench_function("object_stream", |b| {
        b.iter(|| black_box(stream.encode(black_box(&event)).unwrap()));
    });

    let date = DateFormat::new("yyyy-MM-dd HH:mm:ss,SSS", DateZone::Utc).unwrap();
    let ts = event.timestamp();
    group.bench_function("date_format", |b| {
        b.iter(|| black_box(date.format(black_box(ts))));
    });

    group.finish();
}

// ============================================================================
// Evaluation Benchmarks
// ============================================================================

fn bench_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluation");
    group.throughput(Throughput::Elements(1));
    let event = sample_event();
    let handle = ContextHandle::detached();

    let mut expression = ExpressionEvaluator::new(
        "bench",
        r#"level >= INFO && m.matches(message) && mdc["request"].startsWith("r-")"#,
    )
    .with_matcher(Matcher::with_regex("m", "accepted"));
    expression.start(&handle).unwrap();
    group.bench_function("expression", |b| {
        b.iter(|| black_box(expression.evaluate(black_box(&event)).unwrap()));
    });

    let mut matcher = Matcher::with_regex("m", "order \\d+").case_sensitive(false);
    matcher.start().unwrap();
    group.bench_function("matcher", |b| {
        b.iter(|| black_box(matcher.matches(black_box("ORDER 12345 accepted")).unwrap()));
    });

    group.finish();
}

fn bench_console_sink(c: &mut Criterion) {
    let mut group = c.benchmark_group("sink");
    group.throughput(Throughput::Elements(1));
    let event = sample_event();
    let mut encoder = PatternEncoder::new("%-5level %logger - %msg%n");
    encoder.start(&ContextHandle::detached()).unwrap();

    group.bench_function("encode_to_sink", |b| {
        let mut sink = io::sink();
        b.iter(|| {
            let bytes = encoder.encode(&event).unwrap();
            io::Write::write_all(&mut sink, &bytes).unwrap();
        });
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_dispatch,
    bench_async,
    bench_encoders,
    bench_evaluation,
    bench_console_sink
);

criterion_main!(benches);

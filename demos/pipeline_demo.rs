//! Pipeline example
//!
//! Builds a small pipeline from a JSON document, logs from several threads and
//! prints the framework's own status log at the end.
//!
//! Run with: cargo run --example pipeline_demo

use rust_log_pipeline::core::OnConsoleStatusListener;
use rust_log_pipeline::prelude::*;
use rust_log_pipeline::{error, info, warn};
use std::sync::Arc;
use std::thread;

const CONFIG: &str = r#"{
    "name": "demo",
    "properties": { "LOG_DIR": "${DEMO_LOG_DIR:-demo_logs}" },
    "evaluators": [
        { "name": "payments", "expression": "logger.startsWith(\"shop.payments\") || marker.contains(\"AUDIT\")" }
    ],
    "appenders": [
        { "name": "console", "type": "console", "colors": true,
          "pattern": "%d{HH:mm:ss.SSS} [%thread] %-5level %logger{24} - %msg%n" },
        { "name": "rolling", "type": "rolling", "file": "${LOG_DIR}/shop.log",
          "triggering": { "type": "size", "maxSize": "64KB" }, "maxBackups": 3,
          "pattern": "%d %-5level %logger %X{order} %msg%n%ex" },
        { "name": "audit", "type": "file", "file": "${LOG_DIR}/audit.jsonl",
          "encoder": { "type": "json" },
          "filters": [ { "type": "evaluator", "evaluator": "payments", "onMatch": "ACCEPT", "onMismatch": "DENY" } ] },
        { "name": "async", "type": "async", "appenderRef": "rolling", "queueSize": 1024 }
    ],
    "root": { "level": "INFO", "appenderRefs": ["console", "async", "audit"] },
    "loggers": [ { "name": "shop.payments", "level": "DEBUG" } ]
}"#;

fn main() -> Result<()> {
    println!("=== Log Pipeline Example ===\n");

    let selector = ContextSelector::new();
    let ctx = selector.init(LoggerContext::new("demo"))?;
    ctx.context()
        .status_manager()
        .add_listener(Arc::new(OnConsoleStatusListener::new().with_min_level(StatusLevel::Warn)));
    Configurator::new(ctx.clone()).configure_str(CONFIG)?;

    let handles: Vec<_> = (0..3)
        .map(|worker| {
            let orders = ctx.logger("shop.orders");
            let payments = ctx.logger("shop.payments.card");
            thread::spawn(move || {
                for order in 0..5 {
                    let _guard = Mdc::scoped("order", format!("{}-{}", worker, order));
                    info!(orders, "order {} placed by worker {}", order, worker);
                    payments.debug("authorising card");
                    if order == 4 {
                        let cause = std::io::Error::new(std::io::ErrorKind::TimedOut, "gateway timeout");
                        payments.at(LogLevel::Error).error(&cause).log("charge failed");
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        let _ = handle.join();
    }

    let admin = ctx.logger("shop.admin");
    admin.at(LogLevel::Warn).marker("AUDIT").arg("bob").log("price list edited by {}");
    warn!(admin, "{} workers finished", 3);

    // raise the bar at runtime; takes effect on the next emission
    ctx.set_level("shop.orders", Some(LogLevel::Warn));
    info!(ctx.logger("shop.orders"), "not shown");
    error!(ctx.logger("shop.orders"), "still shown");

    selector.teardown("demo");

    println!("\nAppender counters:");
    for appender in ctx.hierarchy().all_appenders() {
        let snapshot = serde_json::to_string(&appender.metrics().snapshot())?;
        println!("  {:<8} {}", appender.name(), snapshot);
    }

    println!("\nStatus log:");
    for status in ctx.context().status_manager().statuses() {
        println!("  {}", status);
    }
    Ok(())
}

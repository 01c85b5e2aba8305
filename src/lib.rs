//! # Rust Log Pipeline
//!
//! A structured logging pipeline: named loggers in a dotted hierarchy dispatch
//! events to appenders, each guarded by a chain of ternary filters.
//!
//! ## Features
//!
//! - **Hierarchical loggers**: level inheritance and appender additivity, with
//!   copy-on-write reconfiguration
//! - **Filters and evaluators**: level filters plus a small boolean expression
//!   language with named regex matchers
//! - **Appenders**: console, file, rolling file, TCP socket and an asynchronous
//!   wrapper for any of them
//! - **Encoders**: layout patterns, JSON lines and a compact binary object stream
//! - **Status log**: the pipeline reports its own problems without ever failing
//!   the caller
//!
//! ## Example
//!
//! ```
//! use rust_log_pipeline::prelude::*;
//! use std::sync::Arc;
//!
//! let ctx = LoggerContext::new("app");
//! let console = SyncAppender::new(
//!     ConsoleAppender::new().with_encoder(PatternEncoder::new("%-5level %logger - %msg%n")),
//! );
//! console.add_filter(Box::new(ThresholdFilter::new(LogLevel::Info)));
//! let console: AppenderRef = Arc::new(console);
//! console.start().unwrap();
//! ctx.add_appender("ROOT", console);
//!
//! let log = ctx.logger("app.orders");
//! log.info("order accepted");
//! log.at(LogLevel::Warn).arg(3).log("{} retries left");
//! ctx.stop();
//! ```

pub mod appenders;
pub mod boolex;
pub mod config;
pub mod core;
pub mod encoder;
pub mod filter;
pub mod macros;
#[cfg(feature = "network")]
pub mod net;

pub mod prelude {
    pub use crate::appenders::{
        AsyncAppender, ConsoleAppender, ConsoleTarget, FileAppender, ListAppender,
        RollingFileAppender, RollingPolicy, TriggeringPolicy,
    };
    pub use crate::boolex::{EvaluatorHandle, ExpressionEvaluator, Matcher};
    pub use crate::config::Configurator;
    pub use crate::core::{
        Appender, AppenderRef, Context, ContextSelector, EventAppender, FieldValue, LifeCycle,
        LogEvent, LogLevel, Logger, LoggerContext, LoggerError, LoggerMetrics, Marker, Mdc,
        Result, Status, StatusLevel, SyncAppender, ThrowableProxy,
    };
    pub use crate::encoder::{Encoder, JsonEncoder, ObjectStreamEncoder, PatternEncoder};
    pub use crate::filter::{
        EvaluatorFilter, Filter, FilterReply, LevelFilter, ThresholdFilter,
    };
}

pub use crate::core::{
    LogEvent, LogLevel, Logger, LoggerContext, LoggerError, LoggerMetrics, Result,
};

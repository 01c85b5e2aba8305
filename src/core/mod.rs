//! Core types: events, levels, the context, loggers and the appender contract

pub mod appender;
pub mod context;
pub mod error;
pub mod log_event;
pub mod log_level;
pub mod logger;
pub mod mdc;
pub mod metrics;
pub mod scheduler;
pub mod selector;
pub mod status;
pub mod throwable;

pub use appender::{Appender, AppenderRef, EventAppender, SyncAppender};
pub use context::{Context, ContextHandle, LifeCycle};
pub use error::{LoggerError, Result};
pub use log_event::{LogEvent, LogEventBuilder, Marker};
pub use log_level::LogLevel;
pub use logger::{EventBuilder, Hierarchy, Logger, LoggerContext, ROOT_LOGGER_NAME};
pub use mdc::{FieldValue, Mdc, MdcGuard};
pub use metrics::{LoggerMetrics, MetricsSnapshot};
pub use scheduler::{ScheduledTask, Scheduler};
pub use selector::ContextSelector;
pub use status::{
    CollectingStatusListener, OnConsoleStatusListener, Status, StatusLevel, StatusListener,
    StatusManager,
};
pub use throwable::{StackFrame, ThrowableProxy};

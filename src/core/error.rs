//! Error types for the logging pipeline
//!
//! Errors never escape an emission call; they surface from `start()`, from
//! configuration and from the status log.

pub type Result<T> = std::result::Result<T, LoggerError>;

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// I/O failure, with what was being done and to what
    #[error("I/O failure while {operation} ({target}): {source}")]
    IoOperation {
        operation: String,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Matcher regex did not compile
    #[error("Bad pattern in matcher '{name}': {source}")]
    BadPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    /// Component used before `start()` succeeded
    #[error("Component '{0}' is not started")]
    NotStarted(String),

    #[error("Component '{0}' already stopped")]
    Stopped(String),

    /// Expression text could not be compiled
    #[error("Failed to compile expression at offset {offset}: {message}")]
    Compile { offset: usize, message: String },

    /// Expression failed on one event
    #[error("Evaluation failed in '{evaluator}': {message}")]
    Evaluation { evaluator: String, message: String },

    /// Object stream violation
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid configuration for {component}: {message}")]
    InvalidConfiguration { component: String, message: String },

    #[error("File appender error for '{path}': {message}")]
    FileAppender { path: String, message: String },

    #[error("Rollover of '{path}' failed: {message}")]
    FileRotation { path: String, message: String },

    /// Prudent mode could not lock the shared file
    #[error("Could not lock '{path}' for prudent writing")]
    FileLock { path: String },

    /// Destination unreachable or not open
    #[error("Destination unavailable: {0}")]
    Destination(String),
}

impl LoggerError {
    pub fn io_operation(
        operation: impl Into<String>,
        target: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        LoggerError::IoOperation {
            operation: operation.into(),
            target: target.into(),
            source,
        }
    }

    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::InvalidConfiguration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn not_started(component: impl Into<String>) -> Self {
        LoggerError::NotStarted(component.into())
    }

    pub fn compile(offset: usize, message: impl Into<String>) -> Self {
        LoggerError::Compile {
            offset,
            message: message.into(),
        }
    }

    pub fn evaluation(evaluator: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::Evaluation {
            evaluator: evaluator.into(),
            message: message.into(),
        }
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        LoggerError::Codec(msg.into())
    }

    pub fn file_appender(path: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::FileAppender {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn file_rotation(path: impl Into<String>, message: impl Into<String>) -> Self {
        LoggerError::FileRotation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn file_lock(path: impl Into<String>) -> Self {
        LoggerError::FileLock { path: path.into() }
    }

    pub fn destination(msg: impl Into<String>) -> Self {
        LoggerError::Destination(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = LoggerError::not_started("testMatcher");
        assert_eq!(err.to_string(), "Component 'testMatcher' is not started");

        let err = LoggerError::compile(3, "unexpected token ')'");
        assert_eq!(
            err.to_string(),
            "Failed to compile expression at offset 3: unexpected token ')'"
        );

        let err = LoggerError::file_rotation("logs/app.log", "backup window full");
        assert_eq!(err.to_string(), "Rollover of 'logs/app.log' failed: backup window full");

        let err = LoggerError::config("RollingFileAppender", "maxSize must be positive");
        assert!(matches!(err, LoggerError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("RollingFileAppender"));
    }

    #[test]
    fn test_io_operation_keeps_source() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = LoggerError::io_operation("connecting", "127.0.0.1:4560", io_err);

        assert!(err.to_string().contains("connecting (127.0.0.1:4560)"));
        let source = err.source().and_then(|s| s.downcast_ref::<std::io::Error>());
        assert_eq!(source.map(|e| e.kind()), Some(std::io::ErrorKind::ConnectionRefused));
    }

    #[test]
    fn test_conversions() {
        let err: LoggerError = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert!(matches!(err, LoggerError::Json(_)));

        let err: LoggerError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, LoggerError::Io(_)));
    }
}

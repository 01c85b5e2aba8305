//! Console appender implementation

use crate::core::appender::Appender;
use crate::core::context::ContextHandle;
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use crate::encoder::{Encoder, PatternEncoder};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::str::FromStr;

/// Which standard stream the console appender writes to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
}

impl FromStr for ConsoleTarget {
    type Err = crate::core::error::LoggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" | "system.out" => Ok(ConsoleTarget::Stdout),
            "stderr" | "system.err" => Ok(ConsoleTarget::Stderr),
            other => Err(crate::core::error::LoggerError::config(
                "console",
                format!("unknown console target '{}'", other),
            )),
        }
    }
}

pub struct ConsoleAppender {
    name: String,
    target: ConsoleTarget,
    use_colors: bool,
    encoder: Box<dyn Encoder>,
}

impl ConsoleAppender {
    pub fn new() -> Self {
        Self {
            name: "console".to_string(),
            target: ConsoleTarget::Stdout,
            use_colors: false,
            encoder: Box::new(PatternEncoder::default()),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: ConsoleTarget) -> Self {
        self.target = target;
        self
    }

    /// Colour each line by its level; ignored without the `console` feature
    ///
    /// # Example
    ///
    /// ```
    /// use rust_log_pipeline::appenders::{ConsoleAppender, ConsoleTarget};
    ///
    /// let appender = ConsoleAppender::new()
    ///     .with_target(ConsoleTarget::Stderr)
    ///     .with_colors(true);
    /// ```
    #[must_use]
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    pub fn target(&self) -> ConsoleTarget {
        self.target
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        match self.target {
            ConsoleTarget::Stdout => io::stdout().lock().write_all(bytes)?,
            ConsoleTarget::Stderr => io::stderr().lock().write_all(bytes)?,
        }
        Ok(())
    }

    #[cfg(feature = "console")]
    fn colorize(&self, event: &LogEvent, bytes: Vec<u8>) -> Vec<u8> {
        use colored::Colorize;

        if !self.use_colors {
            return bytes;
        }
        let text = String::from_utf8_lossy(&bytes);
        let body = text.trim_end_matches(['\r', '\n']);
        let tail = &text[body.len()..];
        format!("{}{}", body.color(event.level().color_code()), tail).into_bytes()
    }

    #[cfg(not(feature = "console"))]
    fn colorize(&self, _event: &LogEvent, bytes: Vec<u8>) -> Vec<u8> {
        bytes
    }
}

impl Default for ConsoleAppender {
    fn default() -> Self {
        Self::new()
    }
}

impl Appender for ConsoleAppender {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        self.encoder.start(context)?;
        let header = self.encoder.header_bytes();
        if !header.is_empty() {
            self.write_bytes(&header)?;
        }
        Ok(())
    }

    fn append(&mut self, event: &LogEvent) -> Result<()> {
        let bytes = self.encoder.encode(event)?;
        let bytes = self.colorize(event, bytes);
        self.write_bytes(&bytes)
    }

    fn flush(&mut self) -> Result<()> {
        match self.target {
            ConsoleTarget::Stdout => io::stdout().flush()?,
            ConsoleTarget::Stderr => io::stderr().flush()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;

    #[test]
    fn test_target_parsing() {
        assert_eq!("STDERR".parse::<ConsoleTarget>().unwrap(), ConsoleTarget::Stderr);
        assert_eq!("System.out".parse::<ConsoleTarget>().unwrap(), ConsoleTarget::Stdout);
        assert!("printer".parse::<ConsoleTarget>().is_err());
    }

    #[test]
    fn test_append_to_stderr() {
        let mut appender = ConsoleAppender::new().with_target(ConsoleTarget::Stderr);
        appender.start(&ContextHandle::detached()).unwrap();
        let event = LogEvent::new(LogLevel::Info, "console.test", "hello console");
        assert!(appender.append(&event).is_ok());
        assert!(appender.flush().is_ok());
    }

    #[cfg(feature = "console")]
    #[test]
    fn test_colors_keep_trailing_newline() {
        colored::control::set_override(true);
        let appender = ConsoleAppender::new().with_colors(true);
        let event = LogEvent::new(LogLevel::Error, "c", "boom");
        let out = appender.colorize(&event, b"ERROR c - boom\n".to_vec());
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("\u{1b}["));
        colored::control::unset_override();
    }

    #[test]
    fn test_bad_pattern_fails_start() {
        let mut appender = ConsoleAppender::new().with_encoder(PatternEncoder::new("%nope"));
        assert!(appender.start(&ContextHandle::detached()).is_err());
    }
}

//! File appender implementation

use crate::core::appender::Appender;
use crate::core::context::ContextHandle;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use crate::encoder::{Encoder, PatternEncoder};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Writes encoded events to a single file
///
/// The file is opened at start. With `immediate_flush` (the default) every event
/// reaches the OS before `append` returns; otherwise output sits in an in-process
/// buffer until `flush` or `stop`.
///
/// # Examples
///
/// ```no_run
/// use rust_log_pipeline::appenders::FileAppender;
///
/// let appender = FileAppender::new("/var/log/app.log")
///     .with_append(false)
///     .with_immediate_flush(false);
/// ```
pub struct FileAppender {
    name: String,
    path: PathBuf,
    append: bool,
    immediate_flush: bool,
    prudent: bool,
    buffer_size: usize,
    encoder: Box<dyn Encoder>,
    writer: Option<BufWriter<File>>,
    current_size: u64,
    context: ContextHandle,
}

impl FileAppender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: "file".to_string(),
            path: path.into(),
            append: true,
            immediate_flush: true,
            prudent: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            encoder: Box::new(PatternEncoder::default()),
            writer: None,
            current_size: 0,
            context: ContextHandle::detached(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `false` truncates the file when the appender starts
    #[must_use]
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    #[must_use]
    pub fn with_immediate_flush(mut self, immediate_flush: bool) -> Self {
        self.immediate_flush = immediate_flush;
        self
    }

    /// Take an exclusive lock around every write so several processes can share
    /// one file; implies append mode and immediate flush
    #[cfg(feature = "file")]
    #[must_use]
    pub fn with_prudent(mut self, prudent: bool) -> Self {
        self.prudent = prudent;
        self
    }

    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the current file, including what is still buffered
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub(crate) fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub(crate) fn encode(&mut self, event: &LogEvent) -> Result<Vec<u8>> {
        self.encoder.encode(event)
    }

    /// Open the file, truncating only when `truncate` is set
    pub(crate) fn open(&mut self, truncate: bool) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LoggerError::io_operation(
                        "create log directory",
                        parent.display().to_string(),
                        e,
                    )
                })?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if truncate && !self.prudent {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(&self.path).map_err(|e| {
            LoggerError::file_appender(self.path.display().to_string(), format!("Failed to open: {}", e))
        })?;
        self.current_size = file
            .metadata()
            .map_err(|e| {
                LoggerError::file_appender(
                    self.path.display().to_string(),
                    format!("Cannot access file metadata: {}", e),
                )
            })?
            .len();
        self.writer = Some(BufWriter::with_capacity(self.buffer_size, file));

        let header = self.encoder.header_bytes();
        if !header.is_empty() {
            self.write_bytes(&header)?;
        }
        Ok(())
    }

    /// Flush and release the file handle
    pub(crate) fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| {
                LoggerError::file_appender(
                    self.path.display().to_string(),
                    format!("Failed to flush on close: {}", e),
                )
            })?;
        }
        Ok(())
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let path = &self.path;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| LoggerError::destination(format!("File '{}' is not open", path.display())))?;

        if self.prudent {
            write_locked(writer, bytes, path)?;
        } else {
            writer.write_all(bytes).map_err(|e| {
                LoggerError::file_appender(path.display().to_string(), format!("Failed to write log entry: {}", e))
            })?;
            if self.immediate_flush {
                writer.flush().map_err(|e| {
                    LoggerError::file_appender(path.display().to_string(), format!("Failed to flush: {}", e))
                })?;
            }
        }
        self.current_size += bytes.len() as u64;
        Ok(())
    }
}

#[cfg(feature = "file")]
fn write_locked(writer: &mut BufWriter<File>, bytes: &[u8], path: &Path) -> Result<()> {
    use fs2::FileExt;

    writer
        .get_ref()
        .lock_exclusive()
        .map_err(|_| LoggerError::file_lock(path.display().to_string()))?;
    let outcome = writer.write_all(bytes).and_then(|_| writer.flush());
    let _ = writer.get_ref().unlock();
    outcome.map_err(|e| {
        LoggerError::file_appender(path.display().to_string(), format!("Failed to write log entry: {}", e))
    })
}

#[cfg(not(feature = "file"))]
fn write_locked(writer: &mut BufWriter<File>, bytes: &[u8], path: &Path) -> Result<()> {
    writer
        .write_all(bytes)
        .and_then(|_| writer.flush())
        .map_err(|e| LoggerError::file_appender(path.display().to_string(), e.to_string()))
}

impl Appender for FileAppender {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        self.context = context.clone();
        self.encoder.start(context)?;
        self.open(!self.append)
    }

    fn append(&mut self, event: &LogEvent) -> Result<()> {
        let bytes = self.encoder.encode(event)?;
        self.write_bytes(&bytes)
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(ref mut writer) = self.writer {
            writer.flush()?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Err(e) = self.close() {
            self.context.add_error(&self.name, e.to_string());
        }
    }

    fn reopen(&mut self) -> Result<()> {
        let _ = self.close();
        self.open(false)
    }
}

impl Drop for FileAppender {
    fn drop(&mut self) {
        // Ensure all buffered data is flushed to disk
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;
    use tempfile::tempdir;

    fn msg_encoder() -> PatternEncoder {
        PatternEncoder::new("%level %msg%n")
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/app.log");
        let mut appender = FileAppender::new(&path).with_encoder(msg_encoder());
        appender.start(&ContextHandle::detached()).unwrap();
        appender
            .append(&LogEvent::new(LogLevel::Info, "f", "first"))
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "INFO first\n");
    }

    #[test]
    fn test_append_versus_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old line\n").unwrap();

        let mut appending = FileAppender::new(&path).with_encoder(msg_encoder());
        appending.start(&ContextHandle::detached()).unwrap();
        appending.append(&LogEvent::new(LogLevel::Warn, "f", "kept")).unwrap();
        appending.stop();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old line\nWARN kept\n");

        let mut truncating = FileAppender::new(&path)
            .with_append(false)
            .with_encoder(msg_encoder());
        truncating.start(&ContextHandle::detached()).unwrap();
        truncating.append(&LogEvent::new(LogLevel::Warn, "f", "fresh")).unwrap();
        truncating.stop();
        assert_eq!(fs::read_to_string(&path).unwrap(), "WARN fresh\n");
    }

    #[test]
    fn test_buffered_output_waits_for_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("buffered.log");
        let mut appender = FileAppender::new(&path)
            .with_immediate_flush(false)
            .with_encoder(msg_encoder());
        appender.start(&ContextHandle::detached()).unwrap();
        appender.append(&LogEvent::new(LogLevel::Info, "f", "pending")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        assert_eq!(appender.current_size(), "INFO pending\n".len() as u64);

        appender.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "INFO pending\n");
    }

    #[test]
    fn test_header_written_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("header.log");
        let mut appender = FileAppender::new(&path)
            .with_encoder(PatternEncoder::new("%msg%n").with_header("# service log"));
        appender.start(&ContextHandle::detached()).unwrap();
        appender.append(&LogEvent::new(LogLevel::Info, "f", "body")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# service log\nbody\n");
    }

    #[test]
    fn test_append_before_open_is_an_error() {
        let dir = tempdir().unwrap();
        let mut appender = FileAppender::new(dir.path().join("x.log")).with_encoder(msg_encoder());
        let mut enc = msg_encoder();
        enc.start(&ContextHandle::detached()).unwrap();
        appender.encoder = Box::new(enc);
        assert!(appender
            .append(&LogEvent::new(LogLevel::Info, "f", "lost"))
            .is_err());
    }

    #[test]
    fn test_reopen_appends_after_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.log");
        let mut appender = FileAppender::new(&path)
            .with_append(false)
            .with_encoder(msg_encoder());
        appender.start(&ContextHandle::detached()).unwrap();
        appender.append(&LogEvent::new(LogLevel::Info, "f", "one")).unwrap();
        appender.reopen().unwrap();
        appender.append(&LogEvent::new(LogLevel::Info, "f", "two")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "INFO one\nINFO two\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_close_reports_status() {
        use crate::core::context::Context;
        use crate::core::status::{CollectingStatusListener, StatusLevel};
        use std::sync::Arc;

        let context = Context::new("file-test");
        let listener = Arc::new(CollectingStatusListener::new());
        context.status_manager().add_listener(listener.clone());

        let mut appender = FileAppender::new("/dev/full")
            .with_name("full")
            .with_immediate_flush(false)
            .with_encoder(msg_encoder());
        appender.start(&context.handle()).unwrap();
        appender.append(&LogEvent::new(LogLevel::Info, "f", "nowhere")).unwrap();
        appender.stop();

        let errors: Vec<_> = listener
            .entries()
            .into_iter()
            .filter(|s| s.level == StatusLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].origin, "full");
        assert!(!appender.is_open());
    }

    #[cfg(feature = "file")]
    #[test]
    fn test_prudent_mode_writes_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prudent.log");
        let mut appender = FileAppender::new(&path)
            .with_prudent(true)
            .with_immediate_flush(false)
            .with_encoder(msg_encoder());
        appender.start(&ContextHandle::detached()).unwrap();
        appender.append(&LogEvent::new(LogLevel::Error, "f", "locked")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "ERROR locked\n");
    }
}

//! Rolling file appender
//!
//! A [`FileAppender`] plus a [`TriggeringPolicy`] deciding when to roll and a
//! [`RollingPolicy`] deciding what happens to the finished file: it joins a fixed
//! window of numbered backups (`app.log.1` is the newest), optionally gzipped, and
//! the oldest backup is deleted. Rollover runs under the appender lock, so an
//! event is always written whole to exactly one file.

use super::file::FileAppender;
use crate::core::appender::Appender;
use crate::core::context::ContextHandle;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use crate::encoder::Encoder;
use chrono::{DateTime, Local, Timelike};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// When to roll the active file
///
/// # Examples
///
/// ```
/// use rust_log_pipeline::appenders::TriggeringPolicy;
/// use std::time::Duration;
///
/// // Roll before a write would push the file past 100 MB
/// let by_size = TriggeringPolicy::size(100 * 1024 * 1024);
///
/// // Roll on size OR age, whichever comes first
/// let hybrid = TriggeringPolicy::hybrid(50 * 1024 * 1024, Duration::from_secs(24 * 3600));
///
/// // Roll daily at 02:00 local time
/// let nightly = TriggeringPolicy::daily(2).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum TriggeringPolicy {
    /// Roll before a write that would take the file past `max_bytes`
    Size { max_bytes: u64 },

    /// Roll once `interval` has elapsed since the last rollover
    Time { interval: Duration },

    /// Roll on the first write of a new day at or after `hour` (0-23)
    Daily { hour: u8 },

    Hourly,

    /// Size or time, whichever fires first
    Hybrid { max_bytes: u64, interval: Duration },

    /// Never roll; useful when rotation is external
    Never,
}

impl Default for TriggeringPolicy {
    fn default() -> Self {
        TriggeringPolicy::Size {
            max_bytes: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl TriggeringPolicy {
    #[must_use]
    pub fn size(max_bytes: u64) -> Self {
        TriggeringPolicy::Size { max_bytes }
    }

    #[must_use]
    pub fn time(interval: Duration) -> Self {
        TriggeringPolicy::Time { interval }
    }

    pub fn daily(hour: u8) -> Result<Self> {
        if hour > 23 {
            return Err(LoggerError::config(
                "rolling",
                format!("daily rollover hour must be 0-23, got {}", hour),
            ));
        }
        Ok(TriggeringPolicy::Daily { hour })
    }

    #[must_use]
    pub fn hourly() -> Self {
        TriggeringPolicy::Hourly
    }

    #[must_use]
    pub fn hybrid(max_bytes: u64, interval: Duration) -> Self {
        TriggeringPolicy::Hybrid { max_bytes, interval }
    }

    #[must_use]
    pub fn never() -> Self {
        TriggeringPolicy::Never
    }

    /// Size limit, if this policy has one
    pub fn max_bytes(&self) -> Option<u64> {
        match self {
            TriggeringPolicy::Size { max_bytes } | TriggeringPolicy::Hybrid { max_bytes, .. } => {
                Some(*max_bytes)
            }
            _ => None,
        }
    }

    /// Whether writing `incoming` more bytes to a file of `current_size` bytes
    /// last rolled at `last_rollover` should roll first
    pub fn is_triggered(&self, current_size: u64, incoming: u64, last_rollover: SystemTime) -> bool {
        let over_size = |max: u64| current_size > 0 && current_size + incoming > max;
        let elapsed = || {
            SystemTime::now()
                .duration_since(last_rollover)
                .unwrap_or(Duration::ZERO)
        };
        match self {
            TriggeringPolicy::Never => false,
            TriggeringPolicy::Size { max_bytes } => over_size(*max_bytes),
            TriggeringPolicy::Time { interval } => elapsed() >= *interval,
            TriggeringPolicy::Daily { hour } => {
                let now: DateTime<Local> = SystemTime::now().into();
                let last: DateTime<Local> = last_rollover.into();
                now.date_naive() != last.date_naive() && now.hour() >= u32::from(*hour)
            }
            TriggeringPolicy::Hourly => elapsed() >= Duration::from_secs(3600),
            TriggeringPolicy::Hybrid { max_bytes, interval } => {
                over_size(*max_bytes) || elapsed() >= *interval
            }
        }
    }
}

/// Fixed window of numbered backups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingPolicy {
    pub max_backups: usize,
    pub compress: bool,
}

impl Default for RollingPolicy {
    fn default() -> Self {
        Self {
            max_backups: 5,
            compress: false,
        }
    }
}

impl RollingPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_backups(mut self, count: usize) -> Self {
        self.max_backups = count;
        self
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }
}

/// # Examples
///
/// ```no_run
/// use rust_log_pipeline::appenders::{RollingFileAppender, RollingPolicy, TriggeringPolicy};
/// use rust_log_pipeline::core::appender::SyncAppender;
///
/// let appender = SyncAppender::new(
///     RollingFileAppender::new("/var/log/app.log")
///         .with_triggering(TriggeringPolicy::size(50 * 1024 * 1024))
///         .with_rolling(RollingPolicy::new().with_max_backups(7).with_compression(true)),
/// );
/// ```
pub struct RollingFileAppender {
    file: FileAppender,
    triggering: TriggeringPolicy,
    rolling: RollingPolicy,
    last_rollover: SystemTime,
    /// Consecutive failures to delete the oldest backup
    deletion_failure_count: usize,
    rollovers: u64,
    /// Set after a failed rollover; no new attempt before this instant
    retry_at: Option<Instant>,
}

const MAX_DELETION_FAILURES: usize = 5;
const ROLLOVER_RETRY_DELAY: Duration = Duration::from_secs(30);

impl RollingFileAppender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from_file(FileAppender::new(path).with_name("rolling"))
    }

    /// Wrap an already configured file appender
    pub fn from_file(file: FileAppender) -> Self {
        Self {
            file,
            triggering: TriggeringPolicy::default(),
            rolling: RollingPolicy::default(),
            last_rollover: SystemTime::now(),
            deletion_failure_count: 0,
            rollovers: 0,
            retry_at: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.file = self.file.with_name(name);
        self
    }

    #[must_use]
    pub fn with_triggering(mut self, policy: TriggeringPolicy) -> Self {
        self.triggering = policy;
        self
    }

    #[must_use]
    pub fn with_rolling(mut self, policy: RollingPolicy) -> Self {
        self.rolling = policy;
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.file = self.file.with_encoder(encoder);
        self
    }

    #[must_use]
    pub fn with_immediate_flush(mut self, immediate_flush: bool) -> Self {
        self.file = self.file.with_immediate_flush(immediate_flush);
        self
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn current_size(&self) -> u64 {
        self.file.current_size()
    }

    pub fn triggering(&self) -> &TriggeringPolicy {
        &self.triggering
    }

    pub fn rolling(&self) -> &RollingPolicy {
        &self.rolling
    }

    pub fn last_rollover(&self) -> SystemTime {
        self.last_rollover
    }

    /// Completed rollovers since start
    pub fn rollovers(&self) -> u64 {
        self.rollovers
    }

    /// Path of backup `index`, uncompressed form
    pub fn backup_path(&self, index: usize) -> PathBuf {
        let base = self.file.path();
        let filename = base
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("app.log");
        base.with_file_name(format!("{}.{}", filename, index))
    }

    fn compressed(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".gz");
        PathBuf::from(name)
    }

    /// Roll, or keep writing to the current file when rolling fails
    ///
    /// A failure is reported once per streak and the triggering policy is not
    /// consulted again for [`ROLLOVER_RETRY_DELAY`]; the file grows past its
    /// limit meanwhile.
    fn roll_or_continue(&mut self) -> Result<()> {
        match self.rollover() {
            Ok(()) => {
                if self.retry_at.take().is_some() {
                    self.file
                        .context()
                        .add_info(self.file.name(), "Rollover succeeded after earlier failures");
                }
            }
            Err(e) => {
                if self.retry_at.is_none() {
                    self.file.context().add_error(
                        self.file.name(),
                        format!("Rollover failed, continuing with the current file: {}", e),
                    );
                }
                self.retry_at = Some(Instant::now() + ROLLOVER_RETRY_DELAY);
                if !self.file.is_open() {
                    self.file.open(false)?;
                }
            }
        }
        Ok(())
    }

    /// Close, shift the backup window, reopen
    pub fn rollover(&mut self) -> Result<()> {
        self.file.close().map_err(|e| {
            LoggerError::file_rotation(
                self.file.path().display().to_string(),
                format!("Failed to flush before rotation: {}", e),
            )
        })?;

        let shifted = self.shift_backups();
        let reopened = self.file.open(false);
        shifted?;
        reopened?;

        self.last_rollover = SystemTime::now();
        self.rollovers += 1;
        Ok(())
    }

    fn shift_backups(&mut self) -> Result<()> {
        let base = self.file.path().to_path_buf();
        if self.rolling.max_backups == 0 {
            // No window: the finished file is simply discarded
            if base.exists() {
                fs::remove_file(&base).map_err(|e| {
                    LoggerError::file_rotation(base.display().to_string(), format!("Failed to discard log file: {}", e))
                })?;
            }
            return Ok(());
        }

        self.delete_oldest()?;

        for i in (1..self.rolling.max_backups).rev() {
            let old_path = self.backup_path(i);
            let new_path = self.backup_path(i + 1);
            let old_gz = Self::compressed(&old_path);
            if old_gz.exists() {
                rename_replacing(&old_gz, &Self::compressed(&new_path))?;
            } else if old_path.exists() {
                rename_replacing(&old_path, &new_path)?;
            }
        }

        if base.exists() {
            let first = self.backup_path(1);
            fs::rename(&base, &first).map_err(|e| {
                LoggerError::file_rotation(
                    base.display().to_string(),
                    format!("Failed to rotate current log file: {}", e),
                )
            })?;
            if self.rolling.compress {
                compress_file(&first, self.file.context(), self.file.name())?;
            }
        }
        Ok(())
    }

    fn delete_oldest(&mut self) -> Result<()> {
        let oldest = self.backup_path(self.rolling.max_backups);
        let mut failed = false;
        for path in [Self::compressed(&oldest), oldest] {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    failed = true;
                    self.file.context().add_warn(
                        self.file.name(),
                        format!(
                            "Failed to remove oldest backup {}: {} (failure {}/{})",
                            path.display(),
                            e,
                            self.deletion_failure_count + 1,
                            MAX_DELETION_FAILURES
                        ),
                    );
                }
            }
        }

        if !failed {
            self.deletion_failure_count = 0;
            return Ok(());
        }
        self.deletion_failure_count += 1;
        if self.deletion_failure_count >= MAX_DELETION_FAILURES {
            return Err(LoggerError::file_rotation(
                self.file.path().display().to_string(),
                format!(
                    "Rotation aborted: failed to delete old backup files {} consecutive times",
                    self.deletion_failure_count
                ),
            ));
        }
        Ok(())
    }
}

fn rename_replacing(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Some platforms refuse to rename over an existing file
    if to.exists() {
        let _ = fs::remove_file(to);
    }
    fs::rename(from, to).map_err(|e| {
        LoggerError::file_rotation(from.display().to_string(), format!("Failed to rotate backup files: {}", e))
    })
}

/// Gzip `path` into `path.gz` through a temporary file, removing the original
/// only once the archive is complete
fn compress_file(path: &Path, context: &ContextHandle, origin: &str) -> Result<()> {
    let gz_path = RollingFileAppender::compressed(path);
    let mut tmp_name = gz_path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| -> std::io::Result<()> {
        let mut reader = BufReader::with_capacity(64 * 1024, File::open(path)?);
        let output = BufWriter::with_capacity(64 * 1024, File::create(&tmp_path)?);
        let mut encoder = flate2::write::GzEncoder::new(output, flate2::Compression::default());
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            encoder.write_all(&buffer[..n])?;
        }
        encoder.finish()?.flush()?;
        fs::rename(&tmp_path, &gz_path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(LoggerError::io_operation(
            "compress log file",
            path.display().to_string(),
            e,
        ));
    }

    if let Err(e) = fs::remove_file(path) {
        context.add_warn(
            origin,
            format!("Compressed {} but could not remove the original: {}", path.display(), e),
        );
    }
    Ok(())
}

impl Appender for RollingFileAppender {
    fn name(&self) -> &str {
        self.file.name()
    }

    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        self.file.start(context)?;
        self.last_rollover = fs::metadata(self.file.path())
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Ok(())
    }

    fn append(&mut self, event: &LogEvent) -> Result<()> {
        let bytes = self.file.encode(event)?;
        let backing_off = self.retry_at.is_some_and(|at| Instant::now() < at);
        if !backing_off
            && self
                .triggering
                .is_triggered(self.file.current_size(), bytes.len() as u64, self.last_rollover)
        {
            self.roll_or_continue()?;
        }
        self.file.write_bytes(&bytes)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    fn stop(&mut self) {
        self.file.stop();
    }

    fn reopen(&mut self) -> Result<()> {
        self.file.reopen()
    }
}

//! Socket appender: streams events to a remote receiver over TCP
//!
//! Appending only buffers the event. A background thread owns the connection:
//!
//! ```text
//!  DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTED
//!                     ^______________(failure)______|
//! ```
//!
//! Events are buffered in a bounded deque in every state; when it overflows the
//! oldest event is discarded. A write failure puts the event back at the front
//! so FIFO order survives a reconnect.

use crate::core::appender::Appender;
use crate::core::context::ContextHandle;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use crate::encoder::{Encoder, ObjectStreamEncoder, DEFAULT_RESET_FREQUENCY};
use parking_lot::{Condvar, Mutex, RwLock};
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::io::{BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_SOCKET_QUEUE_SIZE: usize = 128;
pub const DEFAULT_INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Connection state of a [`SocketAppender`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Default)]
struct Buffer {
    events: VecDeque<LogEvent>,
    shutdown: bool,
    abandoned: bool,
    /// Bumped by every `start()`; a connector from an earlier start must exit
    generation: u64,
}

impl Buffer {
    fn retired(&self, generation: u64) -> bool {
        self.shutdown || self.generation != generation
    }
}

struct Shared {
    buffer: Mutex<Buffer>,
    wake: Condvar,
    state: AtomicU8,
    sent: AtomicU64,
    dropped: AtomicU64,
    context: RwLock<ContextHandle>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn context(&self) -> ContextHandle {
        self.context.read().clone()
    }

    /// Sleep for `delay` unless the connector is retired; true when retired
    fn wait_unless_retired(&self, generation: u64, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut buffer = self.buffer.lock();
        while !buffer.retired(generation) {
            if self.wake.wait_until(&mut buffer, deadline).timed_out() {
                break;
            }
        }
        buffer.retired(generation)
    }
}

/// Read-only view of a running socket appender
#[derive(Clone)]
pub struct SocketMonitor {
    shared: Arc<Shared>,
}

impl SocketMonitor {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Events buffered and not yet written
    pub fn queue_len(&self) -> usize {
        self.shared.buffer.lock().events.len()
    }

    pub fn sent(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    /// Events discarded because the buffer overflowed or shutdown timed out
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SocketMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketMonitor")
            .field("state", &self.state())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Settings {
    name: String,
    host: String,
    port: u16,
    reset_frequency: usize,
    pause_frequency: u64,
    pause_length: Duration,
    initial_delay: Duration,
    max_delay: Duration,
    connect_timeout: Duration,
}

/// # Example
///
/// ```no_run
/// use rust_log_pipeline::appenders::SocketAppender;
/// use rust_log_pipeline::core::appender::SyncAppender;
/// use std::time::Duration;
///
/// let socket = SocketAppender::new("logs.internal", 4560)
///     .with_queue_size(512)
///     .with_reconnect_delay(Duration::from_secs(1), Duration::from_secs(60));
/// let monitor = socket.monitor();
/// let appender = SyncAppender::new(socket);
/// ```
pub struct SocketAppender {
    settings: Settings,
    queue_size: usize,
    max_flush_time: Duration,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl SocketAppender {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            settings: Settings {
                name: "socket".to_string(),
                host: host.into(),
                port,
                reset_frequency: DEFAULT_RESET_FREQUENCY,
                pause_frequency: 0,
                pause_length: Duration::ZERO,
                initial_delay: DEFAULT_INITIAL_RECONNECT_DELAY,
                max_delay: DEFAULT_MAX_RECONNECT_DELAY,
                connect_timeout: Duration::from_secs(5),
            },
            queue_size: DEFAULT_SOCKET_QUEUE_SIZE,
            max_flush_time: Duration::from_millis(1000),
            shared: Arc::new(Shared {
                buffer: Mutex::new(Buffer::default()),
                wake: Condvar::new(),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                sent: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                context: RwLock::new(ContextHandle::detached()),
            }),
            worker: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.settings.name = name.into();
        self
    }

    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_reset_frequency(mut self, frequency: usize) -> Self {
        self.settings.reset_frequency = frequency.max(1);
        self
    }

    /// Sleep `length` after every `frequency` events sent; 0 disables pacing
    #[must_use]
    pub fn with_pacing(mut self, frequency: u64, length: Duration) -> Self {
        self.settings.pause_frequency = frequency;
        self.settings.pause_length = length;
        self
    }

    /// Backoff between connection attempts starts at `initial` and doubles up to `max`
    #[must_use]
    pub fn with_reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.settings.initial_delay = initial;
        self.settings.max_delay = max.max(initial);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_flush_time(mut self, max_flush_time: Duration) -> Self {
        self.max_flush_time = max_flush_time;
        self
    }

    pub fn monitor(&self) -> SocketMonitor {
        SocketMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn remote(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }
}

struct Connector {
    settings: Settings,
    shared: Arc<Shared>,
    generation: u64,
}

impl Connector {
    fn retired(&self) -> bool {
        self.shared.buffer.lock().retired(self.generation)
    }

    /// State updates from a connector that outlived its `start()` are ignored
    fn set_state(&self, state: ConnectionState) {
        let buffer = self.shared.buffer.lock();
        if buffer.generation == self.generation {
            self.shared.set_state(state);
        }
    }

    fn run(self) {
        let mut delay = self.settings.initial_delay;
        loop {
            if self.retired() {
                break;
            }
            self.set_state(ConnectionState::Connecting);
            match self.connect() {
                Ok(_) if self.retired() => break,
                Ok(stream) => {
                    self.set_state(ConnectionState::Connected);
                    delay = self.settings.initial_delay;
                    self.shared.context().add_info(
                        &self.settings.name,
                        format!("Connected to {}:{}", self.settings.host, self.settings.port),
                    );
                    let outcome = self.dispatch(stream);
                    self.set_state(ConnectionState::Disconnected);
                    match outcome {
                        Ok(()) => break,
                        Err(e) => self
                            .shared
                            .context()
                            .add_warn(&self.settings.name, format!("Connection lost: {}", e)),
                    }
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    let wait = jitter(delay);
                    self.shared.context().add_warn(
                        &self.settings.name,
                        format!(
                            "Connection to {}:{} failed: {}, retrying in {:?}",
                            self.settings.host, self.settings.port, e, wait
                        ),
                    );
                    if self.shared.wait_unless_retired(self.generation, wait) {
                        break;
                    }
                    delay = (delay * 2).min(self.settings.max_delay);
                }
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (self.settings.host.as_str(), self.settings.port)
            .to_socket_addrs()
            .map_err(|e| LoggerError::io_operation("resolve remote host", self.settings.host.clone(), e))?
            .collect();
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.settings.connect_timeout) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => LoggerError::io_operation("connect", format!("{}:{}", self.settings.host, self.settings.port), e),
            None => LoggerError::destination(format!("no address found for {}", self.settings.host)),
        })
    }

    /// Stream buffered events until shutdown (`Ok`) or a write failure (`Err`)
    fn dispatch(&self, stream: TcpStream) -> Result<()> {
        let mut writer = BufWriter::new(stream);
        let mut encoder = ObjectStreamEncoder::new().with_reset_frequency(self.settings.reset_frequency);
        writer.write_all(&encoder.header_bytes())?;
        writer.flush()?;

        let mut sent_here: u64 = 0;
        loop {
            let event = {
                let mut buffer = self.shared.buffer.lock();
                loop {
                    if buffer.abandoned || buffer.generation != self.generation {
                        return Ok(());
                    }
                    if let Some(event) = buffer.events.pop_front() {
                        break event;
                    }
                    if buffer.shutdown {
                        return Ok(());
                    }
                    self.shared.wake.wait(&mut buffer);
                }
            };

            let bytes = match encoder.encode(&event) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    self.shared
                        .context()
                        .add_warn(&self.settings.name, format!("Event could not be encoded: {}", e));
                    continue;
                }
            };

            if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                self.shared.buffer.lock().events.push_front(event);
                return Err(e.into());
            }

            self.shared.sent.fetch_add(1, Ordering::Relaxed);
            sent_here += 1;
            if self.settings.pause_frequency > 0 && sent_here % self.settings.pause_frequency == 0 {
                thread::sleep(self.settings.pause_length);
            }
        }
    }
}

/// Spread reconnect attempts over [delay/2, delay]
fn jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis < 2 {
        return delay;
    }
    let half = millis / 2;
    Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
}

impl Appender for SocketAppender {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        if self.settings.host.is_empty() {
            return Err(LoggerError::config(&self.settings.name, "no remote host configured"));
        }
        if self.settings.port == 0 {
            return Err(LoggerError::config(&self.settings.name, "no remote port configured"));
        }
        *self.shared.context.write() = context.clone();
        let generation = {
            let mut buffer = self.shared.buffer.lock();
            buffer.shutdown = false;
            buffer.abandoned = false;
            buffer.generation += 1;
            buffer.generation
        };
        self.shared.wake.notify_all();

        let connector = Connector {
            settings: self.settings.clone(),
            shared: Arc::clone(&self.shared),
            generation,
        };
        let handle = thread::Builder::new()
            .name(format!("socket-{}", self.settings.name))
            .spawn(move || connector.run())
            .map_err(|e| LoggerError::io_operation("spawn socket connector", self.remote(), e))?;
        self.worker = Some(handle);
        Ok(())
    }

    fn append(&mut self, event: &LogEvent) -> Result<()> {
        let mut buffer = self.shared.buffer.lock();
        while buffer.events.len() >= self.queue_size {
            buffer.events.pop_front();
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buffer.events.push_back(event.clone());
        drop(buffer);
        self.shared.wake.notify_all();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.buffer.lock().shutdown = true;
        self.shared.wake.notify_all();

        let Some(handle) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + self.max_flush_time;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            self.shared.buffer.lock().abandoned = true;
            self.shared.wake.notify_all();
        }

        let residual = {
            let mut buffer = self.shared.buffer.lock();
            let n = buffer.events.len();
            buffer.events.clear();
            n
        };
        if residual > 0 {
            self.shared.dropped.fetch_add(residual as u64, Ordering::Relaxed);
            self.shared.context().add_warn(
                &self.settings.name,
                format!("{} buffered events were not sent before shutdown", residual),
            );
        }
    }
}

impl Drop for SocketAppender {
    fn drop(&mut self) {
        if self.worker.is_some() {
            Appender::stop(self);
        }
    }
}

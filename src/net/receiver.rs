//! TCP receiver for object streams written by socket appenders
//!
//! Each accepted connection gets its own reader thread. Decoded events are
//! routed to the logger they name and handed to its appenders, after the
//! receiving side's own level check.

use crate::core::context::LifeCycle;
use crate::core::error::{LoggerError, Result};
use crate::core::logger::LoggerContext;
use crate::encoder::ObjectStreamDecoder;
use parking_lot::Mutex;
use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_RECEIVER_PORT: u16 = 4560;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Shared {
    name: String,
    context: LoggerContext,
    running: AtomicBool,
    received: AtomicU64,
    connections: Mutex<Vec<TcpStream>>,
}

impl Shared {
    fn add_warn(&self, message: impl Into<String>) {
        self.context.context().handle().add_warn(&self.name, message);
    }
}

/// Server half of the socket transport
///
/// # Example
///
/// ```no_run
/// use rust_log_pipeline::core::{LifeCycle, LoggerContext};
/// use rust_log_pipeline::net::SocketReceiver;
///
/// let ctx = LoggerContext::new("collector");
/// let receiver = SocketReceiver::new(ctx.clone(), "0.0.0.0:4560");
/// receiver.start().unwrap();
/// // ... remote events now flow into `ctx` ...
/// receiver.stop();
/// ```
pub struct SocketReceiver {
    bind_addr: String,
    shared: Arc<Shared>,
    local_addr: Mutex<Option<SocketAddr>>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl SocketReceiver {
    pub fn new(context: LoggerContext, bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            shared: Arc::new(Shared {
                name: "SocketReceiver".to_string(),
                context,
                running: AtomicBool::new(false),
                received: AtomicU64::new(0),
                connections: Mutex::new(Vec::new()),
            }),
            local_addr: Mutex::new(None),
            acceptor: Mutex::new(None),
        }
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Events re-injected so far
    pub fn received(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while shared.running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    shared.add_warn(format!("Could not configure connection from {}: {}", peer, e));
                    continue;
                }
                match stream.try_clone() {
                    Ok(clone) => shared.connections.lock().push(clone),
                    Err(e) => {
                        shared.add_warn(format!("Could not track connection from {}: {}", peer, e));
                        continue;
                    }
                }
                let conn_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("receiver-{}", peer))
                    .spawn(move || read_connection(stream, peer, conn_shared));
                if let Err(e) = spawned {
                    shared.add_warn(format!("Could not spawn reader for {}: {}", peer, e));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                shared.add_warn(format!("Accept failed: {}", e));
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn read_connection(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let local = stream.local_addr().ok();
    let result = ObjectStreamDecoder::new(BufReader::new(stream)).and_then(|mut decoder| {
        while let Some(event) = decoder.read_event()? {
            let logger = shared.context.logger(event.logger_name());
            if logger.is_enabled_for(event.level()) {
                logger.call_appenders(event);
            }
            shared.received.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    });

    if let Err(e) = result {
        if shared.running.load(Ordering::Acquire) {
            shared.add_warn(format!("Connection from {} closed: {}", peer, e));
        }
    }
    shared.connections.lock().retain(|s| {
        s.peer_addr().ok() != Some(peer) || s.local_addr().ok() != local
    });
}

impl LifeCycle for SocketReceiver {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let bind = || -> Result<(TcpListener, SocketAddr)> {
            let listener = TcpListener::bind(&self.bind_addr)
                .map_err(|e| LoggerError::io_operation("bind", self.bind_addr.clone(), e))?;
            listener
                .set_nonblocking(true)
                .map_err(|e| LoggerError::io_operation("configure listener", self.bind_addr.clone(), e))?;
            let addr = listener
                .local_addr()
                .map_err(|e| LoggerError::io_operation("local address", self.bind_addr.clone(), e))?;
            Ok((listener, addr))
        };
        let (listener, addr) = match bind() {
            Ok(bound) => bound,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("receiver-accept".to_string())
            .spawn(move || accept_loop(listener, shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                LoggerError::io_operation("spawn acceptor", self.bind_addr.clone(), e)
            })?;

        *self.local_addr.lock() = Some(addr);
        *self.acceptor.lock() = Some(handle);
        self.shared
            .context
            .context()
            .handle()
            .add_info(&self.shared.name, format!("Listening on {}", addr));
        Ok(())
    }

    fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.acceptor.lock().take() {
            let _ = handle.join();
        }
        for stream in self.shared.connections.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        *self.local_addr.lock() = None;
    }

    fn is_started(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl Drop for SocketReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appenders::{ListAppender, SocketAppender};
    use crate::core::appender::{AppenderRef, SyncAppender};
    use crate::core::log_level::LogLevel;
    use crate::core::status::StatusLevel;
    use std::time::Instant;

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

    fn memory_appender(name: &str) -> (ListAppender, AppenderRef) {
        let list = ListAppender::new(name);
        let appender: AppenderRef = Arc::new(SyncAppender::new(list.clone()));
        (list, appender)
    }

    #[test]
    fn test_remote_events_are_reinjected() {
        let server = LoggerContext::new("server");
        let (received, sink) = memory_appender("sink");
        sink.start().unwrap();
        server.add_appender("ROOT", sink);
        server.set_level("noisy", Some(LogLevel::Error));

        let receiver = SocketReceiver::new(server.clone(), "127.0.0.1:0");
        receiver.start().unwrap();
        let port = receiver.local_addr().unwrap().port();

        let client = LoggerContext::new("client");
        let socket: AppenderRef = Arc::new(
            SyncAppender::new(
                SocketAppender::new("127.0.0.1", port)
                    .with_reconnect_delay(Duration::from_millis(10), Duration::from_millis(50)),
            )
            .with_context(client.context().handle()),
        );
        socket.start().unwrap();
        client.add_appender("ROOT", Arc::clone(&socket));

        client.logger("app.web").info("request served");
        client.logger("noisy.cache").warn("cache miss");
        client.logger("app.db").error("query failed");

        assert!(wait_for(|| receiver.received() == 3));
        let events = received.events();
        let got: Vec<(&str, &str)> = events
            .iter()
            .map(|e| (e.logger_name(), e.formatted_message()))
            .collect();
        assert_eq!(got, vec![("app.web", "request served"), ("app.db", "query failed")]);

        socket.stop();
        receiver.stop();
        assert!(!receiver.is_started());
    }

    #[test]
    fn test_garbage_connection_is_reported() {
        let server = LoggerContext::new("server");
        let receiver = SocketReceiver::new(server.clone(), "127.0.0.1:0");
        receiver.start().unwrap();

        let mut stream = TcpStream::connect(receiver.local_addr().unwrap()).unwrap();
        io::Write::write_all(&mut stream, b"HTTP/1.1 200 OK\r\n").unwrap();
        drop(stream);

        let statuses = server.context().status_manager();
        assert!(wait_for(|| statuses.highest_level() == Some(StatusLevel::Warn)));
        assert_eq!(receiver.received(), 0);
        receiver.stop();
    }

    #[test]
    fn test_bind_failure_leaves_receiver_stopped() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let receiver = SocketReceiver::new(LoggerContext::new("x"), addr.to_string());
        assert!(receiver.start().is_err());
        assert!(!receiver.is_started());
    }
}

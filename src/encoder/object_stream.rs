//! Length-prefixed event stream used between socket appenders and receivers
//!
//! ```text
//! stream  := "LGEV" version:u8 frame*
//! frame   := tag:u8 len:u32(BE) payload[len]
//! DEFINE  := handle:u32(BE) utf8-name       (tag 1)
//! EVENT   := JSON event, names as handles  (tag 2)
//! RESET   := empty                         (tag 3)
//! ```
//!
//! Logger and thread names are sent once as DEFINE frames and referenced by
//! handle afterwards. Every `reset_frequency` events the writer emits RESET and
//! both sides forget their tables, which bounds memory on long-lived connections.

use super::Encoder;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::{LogEvent, Marker};
use crate::core::log_level::LogLevel;
use crate::core::mdc::FieldValue;
use crate::core::throwable::ThrowableProxy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Read};

pub const STREAM_MAGIC: &[u8; 4] = b"LGEV";
pub const STREAM_VERSION: u8 = 1;
pub const DEFAULT_RESET_FREQUENCY: usize = 100;

/// Frames larger than this are treated as corruption
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const TAG_DEFINE: u8 = 1;
const TAG_EVENT: u8 = 2;
const TAG_RESET: u8 = 3;

#[derive(Serialize)]
struct WireEventRef<'a> {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    logger: u32,
    thread: u32,
    message: &'a str,
    #[serde(skip_serializing_if = "no_arguments")]
    arguments: &'a [FieldValue],
    #[serde(skip_serializing_if = "no_mdc")]
    mdc: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "no_markers")]
    markers: &'a BTreeSet<Marker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    throwable: Option<&'a ThrowableProxy>,
}

fn no_arguments(args: &&[FieldValue]) -> bool {
    args.is_empty()
}

fn no_mdc(mdc: &&BTreeMap<String, String>) -> bool {
    mdc.is_empty()
}

fn no_markers(markers: &&BTreeSet<Marker>) -> bool {
    markers.is_empty()
}

#[derive(Deserialize)]
struct WireEvent {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    logger: u32,
    thread: u32,
    message: String,
    #[serde(default)]
    arguments: Vec<FieldValue>,
    #[serde(default)]
    mdc: BTreeMap<String, String>,
    #[serde(default)]
    markers: BTreeSet<Marker>,
    #[serde(default)]
    throwable: Option<ThrowableProxy>,
}

/// Writer side of the stream
#[derive(Debug)]
pub struct ObjectStreamEncoder {
    reset_frequency: usize,
    names: HashMap<String, u32>,
    writes_since_reset: usize,
    resets: u64,
}

impl ObjectStreamEncoder {
    pub fn new() -> Self {
        Self {
            reset_frequency: DEFAULT_RESET_FREQUENCY,
            names: HashMap::new(),
            writes_since_reset: 0,
            resets: 0,
        }
    }

    /// Emit RESET after every `frequency` events; 0 is treated as 1
    #[must_use]
    pub fn with_reset_frequency(mut self, frequency: usize) -> Self {
        self.reset_frequency = frequency.max(1);
        self
    }

    pub fn reset_frequency(&self) -> usize {
        self.reset_frequency
    }

    /// RESET frames emitted so far
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Forget the name table, e.g. when a new connection starts
    pub fn reset_state(&mut self) {
        self.names.clear();
        self.writes_since_reset = 0;
    }

    fn intern(&mut self, name: &str, out: &mut Vec<u8>) -> u32 {
        if let Some(handle) = self.names.get(name) {
            return *handle;
        }
        let handle = self.names.len() as u32;
        self.names.insert(name.to_string(), handle);
        let mut payload = Vec::with_capacity(4 + name.len());
        payload.extend_from_slice(&handle.to_be_bytes());
        payload.extend_from_slice(name.as_bytes());
        write_frame(out, TAG_DEFINE, &payload);
        handle
    }
}

impl Default for ObjectStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for ObjectStreamEncoder {
    fn encode(&mut self, event: &LogEvent) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(256);
        let logger = self.intern(event.logger_name(), &mut out);
        let thread = self.intern(event.thread_name(), &mut out);
        let wire = WireEventRef {
            timestamp: event.timestamp(),
            level: event.level(),
            logger,
            thread,
            message: event.message(),
            arguments: event.arguments(),
            mdc: event.mdc(),
            markers: event.markers(),
            throwable: event.throwable(),
        };
        let payload = serde_json::to_vec(&wire)?;
        write_frame(&mut out, TAG_EVENT, &payload);

        self.writes_since_reset += 1;
        if self.writes_since_reset >= self.reset_frequency {
            write_frame(&mut out, TAG_RESET, &[]);
            self.names.clear();
            self.writes_since_reset = 0;
            self.resets += 1;
        }
        Ok(out)
    }

    fn header_bytes(&mut self) -> Vec<u8> {
        let mut header = STREAM_MAGIC.to_vec();
        header.push(STREAM_VERSION);
        header
    }
}

fn write_frame(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

/// Reader side of the stream
pub struct ObjectStreamDecoder<R> {
    reader: R,
    names: HashMap<u32, String>,
    resets: u64,
}

impl<R: Read> ObjectStreamDecoder<R> {
    /// Validate the stream header and wrap `reader`
    pub fn new(mut reader: R) -> Result<Self> {
        let mut header = [0u8; 5];
        reader
            .read_exact(&mut header)
            .map_err(|e| LoggerError::io_operation("reading stream header", "object stream", e))?;
        if &header[..4] != STREAM_MAGIC {
            return Err(LoggerError::codec("not an event stream (bad magic)"));
        }
        if header[4] != STREAM_VERSION {
            return Err(LoggerError::codec(format!(
                "unsupported stream version {}",
                header[4]
            )));
        }
        Ok(Self {
            reader,
            names: HashMap::new(),
            resets: 0,
        })
    }

    /// RESET frames seen so far
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Next event, or `None` when the stream ends on a frame boundary
    pub fn read_event(&mut self) -> Result<Option<LogEvent>> {
        loop {
            let mut tag = [0u8; 1];
            match self.reader.read_exact(&mut tag) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            let mut len = [0u8; 4];
            self.reader.read_exact(&mut len)?;
            let len = u32::from_be_bytes(len) as usize;
            if len > MAX_FRAME_LEN {
                return Err(LoggerError::codec(format!("frame of {} bytes is too large", len)));
            }
            let mut payload = vec![0u8; len];
            self.reader.read_exact(&mut payload)?;

            match tag[0] {
                TAG_DEFINE => {
                    if payload.len() < 4 {
                        return Err(LoggerError::codec("truncated DEFINE frame"));
                    }
                    let handle = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    let name = String::from_utf8(payload[4..].to_vec())
                        .map_err(|_| LoggerError::codec("DEFINE name is not UTF-8"))?;
                    self.names.insert(handle, name);
                }
                TAG_RESET => {
                    self.names.clear();
                    self.resets += 1;
                }
                TAG_EVENT => {
                    let wire: WireEvent = serde_json::from_slice(&payload)?;
                    return self.rebuild(wire).map(Some);
                }
                other => return Err(LoggerError::codec(format!("unknown frame tag {}", other))),
            }
        }
    }

    fn rebuild(&self, wire: WireEvent) -> Result<LogEvent> {
        let lookup = |handle: u32| {
            self.names
                .get(&handle)
                .cloned()
                .ok_or_else(|| LoggerError::codec(format!("undefined name handle {}", handle)))
        };
        let mut builder = LogEvent::builder(wire.level, lookup(wire.logger)?, wire.message)
            .timestamp(wire.timestamp)
            .thread_name(lookup(wire.thread)?)
            .args(wire.arguments)
            .mdc(wire.mdc);
        for marker in wire.markers {
            builder = builder.marker(marker);
        }
        if let Some(proxy) = wire.throwable {
            builder = builder.throwable(proxy);
        }
        Ok(builder.build())
    }
}

impl<R: Read> Iterator for ObjectStreamDecoder<R> {
    type Item = Result<LogEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_event().transpose()
    }
}

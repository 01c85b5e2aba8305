//! Event encoders
//!
//! An encoder turns a [`LogEvent`] into the bytes an appender writes. Encoders
//! are owned by their appender and only used under its lock, hence `&mut self`.

pub mod date;
mod json;
mod object_stream;
mod pattern;

pub use date::{DateFormat, DateZone, DEFAULT_DATE_PATTERN};
pub use json::JsonEncoder;
pub use object_stream::{
    ObjectStreamDecoder, ObjectStreamEncoder, DEFAULT_RESET_FREQUENCY, STREAM_MAGIC,
    STREAM_VERSION,
};
pub use pattern::{PatternEncoder, DEFAULT_PATTERN};

use crate::core::context::ContextHandle;
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use std::fmt;

pub trait Encoder: Send + fmt::Debug {
    fn start(&mut self, _context: &ContextHandle) -> Result<()> {
        Ok(())
    }

    fn is_started(&self) -> bool {
        true
    }

    fn encode(&mut self, event: &LogEvent) -> Result<Vec<u8>>;

    /// Bytes written once when a destination is (re)opened
    fn header_bytes(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

impl<E: Encoder + ?Sized> Encoder for Box<E> {
    fn start(&mut self, context: &ContextHandle) -> Result<()> {
        (**self).start(context)
    }

    fn is_started(&self) -> bool {
        (**self).is_started()
    }

    fn encode(&mut self, event: &LogEvent) -> Result<Vec<u8>> {
        (**self).encode(event)
    }

    fn header_bytes(&mut self) -> Vec<u8> {
        (**self).header_bytes()
    }
}

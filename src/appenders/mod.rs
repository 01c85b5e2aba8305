//! Appender implementations
//!
//! Destinations ([`ConsoleAppender`], [`FileAppender`], [`RollingFileAppender`],
//! [`SocketAppender`], [`ListAppender`]) implement [`Appender`] and are wrapped in a
//! [`SyncAppender`](crate::core::appender::SyncAppender). [`AsyncAppender`] sits in
//! front of any other appender.

pub mod async_appender;
pub mod console;
pub mod file;
pub mod list;
pub mod rolling_file;
#[cfg(feature = "network")]
pub mod socket;

pub use async_appender::AsyncAppender;
pub use console::{ConsoleAppender, ConsoleTarget};
pub use file::FileAppender;
pub use list::ListAppender;
pub use rolling_file::{RollingFileAppender, RollingPolicy, TriggeringPolicy};
#[cfg(feature = "network")]
pub use socket::{ConnectionState, SocketAppender, SocketMonitor};

pub use crate::core::appender::Appender;

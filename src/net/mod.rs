//! Network side of the pipeline
//!
//! The sending half lives in [`SocketAppender`](crate::appenders::SocketAppender);
//! this module holds the receiving half.

mod receiver;

pub use receiver::{SocketReceiver, DEFAULT_RECEIVER_PORT};

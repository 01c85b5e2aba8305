//! One JSON object per event (JSONL), for log aggregation tools

use super::Encoder;
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct JsonLine<'a> {
    timestamp: i64,
    level: &'static str,
    logger: &'a str,
    thread: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "no_mdc")]
    mdc: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    markers: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<String>,
}

fn no_mdc(mdc: &&BTreeMap<String, String>) -> bool {
    mdc.is_empty()
}

/// Writes each event as a single-line JSON object
#[derive(Debug, Clone, Default)]
pub struct JsonEncoder {
    pretty: bool,
}

impl JsonEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Multi-line output, for humans rather than collectors
    #[must_use]
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Encoder for JsonEncoder {
    fn encode(&mut self, event: &LogEvent) -> Result<Vec<u8>> {
        let line = JsonLine {
            timestamp: event.timestamp_millis(),
            level: event.level().to_str(),
            logger: event.logger_name(),
            thread: event.thread_name(),
            message: event.formatted_message(),
            mdc: event.mdc(),
            markers: event.markers().iter().map(|m| m.name()).collect(),
            exception: event.throwable().map(|t| t.render()),
        };
        let mut bytes = if self.pretty {
            serde_json::to_vec_pretty(&line)?
        } else {
            serde_json::to_vec(&line)?
        };
        bytes.push(b'\n');
        Ok(bytes)
    }
}

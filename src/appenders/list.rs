//! In-memory appender, mostly for tests

use crate::core::appender::Appender;
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use parking_lot::Mutex;
use std::sync::Arc;

/// Keeps every appended event in a shared list
///
/// Clones share the same list, so a test can keep one clone and hand the other
/// to a [`SyncAppender`](crate::core::appender::SyncAppender).
#[derive(Debug, Clone)]
pub struct ListAppender {
    name: String,
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl ListAppender {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.formatted_message().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Appender for ListAppender {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&mut self, event: &LogEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Registry of named logger contexts

use super::error::{LoggerError, Result};
use super::logger::LoggerContext;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Owns every [`LoggerContext`] of a process by name
///
/// There is no process-global instance; the embedding application keeps the
/// selector where it needs it.
#[derive(Debug, Default)]
pub struct ContextSelector {
    contexts: RwLock<HashMap<String, LoggerContext>>,
}

impl ContextSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context under its own name
    pub fn init(&self, context: LoggerContext) -> Result<LoggerContext> {
        let name = context.name();
        let mut contexts = self.contexts.write();
        if contexts.contains_key(&name) {
            return Err(LoggerError::config(
                "ContextSelector",
                format!("a context named '{}' is already registered", name),
            ));
        }
        contexts.insert(name, context.clone());
        Ok(context)
    }

    pub fn get(&self, name: &str) -> Option<LoggerContext> {
        self.contexts.read().get(name).cloned()
    }

    /// Context named `name`, created on first use
    pub fn get_or_create(&self, name: &str) -> LoggerContext {
        if let Some(ctx) = self.get(name) {
            return ctx;
        }
        self.contexts
            .write()
            .entry(name.to_string())
            .or_insert_with(|| LoggerContext::new(name))
            .clone()
    }

    /// Remove and stop a context
    pub fn teardown(&self, name: &str) -> Option<LoggerContext> {
        let removed = self.contexts.write().remove(name);
        if let Some(ctx) = &removed {
            ctx.stop();
        }
        removed
    }

    pub fn teardown_all(&self) {
        let all: Vec<_> = self.contexts.write().drain().map(|(_, c)| c).collect();
        for ctx in all {
            ctx.stop();
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.contexts.read().keys().cloned().collect();
        names.sort();
        names
    }
}

//! Argument values and the mapped diagnostic context
//!
//! This module provides:
//! - `FieldValue`: values substituted into message templates
//! - `Mdc`: per-thread string map captured into every event
//! - `MdcGuard`: RAII guard for scoped MDC entries

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

/// Value type for message arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Null => write!(f, "null"),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Int(i as i64)
    }
}

impl From<u32> for FieldValue {
    fn from(i: u32) -> Self {
        FieldValue::Int(i as i64)
    }
}

impl From<usize> for FieldValue {
    fn from(i: usize) -> Self {
        FieldValue::Int(i as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

thread_local! {
    static MDC: RefCell<BTreeMap<String, String>> = const { RefCell::new(BTreeMap::new()) };
}

/// Mapped diagnostic context of the current thread
///
/// Every event emitted from a thread captures a snapshot of that thread's MDC.
///
/// # Example
///
/// ```
/// use rust_log_pipeline::core::Mdc;
///
/// Mdc::put("request_id", "abc-123");
/// assert_eq!(Mdc::get("request_id").as_deref(), Some("abc-123"));
/// Mdc::clear();
/// ```
pub struct Mdc;

impl Mdc {
    /// Set a key on the current thread's MDC, replacing any previous value
    pub fn put(key: impl Into<String>, value: impl Into<String>) {
        MDC.with(|m| {
            m.borrow_mut().insert(key.into(), value.into());
        });
    }

    pub fn get(key: &str) -> Option<String> {
        MDC.with(|m| m.borrow().get(key).cloned())
    }

    pub fn remove(key: &str) -> Option<String> {
        MDC.with(|m| m.borrow_mut().remove(key))
    }

    pub fn clear() {
        MDC.with(|m| m.borrow_mut().clear());
    }

    /// Copy of the current thread's map
    pub fn snapshot() -> BTreeMap<String, String> {
        MDC.with(|m| m.borrow().clone())
    }

    /// Insert a key for the lifetime of the returned guard
    ///
    /// The previous value, if any, is restored when the guard drops.
    #[must_use = "the entry is removed as soon as the guard is dropped"]
    pub fn scoped(key: impl Into<String>, value: impl Into<String>) -> MdcGuard {
        let key = key.into();
        let previous = MDC.with(|m| m.borrow_mut().insert(key.clone(), value.into()));
        MdcGuard { key, previous }
    }
}

/// RAII guard for scoped MDC entries
///
/// Not `Send`: the entry lives in the thread that created the guard.
pub struct MdcGuard {
    key: String,
    previous: Option<String>,
}

impl Drop for MdcGuard {
    fn drop(&mut self) {
        MDC.with(|m| {
            let mut map = m.borrow_mut();
            match self.previous.take() {
                Some(value) => {
                    map.insert(std::mem::take(&mut self.key), value);
                }
                None => {
                    map.remove(&self.key);
                }
            }
        });
    }
}

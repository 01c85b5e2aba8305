//! Serialisable snapshot of an error and its cause chain
//!
//! Producers may be gone long before an event is rendered (async queues, remote
//! receivers), so everything is captured eagerly into plain data.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Write as _};

/// Upper bound on captured frames per proxy
const MAX_FRAMES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}({}:{})", self.function, file, line),
            (Some(file), None) => write!(f, "{}({})", self.function, file),
            _ => write!(f, "{}", self.function),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrowableProxy {
    class_name: String,
    message: String,
    frames: Vec<StackFrame>,
    cause: Option<Box<ThrowableProxy>>,
}

impl ThrowableProxy {
    /// Proxy without stack frames
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    /// Capture `err`, its `source()` chain and the current call stack
    pub fn from_error<E: Error + 'static>(err: &E) -> Self {
        let mut proxy = Self::new(std::any::type_name::<E>(), err.to_string());
        proxy.frames = capture_frames();
        proxy.cause = err.source().map(|src| Box::new(Self::from_source(src)));
        proxy
    }

    fn from_source(err: &(dyn Error + 'static)) -> Self {
        let mut proxy = Self::new(debug_label(err), err.to_string());
        proxy.cause = err.source().map(|src| Box::new(Self::from_source(src)));
        proxy
    }

    #[must_use]
    pub fn with_cause(mut self, cause: ThrowableProxy) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn cause(&self) -> Option<&ThrowableProxy> {
        self.cause.as_deref()
    }

    /// This proxy followed by every cause, outermost first
    pub fn chain(&self) -> impl Iterator<Item = &ThrowableProxy> {
        std::iter::successors(Some(self), |p| p.cause())
    }

    /// Multi-line rendering used by the `%ex` converter
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (depth, proxy) in self.chain().enumerate() {
            if depth > 0 {
                out.push_str("Caused by: ");
            }
            let _ = writeln!(out, "{}: {}", proxy.class_name, proxy.message);
            for frame in &proxy.frames {
                let _ = writeln!(out, "\tat {}", frame);
            }
        }
        out
    }
}

/// Best label available for a type-erased error: the leading identifier of its Debug form.
fn debug_label(err: &(dyn Error + 'static)) -> String {
    let debug = format!("{:?}", err);
    let label: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if label.is_empty() {
        "Error".to_string()
    } else {
        label
    }
}

fn capture_frames() -> Vec<StackFrame> {
    let trace = backtrace::Backtrace::new();
    trace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .filter_map(|symbol| {
            let function = symbol.name()?.to_string();
            if function.starts_with("backtrace::") || function.contains("ThrowableProxy") {
                return None;
            }
            Some(StackFrame {
                function,
                file: symbol.filename().map(|p| p.display().to_string()),
                line: symbol.lineno(),
            })
        })
        .take(MAX_FRAMES)
        .collect()
}

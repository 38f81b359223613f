//! Error types for Bindery.
//!
//! Two layers live here:
//!
//! - [`BinderyError`] covers failures of the runtime itself (queue creation,
//!   global initialization) and is returned through [`Result`].
//! - [`Exception`] is the failure value carried by a [`Task`](crate::Task).
//!   It wraps an optional message and an optional source error, and renders a
//!   human-readable description that falls back through both.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The main error type for Bindery runtime operations.
#[derive(Debug)]
pub enum BinderyError {
    /// A dispatch queue could not be created.
    QueueCreation(String),
    /// The global queue has already been initialized.
    GlobalAlreadyInitialized,
}

impl fmt::Display for BinderyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueCreation(msg) => write!(f, "Failed to create dispatch queue: {msg}"),
            Self::GlobalAlreadyInitialized => {
                write!(f, "The global dispatch queue has already been initialized")
            }
        }
    }
}

impl StdError for BinderyError {}

/// Command-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The weakly-held source of a command was dropped before execution.
    SourceIsNil,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceIsNil => write!(f, "source is nil"),
        }
    }
}

impl StdError for CommandError {}

/// A specialized Result type for Bindery operations.
pub type Result<T> = std::result::Result<T, BinderyError>;

/// The failure value of a [`Task`](crate::Task).
///
/// An exception carries an optional message and an optional wrapped source
/// error. Its [`Display`](fmt::Display) output falls back, in order, through:
///
/// 1. the message,
/// 2. the source's `Display` text,
/// 3. the source's `Debug` text,
/// 4. the type name of the source, or `"Exception"` when there is none.
///
/// Exceptions are cheap to clone. The [`handled`](Self::is_handled) flag is
/// shared between clones so that marking one copy as surfaced marks them all.
#[derive(Clone)]
pub struct Exception {
    message: Option<String>,
    source: Option<Arc<dyn StdError + Send + Sync>>,
    type_name: &'static str,
    handled: Arc<AtomicBool>,
}

impl Exception {
    /// Create an exception with a message and no source.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            source: None,
            type_name: "Exception",
            handled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an exception that wraps a source error.
    pub fn wrap<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: None,
            source: Some(Arc::new(source)),
            type_name: std::any::type_name::<E>(),
            handled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an exception with both a message and a source error.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: Some(message.into()),
            ..Self::wrap(source)
        }
    }

    /// Create an exception with neither message nor source.
    ///
    /// Its description is the bare type name.
    pub fn empty() -> Self {
        Self {
            message: None,
            source: None,
            type_name: "Exception",
            handled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build an exception from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("task panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("task panicked: {s}")
        } else {
            "task panicked".to_string()
        };
        Self::new(message)
    }

    /// The explicit message, if one was given.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The wrapped source error, if any.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Downcast the wrapped source error to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }

    /// Check whether the source error is of type `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Whether this failure has already been surfaced to the user.
    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }

    /// Mark this failure as surfaced.
    ///
    /// Returns `true` if this call flipped the flag, `false` if another
    /// clone had already marked it.
    pub fn mark_handled(&self) -> bool {
        !self.handled.swap(true, Ordering::AcqRel)
    }

    /// The computed, human-readable description.
    pub fn description(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        if let Some(source) = &self.source {
            let display = source.to_string();
            if !display.is_empty() {
                return display;
            }
            let debug = format!("{source:?}");
            if !debug.is_empty() {
                return debug;
            }
        }
        short_type_name(self.type_name)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("message", &self.message)
            .field("source", &self.source)
            .field("handled", &self.is_handled())
            .finish()
    }
}

impl StdError for Exception {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<CommandError> for Exception {
    fn from(err: CommandError) -> Self {
        Self::wrap(err)
    }
}

impl From<BinderyError> for Exception {
    fn from(err: BinderyError) -> Self {
        Self::wrap(err)
    }
}

impl From<String> for Exception {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for Exception {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A type name with every module path stripped, generic arguments included.
///
/// `alloc::vec::Vec<my_app::Item>` becomes `Vec<Item>`.
fn short_type_name(full: &str) -> String {
    fn push_last_segment(out: &mut String, path: &str) {
        out.push_str(path.rsplit("::").next().unwrap_or(path));
    }

    let mut out = String::with_capacity(full.len());
    let mut path = String::new();
    for c in full.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            path.push(c);
        } else {
            push_last_segment(&mut out, &path);
            path.clear();
            out.push(c);
        }
    }
    push_last_segment(&mut out, &path);
    out
}

//! Logging facilities for Bindery.
//!
//! Bindery uses the `tracing` crate for instrumentation. Nothing is printed
//! unless the application installs a subscriber:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("bindery_core=debug")
//!     .init();
//! ```
//!
//! Every event is emitted with one of the [`targets`] below, so subsystems can
//! be filtered individually (`bindery_core::command=trace`).

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core framework target.
    pub const CORE: &str = "bindery_core";
    /// Dispatch queue target.
    pub const QUEUE: &str = "bindery_core::queue";
    /// Task execution target.
    pub const TASK: &str = "bindery_core::task";
    /// Observable notification target.
    pub const OBSERVABLE: &str = "bindery_core::observable";
    /// Command execution target.
    pub const COMMAND: &str = "bindery_core::command";
}

/// A guard that keeps a tracing span entered until dropped.
///
/// This is useful for tracking the duration of operations.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "bindery::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

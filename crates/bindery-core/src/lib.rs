//! Core systems for Bindery.
//!
//! This crate provides the concurrency core that UI-facing code is built on:
//!
//! - **Dispatch Queues**: Named serial and concurrent executors
//! - **Tasks**: Lazy, chainable computations with failure propagation
//! - **Observables**: Values that notify weakly-owned listeners on their own queues
//! - **Commands**: Predicate-gated actions with serialized execution
//! - **Locks**: Uniform lock handles with scoped `sync` helpers
//!
//! # Task Example
//!
//! ```
//! use bindery_core::{DispatchQueue, Exception, Task};
//!
//! let background = DispatchQueue::concurrent("background");
//! let ui = DispatchQueue::serial("ui");
//!
//! let task = Task::new(&background, || Ok::<_, Exception>(6 * 7))
//!     .on_fail(&ui, |err| eprintln!("failed: {err}"))
//!     .map(|answer| format!("answer = {answer}"));
//!
//! assert_eq!(task.wait().unwrap(), "answer = 42");
//! ```
//!
//! # Command Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use bindery_core::{CommandBuilder, DispatchQueue, Task};
//!
//! let enabled = Arc::new(AtomicBool::new(true));
//! let gate = enabled.clone();
//!
//! let upload = CommandBuilder::new("upload")
//!     .execute_on(&DispatchQueue::serial("uploads"))
//!     .callback_on(&DispatchQueue::serial("ui"))
//!     .task_when(
//!         move |_: &String| gate.load(Ordering::SeqCst),
//!         |path: String| Task::value(path.len()),
//!     );
//!
//! assert_eq!(upload.execute("a.txt".into()).unwrap().wait().unwrap(), 5);
//!
//! enabled.store(false, Ordering::SeqCst);
//! assert!(upload.execute("b.txt".into()).is_none());
//! ```
//!
//! # Lock Example
//!
//! ```
//! use bindery_core::{Lock, MutexLock};
//!
//! let lock = MutexLock::new();
//! let total = lock.sync(|| 1 + 2);
//! assert_eq!(total, 3);
//! assert!(!lock.is_locked());
//! ```

pub mod command;
mod error;
pub mod lock;
pub mod logging;
pub mod observable;
pub mod queue;
pub mod task;
mod weak;

pub use command::{
    ActionCommand, AnyCommand, AsyncCommand, CommandBuilder, ExecutionSlot, SerialCommand,
};
pub use error::{BinderyError, CommandError, Exception, Result};
#[allow(deprecated)]
pub use lock::SpinLock;
pub use lock::{Lock, LockGuard, MutexLock, ReadLock, ReadWriteLock, RecursiveLock, WriteLock};
pub use logging::PerfSpan;
pub use observable::{ListenerId, Observable};
pub use queue::{DispatchQueue, QueueConfig, QueueId, QueueKind};
pub use task::{Outcome, Promise, Task, TaskId, TaskState};
pub use weak::WeakHandle;

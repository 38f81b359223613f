//! Commands: predicate-gated actions with serialized execution.
//!
//! A command wraps an action together with a `can_execute` predicate and two
//! queues: the *execute queue* the action runs on and the *callback queue* its
//! result is delivered on. Every command runs at most one execution at a time.
//! Requests that arrive while one is in flight wait in a FIFO and run after it,
//! in order.
//!
//! # Command Types
//!
//! - [`ActionCommand<P>`]: runs a synchronous `Fn(P)`.
//! - [`AsyncCommand<P, O>`]: runs a factory producing a [`Task<O>`]. The
//!   execution stays in flight until that task finishes.
//! - [`SerialCommand`]: the serialization engine both are built on. It can be
//!   used directly to serialize arbitrary jobs.
//!
//! # Example
//!
//! ```
//! use bindery_core::{CommandBuilder, DispatchQueue};
//!
//! let worker = DispatchQueue::serial("save");
//! let results = DispatchQueue::serial("results");
//!
//! let save = CommandBuilder::new("save")
//!     .execute_on(&worker)
//!     .callback_on(&results)
//!     .action_when(|name: &String| !name.is_empty(), |name: String| {
//!         println!("saving {name}");
//!     });
//!
//! assert!(save.execute(String::new()).is_none());
//! let task = save.execute("draft".to_string()).unwrap();
//! task.wait().unwrap();
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CommandError, Exception};
use crate::logging::PerfSpan;
use crate::queue::DispatchQueue;
use crate::task::{Outcome, Promise, Task};
use crate::weak::WeakHandle;

type Job = Box<dyn FnOnce(ExecutionSlot) + Send>;
type Predicate<P> = Arc<dyn Fn(&P) -> bool + Send + Sync>;

// ============================================================================
// SerialCommand
// ============================================================================

#[derive(Default)]
struct SerialState {
    executing: bool,
    pending: VecDeque<Job>,
}

struct SerialInner {
    label: String,
    execute_queue: DispatchQueue,
    callback_queue: DispatchQueue,
    state: Mutex<SerialState>,
}

impl SerialInner {
    fn run(self: &Arc<Self>, job: Job) {
        let slot = ExecutionSlot {
            command: Some(self.clone()),
        };
        tracing::trace!(target: "bindery_core::command", label = %self.label, "execution started");
        self.execute_queue.dispatch(move || {
            let _span = PerfSpan::new("command.execute");
            job(slot);
        });
    }

    fn advance(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            let next = state.pending.pop_front();
            if next.is_none() {
                state.executing = false;
            }
            next
        };
        tracing::trace!(
            target: "bindery_core::command",
            label = %self.label,
            more = next.is_some(),
            "execution finished"
        );
        if let Some(job) = next {
            self.run(job);
        }
    }
}

/// Serializes jobs so that at most one runs at a time.
///
/// Each job receives an [`ExecutionSlot`]. The command stays busy until the
/// slot is dropped, which may happen after the job itself has returned, so a
/// job can hand its slot to asynchronous work.
#[derive(Clone)]
pub struct SerialCommand {
    inner: Arc<SerialInner>,
}

impl SerialCommand {
    /// Create a serial command running jobs on `execute_queue`.
    pub fn new(
        label: impl Into<String>,
        execute_queue: &DispatchQueue,
        callback_queue: &DispatchQueue,
    ) -> Self {
        Self {
            inner: Arc::new(SerialInner {
                label: label.into(),
                execute_queue: execute_queue.clone(),
                callback_queue: callback_queue.clone(),
                state: Mutex::new(SerialState::default()),
            }),
        }
    }

    /// Run `job` now, or after every earlier job has released its slot.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce(ExecutionSlot) + Send + 'static,
    {
        let job: Job = Box::new(job);
        let job = {
            let mut state = self.inner.state.lock();
            if state.executing {
                state.pending.push_back(job);
                tracing::debug!(
                    target: "bindery_core::command",
                    label = %self.inner.label,
                    pending = state.pending.len(),
                    "execution queued behind in-flight job"
                );
                return;
            }
            state.executing = true;
            job
        };
        self.inner.run(job);
    }

    /// The label used in log output.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The queue jobs run on.
    pub fn execute_queue(&self) -> &DispatchQueue {
        &self.inner.execute_queue
    }

    /// The queue results are delivered on.
    pub fn callback_queue(&self) -> &DispatchQueue {
        &self.inner.callback_queue
    }

    /// Whether a job currently holds the execution slot.
    pub fn is_executing(&self) -> bool {
        self.inner.state.lock().executing
    }

    /// The number of jobs waiting behind the current one.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Resolve `promise` with `outcome` on the callback queue.
    fn deliver<T>(&self, promise: Promise<T>, outcome: Outcome<T>)
    where
        T: Clone + Send + 'static,
    {
        self.inner
            .callback_queue
            .dispatch(move || promise.resolve(outcome));
    }
}

impl fmt::Debug for SerialCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SerialCommand")
            .field("label", &self.inner.label)
            .field("executing", &state.executing)
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// Proof that a job holds its command's execution slot.
///
/// Dropping the slot, normally or during a panic unwind, starts the next
/// pending job.
pub struct ExecutionSlot {
    command: Option<Arc<SerialInner>>,
}

impl ExecutionSlot {
    /// Release the slot explicitly.
    pub fn finish(self) {}
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        if let Some(command) = self.command.take() {
            command.advance();
        }
    }
}

impl fmt::Debug for ExecutionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionSlot")
            .field("label", &self.command.as_ref().map(|c| c.label.as_str()))
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for configuring commands.
///
/// The execute queue defaults to [`DispatchQueue::global`] and the callback
/// queue to [`DispatchQueue::main`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    label: String,
    execute_queue: Option<DispatchQueue>,
    callback_queue: Option<DispatchQueue>,
}

impl CommandBuilder {
    /// Create a new builder for a command called `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            execute_queue: None,
            callback_queue: None,
        }
    }

    /// Set the queue the action runs on.
    pub fn execute_on(mut self, queue: &DispatchQueue) -> Self {
        self.execute_queue = Some(queue.clone());
        self
    }

    /// Set the queue results are delivered on.
    pub fn callback_on(mut self, queue: &DispatchQueue) -> Self {
        self.callback_queue = Some(queue.clone());
        self
    }

    fn serial(self) -> SerialCommand {
        let execute_queue = self
            .execute_queue
            .unwrap_or_else(|| DispatchQueue::global().clone());
        let callback_queue = self
            .callback_queue
            .unwrap_or_else(|| DispatchQueue::main().clone());
        SerialCommand::new(self.label, &execute_queue, &callback_queue)
    }

    /// Build an [`ActionCommand`] that is always executable.
    pub fn action<P, F>(self, action: F) -> ActionCommand<P>
    where
        P: Send + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        self.action_when(|_: &P| true, action)
    }

    /// Build an [`ActionCommand`] gated by `predicate`.
    pub fn action_when<P, C, F>(self, predicate: C, action: F) -> ActionCommand<P>
    where
        P: Send + 'static,
        C: Fn(&P) -> bool + Send + Sync + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        ActionCommand {
            serial: self.serial(),
            predicate: Arc::new(predicate),
            action: Arc::new(action),
        }
    }

    /// Build an [`AsyncCommand`] that is always executable.
    pub fn task<P, O, F>(self, factory: F) -> AsyncCommand<P, O>
    where
        P: Send + 'static,
        O: Clone + Send + 'static,
        F: Fn(P) -> Task<O> + Send + Sync + 'static,
    {
        self.task_when(|_: &P| true, factory)
    }

    /// Build an [`AsyncCommand`] gated by `predicate`.
    pub fn task_when<P, O, C, F>(self, predicate: C, factory: F) -> AsyncCommand<P, O>
    where
        P: Send + 'static,
        O: Clone + Send + 'static,
        C: Fn(&P) -> bool + Send + Sync + 'static,
        F: Fn(P) -> Task<O> + Send + Sync + 'static,
    {
        AsyncCommand {
            serial: self.serial(),
            source: None,
            predicate: Arc::new(predicate),
            factory: Arc::new(factory),
        }
    }

    /// Build an [`AsyncCommand`] bound to a weakly-held `source`.
    ///
    /// Once `source` is dropped the command can no longer execute and
    /// [`execute`](AsyncCommand::execute) yields a task failed with
    /// [`CommandError::SourceIsNil`].
    pub fn task_with_source<S, P, O, C, F>(
        self,
        source: &Arc<S>,
        predicate: C,
        factory: F,
    ) -> AsyncCommand<P, O>
    where
        S: Send + Sync + 'static,
        P: Send + 'static,
        O: Clone + Send + 'static,
        C: Fn(&S, &P) -> bool + Send + Sync + 'static,
        F: Fn(&S, P) -> Task<O> + Send + Sync + 'static,
    {
        let weak = WeakHandle::new(source);
        let erased: std::sync::Weak<dyn Any + Send + Sync> =
            Arc::downgrade(source) as std::sync::Weak<dyn Any + Send + Sync>;

        let predicate_source = weak.clone();
        let predicate = move |parameter: &P| {
            predicate_source
                .resolve()
                .is_some_and(|source| predicate(&source, parameter))
        };
        let factory = move |parameter: P| match weak.resolve() {
            Some(source) => factory(&source, parameter),
            None => Task::failed(CommandError::SourceIsNil),
        };

        AsyncCommand {
            serial: self.serial(),
            source: Some(WeakHandle::from_weak(erased)),
            predicate: Arc::new(predicate),
            factory: Arc::new(factory),
        }
    }
}

// ============================================================================
// ActionCommand
// ============================================================================

/// A command running a synchronous action with a parameter of type `P`.
pub struct ActionCommand<P> {
    serial: SerialCommand,
    predicate: Predicate<P>,
    action: Arc<dyn Fn(P) + Send + Sync>,
}

impl<P: Send + 'static> ActionCommand<P> {
    /// Create an always-executable command on the default queues.
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(P) + Send + Sync + 'static,
    {
        CommandBuilder::new("action").action(action)
    }

    /// Whether `parameter` passes the predicate.
    pub fn can_execute(&self, parameter: &P) -> bool {
        (self.predicate)(parameter)
    }

    /// Run the action with `parameter` once earlier executions have finished.
    ///
    /// Returns `None` without doing anything if the predicate rejects
    /// `parameter`. Otherwise the returned task finishes on the callback queue
    /// after the action has run. A panicking action fails the task.
    pub fn execute(&self, parameter: P) -> Option<Task<()>> {
        if !self.can_execute(&parameter) {
            tracing::trace!(
                target: "bindery_core::command",
                label = self.serial.label(),
                "predicate rejected execution"
            );
            return None;
        }

        let (task, promise) = Task::pending();
        let action = self.action.clone();
        let serial = self.serial.clone();
        self.serial.submit(move |slot| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| action(parameter)))
                .map_err(Exception::from_panic);
            drop(slot);
            serial.deliver(promise, outcome);
        });
        Some(task)
    }

    /// Whether an execution is in flight.
    pub fn is_executing(&self) -> bool {
        self.serial.is_executing()
    }

    /// The number of executions waiting behind the current one.
    pub fn pending_count(&self) -> usize {
        self.serial.pending_count()
    }

    /// The underlying serialization engine.
    pub fn serial(&self) -> &SerialCommand {
        &self.serial
    }
}

impl<P> fmt::Debug for ActionCommand<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCommand")
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AsyncCommand
// ============================================================================

enum Admission {
    Admitted,
    Rejected,
    SourceGone,
}

/// A command whose action produces a [`Task<O>`].
///
/// The next execution does not start until the task produced by the current
/// one has finished.
pub struct AsyncCommand<P, O> {
    serial: SerialCommand,
    source: Option<WeakHandle<dyn Any + Send + Sync>>,
    predicate: Predicate<P>,
    factory: Arc<dyn Fn(P) -> Task<O> + Send + Sync>,
}

impl<P: Send + 'static, O: Clone + Send + 'static> AsyncCommand<P, O> {
    /// Create an always-executable command on the default queues.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(P) -> Task<O> + Send + Sync + 'static,
    {
        CommandBuilder::new("task").task(factory)
    }

    /// Create a command bound to a weakly-held `source` on the default queues.
    ///
    /// See [`CommandBuilder::task_with_source`].
    pub fn with_source<S, C, F>(source: &Arc<S>, predicate: C, factory: F) -> Self
    where
        S: Send + Sync + 'static,
        C: Fn(&S, &P) -> bool + Send + Sync + 'static,
        F: Fn(&S, P) -> Task<O> + Send + Sync + 'static,
    {
        CommandBuilder::new("task").task_with_source(source, predicate, factory)
    }

    fn admit(&self, parameter: &P) -> Admission {
        if self.source.as_ref().is_some_and(|source| !source.is_alive()) {
            return Admission::SourceGone;
        }
        if (self.predicate)(parameter) {
            Admission::Admitted
        } else {
            Admission::Rejected
        }
    }

    /// Whether the source is alive and `parameter` passes the predicate.
    pub fn can_execute(&self, parameter: &P) -> bool {
        matches!(self.admit(parameter), Admission::Admitted)
    }

    /// Run the factory with `parameter` once earlier executions have finished.
    ///
    /// Returns `None` if the predicate rejects `parameter`. If the command is
    /// bound to a source that has been dropped, returns a task already failed
    /// with [`CommandError::SourceIsNil`] and runs nothing.
    pub fn execute(&self, parameter: P) -> Option<Task<O>> {
        match self.admit(&parameter) {
            Admission::Admitted => Some(self.submit(parameter)),
            Admission::Rejected => {
                tracing::trace!(
                    target: "bindery_core::command",
                    label = self.serial.label(),
                    "predicate rejected execution"
                );
                None
            }
            Admission::SourceGone => {
                tracing::debug!(
                    target: "bindery_core::command",
                    label = self.serial.label(),
                    "source dropped, failing execution"
                );
                Some(Task::failed(CommandError::SourceIsNil))
            }
        }
    }

    fn submit(&self, parameter: P) -> Task<O> {
        let (task, promise) = Task::pending();
        let factory = self.factory.clone();
        let serial = self.serial.clone();
        self.serial.submit(move |slot| {
            match panic::catch_unwind(AssertUnwindSafe(|| factory(parameter))) {
                Ok(inner) => inner.subscribe(move |outcome| {
                    drop(slot);
                    serial.deliver(promise, outcome);
                }),
                Err(payload) => {
                    drop(slot);
                    serial.deliver(promise, Err(Exception::from_panic(payload)));
                }
            }
        });
        task
    }

    /// Whether an execution is in flight.
    pub fn is_executing(&self) -> bool {
        self.serial.is_executing()
    }

    /// The number of executions waiting behind the current one.
    pub fn pending_count(&self) -> usize {
        self.serial.pending_count()
    }

    /// The underlying serialization engine.
    pub fn serial(&self) -> &SerialCommand {
        &self.serial
    }
}

impl<P, O> fmt::Debug for AsyncCommand<P, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCommand")
            .field("serial", &self.serial)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Type-erased commands
// ============================================================================

/// A command whose parameter type is only known at runtime.
///
/// UI code that holds heterogeneous commands can drive them through this
/// trait. A parameter of the wrong type is treated as not executable.
pub trait AnyCommand: Send + Sync {
    /// The command's label.
    fn label(&self) -> &str;

    /// Whether `parameter` has the right type and passes the predicate.
    fn can_execute_any(&self, parameter: &dyn Any) -> bool;

    /// Execute with a dynamically typed parameter.
    ///
    /// Returns `true` if an execution was scheduled.
    fn execute_any(&self, parameter: Box<dyn Any + Send>) -> bool;

    /// Whether an execution is in flight.
    fn is_executing(&self) -> bool;
}

fn log_mismatch<P>(label: &str) {
    tracing::debug!(
        target: "bindery_core::command",
        label,
        expected = std::any::type_name::<P>(),
        "parameter type mismatch, ignoring execution"
    );
}

impl<P: Send + 'static> AnyCommand for ActionCommand<P> {
    fn label(&self) -> &str {
        self.serial.label()
    }

    fn can_execute_any(&self, parameter: &dyn Any) -> bool {
        parameter
            .downcast_ref::<P>()
            .is_some_and(|parameter| self.can_execute(parameter))
    }

    fn execute_any(&self, parameter: Box<dyn Any + Send>) -> bool {
        match parameter.downcast::<P>() {
            Ok(parameter) => self.execute(*parameter).is_some(),
            Err(_) => {
                log_mismatch::<P>(self.serial.label());
                false
            }
        }
    }

    fn is_executing(&self) -> bool {
        self.serial.is_executing()
    }
}

impl<P: Send + 'static, O: Clone + Send + 'static> AnyCommand for AsyncCommand<P, O> {
    fn label(&self) -> &str {
        self.serial.label()
    }

    fn can_execute_any(&self, parameter: &dyn Any) -> bool {
        parameter
            .downcast_ref::<P>()
            .is_some_and(|parameter| self.can_execute(parameter))
    }

    fn execute_any(&self, parameter: Box<dyn Any + Send>) -> bool {
        let parameter = match parameter.downcast::<P>() {
            Ok(parameter) => *parameter,
            Err(_) => {
                log_mismatch::<P>(self.serial.label());
                return false;
            }
        };
        match self.admit(&parameter) {
            Admission::Admitted => {
                self.submit(parameter);
                true
            }
            Admission::Rejected | Admission::SourceGone => false,
        }
    }

    fn is_executing(&self) -> bool {
        self.serial.is_executing()
    }
}

static_assertions::assert_impl_all!(SerialCommand: Send, Sync, Clone);
static_assertions::assert_impl_all!(ActionCommand<String>: Send, Sync);
static_assertions::assert_impl_all!(AsyncCommand<String, i32>: Send, Sync);

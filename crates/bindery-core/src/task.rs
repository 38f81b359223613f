//! Chainable deferred computations.
//!
//! A [`Task<T>`] eventually produces either a value of type `T` or an
//! [`Exception`]. Tasks are lazy: the work does not run until the task is
//! started, which happens on the first terminal subscription
//! ([`on_complete`](Task::on_complete), [`wait`](Task::wait)) or an explicit
//! [`start`](Task::start). A finished task keeps its outcome and never runs
//! again.
//!
//! # Queues
//!
//! The queue a task's work runs on is chosen when the task is created. The
//! queue an observer's callback runs on is chosen per observer. Combinators
//! without a queue parameter ([`map`](Task::map), [`and_then`](Task::and_then),
//! [`chain_on_fail`](Task::chain_on_fail)) run inline on whichever thread
//! completed the upstream task.
//!
//! # Example
//!
//! ```
//! use bindery_core::{DispatchQueue, Exception, Task};
//!
//! let io = DispatchQueue::serial("io");
//! let task = Task::new(&io, || Ok::<_, Exception>(20))
//!     .map(|n| n + 1)
//!     .try_map(|n| if n > 0 { Ok(n * 2) } else { Err(Exception::new("negative")) });
//!
//! assert_eq!(task.wait().unwrap(), 42);
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Exception;
use crate::queue::DispatchQueue;

/// The outcome of a finished task.
pub type Outcome<T> = std::result::Result<T, Exception>;

/// A unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the raw u64 value of this task ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Global counter for generating unique task IDs.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created but not started.
    Pending,
    /// Started, no outcome yet.
    Running,
    /// Finished with a value.
    Succeeded,
    /// Finished with an exception.
    Failed,
}

type Starter<T> = Box<dyn FnOnce(Promise<T>) + Send>;
type Subscriber<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

enum Stage<T> {
    Idle(Starter<T>),
    Running,
    Done(Outcome<T>),
}

struct TaskData<T> {
    stage: Stage<T>,
    subscribers: Vec<Subscriber<T>>,
}

struct Shared<T> {
    id: TaskId,
    data: Mutex<TaskData<T>>,
    finished: Condvar,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn new(stage: Stage<T>) -> Arc<Self> {
        Arc::new(Self {
            id: next_task_id(),
            data: Mutex::new(TaskData {
                stage,
                subscribers: Vec::new(),
            }),
            finished: Condvar::new(),
        })
    }

    fn start(self: &Arc<Self>) {
        let starter = {
            let mut data = self.data.lock();
            match std::mem::replace(&mut data.stage, Stage::Running) {
                Stage::Idle(starter) => starter,
                other => {
                    data.stage = other;
                    return;
                }
            }
        };
        tracing::trace!(target: "bindery_core::task", id = self.id.0, "task started");
        starter(Promise::new(self.clone()));
    }

    /// Register `subscriber` for the outcome and start the task.
    ///
    /// Runs `subscriber` immediately if the task has already finished.
    fn subscribe(self: &Arc<Self>, subscriber: Subscriber<T>) {
        let ready = {
            let mut data = self.data.lock();
            if let Stage::Done(outcome) = &data.stage {
                Some((outcome.clone(), subscriber))
            } else {
                data.subscribers.push(subscriber);
                None
            }
        };
        match ready {
            Some((outcome, subscriber)) => subscriber(outcome),
            None => self.start(),
        }
    }

    fn resolve(&self, outcome: Outcome<T>) {
        let subscribers = {
            let mut data = self.data.lock();
            if matches!(data.stage, Stage::Done(_)) {
                tracing::warn!(target: "bindery_core::task", id = self.id.0, "task resolved twice, ignoring");
                return;
            }
            data.stage = Stage::Done(outcome.clone());
            std::mem::take(&mut data.subscribers)
        };
        self.finished.notify_all();

        match &outcome {
            Ok(_) => tracing::trace!(target: "bindery_core::task", id = self.id.0, "task succeeded"),
            Err(err) => tracing::debug!(target: "bindery_core::task", id = self.id.0, error = %err, "task failed"),
        }

        for subscriber in subscribers {
            subscriber(outcome.clone());
        }
    }
}

/// A deferred computation producing `T` or an [`Exception`].
///
/// Cloning a task yields another handle to the same computation.
pub struct Task<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// A task that has already succeeded with `value`.
    pub fn value(value: T) -> Self {
        Self {
            shared: Shared::new(Stage::Done(Ok(value))),
        }
    }

    /// A task that has already failed with `error`.
    pub fn failed(error: impl Into<Exception>) -> Self {
        Self {
            shared: Shared::new(Stage::Done(Err(error.into()))),
        }
    }

    /// A task that runs `work` on `queue` once started.
    ///
    /// A panic inside `work` fails the task.
    pub fn new<F>(queue: &DispatchQueue, work: F) -> Self
    where
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        let queue = queue.clone();
        Self::from_starter(move |promise| {
            queue.dispatch(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                    .unwrap_or_else(|payload| Err(Exception::from_panic(payload)));
                promise.resolve(outcome);
            });
        })
    }

    /// A task whose work receives a [`Promise`] to resolve later.
    ///
    /// This bridges callback-style APIs. `work` runs on `queue` once the task
    /// is started; the task finishes when the promise is resolved or dropped.
    /// A panic inside `work` before the promise is resolved fails the task.
    pub fn deferred<F>(queue: &DispatchQueue, work: F) -> Self
    where
        F: FnOnce(Promise<T>) + Send + 'static,
    {
        let queue = queue.clone();
        Self::from_starter(move |promise| {
            queue.dispatch(move || {
                // The promise handed to `work` unwinds with it on a panic, so
                // the real one stays here to report the panic instead.
                let slot = Arc::new(Mutex::new(Some(promise)));
                let forward = slot.clone();
                let handed = Promise::from_resolver(move |outcome| {
                    if std::thread::panicking() {
                        return;
                    }
                    let promise = forward.lock().take();
                    if let Some(promise) = promise {
                        promise.resolve(outcome);
                    }
                });
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work(handed))) {
                    let promise = slot.lock().take();
                    if let Some(promise) = promise {
                        promise.resolve(Err(Exception::from_panic(payload)));
                    }
                }
            });
        })
    }

    /// A running task paired with the promise that finishes it.
    pub fn pending() -> (Self, Promise<T>) {
        let shared = Shared::new(Stage::Running);
        let promise = Promise::new(shared.clone());
        (Self { shared }, promise)
    }

    fn from_starter<F>(starter: F) -> Self
    where
        F: FnOnce(Promise<T>) + Send + 'static,
    {
        Self {
            shared: Shared::new(Stage::Idle(Box::new(starter))),
        }
    }

    /// Derive a task from this task's outcome.
    ///
    /// `next` runs inline on whichever thread finished `self`.
    fn chain<U, F>(self, next: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Outcome<T>, Promise<U>) + Send + 'static,
    {
        let upstream = self.shared;
        Task::from_starter(move |promise| {
            upstream.subscribe(Box::new(move |outcome| next(outcome, promise)));
        })
    }

    /// The unique ID of this task.
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// The current lifecycle state.
    pub fn state(&self) -> TaskState {
        match &self.shared.data.lock().stage {
            Stage::Idle(_) => TaskState::Pending,
            Stage::Running => TaskState::Running,
            Stage::Done(Ok(_)) => TaskState::Succeeded,
            Stage::Done(Err(_)) => TaskState::Failed,
        }
    }

    /// Whether the task has an outcome.
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Succeeded | TaskState::Failed)
    }

    /// Start the task if it has not started yet.
    pub fn start(&self) {
        self.shared.start();
    }

    /// Transform a successful value. Failures pass through unchanged.
    ///
    /// A panic inside `f` fails the derived task.
    pub fn map<U, F>(self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Transform a successful value into a new value or a failure.
    pub fn try_map<U, F>(self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        self.chain(move |outcome, promise| match outcome {
            Ok(value) => {
                let mapped = panic::catch_unwind(AssertUnwindSafe(|| f(value)))
                    .unwrap_or_else(|payload| Err(Exception::from_panic(payload)));
                promise.resolve(mapped);
            }
            Err(err) => promise.resolve(Err(err)),
        })
    }

    /// Continue with another task after a success. Failures pass through.
    pub fn and_then<U, F>(self, f: F) -> Task<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Task<U> + Send + 'static,
    {
        self.chain(move |outcome, promise| match outcome {
            Ok(value) => match panic::catch_unwind(AssertUnwindSafe(|| f(value))) {
                Ok(next) => promise.follow(&next),
                Err(payload) => promise.resolve(Err(Exception::from_panic(payload))),
            },
            Err(err) => promise.resolve(Err(err)),
        })
    }

    /// Replace a failure with the outcome of another task.
    ///
    /// Successes pass through unchanged.
    pub fn chain_on_fail<F>(self, f: F) -> Task<T>
    where
        F: FnOnce(Exception) -> Task<T> + Send + 'static,
    {
        self.chain(move |outcome, promise| match outcome {
            Ok(value) => promise.resolve(Ok(value)),
            Err(err) => match panic::catch_unwind(AssertUnwindSafe(|| f(err))) {
                Ok(next) => promise.follow(&next),
                Err(payload) => promise.resolve(Err(Exception::from_panic(payload))),
            },
        })
    }

    /// Observe a failure on `queue` without changing the outcome.
    ///
    /// The derived task finishes after `observer` has returned. A panicking
    /// observer is logged and the failure passes through unchanged.
    pub fn on_fail<F>(self, queue: &DispatchQueue, observer: F) -> Task<T>
    where
        F: FnOnce(&Exception) + Send + 'static,
    {
        let queue = queue.clone();
        self.chain(move |outcome, promise| match outcome {
            Ok(value) => promise.resolve(Ok(value)),
            Err(err) => queue.dispatch(move || {
                observe(|| observer(&err));
                promise.resolve(Err(err));
            }),
        })
    }

    /// Observe a success on `queue` without changing the outcome.
    ///
    /// The derived task finishes after `observer` has returned. A panicking
    /// observer is logged and the value passes through unchanged.
    pub fn on_success<F>(self, queue: &DispatchQueue, observer: F) -> Task<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let queue = queue.clone();
        self.chain(move |outcome, promise| match outcome {
            Ok(value) => queue.dispatch(move || {
                observe(|| observer(&value));
                promise.resolve(Ok(value));
            }),
            Err(err) => promise.resolve(Err(err)),
        })
    }

    /// Deliver the outcome to `callback` on `queue`, starting the task.
    pub fn on_complete<F>(&self, queue: &DispatchQueue, callback: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let queue = queue.clone();
        self.subscribe(move |outcome| queue.dispatch(move || callback(outcome)));
    }

    /// Deliver the outcome to `callback` on the finishing thread, starting the task.
    pub(crate) fn subscribe<F>(&self, callback: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.shared.subscribe(Box::new(callback));
    }

    /// Start the task and block until it finishes.
    ///
    /// Do not call this from the queue the task's work runs on.
    pub fn wait(&self) -> Outcome<T> {
        self.start();
        let mut data = self.shared.data.lock();
        loop {
            if let Stage::Done(outcome) = &data.stage {
                return outcome.clone();
            }
            self.shared.finished.wait(&mut data);
        }
    }

    /// Start the task and block for at most `timeout`.
    ///
    /// Returns `None` if the task has not finished in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        self.start();
        let mut data = self.shared.data.lock();
        loop {
            if let Stage::Done(outcome) = &data.stage {
                return Some(outcome.clone());
            }
            if self
                .shared
                .finished
                .wait_until(&mut data, deadline)
                .timed_out()
            {
                return match &data.stage {
                    Stage::Done(outcome) => Some(outcome.clone()),
                    _ => None,
                };
            }
        }
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// The write side of a task started by [`Task::deferred`] or [`Task::pending`].
///
/// Dropping a promise without resolving it fails its task, so waiters never
/// hang on abandoned work.
pub struct Promise<T> {
    resolver: Option<Box<dyn FnOnce(Outcome<T>) + Send>>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    fn new(shared: Arc<Shared<T>>) -> Self {
        Self::from_resolver(move |outcome| shared.resolve(outcome))
    }

    fn from_resolver(resolver: impl FnOnce(Outcome<T>) + Send + 'static) -> Self {
        Self {
            resolver: Some(Box::new(resolver)),
        }
    }

    /// Finish the task with `outcome`.
    pub fn resolve(mut self, outcome: Outcome<T>) {
        if let Some(resolver) = self.resolver.take() {
            resolver(outcome);
        }
    }

    /// Finish the task with a value.
    pub fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    /// Finish the task with a failure.
    pub fn fail(self, error: impl Into<Exception>) {
        self.resolve(Err(error.into()));
    }

    /// Finish the task with whatever `task` finishes with.
    pub fn follow(self, task: &Task<T>) {
        task.subscribe(move |outcome| self.resolve(outcome));
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(resolver) = self.resolver.take() {
            resolver(Err(Exception::new("promise dropped without a result")));
        }
    }
}

/// Run an observer callback, logging a panic instead of unwinding.
fn observe(observer: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(observer)) {
        let reason = Exception::from_panic(payload);
        tracing::warn!(target: "bindery_core::task", %reason, "observer panicked, passing outcome through");
    }
}

static_assertions::assert_impl_all!(Task<i32>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Promise<i32>: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandError;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    fn queue(label: &str) -> DispatchQueue {
        DispatchQueue::serial(label)
    }

    #[test]
    fn test_value_and_failed() {
        assert_eq!(Task::value(3).wait().unwrap(), 3);
        assert_eq!(Task::value(3).state(), TaskState::Succeeded);

        let failed = Task::<i32>::failed("nope");
        assert_eq!(failed.state(), TaskState::Failed);
        assert_eq!(failed.wait().unwrap_err().to_string(), "nope");
    }

    #[test]
    fn test_lazy_until_started() {
        let q = queue("task-lazy");
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let task = Task::new(&q, move || {
            ran_clone.store(true, Ordering::SeqCst);
            Ok(1)
        });

        q.dispatch_sync(|| ());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(task.state(), TaskState::Pending);

        assert_eq!(task.wait().unwrap(), 1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_runs_once() {
        let q = queue("task-once");
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let task = Task::new(&q, move || Ok(runs_clone.fetch_add(1, Ordering::SeqCst)));

        task.start();
        task.start();
        assert_eq!(task.wait().unwrap(), 0);
        assert_eq!(task.clone().wait().unwrap(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_work_runs_on_queue() {
        let q = queue("task-work-queue");
        let q_clone = q.clone();
        let task = Task::new(&q, move || Ok(q_clone.is_current()));
        assert!(task.wait().unwrap());
    }

    #[test]
    fn test_map_chain() {
        let q = queue("task-map");
        let task = Task::new(&q, || Ok(2)).map(|n| n * 10).map(|n| n.to_string());
        assert_eq!(task.wait().unwrap(), "20");
    }

    #[test]
    fn test_try_map_can_fail() {
        let task = Task::value(5).try_map(|_| Err::<i32, _>(Exception::new("rejected")));
        assert_eq!(task.wait().unwrap_err().to_string(), "rejected");
    }

    #[test]
    fn test_map_skipped_on_failure() {
        let mapped = Arc::new(AtomicBool::new(false));
        let mapped_clone = mapped.clone();
        let task = Task::<i32>::failed(CommandError::SourceIsNil).map(move |n| {
            mapped_clone.store(true, Ordering::SeqCst);
            n
        });

        let err = task.wait().unwrap_err();
        assert!(err.is::<CommandError>());
        assert!(!mapped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_and_then() {
        let q = queue("task-and-then");
        let q2 = q.clone();
        let task = Task::new(&q, || Ok(4)).and_then(move |n| Task::new(&q2, move || Ok(n + 1)));
        assert_eq!(task.wait().unwrap(), 5);
    }

    #[test]
    fn test_on_fail_observes_and_preserves() {
        let q = queue("task-on-fail");
        let observed = Arc::new(Mutex::new(None));
        let observed_clone = observed.clone();

        let task = Task::<i32>::failed("broken")
            .on_fail(&q, move |err| *observed_clone.lock() = Some(err.to_string()));

        assert_eq!(task.wait().unwrap_err().to_string(), "broken");
        assert_eq!(observed.lock().as_deref(), Some("broken"));
    }

    #[test]
    fn test_panicking_observers_keep_outcome() {
        let q = queue("task-observer-panic");
        let failed = Task::<i32>::failed("original").on_fail(&q, |_| panic!("observer broke"));
        assert_eq!(failed.wait().unwrap_err().to_string(), "original");

        let succeeded = Task::value(5).on_success(&q, |_| panic!("observer broke"));
        assert_eq!(succeeded.wait().unwrap(), 5);
    }

    #[test]
    fn test_on_fail_not_called_on_success() {
        let q = queue("task-on-fail-success");
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let task = Task::value(1).on_fail(&q, move |_| called_clone.store(true, Ordering::SeqCst));
        assert_eq!(task.wait().unwrap(), 1);
        q.dispatch_sync(|| ());
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_chain_on_fail_recovers() {
        let task = Task::<i32>::failed("offline").chain_on_fail(|err| {
            assert_eq!(err.to_string(), "offline");
            Task::value(-1)
        });
        assert_eq!(task.wait().unwrap(), -1);
    }

    #[test]
    fn test_chain_on_fail_can_replace_error() {
        let task = Task::<i32>::failed("first")
            .chain_on_fail(|_| Task::failed("second"))
            .map(|n| n + 1);
        assert_eq!(task.wait().unwrap_err().to_string(), "second");
    }

    #[test]
    fn test_on_success_observer() {
        let q = queue("task-on-success");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let task = Task::value(9).on_success(&q, move |v| seen_clone.store(*v, Ordering::SeqCst));
        assert_eq!(task.wait().unwrap(), 9);
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_on_complete_runs_on_callback_queue() {
        let work = queue("task-work");
        let callbacks = queue("task-callbacks");
        let (sender, receiver) = crossbeam_channel::bounded(1);

        let cb = callbacks.clone();
        Task::new(&work, || Ok("done")).on_complete(&callbacks, move |outcome| {
            sender.send((outcome.unwrap(), cb.is_current())).unwrap();
        });

        let (value, on_callback_queue) = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(value, "done");
        assert!(on_callback_queue);
    }

    #[test]
    fn test_on_complete_after_finish() {
        let q = queue("task-late-subscriber");
        let task = Task::value(1);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        task.on_complete(&q, move |outcome| sender.send(outcome.unwrap()).unwrap());
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_panic_becomes_failure() {
        let q = queue("task-panic");
        let task: Task<i32> = Task::new(&q, || panic!("exploded"));
        let err = task.wait().unwrap_err();
        assert_eq!(err.to_string(), "task panicked: exploded");
    }

    #[test]
    fn test_deferred_promise() {
        let q = queue("task-deferred");
        let task = Task::deferred(&q, |promise| {
            thread::spawn(move || promise.succeed(11));
        });
        assert_eq!(task.wait().unwrap(), 11);
    }

    #[test]
    fn test_deferred_panic_fails_task() {
        let q = queue("task-deferred-panic");
        let task: Task<i32> = Task::deferred(&q, |_promise| panic!("work broke"));
        assert_eq!(
            task.wait().unwrap_err().to_string(),
            "task panicked: work broke"
        );

        let resolved: Task<i32> = Task::deferred(&q, |promise| {
            promise.succeed(4);
            panic!("after resolving");
        });
        assert_eq!(resolved.wait().unwrap(), 4);
    }

    #[test]
    fn test_dropped_promise_fails_task() {
        let (task, promise) = Task::<i32>::pending();
        assert_eq!(task.state(), TaskState::Running);
        drop(promise);
        assert_eq!(
            task.wait().unwrap_err().to_string(),
            "promise dropped without a result"
        );
    }

    #[test]
    fn test_wait_timeout() {
        let (task, promise) = Task::<i32>::pending();
        assert!(task.wait_timeout(Duration::from_millis(10)).is_none());
        promise.succeed(3);
        assert_eq!(task.wait_timeout(Duration::from_millis(10)).unwrap().unwrap(), 3);
    }

    #[test]
    fn test_wait_timeout_unbounded() {
        let (task, promise) = Task::<i32>::pending();
        let resolver = thread::spawn(move || promise.succeed(8));
        assert_eq!(task.wait_timeout(Duration::MAX).unwrap().unwrap(), 8);
        resolver.join().unwrap();
    }

    #[test]
    fn test_multiple_subscribers_share_outcome() {
        let (task, promise) = Task::<String>::pending();
        let q = queue("task-fanout");
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            task.on_complete(&q, move |outcome| {
                assert_eq!(outcome.unwrap(), "shared");
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        promise.succeed("shared".to_string());
        q.dispatch_sync(|| ());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}

//! Dispatch queues: the executors that tasks, observables and commands run on.
//!
//! A [`DispatchQueue`] is a cheap, clonable handle. Two kinds exist:
//!
//! - **Serial** queues own one dedicated thread and run jobs strictly one at a
//!   time, in submission order.
//! - **Concurrent** queues are backed by a rayon work-stealing pool and may run
//!   jobs in parallel.
//!
//! Every API that runs user code takes the queue to run it on explicitly, so
//! "where the work runs" and "where the callback fires" are always visible at
//! the call site.
//!
//! # Example
//!
//! ```
//! use bindery_core::DispatchQueue;
//!
//! let queue = DispatchQueue::serial("com.example.io");
//! queue.dispatch(|| println!("runs on the io thread"));
//!
//! // Block until the queue has run everything submitted before this call.
//! let answer = queue.dispatch_sync(|| 42);
//! assert_eq!(answer, 42);
//! ```

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use rayon::{ThreadPool as RayonThreadPool, ThreadPoolBuilder};

use crate::error::{BinderyError, Result};

/// Global main queue instance.
static MAIN_QUEUE: OnceLock<DispatchQueue> = OnceLock::new();

/// Global concurrent queue instance.
static GLOBAL_QUEUE: OnceLock<DispatchQueue> = OnceLock::new();

/// Counter for unique queue IDs.
static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// The queue whose job is running on this thread, if any.
    static CURRENT_QUEUE: Cell<Option<QueueId>> = const { Cell::new(None) };
}

/// A boxed unit of work.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// A unique identifier for a dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

impl QueueId {
    /// Get the raw u64 value of this queue ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// How a queue schedules its jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueKind {
    /// One dedicated thread; jobs run one at a time in FIFO order.
    #[default]
    Serial,
    /// A thread pool; jobs may run in parallel.
    Concurrent {
        /// Number of worker threads. `None` means use the number of CPU cores.
        threads: Option<usize>,
    },
}

/// Configuration for creating a dispatch queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Label used for the thread name(s) and in log output.
    pub label: String,
    /// Scheduling kind.
    pub kind: QueueKind,
    /// Stack size for queue threads in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            label: "bindery-queue".to_string(),
            kind: QueueKind::Serial,
            stack_size: None,
        }
    }
}

impl QueueConfig {
    /// Configuration for a serial queue with the given label.
    pub fn serial(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Configuration for a concurrent queue with the given label.
    pub fn concurrent(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: QueueKind::Concurrent { threads: None },
            stack_size: None,
        }
    }

    /// Set the number of worker threads. Only meaningful for concurrent queues.
    pub fn threads(mut self, threads: usize) -> Self {
        if let QueueKind::Concurrent { threads: ref mut n } = self.kind {
            *n = Some(threads);
        }
        self
    }

    /// Set the stack size for queue threads.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

enum Backend {
    Serial { sender: Sender<Job> },
    Concurrent { pool: RayonThreadPool },
}

struct QueueInner {
    id: QueueId,
    label: String,
    backend: Backend,
    pending: Arc<AtomicUsize>,
}

/// A handle to a serial or concurrent executor.
///
/// Cloning the handle is cheap and every clone submits to the same queue. A
/// serial queue's thread exits once every handle is dropped and the jobs
/// already submitted have run.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

impl DispatchQueue {
    /// Create a queue from a configuration.
    pub fn new(config: QueueConfig) -> Result<Self> {
        let id = QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed));
        let pending = Arc::new(AtomicUsize::new(0));

        let backend = match config.kind {
            QueueKind::Serial => {
                let (sender, receiver) = unbounded();
                let mut builder = thread::Builder::new().name(config.label.clone());
                if let Some(stack_size) = config.stack_size {
                    builder = builder.stack_size(stack_size);
                }
                let label = config.label.clone();
                let thread_pending = pending.clone();
                builder
                    .spawn(move || serial_loop(id, &label, receiver, thread_pending))
                    .map_err(|e| BinderyError::QueueCreation(e.to_string()))?;
                Backend::Serial { sender }
            }
            QueueKind::Concurrent { threads } => {
                let label = config.label.clone();
                let mut builder =
                    ThreadPoolBuilder::new().thread_name(move |index| format!("{label}-{index}"));
                if let Some(threads) = threads {
                    builder = builder.num_threads(threads);
                }
                if let Some(stack_size) = config.stack_size {
                    builder = builder.stack_size(stack_size);
                }
                let pool = builder
                    .build()
                    .map_err(|e| BinderyError::QueueCreation(e.to_string()))?;
                Backend::Concurrent { pool }
            }
        };

        tracing::debug!(target: "bindery_core::queue", label = %config.label, kind = ?config.kind, "created dispatch queue");

        Ok(Self {
            inner: Arc::new(QueueInner {
                id,
                label: config.label,
                backend,
                pending,
            }),
        })
    }

    /// Create a serial queue with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the queue thread cannot be spawned. Use [`DispatchQueue::new`]
    /// to handle that case.
    pub fn serial(label: impl Into<String>) -> Self {
        Self::new(QueueConfig::serial(label)).expect("Failed to spawn serial queue thread")
    }

    /// Create a concurrent queue with one thread per CPU core.
    ///
    /// # Panics
    ///
    /// Panics if the thread pool cannot be built. Use [`DispatchQueue::new`]
    /// to handle that case.
    pub fn concurrent(label: impl Into<String>) -> Self {
        Self::new(QueueConfig::concurrent(label)).expect("Failed to create concurrent queue")
    }

    /// The process-wide serial queue that stands in for the UI thread.
    ///
    /// Command callbacks are delivered here unless configured otherwise.
    pub fn main() -> &'static DispatchQueue {
        MAIN_QUEUE.get_or_init(|| DispatchQueue::serial("main"))
    }

    /// The process-wide concurrent queue.
    ///
    /// Lazily initialized with one thread per CPU core unless
    /// [`init_global`](Self::init_global) ran first.
    pub fn global() -> &'static DispatchQueue {
        GLOBAL_QUEUE.get_or_init(|| DispatchQueue::concurrent("bindery-global"))
    }

    /// Initialize the global concurrent queue with custom configuration.
    ///
    /// Returns an error if the global queue has already been initialized.
    pub fn init_global(config: QueueConfig) -> Result<&'static DispatchQueue> {
        let queue = DispatchQueue::new(config)?;
        GLOBAL_QUEUE
            .set(queue)
            .map_err(|_| BinderyError::GlobalAlreadyInitialized)?;
        GLOBAL_QUEUE
            .get()
            .ok_or(BinderyError::GlobalAlreadyInitialized)
    }

    /// The unique ID of this queue.
    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    /// The label given at creation.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether this is a serial queue.
    pub fn is_serial(&self) -> bool {
        matches!(self.inner.backend, Backend::Serial { .. })
    }

    /// Whether the calling thread is currently running a job of this queue.
    pub fn is_current(&self) -> bool {
        CURRENT_QUEUE.with(|current| current.get() == Some(self.inner.id))
    }

    /// Number of submitted jobs that have not finished yet.
    pub fn pending_jobs(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Submit a job without waiting for it.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        match &self.inner.backend {
            Backend::Serial { sender } => {
                if sender.send(Box::new(job)).is_err() {
                    // The receiver lives as long as the thread, which outlives every sender.
                    self.inner.pending.fetch_sub(1, Ordering::AcqRel);
                    tracing::error!(target: "bindery_core::queue", label = %self.inner.label, "queue thread is gone, dropping job");
                }
            }
            Backend::Concurrent { pool } => {
                let id = self.inner.id;
                let label = self.inner.label.clone();
                let pending = self.inner.pending.clone();
                pool.spawn(move || {
                    run_job(id, &label, Box::new(job));
                    pending.fetch_sub(1, Ordering::AcqRel);
                });
            }
        }
    }

    /// Submit a job and block until it has run, returning its result.
    ///
    /// On a serial queue this also waits for every job submitted earlier. If
    /// the caller is already running on this queue the job runs inline, so a
    /// queue can never deadlock on itself.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the job on the calling thread.
    pub fn dispatch_sync<F, R>(&self, job: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return job();
        }

        let (sender, receiver) = bounded(1);
        self.dispatch(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = sender.send(outcome);
        });

        match receiver.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => panic!("dispatch queue '{}' dropped a synchronous job", self.label()),
        }
    }
}

impl PartialEq for DispatchQueue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for DispatchQueue {}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("serial", &self.is_serial())
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

/// Run one job with the current-queue marker set, containing panics.
fn run_job(id: QueueId, label: &str, job: Job) {
    let previous = CURRENT_QUEUE.with(|current| current.replace(Some(id)));
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(target: "bindery_core::queue", label, %reason, "job panicked");
    }
    CURRENT_QUEUE.with(|current| current.set(previous));
}

/// The loop run by a serial queue's dedicated thread.
fn serial_loop(id: QueueId, label: &str, receiver: Receiver<Job>, pending: Arc<AtomicUsize>) {
    tracing::trace!(target: "bindery_core::queue", label, "serial queue thread started");
    // Ends once every sender is dropped and the channel is drained.
    while let Ok(job) = receiver.recv() {
        run_job(id, label, job);
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    tracing::trace!(target: "bindery_core::queue", label, "serial queue thread exiting");
}

static_assertions::assert_impl_all!(DispatchQueue: Send, Sync, Clone);

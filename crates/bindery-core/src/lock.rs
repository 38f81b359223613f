//! Lock wrappers with a uniform `lock`/`unlock`/`try_lock`/`sync` surface.
//!
//! Each lock type is a clonable handle around one shared primitive, so a lock
//! can be captured by several closures and still guard the same critical
//! section.
//!
//! | Type | Primitive | Re-entrant |
//! |------|-----------|------------|
//! | [`MutexLock`] | `parking_lot::Mutex` | no |
//! | [`RecursiveLock`] | `parking_lot::ReentrantMutex` | yes, same thread |
//! | [`ReadLock`] / [`WriteLock`] | `parking_lot::RwLock` (via [`ReadWriteLock`]) | no |
//! | [`SpinLock`] | atomic flag | no (deprecated) |
//!
//! # Example
//!
//! ```
//! use bindery_core::lock::{Lock, MutexLock};
//!
//! let lock = MutexLock::new();
//! let result: Result<i32, String> = lock.sync(|| Err("failed".to_string()));
//! assert!(result.is_err());
//! // The lock was released even though the block failed.
//! assert!(lock.try_lock());
//! unsafe { lock.unlock() };
//! ```

use std::hint;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

/// Uniform interface over the lock primitives in this module.
pub trait Lock: Send + Sync {
    /// Block the calling thread until the lock is acquired.
    fn lock(&self);

    /// Release the lock.
    ///
    /// # Safety
    ///
    /// The calling thread must currently hold the lock through a prior
    /// [`lock`](Self::lock) or successful [`try_lock`](Self::try_lock), and
    /// every acquisition must be balanced by exactly one `unlock`.
    unsafe fn unlock(&self);

    /// Try to acquire the lock without blocking.
    ///
    /// Returns `true` if the lock is now held by the caller.
    fn try_lock(&self) -> bool;

    /// Acquire the lock and return a guard that releases it on drop.
    fn acquire(&self) -> LockGuard<'_, Self>
    where
        Self: Sized,
    {
        self.lock();
        LockGuard { lock: self }
    }

    /// Run `f` while holding the lock.
    ///
    /// The lock is released when `f` returns, including when it returns an
    /// `Err` or unwinds. The closure's value is returned unchanged.
    fn sync<R, F>(&self, f: F) -> R
    where
        Self: Sized,
        F: FnOnce() -> R,
    {
        let _guard = self.acquire();
        f()
    }

    /// Run `f` only if the lock can be taken without blocking.
    fn try_sync<R, F>(&self, f: F) -> Option<R>
    where
        Self: Sized,
        F: FnOnce() -> R,
    {
        if self.try_lock() {
            let _guard = LockGuard { lock: self };
            Some(f())
        } else {
            None
        }
    }
}

/// Scoped acquisition of a [`Lock`]. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a, L: Lock> {
    lock: &'a L,
}

impl<L: Lock> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        // SAFETY: a guard only exists after a successful acquisition.
        unsafe { self.lock.unlock() }
    }
}

/// A non-reentrant mutex.
///
/// Locking it twice from the same thread deadlocks.
#[derive(Clone, Default)]
pub struct MutexLock {
    inner: Arc<Mutex<()>>,
}

impl MutexLock {
    /// Create an unlocked mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl Lock for MutexLock {
    fn lock(&self) {
        mem::forget(self.inner.lock());
    }

    unsafe fn unlock(&self) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.inner.force_unlock() }
    }

    fn try_lock(&self) -> bool {
        self.inner.try_lock().map(mem::forget).is_some()
    }
}

/// A re-entrant mutex.
///
/// The owning thread may lock it again without deadlocking; it is released
/// once every `lock` has been balanced by an `unlock`.
#[derive(Clone, Default)]
pub struct RecursiveLock {
    inner: Arc<ReentrantMutex<()>>,
}

impl RecursiveLock {
    /// Create an unlocked recursive mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Whether the calling thread holds the lock.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.inner.is_owned_by_current_thread()
    }
}

impl Lock for RecursiveLock {
    fn lock(&self) {
        mem::forget(self.inner.lock());
    }

    unsafe fn unlock(&self) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.inner.force_unlock() }
    }

    fn try_lock(&self) -> bool {
        self.inner.try_lock().map(mem::forget).is_some()
    }
}

/// A reader-writer lock that hands out separate read and write handles.
///
/// Readers may hold the lock concurrently; a writer is exclusive.
///
/// ```
/// use bindery_core::lock::{Lock, ReadWriteLock};
///
/// let rw = ReadWriteLock::new();
/// let (reader, writer) = (rw.reader(), rw.writer());
///
/// let _a = reader.acquire();
/// let _b = reader.acquire();
/// assert!(!writer.try_lock());
/// ```
#[derive(Clone, Default)]
pub struct ReadWriteLock {
    inner: Arc<RwLock<()>>,
}

impl ReadWriteLock {
    /// Create an unlocked reader-writer lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that acquires shared (read) access.
    pub fn reader(&self) -> ReadLock {
        ReadLock {
            inner: self.inner.clone(),
        }
    }

    /// A handle that acquires exclusive (write) access.
    pub fn writer(&self) -> WriteLock {
        WriteLock {
            inner: self.inner.clone(),
        }
    }
}

/// Shared side of a [`ReadWriteLock`].
#[derive(Clone)]
pub struct ReadLock {
    inner: Arc<RwLock<()>>,
}

impl Lock for ReadLock {
    fn lock(&self) {
        mem::forget(self.inner.read());
    }

    unsafe fn unlock(&self) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.inner.force_unlock_read() }
    }

    fn try_lock(&self) -> bool {
        self.inner.try_read().map(mem::forget).is_some()
    }
}

/// Exclusive side of a [`ReadWriteLock`].
#[derive(Clone)]
pub struct WriteLock {
    inner: Arc<RwLock<()>>,
}

impl Lock for WriteLock {
    fn lock(&self) {
        mem::forget(self.inner.write());
    }

    unsafe fn unlock(&self) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { self.inner.force_unlock_write() }
    }

    fn try_lock(&self) -> bool {
        self.inner.try_write().map(mem::forget).is_some()
    }
}

/// A busy-waiting lock for very short critical sections.
///
/// Spinning threads do not yield to the owner, so a low-priority owner can be
/// starved under contention.
#[deprecated(note = "spinning suffers from priority inversion; use `MutexLock`")]
#[derive(Clone, Default)]
pub struct SpinLock {
    flag: Arc<AtomicBool>,
}

#[allow(deprecated)]
impl SpinLock {
    /// Create an unlocked spin lock.
    pub fn new() -> Self {
        Self::default()
    }
}

#[allow(deprecated)]
impl Lock for SpinLock {
    fn lock(&self) {
        while self
            .flag
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.flag.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    unsafe fn unlock(&self) {
        self.flag.store(false, Ordering::Release);
    }

    fn try_lock(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

static_assertions::assert_impl_all!(MutexLock: Send, Sync, Clone);
static_assertions::assert_impl_all!(RecursiveLock: Send, Sync, Clone);
static_assertions::assert_impl_all!(ReadLock: Send, Sync, Clone);
static_assertions::assert_impl_all!(WriteLock: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_mutex_lock_unlock() {
        let lock = MutexLock::new();
        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_sync_returns_value() {
        let lock = MutexLock::new();
        assert_eq!(lock.sync(|| 42), 42);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_sync_releases_on_error() {
        let lock = MutexLock::new();
        let result: std::result::Result<(), &str> = lock.sync(|| Err("nope"));
        assert_eq!(result, Err("nope"));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_sync_releases_on_panic() {
        let lock = MutexLock::new();
        let lock_clone = lock.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            lock_clone.sync::<(), _>(|| panic!("inside critical section"));
        }));
        assert!(outcome.is_err());
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn test_clones_share_primitive() {
        let lock = MutexLock::new();
        let copy = lock.clone();
        let _guard = lock.acquire();
        assert!(!copy.try_lock());
    }

    #[test]
    fn test_try_sync() {
        let lock = MutexLock::new();
        assert_eq!(lock.try_sync(|| 1), Some(1));
        let _guard = lock.acquire();
        assert_eq!(lock.clone().try_sync(|| 2), None);
    }

    #[test]
    fn test_mutex_excludes_threads() {
        let lock = MutexLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        lock.sync(|| {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recursive_reentry() {
        let lock = RecursiveLock::new();
        let value = lock.sync(|| lock.sync(|| lock.sync(|| 7)));
        assert_eq!(value, 7);
        assert!(!lock.is_locked());

        lock.lock();
        lock.lock();
        assert!(lock.is_owned_by_current_thread());
        unsafe { lock.unlock() };
        assert!(lock.is_locked());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_recursive_blocks_other_threads() {
        let lock = RecursiveLock::new();
        let _guard = lock.acquire();
        let other = lock.clone();
        let acquired = thread::spawn(move || other.try_lock()).join().unwrap();
        assert!(!acquired);
    }

    #[test]
    fn test_readers_run_concurrently() {
        let rw = ReadWriteLock::new();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let reader = rw.reader();
                let barrier = barrier.clone();
                // Both readers must be inside at the same time to pass the barrier
                thread::spawn(move || reader.sync(|| barrier.wait()))
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_writer_is_exclusive() {
        let rw = ReadWriteLock::new();
        let reader = rw.reader();
        let writer = rw.writer();

        {
            let _read = reader.acquire();
            assert!(!writer.try_lock());
        }

        let _write = writer.acquire();
        assert!(!reader.try_lock());
        assert!(!writer.clone().try_lock());
    }

    #[test]
    #[allow(deprecated)]
    fn test_spin_lock() {
        let lock = SpinLock::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        lock.sync(|| {
                            let v = counter.load(Ordering::Relaxed);
                            thread::yield_now();
                            counter.store(v + 1, Ordering::Relaxed);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);
        assert!(lock.try_lock());
    }

    #[test]
    fn test_lock_blocks_until_released() {
        let lock = MutexLock::new();
        lock.lock();

        let other = lock.clone();
        let waiter = thread::spawn(move || {
            other.lock();
            unsafe { other.unlock() };
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        unsafe { lock.unlock() };
        waiter.join().unwrap();
    }
}

//! Thread-safe observable values with weakly-owned listeners.
//!
//! An [`Observable<T>`] holds a current value and a set of listeners. Each
//! listener is registered together with an *owner* object, held weakly, and an
//! optional delivery queue. Setting the value notifies every listener whose
//! owner is still alive, once, on that listener's queue.
//!
//! # Owner Lifetime
//!
//! The owner is resolved when the delivery runs, not when the value is set.
//! If the owner is dropped in between, the callback does not fire. Listeners
//! with dead owners are pruned lazily on the next registration or write.
//!
//! # Ordering
//!
//! Deliveries to a single queue arrive in the order the values were written.
//! There is no ordering between listeners on different queues, and a slow
//! listener only delays its own queue.
//!
//! Inline listeners run on the writing threads, so concurrent writers race to
//! deliver. Each inline listener handles one delivery at a time and never sees
//! an older value after a newer one: a delivery overtaken by a later write is
//! skipped. The last value an inline listener receives is always the last
//! value written.
//!
//! # Snapshot Semantics
//!
//! The listener set is captured under the same lock that writes the value. A
//! listener registered after that point does not receive that value, and a
//! listener removed before that point never does.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bindery_core::{DispatchQueue, Observable};
//!
//! struct Label;
//!
//! let title = Observable::new(String::from("Untitled"));
//! let label = Arc::new(Label);
//! let ui = DispatchQueue::serial("ui");
//!
//! title.notify(&label, Some(&ui), |_label, text| {
//!     println!("render {text}");
//! });
//!
//! title.set("Report".to_string());
//! ```

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, ReentrantMutex};
use slotmap::{SlotMap, new_key_type};

use crate::queue::DispatchQueue;
use crate::weak::WeakHandle;

new_key_type! {
    /// A unique identifier for a listener registration.
    ///
    /// Use this ID to remove a specific listener via [`Observable::remove`].
    pub struct ListenerId;
}

type Owner = dyn Any + Send + Sync;
type Callback<T> = Arc<dyn Fn(Arc<Owner>, &T) + Send + Sync>;
/// Version of the last value an inline listener accepted.
type InlineGate = Arc<ReentrantMutex<Cell<u64>>>;

/// Internal storage for a single listener.
struct Listener<T> {
    owner: WeakHandle<Owner>,
    queue: Option<DispatchQueue>,
    callback: Callback<T>,
    gate: InlineGate,
}

struct ObservableState<T> {
    value: Arc<T>,
    /// Bumped on every write.
    version: u64,
    listeners: SlotMap<ListenerId, Listener<T>>,
}

impl<T> ObservableState<T> {
    fn prune(&mut self) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|_, listener| listener.owner.is_alive());
        before - self.listeners.len()
    }
}

/// A value holder that notifies weakly-owned listeners when it changes.
///
/// # Thread Safety
///
/// `Observable<T>` is `Send + Sync`. Registration, removal and writes are
/// serialized by one internal lock; callbacks never run while it is held.
/// [`set_if_changed`](Observable::set_if_changed) compares and stores under
/// that same lock, so of several racing writers of one value only the first
/// reports a change.
pub struct Observable<T> {
    state: Mutex<ObservableState<T>>,
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Create an observable with an initial value and no listeners.
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(ObservableState {
                value: Arc::new(value),
                version: 0,
                listeners: SlotMap::with_key(),
            }),
        }
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        let value = self.state.lock().value.clone();
        T::clone(&value)
    }

    /// Access the current value through a closure without cloning it.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let value = self.state.lock().value.clone();
        f(&value)
    }

    /// Register `callback` to receive every new value while `owner` is alive.
    ///
    /// The callback receives the owner and the new value. It runs on `queue`
    /// or, when `queue` is `None`, inline on the thread that sets the value.
    /// Registering again for the same live owner replaces its callback.
    pub fn notify<O, F>(&self, owner: &Arc<O>, queue: Option<&DispatchQueue>, callback: F) -> ListenerId
    where
        O: Send + Sync + 'static,
        F: Fn(&O, &T) + Send + Sync + 'static,
    {
        let weak: Weak<Owner> = Arc::downgrade(owner) as Weak<Owner>;
        let listener = Listener {
            owner: WeakHandle::from_weak(weak),
            queue: queue.cloned(),
            callback: Arc::new(move |owner: Arc<Owner>, value: &T| {
                if let Ok(owner) = owner.downcast::<O>() {
                    callback(&owner, value);
                }
            }),
            gate: Arc::new(ReentrantMutex::new(Cell::new(0))),
        };

        let mut state = self.state.lock();
        let pruned = state.prune();
        let identity = listener.owner.identity();
        let replaced = state
            .listeners
            .iter()
            .find(|(_, existing)| existing.owner.identity() == identity)
            .map(|(id, _)| id);
        if let Some(id) = replaced {
            state.listeners.remove(id);
        }
        let id = state.listeners.insert(listener);

        tracing::trace!(
            target: "bindery_core::observable",
            listener_count = state.listeners.len(),
            pruned,
            replaced = replaced.is_some(),
            "registered listener"
        );
        id
    }

    /// Remove a listener by ID.
    ///
    /// Returns `true` if the listener was found and removed.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.state.lock().listeners.remove(id).is_some()
    }

    /// Remove the listener registered for `owner`.
    ///
    /// Returns `true` if a listener was found and removed.
    pub fn remove_owner<O>(&self, owner: &Arc<O>) -> bool
    where
        O: Send + Sync + 'static,
    {
        let identity = Arc::as_ptr(owner).cast::<()>() as usize;
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state
            .listeners
            .retain(|_, listener| listener.owner.identity() != identity || !listener.owner.is_alive());
        state.listeners.len() != before
    }

    /// Remove every listener.
    pub fn remove_all(&self) {
        self.state.lock().listeners.clear();
    }

    /// The number of listeners whose owners are still alive.
    pub fn listener_count(&self) -> usize {
        let mut state = self.state.lock();
        state.prune();
        state.listeners.len()
    }

    /// Store `value` and notify every live listener.
    #[tracing::instrument(skip_all, target = "bindery_core::observable", level = "trace")]
    pub fn set(&self, value: T) {
        let state = self.state.lock();
        self.publish(state, value);
    }

    /// Store `value` and fan it out, releasing `state` before inline deliveries.
    fn publish(&self, mut state: MutexGuard<'_, ObservableState<T>>, value: T) {
        let value = Arc::new(value);
        state.value = value.clone();
        state.version += 1;
        let version = state.version;
        let pruned = state.prune();
        tracing::trace!(
            target: "bindery_core::observable",
            listener_count = state.listeners.len(),
            pruned,
            version,
            "notifying listeners"
        );

        let mut inline = Vec::new();
        for listener in state.listeners.values() {
            let owner = listener.owner.clone();
            let callback = listener.callback.clone();
            let value = value.clone();
            let deliver = move || {
                // Resolved at delivery time: the owner may have died since the write.
                if let Some(owner) = owner.resolve() {
                    callback(owner, &value);
                }
            };
            match &listener.queue {
                // Submitted under the lock so each queue sees writes in order.
                Some(queue) => queue.dispatch(deliver),
                None => {
                    let gate = listener.gate.clone();
                    inline.push(move || {
                        let accepted = gate.lock();
                        if accepted.get() >= version {
                            return;
                        }
                        accepted.set(version);
                        deliver();
                    });
                }
            }
        }
        drop(state);

        for delivery in inline {
            delivery();
        }
    }

    /// Push every new value of `self`, transformed by `f`, into `target`.
    ///
    /// The binding lives as long as `target` and runs inline on the writing
    /// thread.
    pub fn bind<U, F>(&self, target: &Arc<Observable<U>>, f: F) -> ListenerId
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.notify(target, None, move |target, value| target.set(f(value)))
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    /// Store `value` and notify listeners only if it differs from the current one.
    ///
    /// Returns `true` if the value changed.
    pub fn set_if_changed(&self, value: T) -> bool {
        let state = self.state.lock();
        if *state.value == value {
            return false;
        }
        self.publish(state, value);
        true
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + fmt::Debug + Send + Sync + 'static> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Observable")
            .field("value", &state.value)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(Observable<String>: Send, Sync);

//! Weak handles to listener and source objects.

use std::fmt;
use std::sync::{Arc, Weak};

/// A weak reference that is resolved at the moment of use.
///
/// Observables and source-bound commands hold their owners through a
/// `WeakHandle` so they never keep an owner alive. Callers must resolve the
/// handle each time they need the owner and must not cache the result across
/// calls.
pub struct WeakHandle<O: ?Sized> {
    inner: Weak<O>,
}

impl<O: ?Sized> WeakHandle<O> {
    /// Create a handle that does not keep `owner` alive.
    pub fn new(owner: &Arc<O>) -> Self {
        Self {
            inner: Arc::downgrade(owner),
        }
    }

    /// Wrap an existing `Weak`.
    pub fn from_weak(inner: Weak<O>) -> Self {
        Self { inner }
    }

    /// Resolve to a live reference, or `None` if the owner is gone.
    pub fn resolve(&self) -> Option<Arc<O>> {
        self.inner.upgrade()
    }

    /// Whether the owner is still alive.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Address-based identity of the owner.
    ///
    /// Two handles to the same allocation share an identity. The address
    /// may be reused once the owner is dropped.
    pub fn identity(&self) -> usize {
        self.inner.as_ptr().cast::<()>() as usize
    }

    /// Whether this handle refers to `owner`.
    pub fn points_to(&self, owner: &Arc<O>) -> bool {
        self.identity() == Arc::as_ptr(owner).cast::<()>() as usize
    }
}

impl<O: ?Sized> Clone for WeakHandle<O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<O: ?Sized> fmt::Debug for WeakHandle<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("identity", &format_args!("{:#x}", self.identity()))
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[test]
    fn test_resolve_while_alive() {
        let owner = Arc::new(5);
        let handle = WeakHandle::new(&owner);
        assert!(handle.is_alive());
        assert_eq!(handle.resolve().as_deref(), Some(&5));
        assert!(handle.points_to(&owner));
    }

    #[test]
    fn test_empty_after_drop() {
        let owner = Arc::new(String::from("owner"));
        let handle = WeakHandle::new(&owner);
        drop(owner);
        assert!(!handle.is_alive());
        assert!(handle.resolve().is_none());
    }

    #[test]
    fn test_identity_survives_erasure() {
        let owner = Arc::new(7u32);
        let typed = WeakHandle::new(&owner);
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(&owner) as Weak<dyn Any + Send + Sync>;
        let erased = WeakHandle::from_weak(weak);
        assert_eq!(typed.identity(), erased.identity());

        let other = Arc::new(7u32);
        assert!(!typed.points_to(&other));
    }
}

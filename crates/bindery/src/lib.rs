//! Bindery - commands, observables and chainable tasks for UI-facing code.
//!
//! This is the umbrella crate that re-exports all public APIs.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bindery::{DispatchQueue, Observable};
//!
//! struct StatusBar;
//!
//! let progress = Observable::new(0u8);
//! let bar = Arc::new(StatusBar);
//! progress.notify(&bar, None, |_bar, percent| println!("{percent}%"));
//! progress.set(50);
//! ```

pub use bindery_core::*;

/// Key-value storage adapters.
#[cfg(feature = "storage")]
pub mod storage {
    pub use bindery_storage::*;
}

//! A thread-safe shared pointer, [`Shared`], and its non-owning observer, [`Weak`].
//!
//! Both handles point at a payload and at a separately allocated control block holding two
//! atomic counts. The payload is destroyed exactly once, when the last `Shared` disappears. The
//! control block outlives it until the last `Weak` is gone too, so weak handles can still tell
//! that the payload is gone. A `Weak` is turned back into a `Shared` by [`Weak::promote`], a
//! lock-free compare-and-swap that never raises a strong count of zero.
//!
//! Only the counts are synchronized. Concurrent mutation of the payload itself needs its own
//! synchronization, just like with [`Arc`](https://doc.rust-lang.org/std/sync/struct.Arc.html).
//!
//! ```
//! use shared_handle::Shared;
//!
//! let a = Shared::new(42);
//! let w = a.downgrade();
//! assert_eq!(w.use_count(), 1);
//!
//! drop(a);
//! assert!(w.expired());
//! assert!(w.promote().is_empty());
//! ```
#![cfg_attr(not(test), no_std)]
#![allow(unused_unsafe)]
extern crate maybe_std as base;

mod error;
pub use error::AllocError;

/// A smart pointer that keeps track of how many pointers own the same allocation and
/// exposes this information in its API.
pub trait ReferenceCounted<T: ?Sized> {
    /// Get the number of owning pointers referring to the same allocation.
    ///
    /// Implementations report 0 once nothing owns the allocation anymore.
    fn reference_count(this: &Self) -> usize;
}

#[cfg(feature = "alloc")]
mod control;

#[cfg(feature = "alloc")]
mod shared;
#[cfg(feature = "alloc")]
pub use shared::Shared;

#[cfg(feature = "alloc")]
mod weak;
#[cfg(feature = "alloc")]
pub use weak::Weak;

use base::convert::From;
use base::fmt;
use base::mem;
use base::ptr::{self, NonNull};

use crate::control::ControlBlock;
use crate::shared::Parts;
use crate::{ReferenceCounted, Shared};

/// A non-owning observer of a payload managed by [`Shared`].
///
/// A `Weak` keeps the control block alive but not the payload. The payload can only be reached
/// by [promoting](Weak::promote) the handle back into a [`Shared`], which fails once the last
/// strong handle is gone.
pub struct Weak<T: ?Sized> {
    parts: Option<Parts<T>>,
}

unsafe impl<T: ?Sized + Sync + Send> Send for Weak<T> {}
unsafe impl<T: ?Sized + Sync + Send> Sync for Weak<T> {}

impl<T> Weak<T> {
    /// Gets the raw payload pointer this handle was created from, or null if it is empty.
    ///
    /// The pointer may dangle once the handle has [expired](Weak::expired). Promote the handle
    /// to access the payload.
    pub fn as_ptr(&self) -> *const T {
        match self.parts {
            Some(parts) => parts.object.as_ptr(),
            None => ptr::null(),
        }
    }
}

impl<T: ?Sized> Weak<T> {
    /// Creates a handle that observes nothing. It is always expired.
    pub const fn new() -> Weak<T> {
        Weak { parts: None }
    }

    /// Tries to take shared ownership of the payload.
    ///
    /// Returns an empty [`Shared`] if this handle is empty or the payload has already been
    /// destroyed. A non-empty result is a full strong handle: the strong count was raised
    /// atomically and never from zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_handle::Shared;
    ///
    /// let a = Shared::new(42);
    /// let w = a.downgrade();
    ///
    /// let b = w.promote();
    /// assert_eq!(*b, 42);
    /// assert_eq!(w.use_count(), 2);
    ///
    /// drop(a);
    /// drop(b);
    /// assert!(w.promote().is_empty());
    /// ```
    pub fn promote(&self) -> Shared<T> {
        match self.parts {
            // The successful CAS already accounts for the new handle's strong unit.
            Some(parts) if parts.block().try_increment_strong() => Shared::from_parts(parts),
            _ => Shared::empty(),
        }
    }

    /// Like [`Weak::promote`], but reports failure as `None`.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let shared = self.promote();
        if shared.is_empty() {
            None
        } else {
            Some(shared)
        }
    }

    /// Gets the number of strong handles to the payload, or 0 if the handle is empty.
    ///
    /// This is a snapshot: other threads may change the count at any time.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.parts.map_or(0, |parts| parts.block().use_count())
    }

    /// Returns `true` once no strong handle to the payload remains.
    ///
    /// An expired handle stays expired. A handle that is not expired may expire right after this
    /// returns, so always go through [`Weak::promote`] to access the payload.
    #[inline]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Gets the number of `Weak` handles observing the payload, or 0 if it is already destroyed.
    pub fn weak_count(&self) -> usize {
        match self.parts {
            Some(parts) if parts.block().use_count() > 0 => {
                // Discount the implicit unit held by the strong side.
                parts.block().weak_count().saturating_sub(1)
            }
            _ => 0,
        }
    }

    /// Returns `true` if the handle observes nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_none()
    }

    /// Returns `true` if both handles observe the same control block, or are both empty.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block() == other.block()
    }

    /// Starts observing the payload of `strong`, releasing the previous referent first.
    ///
    /// Does nothing if this handle already observes that control block.
    pub fn observe(&mut self, strong: &Shared<T>) {
        if self.block() == strong.parts().map(|parts| parts.block) {
            return;
        }
        drop(self.take());
        *self = Weak::from(strong);
    }

    /// Gets the payload pointer this handle was created from, or `None` if it is empty.
    ///
    /// Works for unsized payloads. The same caveat as [`Weak::as_ptr`] applies: the pointer may
    /// dangle once the handle has expired.
    pub fn as_non_null(&self) -> Option<NonNull<T>> {
        self.parts.map(|parts| parts.object)
    }

    /// Moves the referent out, leaving this handle empty. No count changes.
    pub fn take(&mut self) -> Weak<T> {
        mem::take(self)
    }

    fn block(&self) -> Option<NonNull<ControlBlock>> {
        self.parts.map(|parts| parts.block)
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(strong: &Shared<T>) -> Self {
        let parts = strong.parts();
        if let Some(parts) = parts {
            parts.block().increment_weak();
        }
        Weak { parts }
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    /// Makes a clone of the `Weak` handle, increasing the weak count.
    #[inline]
    fn clone(&self) -> Weak<T> {
        if let Some(parts) = self.parts {
            parts.block().increment_weak();
        }
        Weak { parts: self.parts }
    }

    /// Makes this handle observe `source`'s payload, releasing the previous one first.
    ///
    /// Does nothing if both handles already observe the same control block.
    fn clone_from(&mut self, source: &Self) {
        if Self::ptr_eq(self, source) {
            return;
        }
        drop(self.take());
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    /// Drops the `Weak` handle.
    ///
    /// The payload is never touched here. If this was the last weak unit, the strong side has
    /// already destroyed the payload and the control block is freed.
    fn drop(&mut self) {
        if let Some(parts) = self.parts.take() {
            unsafe { ControlBlock::release_weak(parts.block) };
        }
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}

impl<T: ?Sized> ReferenceCounted<T> for Weak<T> {
    fn reference_count(this: &Self) -> usize {
        this.use_count()
    }
}

impl<T: ?Sized> Default for Weak<T> {
    /// Creates an empty `Weak`.
    fn default() -> Weak<T> {
        Weak::new()
    }
}

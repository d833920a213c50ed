// Strong handle: owns the payload together with every other `Shared` on the same block.

use base::alloc::{alloc, handle_alloc_error, Layout};
use base::borrow;
use base::convert::From;
use base::fmt;
use base::marker::{PhantomData, Unpin};
use base::mem;
use base::ops::Deref;
use base::ptr::{self, NonNull};

use base::boxed::Box;

use crate::control::{acquire, ControlBlock};
use crate::{AllocError, ReferenceCounted, Weak};

/// The payload pointer and its control block, always set or unset together.
pub(crate) struct Parts<T: ?Sized> {
    pub(crate) object: NonNull<T>,
    pub(crate) block: NonNull<ControlBlock>,
}

impl<T: ?Sized> Clone for Parts<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Parts<T> {}

impl<T: ?Sized> Parts<T> {
    #[inline]
    pub(crate) fn block(&self) -> &ControlBlock {
        // The handle these parts were read from holds a strong or weak unit of
        // the block, which keeps it allocated for as long as that handle lives.
        unsafe { self.block.as_ref() }
    }
}

/// A thread-safe shared owning pointer.
///
/// The payload lives in its own heap allocation and the two reference counts live in a
/// separate control block. The payload is destroyed as soon as the last `Shared` goes away,
/// the control block only once the last [`Weak`] is gone as well.
///
/// A `Shared` may be empty, in which case it owns nothing and reports a [`use_count`] of 0.
///
/// [`use_count`]: Shared::use_count
pub struct Shared<T: ?Sized> {
    parts: Option<Parts<T>>,
    phantom: PhantomData<T>,
}

unsafe impl<T: ?Sized + Sync + Send> Send for Shared<T> {}
unsafe impl<T: ?Sized + Sync + Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// Moves `value` to the heap and takes shared ownership of it.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_handle::Shared;
    ///
    /// let a = Shared::new(42);
    /// assert_eq!(*a, 42);
    /// assert_eq!(a.use_count(), 1);
    /// ```
    pub fn new(value: T) -> Shared<T> {
        Self::from_box(Box::new(value))
    }

    /// Like [`Shared::new`], but reports allocation failure instead of aborting.
    ///
    /// # Errors
    /// Will drop `value` and return `Err(`[`AllocError`]`)` if either the payload or the
    /// control block cannot be allocated.
    pub fn try_new(value: T) -> Result<Shared<T>, AllocError> {
        Self::try_from_box(try_box(value)?)
    }

    /// Returns the payload if `this` is the only strong handle to it.
    ///
    /// Otherwise, an [`Err`] is returned with the same `Shared` that was passed in. Outstanding
    /// weak handles see the payload as expired after a successful call.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_handle::Shared;
    ///
    /// let a = Shared::new(3);
    /// assert_eq!(Shared::try_unwrap(a).ok(), Some(3));
    ///
    /// let a = Shared::new(4);
    /// let _b = a.clone();
    /// assert_eq!(*Shared::try_unwrap(a).unwrap_err(), 4);
    /// ```
    pub fn try_unwrap(this: Self) -> Result<T, Self> {
        let parts = match this.parts {
            Some(parts) if parts.block().try_claim_unique() => parts,
            _ => return Err(this),
        };

        // The strong unit of `this` is spent, so its destructor must not run.
        mem::forget(this);

        unsafe {
            let value = *Box::from_raw(parts.object.as_ptr());
            ControlBlock::release_weak(parts.block);
            Ok(value)
        }
    }

    /// Gets a raw pointer to the payload, or null if the handle is empty.
    pub fn as_ptr(&self) -> *const T {
        match self.parts {
            Some(parts) => parts.object.as_ptr(),
            None => ptr::null(),
        }
    }
}

impl<T: ?Sized> Shared<T> {
    /// Creates a handle that owns nothing.
    pub const fn empty() -> Shared<T> {
        Shared { parts: None, phantom: PhantomData }
    }

    /// Takes shared ownership of an already boxed payload.
    ///
    /// Aborts through [`handle_alloc_error`] if the control block cannot be allocated.
    pub fn from_box(boxed: Box<T>) -> Shared<T> {
        match Self::try_from_box(boxed) {
            Ok(shared) => shared,
            Err(AllocError) => handle_alloc_error(Layout::new::<ControlBlock>()),
        }
    }

    /// Takes shared ownership of an already boxed payload.
    ///
    /// # Errors
    /// Will drop `boxed` and return `Err(`[`AllocError`]`)` if the control block cannot be
    /// allocated.
    pub fn try_from_box(boxed: Box<T>) -> Result<Shared<T>, AllocError> {
        let block = ControlBlock::allocate()?;
        let object = NonNull::from(Box::leak(boxed));
        Ok(Self::from_parts(Parts { object, block }))
    }

    /// Takes shared ownership of a raw payload pointer. A null pointer yields an empty handle.
    ///
    /// # Safety
    ///
    /// A non-null `raw` must come from [`Box::into_raw`] and must not be owned by anything else.
    pub unsafe fn from_raw(raw: *mut T) -> Shared<T> {
        if raw.is_null() {
            return Self::empty();
        }
        Self::from_box(unsafe { Box::from_raw(raw) })
    }

    /// Wraps parts whose strong unit the caller has already accounted for.
    pub(crate) fn from_parts(parts: Parts<T>) -> Shared<T> {
        Shared { parts: Some(parts), phantom: PhantomData }
    }

    pub(crate) fn parts(&self) -> Option<Parts<T>> {
        self.parts
    }

    /// Gets a non-null pointer to the payload, or `None` if the handle is empty.
    ///
    /// Unlike [`Shared::as_ptr`] this also works for unsized payloads.
    pub fn as_non_null(&self) -> Option<NonNull<T>> {
        self.parts.map(|parts| parts.object)
    }

    /// Gets a reference to the payload, or `None` if the handle is empty.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // The strong unit held by `self` keeps the payload alive.
        self.parts.map(|parts| unsafe { &*parts.object.as_ptr() })
    }

    /// Gets a reference to the payload without checking for emptiness.
    ///
    /// # Safety
    ///
    /// The handle must not be empty.
    #[inline]
    pub unsafe fn get_unchecked(&self) -> &T {
        unsafe { &*self.parts.unwrap_unchecked().object.as_ptr() }
    }

    /// Gets the number of strong handles sharing this payload, or 0 if the handle is empty.
    ///
    /// This is a snapshot: other threads may change the count at any time.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_handle::Shared;
    ///
    /// let a = Shared::new(42);
    /// let b = a.clone();
    /// assert_eq!(a.use_count(), 2);
    ///
    /// drop(b);
    /// assert_eq!(a.use_count(), 1);
    /// ```
    #[inline]
    pub fn use_count(&self) -> usize {
        self.parts.map_or(0, |parts| parts.block().use_count())
    }

    /// Gets the number of [`Weak`] handles observing this payload.
    pub fn weak_count(&self) -> usize {
        // A live strong handle implies the implicit weak unit is still in place.
        self.parts.map_or(0, |parts| parts.block().weak_count() - 1)
    }

    /// Returns `true` if the handle owns nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_none()
    }

    /// Returns `true` if both handles share the same control block, or are both empty.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.parts.map(|parts| parts.block) == other.parts.map(|parts| parts.block)
    }

    /// Creates a new [`Weak`] handle observing this payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_handle::Shared;
    ///
    /// let a = Shared::new(42);
    /// let w = a.downgrade();
    /// assert!(!w.expired());
    ///
    /// drop(a);
    /// assert!(w.expired());
    /// ```
    pub fn downgrade(&self) -> Weak<T> {
        Weak::from(self)
    }

    /// Moves the referent out, leaving this handle empty. No count changes.
    pub fn take(&mut self) -> Shared<T> {
        mem::take(self)
    }

    /// Puts `other` in place of this handle and hands back the previous referent.
    pub fn replace(&mut self, other: Shared<T>) -> Shared<T> {
        mem::replace(self, other)
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    /// Makes a clone of the `Shared` handle.
    ///
    /// This creates another handle to the same payload, increasing the strong count.
    #[inline]
    fn clone(&self) -> Shared<T> {
        if let Some(parts) = self.parts {
            parts.block().increment_strong();
        }
        Shared { parts: self.parts, phantom: PhantomData }
    }

    /// Makes this handle share `source`'s payload, releasing the previous one first.
    ///
    /// Does nothing if both handles already share a control block.
    fn clone_from(&mut self, source: &Self) {
        if Self::ptr_eq(self, source) {
            return;
        }
        drop(self.take());
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    /// Drops the `Shared` handle.
    ///
    /// This will decrement the strong count. The last strong handle destroys the payload and
    /// gives up the implicit weak unit, which frees the control block if no [`Weak`] remains.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_handle::Shared;
    ///
    /// struct Foo;
    ///
    /// impl Drop for Foo {
    ///     fn drop(&mut self) {
    ///         println!("dropped!");
    ///     }
    /// }
    ///
    /// let foo  = Shared::new(Foo);
    /// let foo2 = Shared::clone(&foo);
    ///
    /// drop(foo);    // Doesn't print anything
    /// drop(foo2);   // Prints "dropped!"
    /// ```
    #[inline]
    fn drop(&mut self) {
        let parts = match self.parts.take() {
            Some(parts) => parts,
            None => return,
        };

        if parts.block().decrement_strong() != 1 {
            return;
        }

        // Every use of the payload happens before the release decrement that
        // gave it up, which happens before this fence, which happens before
        // the payload is destroyed.
        acquire!();

        log::trace!("destroying payload {:p}", parts.object);
        unsafe {
            drop(Box::from_raw(parts.object.as_ptr()));
            ControlBlock::release_weak(parts.block);
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    /// Panics if the handle is empty. Use [`Shared::get`] to check first.
    #[inline]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty `Shared`"),
        }
    }
}

impl<T: ?Sized> borrow::Borrow<T> for Shared<T> {
    fn borrow(&self) -> &T {
        &**self
    }
}

impl<T: ?Sized> AsRef<T> for Shared<T> {
    fn as_ref(&self) -> &T {
        &**self
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Display::fmt(value, f),
            None => Ok(()),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parts {
            Some(parts) => fmt::Pointer::fmt(&parts.object, f),
            None => fmt::Pointer::fmt(&ptr::null::<u8>(), f),
        }
    }
}

impl<T: ?Sized> ReferenceCounted<T> for Shared<T> {
    fn reference_count(this: &Self) -> usize {
        this.use_count()
    }
}

impl<T: ?Sized> Default for Shared<T> {
    /// Creates an empty `Shared`.
    fn default() -> Shared<T> {
        Shared::empty()
    }
}

impl<T> From<T> for Shared<T> {
    fn from(t: T) -> Self {
        Shared::new(t)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(boxed: Box<T>) -> Self {
        Shared::from_box(boxed)
    }
}

impl<T: ?Sized> Unpin for Shared<T> {}

/// Boxes `value`, reporting allocation failure instead of aborting.
fn try_box<T>(value: T) -> Result<Box<T>, AllocError> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return Ok(Box::new(value));
    }

    let raw = unsafe { alloc(layout) } as *mut T;
    let object = NonNull::new(raw).ok_or(AllocError)?;
    unsafe {
        ptr::write(object.as_ptr(), value);
        Ok(Box::from_raw(object.as_ptr()))
    }
}

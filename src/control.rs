use base::alloc::{alloc, dealloc, Layout};
use base::ptr::{self, NonNull};
use base::sync::atomic::AtomicUsize;
use base::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::AllocError;

/// A soft limit on the amount of references that may be made to one control block.
///
/// Going above this limit will panic your program (although not
/// necessarily) at _exactly_ `MAX_REFCOUNT + 1` references.
const MAX_REFCOUNT: usize = (isize::MAX) as usize;

macro_rules! acquire {
    () => {
        base::sync::atomic::fence(base::sync::atomic::Ordering::Acquire)
    };
}

pub(crate) use acquire;

/// The out-of-line record holding the two reference counts of one payload.
///
/// `strong` counts the `Shared` handles. `weak` counts the `Weak` handles plus one
/// implicit unit that is held collectively by the strong side and given up when the
/// payload is destroyed. The block is freed by whoever takes `weak` from 1 to 0.
pub(crate) struct ControlBlock {
    strong: AtomicUsize,
    weak: AtomicUsize,
}

impl ControlBlock {
    pub(crate) const fn new() -> Self {
        ControlBlock {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
        }
    }

    /// Heap-allocates a fresh block with both counts set to one.
    pub(crate) fn allocate() -> Result<NonNull<ControlBlock>, AllocError> {
        let layout = Layout::new::<ControlBlock>();
        // `ControlBlock` is never zero-sized, so the global allocator may be called directly.
        let raw = unsafe { alloc(layout) } as *mut ControlBlock;
        match NonNull::new(raw) {
            Some(block) => {
                unsafe { ptr::write(block.as_ptr(), ControlBlock::new()) };
                Ok(block)
            }
            None => {
                log::error!("failed to allocate a control block of {} bytes", layout.size());
                Err(AllocError)
            }
        }
    }

    /// Gives up one weak unit, freeing the block if it was the last one.
    ///
    /// # Safety
    ///
    /// `block` must come from [`ControlBlock::allocate`] and the caller must own one weak unit
    /// of it. The block must not be touched through this unit afterwards.
    pub(crate) unsafe fn release_weak(block: NonNull<ControlBlock>) {
        if unsafe { block.as_ref() }.decrement_weak() != 1 {
            return;
        }

        // Pairs with the release decrements of every other weak unit, so no
        // thread can still be reading the counters when the memory goes away.
        acquire!();
        unsafe { ControlBlock::deallocate(block) };
    }

    unsafe fn deallocate(block: NonNull<ControlBlock>) {
        log::trace!("deallocating control block {:p}", block);
        unsafe {
            ptr::drop_in_place(block.as_ptr());
            dealloc(block.as_ptr().cast(), Layout::new::<ControlBlock>());
        }
    }

    // Using a relaxed ordering is alright for both increments, as knowledge of
    // an existing reference prevents other threads from erroneously deleting
    // the object. Passing that reference to another thread must already
    // provide any required synchronization.
    #[inline]
    pub(crate) fn increment_strong(&self) {
        let old = self.strong.fetch_add(1, Relaxed);
        if old > MAX_REFCOUNT {
            panic!("strong reference count overflow");
        }
    }

    #[inline]
    pub(crate) fn increment_weak(&self) {
        let old = self.weak.fetch_add(1, Relaxed);
        if old > MAX_REFCOUNT {
            panic!("weak reference count overflow");
        }
    }

    /// Returns the count before the decrement.
    #[inline]
    pub(crate) fn decrement_strong(&self) -> usize {
        self.strong.fetch_sub(1, Release)
    }

    /// Returns the count before the decrement.
    #[inline]
    pub(crate) fn decrement_weak(&self) -> usize {
        self.weak.fetch_sub(1, Release)
    }

    /// Adds one strong reference unless the count already reached zero.
    ///
    /// Zero is terminal: once the payload is gone no caller may bring it back.
    pub(crate) fn try_increment_strong(&self) -> bool {
        let mut n = self.strong.load(Relaxed);
        loop {
            if n == 0 {
                return false;
            }
            if n > MAX_REFCOUNT {
                panic!("strong reference count overflow");
            }

            // Acquire on success pairs with the release decrement of whichever
            // thread last dropped a strong reference, so the payload we hand out
            // is fully visible.
            match self.strong.compare_exchange_weak(n, n + 1, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(old) => n = old,
            }
        }
    }

    /// Takes the strong count from 1 straight to 0.
    ///
    /// On success the caller owns the payload exclusively and is responsible for
    /// destroying it and giving up the implicit weak unit.
    pub(crate) fn try_claim_unique(&self) -> bool {
        if self.strong.compare_exchange(1, 0, Relaxed, Relaxed).is_err() {
            return false;
        }
        acquire!();
        true
    }

    /// Snapshot of the strong count. Advisory only under concurrency.
    #[inline]
    pub(crate) fn use_count(&self) -> usize {
        self.strong.load(Relaxed)
    }

    /// Snapshot of the weak count, including the implicit unit while the payload lives.
    #[inline]
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.load(Relaxed)
    }
}

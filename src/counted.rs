//! Counted pointers.
//!
//! A counted pointer is a `(pointer, generation)` pair that is read and compare-and-swapped as a
//! single word. The generation lives in the unused least significant bits of the aligned pointer
//! and is bumped on every successful [`CountedAtomic::compare_exchange`], so a snapshot taken
//! before an A → B → A sequence of updates no longer compares equal to the current value even
//! though it points to the same address.
//!
//! The generation alone does not rule out ABA. It has only `align_of::<T>().trailing_zeros()`
//! bits and wraps around, so after `1 << GENERATION_BITS` updates that end at the same address a
//! stale snapshot compares equal again, and a `T` with alignment 1 gets no generation at all.
//! Callers must load snapshots through a pinned [`crossbeam_epoch`] guard and free nodes only
//! through `Guard::defer_destroy`: a node's address then cannot be reused while any snapshot of
//! it is alive, and the generation only has to tell apart updates made in the meantime.

use core::fmt;
use core::mem;
use core::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

/// A snapshot of a [`CountedAtomic`]: a (possibly null) pointer together with its generation.
///
/// Two snapshots are equal only if both the pointee identity and the generation match.
pub struct CountedPtr<'g, T> {
    shared: Shared<'g, T>,
}

impl<T> Clone for CountedPtr<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CountedPtr<'_, T> {}

impl<'g, T> CountedPtr<'g, T> {
    fn from_shared(shared: Shared<'g, T>) -> CountedPtr<'g, T> {
        CountedPtr { shared }
    }

    /// Returns the referenced pointer with the generation stripped.
    pub fn pointer(&self) -> Shared<'g, T> {
        self.shared.with_tag(0)
    }

    /// Returns the generation stamp.
    pub fn generation(&self) -> usize {
        self.shared.tag()
    }

    /// Returns `true` if the pointer is null, whatever its generation.
    pub fn is_null(&self) -> bool {
        self.shared.is_null()
    }

    /// Returns the raw address of the pointee.
    pub fn as_raw(&self) -> *const T {
        self.shared.as_raw()
    }

    /// Dereferences the pointer, returning `None` if it is null.
    ///
    /// # Safety
    ///
    /// The pointee must not have been destroyed. Loading it through a pinned [`Guard`] and not
    /// destroying it before that guard is dropped is sufficient.
    pub unsafe fn as_ref(&self) -> Option<&'g T> {
        unsafe { self.shared.as_ref() }
    }

    /// Dereferences the pointer.
    ///
    /// # Safety
    ///
    /// Same as [`as_ref`](Self::as_ref), and the pointer must be non-null.
    pub unsafe fn deref(&self) -> &'g T {
        unsafe { self.shared.deref() }
    }
}

impl<T> PartialEq for CountedPtr<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_raw() == other.as_raw() && self.generation() == other.generation()
    }
}

impl<T> Eq for CountedPtr<'_, T> {}

impl<T> fmt::Debug for CountedPtr<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountedPtr")
            .field("pointer", &self.as_raw())
            .field("generation", &self.generation())
            .finish()
    }
}

/// An atomic counted pointer.
///
/// The number of generation bits is [`GENERATION_BITS`](Self::GENERATION_BITS) and generations
/// wrap around modulo `1 << GENERATION_BITS`. A snapshot that is `1 << GENERATION_BITS` updates
/// old and points to the current address wins a CAS, so the pointee must stay pinned for as
/// long as snapshots of it exist (see the module docs).
///
/// Dropping a `CountedAtomic` does not free the pointee.
pub struct CountedAtomic<T> {
    inner: Atomic<T>,
}

impl<T> CountedAtomic<T> {
    /// Number of low pointer bits available for the generation.
    pub const GENERATION_BITS: u32 = mem::align_of::<T>().trailing_zeros();

    /// Mask selecting the generation bits.
    const GENERATION_MASK: usize = (1 << Self::GENERATION_BITS) - 1;

    /// Returns a new null counted pointer with generation zero.
    pub fn null() -> CountedAtomic<T> {
        CountedAtomic {
            inner: Atomic::null(),
        }
    }

    /// Loads a snapshot of the pointer and its generation.
    pub fn load<'g>(&self, ord: Ordering, guard: &'g Guard) -> CountedPtr<'g, T> {
        CountedPtr::from_shared(self.inner.load(ord, guard))
    }

    /// Installs `new` if the current value is exactly `current`, pointer and generation alike.
    ///
    /// On success the stored generation is `current.generation() + 1` (wrapping) and the new
    /// snapshot is returned. On failure the value actually observed is returned.
    pub fn compare_exchange<'g>(
        &self,
        current: CountedPtr<'_, T>,
        new: Shared<'_, T>,
        success: Ordering,
        failure: Ordering,
        guard: &'g Guard,
    ) -> Result<CountedPtr<'g, T>, CountedPtr<'g, T>> {
        let generation = current.generation().wrapping_add(1) & Self::GENERATION_MASK;
        let new = new.with_tag(generation);

        match self
            .inner
            .compare_exchange(current.shared, new, success, failure, guard)
        {
            Ok(installed) => Ok(CountedPtr::from_shared(installed)),
            Err(err) => Err(CountedPtr::from_shared(err.current)),
        }
    }
}

impl<T> From<Owned<T>> for CountedAtomic<T> {
    fn from(owned: Owned<T>) -> Self {
        CountedAtomic {
            inner: Atomic::from(owned.with_tag(0)),
        }
    }
}

impl<'g, T> From<Shared<'g, T>> for CountedAtomic<T> {
    fn from(shared: Shared<'g, T>) -> Self {
        CountedAtomic {
            inner: Atomic::from(shared.with_tag(0)),
        }
    }
}

impl<T> Default for CountedAtomic<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for CountedAtomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: the snapshot is only used for its address and generation, never dereferenced.
        let snapshot = self.load(Ordering::SeqCst, unsafe { crossbeam_epoch::unprotected() });
        f.debug_struct("CountedAtomic")
            .field("pointer", &snapshot.as_raw())
            .field("generation", &snapshot.generation())
            .finish()
    }
}

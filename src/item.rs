//! Conversions between an `Arc<T>` and the raw `usize` a bucket's record
//! stores as its `item` field.
//!
//! Buckets never store an `Arc<T>` directly -- only the pointer `Arc::into_raw`
//! produces, reinterpreted as `usize` so it fits the 64-bit item half of a
//! [`Record`](crate::record::Record). The one strong reference that pointer
//! represents is owned by whichever bucket currently holds it; displacing it
//! (overwrite or remove) hands that ownership to the SMR retire list rather
//! than dropping it inline, so that a reader who read the old pointer before
//! the displacing CAS still has a window in which cloning it is sound.

use std::mem::ManuallyDrop;
use std::sync::Arc;

/// Converts an owned `Arc<T>` into the raw item representation, consuming
/// the strong reference into the bucket's ownership.
#[inline]
pub(crate) fn into_raw<T>(item: Arc<T>) -> usize {
    Arc::into_raw(item) as usize
}

/// Reconstructs the `Arc<T>` a bucket's strong reference represents,
/// consuming it.
///
/// # Safety
///
/// `raw` must have been produced by [`into_raw`] for this same `T` and must
/// not still be reachable by any bucket (i.e. it has already been CAS'd out
/// or is being permanently retired).
#[inline]
pub(crate) unsafe fn from_raw<T>(raw: usize) -> Arc<T> {
    unsafe { Arc::from_raw(raw as *const T) }
}

/// Clones the `Arc<T>` a bucket's strong reference represents without
/// consuming it -- "clone while pinned": the bucket (or the SMR retire list,
/// mid-reclamation-sweep) keeps owning the original reference.
///
/// # Safety
///
/// `raw` must have been produced by [`into_raw`] for this same `T`, and the
/// allocation it points to must still be live, i.e. the caller must hold an
/// SMR reservation published before any thread could have retired it.
#[inline]
pub(crate) unsafe fn clone_pinned<T>(raw: usize) -> Arc<T> {
    let borrowed = ManuallyDrop::new(unsafe { Arc::from_raw(raw as *const T) });
    Arc::clone(&borrowed)
}

/// Drops the value an item pointer represents. Used as the type-erased
/// `drop_fn` passed to [`crate::smr::retire`].
///
/// # Safety
///
/// Same as [`from_raw`].
#[inline]
pub(crate) unsafe fn drop_raw<T>(raw: *mut T) {
    drop(unsafe { Arc::from_raw(raw as *const T) });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn round_trips_and_preserves_value() {
        let arc = Arc::new(42usize);
        let raw = into_raw(arc);
        let back: Arc<usize> = unsafe { from_raw(raw) };
        assert_eq!(*back, 42);
    }

    #[test]
    fn clone_pinned_keeps_original_owned() {
        let arc = Arc::new(AtomicUsize::new(0));
        let raw = into_raw(Arc::clone(&arc));

        let cloned: Arc<AtomicUsize> = unsafe { clone_pinned(raw) };
        assert_eq!(Arc::strong_count(&arc), 3);
        cloned.fetch_add(1, Ordering::Relaxed);
        assert_eq!(arc.load(Ordering::Relaxed), 1);

        drop(cloned);
        let reclaimed: Arc<AtomicUsize> = unsafe { from_raw(raw) };
        assert_eq!(Arc::strong_count(&arc), 2);
        drop(reclaimed);
    }
}

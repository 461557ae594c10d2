//! Caching of retired allocations until no active reservation can still
//! observe them, plus a global queue for retirements abandoned by threads
//! that exit before their own records could be reclaimed.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Retired
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A single retired allocation: a type-erased pointer plus the cleanup
/// function to invoke on it once reclamation is safe, and the epoch after
/// which that is guaranteed to be the case.
pub(crate) struct Retired {
    data: *mut (),
    drop_fn: unsafe fn(*mut ()),
    retire_epoch: u64,
}

impl Retired {
    /// # Safety
    ///
    /// `drop_fn` must be safe to invoke exactly once on `data`, and `data`
    /// must not be dereferenced by anyone else after this call until the
    /// reclamation sweep decides to invoke `drop_fn`.
    #[inline]
    pub(crate) unsafe fn new(data: *mut (), drop_fn: unsafe fn(*mut ()), retire_epoch: u64) -> Self {
        Self { data, drop_fn, retire_epoch }
    }

}

impl Drop for Retired {
    #[inline]
    fn drop(&mut self) {
        unsafe { (self.drop_fn)(self.data) };
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetireList
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A thread-local cache of retired records awaiting reclamation.
///
/// Also doubles as a list node for the global stack of abandoned lists, so
/// that an exiting thread's leftover retirements can be picked up by
/// whichever thread next runs a reclamation sweep.
pub(crate) struct RetireList {
    pub(crate) inner: Vec<Retired>,
    next: Option<NonNull<RetireList>>,
}

impl RetireList {
    const DEFAULT_CAPACITY: usize = 64;

    pub(crate) fn new() -> Self {
        Self { inner: Vec::with_capacity(Self::DEFAULT_CAPACITY), next: None }
    }

    #[inline]
    pub(crate) fn push(&mut self, retired: Retired) {
        self.inner.push(retired);
    }

    /// Reclaims every retired record whose `retire_epoch` is strictly less
    /// than `min_reservation`, i.e. that no currently active reservation
    /// could still be observing.
    pub(crate) fn reclaim_below(&mut self, min_reservation: u64) {
        self.inner.retain(|retired| retired.retire_epoch >= min_reservation);
    }

    fn merge(&mut self, mut other: Vec<Retired>) {
        if other.capacity().saturating_sub(other.len()) > self.inner.capacity() {
            std::mem::swap(&mut self.inner, &mut other);
        }
        self.inner.append(&mut other);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AbandonedRetirements
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Lock-free stack of [`RetireList`]s abandoned by threads that exited
/// while some of their retirements were still potentially observable.
#[derive(Debug, Default)]
pub(crate) struct AbandonedRetirements {
    head: AtomicPtr<RetireList>,
}

impl AbandonedRetirements {
    pub(crate) const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    pub(crate) fn push(&self, list: Box<RetireList>) {
        debug_assert!(!list.inner.is_empty());
        let leaked = Box::leak(list);

        loop {
            let head = self.head.load(Ordering::Relaxed);
            leaked.next = NonNull::new(head);

            if self
                .head
                .compare_exchange_weak(head, leaked, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Takes and merges the entire content of the queue into one list, if
    /// non-empty.
    pub(crate) fn take_and_merge(&self) -> Option<Box<RetireList>> {
        if self.head.load(Ordering::Relaxed).is_null() {
            return None;
        }

        let head = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        if head.is_null() {
            return None;
        }

        let mut boxed = unsafe { Box::from_raw(head) };
        let mut curr = boxed.next;
        while let Some(ptr) = curr {
            let RetireList { inner, next } = unsafe { *Box::from_raw(ptr.as_ptr()) };
            boxed.merge(inner);
            curr = next;
        }

        Some(boxed)
    }
}

impl Drop for AbandonedRetirements {
    fn drop(&mut self) {
        // dropping any remaining abandoned lists runs their `Retired`
        // destructors unconditionally; this only happens when the owning
        // `Table` itself is dropped, at which point no reader can still be
        // observing anything.
        drop(self.take_and_merge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    unsafe fn drop_count(data: *mut ()) {
        let counter = &*(data as *const AtomicUsize);
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn reclaim_below_threshold() {
        let mut list = RetireList::new();
        let counter = AtomicUsize::new(0);
        let ptr = &counter as *const AtomicUsize as *mut ();

        unsafe {
            list.push(Retired::new(ptr, |_| {}, 5));
            list.push(Retired::new(ptr, |_| {}, 10));
        }

        list.reclaim_below(7);
        assert_eq!(list.inner.len(), 1);
        assert_eq!(list.inner[0].retire_epoch, 10);
    }

    #[test]
    fn abandoned_lists_merge() {
        let counter = AtomicUsize::new(0);
        let ptr = &counter as *const AtomicUsize as *mut ();

        let mut a = Box::new(RetireList::new());
        unsafe { a.push(Retired::new(ptr, drop_count, 1)) };
        let mut b = Box::new(RetireList::new());
        unsafe { b.push(Retired::new(ptr, drop_count, 2)) };

        let abandoned = AbandonedRetirements::new();
        abandoned.push(a);
        abandoned.push(b);

        let merged = abandoned.take_and_merge().unwrap();
        assert_eq!(merged.inner.len(), 2);
        drop(merged);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }
}

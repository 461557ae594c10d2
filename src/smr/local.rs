//! Thread-local bookkeeping: the reservation slot and retire list a thread
//! uses for a particular table, cached across calls and released on
//! thread exit.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::smr::registry::Slot;
use crate::smr::retire::{Retired, RetireList};
use crate::smr::GlobalState;

struct Entry {
    state: Arc<GlobalState>,
    slot: NonNull<Slot>,
    retired: RetireList,
    ops_since_scan: u32,
}

// SAFETY: `Slot` is `Sync` and is only ever dereferenced through `&Slot`;
// the `NonNull` is just a non-atomic handle to it cached by the owning
// thread.
unsafe impl Send for Entry {}

impl Drop for Entry {
    fn drop(&mut self) {
        sweep(&self.state, &mut self.retired);
        if !self.retired.inner.is_empty() {
            let leftover = std::mem::replace(&mut self.retired, RetireList::new());
            self.state.abandoned.push(Box::new(leftover));
        }
        self.state.registry.release(unsafe { self.slot.as_ref() });
    }
}

/// All of a thread's cached entries, one per distinct table it has used.
///
/// Wrapping the `Vec` in its own type (rather than storing it directly in
/// the `thread_local!`) means thread-exit cleanup is just this type's own
/// `Drop` impl, with no second thread-local whose destruction order
/// relative to the first would otherwise need coordinating.
#[derive(Default)]
struct LocalCache {
    entries: Vec<Entry>,
}

thread_local! {
    static CACHE: RefCell<LocalCache> = RefCell::new(LocalCache::default());
}

#[inline]
fn with_entry<R>(state: &Arc<GlobalState>, f: impl FnOnce(&mut Entry) -> R) -> R {
    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let pos = cache.entries.iter().position(|e| Arc::ptr_eq(&e.state, state));
        let idx = match pos {
            Some(idx) => idx,
            None => {
                let slot = NonNull::from(state.registry.acquire());
                cache.entries.push(Entry {
                    state: Arc::clone(state),
                    slot,
                    retired: RetireList::new(),
                    ops_since_scan: 0,
                });
                cache.entries.len() - 1
            }
        };
        f(&mut cache.entries[idx])
    })
}

/// Publishes the current global epoch as this thread's reservation for
/// `state`, i.e. implements `start_basic_op`.
#[inline]
pub(crate) fn start_basic_op(state: &Arc<GlobalState>) {
    with_entry(state, |entry| {
        let slot = unsafe { entry.slot.as_ref() };
        debug_assert!(
            slot.reservation(Ordering::SeqCst).is_none(),
            "start_basic_op called while this thread already holds a reservation; \
             end_op was skipped or this is a reentrant call"
        );
        let epoch = entry.state.epoch.load(Ordering::SeqCst).max(1);
        slot.publish(epoch);
    });
}

/// Clears this thread's reservation for `state`, i.e. implements
/// `end_op`.
#[inline]
pub(crate) fn end_op(state: &Arc<GlobalState>) {
    with_entry(state, |entry| {
        let slot = unsafe { entry.slot.as_ref() };
        debug_assert!(
            slot.reservation(Ordering::SeqCst).is_some(),
            "end_op called with no active reservation; start_basic_op was never \
             called or end_op already ran"
        );
        slot.clear();
    });
}

/// Returns the global epoch snapshotted after the reservation is
/// published, for linearized reads.
#[inline]
pub(crate) fn start_linearized_op(state: &Arc<GlobalState>) -> u64 {
    start_basic_op(state);
    state.epoch.load(Ordering::SeqCst)
}

/// Adds `retired` to this thread's retire list for `state`, attempting a
/// reclamation sweep once the configured scan threshold is crossed.
#[inline]
pub(crate) fn retire(state: &Arc<GlobalState>, retired: Retired) {
    with_entry(state, |entry| {
        entry.retired.push(retired);
        entry.ops_since_scan += 1;

        if entry.ops_since_scan >= state.scan_threshold {
            entry.ops_since_scan = 0;
            sweep(&entry.state, &mut entry.retired);
        }
    });
}

/// Forces an immediate reclamation attempt of this thread's retire list
/// for `state`, regardless of the scan threshold.
pub(crate) fn force_reclaim(state: &Arc<GlobalState>) {
    with_entry(state, |entry| sweep(&entry.state, &mut entry.retired));
}

fn sweep(state: &GlobalState, retired: &mut RetireList) {
    if let Some(adopted) = state.abandoned.take_and_merge() {
        retired.inner.extend(adopted.inner);
    }

    let min_r = min_reservation(state);
    log::trace!("reclamation sweep: min_reservation = {:?}", min_r);
    match min_r {
        Some(min_r) => retired.reclaim_below(min_r),
        // no thread has an active reservation: everything retired so far
        // is safe to free.
        None => retired.inner.clear(),
    }
}

fn min_reservation(state: &GlobalState) -> Option<u64> {
    state.registry.iter().filter_map(|slot| slot.reservation(Ordering::SeqCst)).min()
}

/// Releases this thread's involvement with `state` early, used by tests
/// that want deterministic cleanup without waiting for thread exit.
#[cfg(test)]
pub(crate) fn detach(state: &Arc<GlobalState>) {
    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if let Some(pos) = cache.entries.iter().position(|e| Arc::ptr_eq(&e.state, state)) {
            cache.entries.remove(pos);
        }
    });
}

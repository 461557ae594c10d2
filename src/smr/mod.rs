//! Epoch-based safe memory reclamation.
//!
//! Each [`crate::Table`] owns one [`GlobalState`], wrapped in an `Arc` so
//! that a thread's cached reservation slot and retire list stay valid even
//! after the table itself is dropped -- the `Arc` keeps the registry and
//! abandoned-retirement queue alive until every thread that ever touched
//! the table has released or dropped its cache entry.
//!
//! The protocol mirrors a hazard-pointer scheme's shape (a registry of
//! per-thread slots, a retire list drained once nothing can still observe
//! its contents) but tracks one global epoch counter per reservation
//! rather than one hazard per protected pointer: a reservation of `e`
//! means "this thread may still be observing data retired at epoch `e` or
//! later", so anything retired strictly before the minimum live
//! reservation is safe to reclaim.

mod local;
mod registry;
mod retire;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Config;
use registry::Registry;
use retire::AbandonedRetirements;

pub(crate) use retire::Retired;

/// The reclamation domain shared by every thread operating on one table.
#[derive(Debug)]
pub(crate) struct GlobalState {
    epoch: AtomicU64,
    registry: Registry,
    abandoned: AbandonedRetirements,
    scan_threshold: u32,
}

impl GlobalState {
    pub(crate) fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            epoch: AtomicU64::new(1),
            registry: Registry::new(),
            abandoned: AbandonedRetirements::new(),
            scan_threshold: config.scan_threshold(),
        })
    }

    #[inline]
    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Marks a freshly allocated, not-yet-published value as committed:
/// advances the global epoch and returns the write epoch to stamp it
/// with. Call only after the CAS publishing the allocation has won.
#[inline]
pub(crate) fn commit(state: &Arc<GlobalState>) -> u64 {
    state.epoch.fetch_add(1, Ordering::SeqCst) + 1
}

/// Allocates and immediately commits a value, for the common case where
/// there is no losing-CAS possibility to guard against (the very first
/// store a table creates).
#[inline]
pub(crate) fn alloc_committed<T>(state: &Arc<GlobalState>, value: T) -> (Box<T>, u64) {
    (Box::new(value), commit(state))
}

/// Releases a candidate allocation that lost its publishing CAS and was
/// never observed by any other thread: safe to drop immediately, since no
/// reservation could be protecting something nobody could yet see.
#[inline]
pub(crate) fn retire_unused<T>(candidate: Box<T>) {
    drop(candidate);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Guard
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An RAII reservation: publishes the current epoch as this thread's
/// reservation for `state` on construction, clears it on drop.
///
/// Holding a `Guard` for the duration of an operation is what makes it
/// safe to dereference items read from the table's buckets: anything
/// retired after the guard's epoch was published cannot be reclaimed
/// until the guard (or a more recent reservation) is gone.
pub(crate) struct Guard<'s> {
    state: &'s Arc<GlobalState>,
    epoch: u64,
}

impl<'s> Guard<'s> {
    #[inline]
    pub(crate) fn new(state: &'s Arc<GlobalState>) -> Self {
        local::start_basic_op(state);
        Self { state, epoch: state.current_epoch() }
    }

    /// Starts a guard for a linearized read: the returned epoch is the one
    /// to report as the read's observation point (see
    /// [`crate::Table::view_epoch`]).
    #[inline]
    pub(crate) fn new_linearized(state: &'s Arc<GlobalState>) -> Self {
        let epoch = local::start_linearized_op(state);
        Self { state, epoch }
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for Guard<'_> {
    #[inline]
    fn drop(&mut self) {
        local::end_op(self.state);
    }
}

/// Retires a value for eventual reclamation: `data` must not be
/// dereferenced by the caller after this call returns.
///
/// # Safety
///
/// `drop_fn` must be a valid destructor for `data`, safe to invoke exactly
/// once, and no thread may still be reading through a pointer derived
/// from `data` once its reclamation epoch has passed.
#[inline]
pub(crate) unsafe fn retire<T>(state: &Arc<GlobalState>, data: *mut T, drop_fn: unsafe fn(*mut T)) {
    let retire_epoch = state.current_epoch() + 1;
    let retired = Retired::new(
        data as *mut (),
        std::mem::transmute::<unsafe fn(*mut T), unsafe fn(*mut ())>(drop_fn),
        retire_epoch,
    );
    local::retire(state, retired);
}

/// Forces an immediate reclamation attempt for the calling thread's retire
/// list, regardless of the scan threshold. Used by `Table::drop` to give
/// reclamation a last chance to run before any still-abandoned lists are
/// force-dropped.
#[inline]
pub(crate) fn force_reclaim(state: &Arc<GlobalState>) {
    local::force_reclaim(state);
}

#[cfg(test)]
pub(crate) fn detach(state: &Arc<GlobalState>) {
    local::detach(state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn guard_publishes_and_clears_reservation() {
        let state = GlobalState::new(&Config::default());
        {
            let guard = Guard::new(&state);
            assert_eq!(guard.epoch(), 1);
        }
        detach(&state);
    }

    #[test]
    fn commit_advances_epoch_monotonically() {
        let state = GlobalState::new(&Config::default());
        let a = commit(&state);
        let b = commit(&state);
        assert!(b > a);
    }
}

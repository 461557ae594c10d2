//! The top-level table: the part of the system callers actually hold.
//!
//! Holds the current store pointer, the best-effort item count, and the
//! insertion-order epoch counter, and wraps every operation in an SMR
//! guard so that items read from the store stay valid for the duration of
//! the call.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::hash::Hv;
use crate::item;
use crate::migrate;
use crate::smr::{self, Guard};
use crate::store::{self, AddOutcome, GetOutcome, PutOutcome, RemoveOutcome, ReplaceOutcome, Store};
use crate::view;

/// A lock-free, linearizable, resizable hash table keyed by opaque 128-bit
/// hashes, storing reference-counted values.
///
/// `Table` itself never hashes keys: callers (or a higher-level keyed
/// wrapper) supply an [`Hv`] and are responsible for resolving hash
/// collisions between logically distinct keys, same as the lower-level
/// `hihat` core this is built around.
pub struct Table<T> {
    current_store: AtomicPtr<Store>,
    item_count: AtomicU64,
    next_epoch: AtomicU64,
    state: Arc<smr::GlobalState>,
    config: Config,
    _marker: PhantomData<T>,
}

// SAFETY: a `Table<T>` only ever exposes `T` wrapped in `Arc<T>`, moved
// across threads the same way any `Arc<T>` would be; it never grants
// access to a bare `T` by value or by unsynchronized reference.
unsafe impl<T: Send + Sync> Send for Table<T> {}
unsafe impl<T: Send + Sync> Sync for Table<T> {}

impl<T> Default for Table<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Table<T> {
    /// Creates a table using the default [`Config`].
    #[inline]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a table with an explicit [`Config`], sized at
    /// `config.min_store_size()`.
    #[inline]
    pub fn with_config(config: Config) -> Self {
        let hint = config.min_store_size();
        Self::with_capacity_hint(config, hint)
    }

    /// Creates a table with an explicit [`Config`] and an initial capacity
    /// hint: the actual size is `hint` rounded up to a power of two, floored
    /// at `config.min_store_size()`.
    pub fn with_capacity_hint(config: Config, hint: usize) -> Self {
        let size = store::round_up_size(hint, config.min_store_size());
        let (growth_num, growth_den) = config.growth_ratio();
        let state = smr::GlobalState::new(&config);
        let initial = Store::with_size_ratio(size, growth_num, growth_den);
        let (boxed, _write_epoch) = smr::alloc_committed(&state, initial);

        Self {
            current_store: AtomicPtr::new(Box::into_raw(boxed)),
            item_count: AtomicU64::new(0),
            next_epoch: AtomicU64::new(0),
            state,
            config,
            _marker: PhantomData,
        }
    }

    /// The best-effort number of live items; authoritative only when no
    /// operation is concurrently in flight.
    #[inline]
    pub fn len(&self) -> u64 {
        self.item_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current SMR epoch after publishing a linearized
    /// reservation, for use with [`Table::view_epoch`] (or, across several
    /// tables, as the shared linearization point a higher-level set
    /// operation would use).
    pub fn current_epoch(&self) -> u64 {
        let guard = Guard::new_linearized(&self.state);
        guard.epoch()
    }

    #[inline]
    fn mint_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[inline]
    fn current(&self) -> *mut Store {
        self.current_store.load(Ordering::Acquire)
    }

    /// Drives a migration of `stale` and returns whatever store ends up
    /// current.
    #[inline]
    fn migrate_from(&self, stale: *mut Store) -> *mut Store {
        migrate::migrate(&self.current_store, stale, &self.state, &self.config)
    }
}

impl<T: Send + Sync> Table<T> {
    /// Returns the item stored under `hv`, if any.
    pub fn get(&self, hv: Hv) -> Option<Arc<T>> {
        let _guard = Guard::new(&self.state);
        let store = unsafe { &*self.current() };
        match store.get(hv) {
            GetOutcome::Found(raw) => Some(unsafe { item::clone_pinned(raw) }),
            GetOutcome::Absent => None,
        }
    }

    /// Installs `item` under `hv` unconditionally, returning the item it
    /// displaced (preserving that item's original insertion epoch if one
    /// was already live there).
    pub fn put(&self, hv: Hv, item: Arc<T>) -> Option<Arc<T>> {
        let _guard = Guard::new(&self.state);
        let raw = item::into_raw(item);

        loop {
            let store_ptr = self.current();
            let store = unsafe { &*store_ptr };
            match store.put(hv, raw, || self.mint_epoch()) {
                PutOutcome::Installed { prior } => {
                    if prior == 0 {
                        self.item_count.fetch_add(1, Ordering::AcqRel);
                    }
                    return self.retire_displaced(prior);
                }
                PutOutcome::MigrateAndRetry => {
                    self.migrate_from(store_ptr);
                }
            }
        }
    }

    /// Installs `item` under `hv` only if a live value is already there,
    /// returning the displaced item. Returns `None` (dropping `item`
    /// without installing it) if `hv` is absent.
    pub fn replace(&self, hv: Hv, item: Arc<T>) -> Option<Arc<T>> {
        let _guard = Guard::new(&self.state);
        let raw = item::into_raw(item);

        loop {
            let store_ptr = self.current();
            let store = unsafe { &*store_ptr };
            match store.replace(hv, raw) {
                ReplaceOutcome::Replaced { prior } => return self.retire_displaced(prior),
                ReplaceOutcome::Absent => {
                    // never installed: reclaim the caller's item ourselves.
                    unsafe { item::drop_raw::<T>(raw as *mut T) };
                    return None;
                }
                ReplaceOutcome::MigrateAndRetry => {
                    self.migrate_from(store_ptr);
                }
            }
        }
    }

    /// Installs `item` under `hv` only if nothing is live there yet.
    /// Returns `false` (dropping `item` without installing it) if `hv` is
    /// already present.
    pub fn add(&self, hv: Hv, item: Arc<T>) -> bool {
        let _guard = Guard::new(&self.state);
        let raw = item::into_raw(item);

        loop {
            let store_ptr = self.current();
            let store = unsafe { &*store_ptr };
            match store.add(hv, raw, || self.mint_epoch()) {
                AddOutcome::Installed => {
                    self.item_count.fetch_add(1, Ordering::AcqRel);
                    return true;
                }
                AddOutcome::AlreadyPresent => {
                    unsafe { item::drop_raw::<T>(raw as *mut T) };
                    return false;
                }
                AddOutcome::MigrateAndRetry => {
                    self.migrate_from(store_ptr);
                }
            }
        }
    }

    /// Removes and returns the item stored under `hv`, if any.
    pub fn remove(&self, hv: Hv) -> Option<Arc<T>> {
        let _guard = Guard::new(&self.state);

        loop {
            let store_ptr = self.current();
            let store = unsafe { &*store_ptr };
            match store.remove(hv) {
                RemoveOutcome::Removed { prior } => {
                    self.item_count.fetch_sub(1, Ordering::AcqRel);
                    return self.retire_displaced(prior);
                }
                RemoveOutcome::Absent => return None,
                RemoveOutcome::MigrateAndRetry => {
                    self.migrate_from(store_ptr);
                }
            }
        }
    }

    /// A best-effort snapshot of the store observed at call entry,
    /// optionally ordered by insertion epoch.
    pub fn view(&self, sort: bool) -> Vec<(Arc<T>, u64)> {
        let _guard = Guard::new(&self.state);
        let store = unsafe { &*self.current() };
        view::view(store, sort)
            .into_iter()
            .map(|(raw, epoch)| (unsafe { item::clone_pinned(raw) }, epoch))
            .collect()
    }

    /// A snapshot filtered to items inserted at or before `at_epoch`
    /// (see [`current_epoch`](Self::current_epoch) and the approximation
    /// caveat on [`crate::view::view_epoch`]).
    pub fn view_epoch(&self, at_epoch: u64) -> Vec<(Arc<T>, u64)> {
        let _guard = Guard::new(&self.state);
        let store = unsafe { &*self.current() };
        view::view_epoch(store, at_epoch)
            .into_iter()
            .map(|(raw, epoch)| (unsafe { item::clone_pinned(raw) }, epoch))
            .collect()
    }

    /// Clones the displaced item for the caller while retiring the
    /// bucket's own strong reference to it via SMR.
    fn retire_displaced(&self, prior: usize) -> Option<Arc<T>> {
        if prior == 0 {
            return None;
        }
        let returned = unsafe { item::clone_pinned::<T>(prior) };
        unsafe { smr::retire(&self.state, prior as *mut T, item::drop_raw::<T>) };
        Some(returned)
    }
}

impl<T> Drop for Table<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can be operating on
        // this table, so the current store is exclusively ours to tear
        // down; its live items are the only ones not already owned by
        // some superseded, already-retired store (migration transfers
        // item ownership with the pointer value, never duplicates it).
        let store = unsafe { Box::from_raw(*self.current_store.get_mut()) };
        for bucket in store.iter_buckets() {
            let record = bucket.record(Ordering::Relaxed);
            if record.is_live() {
                unsafe { item::drop_raw::<T>(record.item as *mut T) };
            }
        }
        drop(store); // frees the bucket array; items were already dropped above
        smr::force_reclaim(&self.state);
    }
}

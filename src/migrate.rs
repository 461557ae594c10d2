//! Cooperative, lock-free migration: any thread that discovers a store is
//! full (or already being migrated) drives the migration to completion
//! itself rather than waiting, so the operation it retries afterward always
//! has somewhere to land.
//!
//! Every per-bucket step here is a CAS whose failure means another
//! migrator already did the equivalent work, which is what makes running
//! this concurrently from many threads safe: they all converge on the same
//! final state regardless of which one wins any individual CAS.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::record::Record;
use crate::smr::{self, GlobalState};
use crate::store::{self, Store};

unsafe fn drop_store(ptr: *mut Store) {
    drop(unsafe { Box::from_raw(ptr) });
}

/// Drives `stale` (assumed to currently be `*current_store`) through
/// migration if nobody else has already finished it, then returns whatever
/// store is current by the time this call returns. Callers retry their
/// operation against the returned store.
pub(crate) fn migrate(
    current_store: &AtomicPtr<Store>,
    stale_ptr: *mut Store,
    state: &Arc<GlobalState>,
    config: &Config,
) -> *mut Store {
    // Step 1: fast path -- someone else may have already migrated this.
    let now = current_store.load(Ordering::Acquire);
    if now != stale_ptr {
        return now;
    }

    // SAFETY: `stale_ptr` is still `current_store`, so it has not been
    // retired (retirement only happens after a successful publish below,
    // and publish always installs a different pointer first).
    let stale = unsafe { &*stale_ptr };

    if config.wait_for_migrator() && !stale.forward_ptr(Ordering::Acquire).is_null() {
        for _ in 0..config.migration_max_waits() {
            std::thread::sleep(config.migration_sleep());
            let now = current_store.load(Ordering::Acquire);
            if now != stale_ptr {
                return now;
            }
        }
    }

    // Step 2: freeze every bucket, counting how many end up live.
    let mut new_used = 0usize;
    for bucket in stale.iter_buckets() {
        loop {
            let current = bucket.record(Ordering::Acquire);
            if current.info.moving {
                break;
            }

            let frozen_info =
                if current.is_live() { current.info.with_moving() } else { current.info.with_moved() };
            let frozen = Record { item: current.item, info: frozen_info };

            match bucket.compare_exchange_record(current, frozen) {
                Ok(_) => break,
                Err(_) => continue,
            }
        }

        if bucket.record(Ordering::Acquire).is_live() {
            new_used += 1;
        }
    }

    log::debug!("migrating store of size {} ({} live buckets)", stale.size(), new_used);

    // Step 3: size choice.
    let (growth_num, growth_den) = config.growth_ratio();
    let new_size = choose_new_size(new_used, config.min_store_size(), growth_num, growth_den);

    // Step 4: forward install.
    let candidate = Box::into_raw(Box::new(Store::with_size_ratio(new_size, growth_num, growth_den)));
    match stale.try_install_forward(candidate) {
        Ok(()) => {
            let _write_epoch = smr::commit(state);
        }
        Err(_) => {
            // SAFETY: never published, so nobody else could be observing it.
            smr::retire_unused(unsafe { Box::from_raw(candidate) });
        }
    }

    // SAFETY: `try_install_forward` guarantees `stale.forward` is non-null
    // by this point, whether this thread's candidate won or lost.
    let forward_ptr = stale.forward_ptr(Ordering::Acquire);
    let forward = unsafe { &*forward_ptr };

    // Step 5: bucket copy.
    for bucket in stale.iter_buckets() {
        loop {
            let current = bucket.record(Ordering::Acquire);
            if current.info.moved || !current.is_live() {
                break;
            }

            let hv = bucket.hv(Ordering::Acquire);
            forward.migrate_in(hv, current.item, current.info.epoch);

            let moved = Record { item: current.item, info: current.info.with_moved() };
            match bucket.compare_exchange_record(current, moved) {
                Ok(_) => break,
                Err(_) => continue,
            }
        }
    }

    // Step 6: commit usage (idempotent: only the first caller wins, and
    // every migrator computed the same `new_used`).
    let _ = forward.try_commit_used_count(new_used);

    // Step 7: publish.
    if current_store
        .compare_exchange(stale_ptr, forward_ptr, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        log::trace!("published migrated store, retiring predecessor");
        // SAFETY: every live item was copied by value into `forward` above
        // (not cloned -- ownership transfers with the pointer value), so
        // `stale`'s own drop must not touch bucket contents, and it
        // doesn't: `Store` has no item-aware `Drop` impl.
        unsafe { smr::retire(state, stale_ptr, drop_store) };
    }

    current_store.load(Ordering::Acquire)
}

/// Smallest power-of-two size `>= min_size` whose growth-ratio threshold
/// covers `new_used`.
fn choose_new_size(new_used: usize, min_size: usize, growth_num: usize, growth_den: usize) -> usize {
    let mut size = min_size;
    while store::threshold_ratio(size, growth_num, growth_den) < new_used {
        size *= 2;
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hv;
    use crate::store::{AddOutcome, GetOutcome, PutOutcome};
    use std::sync::atomic::AtomicU64;

    fn epoch_source(counter: &AtomicU64) -> impl Fn() -> u64 + '_ {
        move || counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[test]
    fn migration_preserves_all_live_items() {
        let config = Config::default();
        let state = GlobalState::new(&config);
        let epoch = AtomicU64::new(0);

        let first = Box::into_raw(Box::new(Store::with_size(4)));
        let current = AtomicPtr::new(first);

        for h in [1u128, 2, 3] {
            loop {
                let store = unsafe { &*current.load(Ordering::Acquire) };
                match store.put(Hv::new(h), h as usize, epoch_source(&epoch)) {
                    PutOutcome::Installed { .. } => break,
                    PutOutcome::MigrateAndRetry => {
                        migrate(&current, current.load(Ordering::Acquire), &state, &config);
                    }
                }
            }
        }

        let new_ptr = migrate(&current, current.load(Ordering::Acquire), &state, &config);
        assert_ne!(new_ptr, first);

        let new_store = unsafe { &*new_ptr };
        assert!(new_store.size() > 4);
        for h in [1u128, 2, 3] {
            match new_store.get(Hv::new(h)) {
                GetOutcome::Found(item) => assert_eq!(item, h as usize),
                GetOutcome::Absent => panic!("item {h} lost during migration"),
            }
        }

        unsafe { drop(Box::from_raw(new_ptr)) };
        smr::detach(&state);
    }

    #[test]
    fn migration_drops_tombstones() {
        let config = Config::default();
        let state = GlobalState::new(&config);
        let epoch = AtomicU64::new(0);

        let first = Box::into_raw(Box::new(Store::with_size(4)));
        let current = AtomicPtr::new(first);
        {
            let store = unsafe { &*current.load(Ordering::Acquire) };
            store.add(Hv::new(1), 0x1, epoch_source(&epoch));
            store.remove(Hv::new(1));
        }

        let new_ptr = migrate(&current, current.load(Ordering::Acquire), &state, &config);
        let new_store = unsafe { &*new_ptr };
        assert!(matches!(new_store.get(Hv::new(1)), GetOutcome::Absent));
        assert_eq!(new_store.used_count(Ordering::Acquire), 0);

        unsafe { drop(Box::from_raw(new_ptr)) };
        smr::detach(&state);
    }

    #[test]
    fn choose_new_size_shrinks_when_live_set_is_small() {
        // default ratio 3/4, min_size 64: new_used = 13 needs size 64
        // already (0.75*64 = 48 >= 13), matching S4's "smallest power of
        // two with 0.75*size >= 13 under the minimum" at min_size=64.
        assert_eq!(choose_new_size(13, 64, 3, 4), 64);
        assert_eq!(choose_new_size(200, 64, 3, 4), 512);
    }

    #[test]
    fn add_rejects_duplicate_across_migration() {
        let config = Config::default();
        let state = GlobalState::new(&config);
        let epoch = AtomicU64::new(0);

        let first = Box::into_raw(Box::new(Store::with_size(4)));
        let current = AtomicPtr::new(first);
        {
            let store = unsafe { &*current.load(Ordering::Acquire) };
            assert!(matches!(store.add(Hv::new(5), 0x5, epoch_source(&epoch)), AddOutcome::Installed));
        }

        let new_ptr = migrate(&current, current.load(Ordering::Acquire), &state, &config);
        let new_store = unsafe { &*new_ptr };
        assert!(matches!(
            new_store.add(Hv::new(5), 0x6, epoch_source(&epoch)),
            AddOutcome::AlreadyPresent
        ));

        unsafe { drop(Box::from_raw(new_ptr)) };
        smr::detach(&state);
    }
}

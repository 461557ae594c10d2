//! A single generation of the hash array: a power-of-two-sized bucket
//! array plus the counters and forwarding pointer a migration needs.
//!
//! Every method here is expressed purely in terms of hashes and raw item
//! pointers -- `Store` has no notion of `Arc<T>` or SMR reservations. That
//! split mirrors how [`crate::bucket::Bucket`] itself stays untyped: the
//! table layer above converts to and from `Arc<T>` and performs retirement,
//! while this layer is just the lock-free probe/CAS state machine from the
//! spec.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::bucket::Bucket;
use crate::hash::Hv;
use crate::record::{Info, Record};

pub(crate) enum GetOutcome {
    Found(usize),
    Absent,
}

pub(crate) enum PutOutcome {
    /// The bucket now holds `new_item`; `prior` is the raw item pointer it
    /// held before (0 if none).
    Installed { prior: usize },
    MigrateAndRetry,
}

pub(crate) enum ReplaceOutcome {
    Replaced { prior: usize },
    Absent,
    MigrateAndRetry,
}

pub(crate) enum AddOutcome {
    Installed,
    AlreadyPresent,
    MigrateAndRetry,
}

pub(crate) enum RemoveOutcome {
    Removed { prior: usize },
    Absent,
    MigrateAndRetry,
}

enum Probe {
    Bucket(usize),
    NotFound,
    MigrateAndRetry,
}

/// One generation of the table's bucket array.
#[derive(Debug)]
pub(crate) struct Store {
    pub(crate) last_slot: usize,
    pub(crate) threshold: usize,
    used_count: AtomicUsize,
    forward: AtomicPtr<Store>,
    buckets: Box<[Bucket]>,
}

impl Store {
    /// Creates a store with `size` buckets. `size` must already be a
    /// power of two; callers round up via [`round_up_size`].
    pub(crate) fn with_size(size: usize) -> Self {
        Self::with_size_ratio(size, 3, 4)
    }

    /// Creates a store with `size` buckets and an explicit growth ratio
    /// (see [`crate::config::Config::growth_ratio`]).
    pub(crate) fn with_size_ratio(size: usize, growth_num: usize, growth_den: usize) -> Self {
        debug_assert!(size.is_power_of_two() && size >= 2);
        let buckets = (0..size).map(|_| Bucket::new()).collect::<Vec<_>>().into_boxed_slice();
        Self {
            last_slot: size - 1,
            threshold: threshold_ratio(size, growth_num, growth_den),
            used_count: AtomicUsize::new(0),
            forward: AtomicPtr::new(std::ptr::null_mut()),
            buckets,
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.last_slot + 1
    }

    #[inline]
    pub(crate) fn used_count(&self, order: Ordering) -> usize {
        self.used_count.load(order)
    }

    #[inline]
    pub(crate) fn forward(&self, order: Ordering) -> Option<&Store> {
        unsafe { self.forward.load(order).as_ref() }
    }

    #[inline]
    pub(crate) fn forward_ptr(&self, order: Ordering) -> *mut Store {
        self.forward.load(order)
    }

    /// Attempts to install `candidate` as this store's forwarding pointer.
    /// Returns `Ok(())` if this thread's candidate won, `Err(existing)` with
    /// the winning store's pointer otherwise (the caller must retire its
    /// unused candidate via `smr::retire_unused`).
    pub(crate) fn try_install_forward(&self, candidate: *mut Store) -> Result<(), *mut Store> {
        self.forward.compare_exchange(
            std::ptr::null_mut(),
            candidate,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
    }

    /// Attempts to CAS `used_count` from 0 to `new_used`; only the first
    /// caller (across every migrator racing to commit the same store)
    /// succeeds.
    pub(crate) fn try_commit_used_count(&self, new_used: usize) -> bool {
        self.used_count.compare_exchange(0, new_used, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    #[inline]
    pub(crate) fn bucket(&self, idx: usize) -> &Bucket {
        &self.buckets[idx]
    }

    #[inline]
    pub(crate) fn iter_buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Walks the probe sequence for `hv`. `claim` controls whether an
    /// unreserved slot is claimed for `hv` (put/add) or treated as "not
    /// found" (get/replace/remove).
    fn probe(&self, hv: Hv, claim: bool) -> Probe {
        let mut bix = hv.to_index(self.last_slot);
        for _ in 0..self.size() {
            let bucket = &self.buckets[bix];
            let found = bucket.hv(Ordering::Acquire);

            if found.is_unreserved() {
                if !claim {
                    return Probe::NotFound;
                }
                match bucket.try_claim(hv) {
                    Ok(()) => {
                        let prior = self.used_count.fetch_add(1, Ordering::AcqRel);
                        if prior >= self.threshold {
                            return Probe::MigrateAndRetry;
                        }
                        return Probe::Bucket(bix);
                    }
                    Err(other) if other == hv => return Probe::Bucket(bix),
                    Err(_) => {}
                }
            } else if found == hv {
                return Probe::Bucket(bix);
            }

            bix = (bix + 1) & self.last_slot;
        }

        if claim { Probe::MigrateAndRetry } else { Probe::NotFound }
    }

    pub(crate) fn get(&self, hv: Hv) -> GetOutcome {
        match self.probe(hv, false) {
            Probe::Bucket(bix) => {
                let record = self.buckets[bix].record(Ordering::Acquire);
                if record.is_live() {
                    GetOutcome::Found(record.item)
                } else {
                    GetOutcome::Absent
                }
            }
            Probe::NotFound => GetOutcome::Absent,
            Probe::MigrateAndRetry => unreachable!("get never claims a bucket"),
        }
    }

    /// Installs `new_item` unconditionally, preserving the bucket's epoch
    /// if it already held a live value, or minting one via `next_epoch`
    /// otherwise.
    pub(crate) fn put(&self, hv: Hv, new_item: usize, next_epoch: impl Fn() -> u64) -> PutOutcome {
        let bix = match self.probe(hv, true) {
            Probe::Bucket(bix) => bix,
            Probe::MigrateAndRetry => return PutOutcome::MigrateAndRetry,
            Probe::NotFound => unreachable!("put always claims"),
        };
        let bucket = &self.buckets[bix];

        loop {
            let current = bucket.record(Ordering::Acquire);
            if current.info.moving {
                return PutOutcome::MigrateAndRetry;
            }

            let info =
                if current.is_live() { Info::live(current.info.epoch) } else { Info::live(next_epoch()) };
            let new_record = Record { item: new_item, info };

            match bucket.compare_exchange_record(current, new_record) {
                Ok(_) => return PutOutcome::Installed { prior: current.item },
                Err(_) => continue,
            }
        }
    }

    /// `put` restricted to an already-live bucket.
    pub(crate) fn replace(&self, hv: Hv, new_item: usize) -> ReplaceOutcome {
        let bix = match self.probe(hv, false) {
            Probe::Bucket(bix) => bix,
            Probe::NotFound => return ReplaceOutcome::Absent,
            Probe::MigrateAndRetry => unreachable!("replace never claims"),
        };
        let bucket = &self.buckets[bix];

        loop {
            let current = bucket.record(Ordering::Acquire);
            if current.info.moving {
                return ReplaceOutcome::MigrateAndRetry;
            }
            if !current.is_live() {
                return ReplaceOutcome::Absent;
            }

            let new_record = Record { item: new_item, info: Info::live(current.info.epoch) };
            match bucket.compare_exchange_record(current, new_record) {
                Ok(_) => return ReplaceOutcome::Replaced { prior: current.item },
                Err(_) => continue,
            }
        }
    }

    /// `put` restricted to the empty/tombstone states.
    pub(crate) fn add(&self, hv: Hv, new_item: usize, next_epoch: impl Fn() -> u64) -> AddOutcome {
        let bix = match self.probe(hv, true) {
            Probe::Bucket(bix) => bix,
            Probe::MigrateAndRetry => return AddOutcome::MigrateAndRetry,
            Probe::NotFound => unreachable!("add always claims"),
        };
        let bucket = &self.buckets[bix];

        loop {
            let current = bucket.record(Ordering::Acquire);
            if current.info.moving {
                return AddOutcome::MigrateAndRetry;
            }
            if current.is_live() {
                return AddOutcome::AlreadyPresent;
            }

            let new_record = Record { item: new_item, info: Info::live(next_epoch()) };
            match bucket.compare_exchange_record(current, new_record) {
                Ok(_) => return AddOutcome::Installed,
                Err(_) => continue,
            }
        }
    }

    /// Re-probes `self` (the forwarding store of a migration) for `hv` and
    /// installs `(item, epoch)` if no live value is there yet; harmless if
    /// another migrator already installed the identical value.
    ///
    /// Does not touch `used_count`: that is committed once, in bulk, by
    /// [`Store::try_commit_used_count`], since multiple concurrent
    /// migrators would otherwise double-count the same bucket.
    pub(crate) fn migrate_in(&self, hv: Hv, item: usize, epoch: u64) {
        let mut bix = hv.to_index(self.last_slot);
        loop {
            let bucket = &self.buckets[bix];
            let found = bucket.hv(Ordering::Acquire);

            if found.is_unreserved() {
                let claimed_by_us_or_already_hv = match bucket.try_claim(hv) {
                    Ok(()) => true,
                    Err(other) => other == hv,
                };
                if claimed_by_us_or_already_hv {
                    let new_record = Record { item, info: Info::live(epoch) };
                    let _ = bucket.compare_exchange_record(Record::EMPTY, new_record);
                    return;
                }
            } else if found == hv {
                let new_record = Record { item, info: Info::live(epoch) };
                let _ = bucket.compare_exchange_record(Record::EMPTY, new_record);
                return;
            }

            bix = (bix + 1) & self.last_slot;
        }
    }

    pub(crate) fn remove(&self, hv: Hv) -> RemoveOutcome {
        let bix = match self.probe(hv, false) {
            Probe::Bucket(bix) => bix,
            Probe::NotFound => return RemoveOutcome::Absent,
            Probe::MigrateAndRetry => unreachable!("remove never claims"),
        };
        let bucket = &self.buckets[bix];

        loop {
            let current = bucket.record(Ordering::Acquire);
            if current.info.moving {
                return RemoveOutcome::MigrateAndRetry;
            }
            if !current.is_live() {
                return RemoveOutcome::Absent;
            }

            match bucket.compare_exchange_record(current, Record::EMPTY) {
                Ok(_) => return RemoveOutcome::Removed { prior: current.item },
                Err(_) => continue,
            }
        }
    }
}

/// Rounds `hint` up to the smallest power of two `>= hint`, floored at
/// `min`.
pub(crate) fn round_up_size(hint: usize, min: usize) -> usize {
    hint.max(min).next_power_of_two()
}

/// `threshold = ceil(growth_num/growth_den * size)`.
pub(crate) fn threshold_ratio(size: usize, growth_num: usize, growth_den: usize) -> usize {
    (size * growth_num + growth_den - 1) / growth_den
}

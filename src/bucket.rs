//! A single slot in a [`Store`](crate::store::Store): a 128-bit hash cell
//! and a 128-bit `(item, info)` record cell, each updated by a single
//! atomic CAS.
//!
//! Splitting hash and record into two cells (rather than packing hash,
//! item and info into one wider word) is what lets a reader claim a
//! bucket's hash slot and then retry the record CAS independently --
//! exactly the two-phase "reserve the slot, then install the value"
//! sequence the probe/insert path needs.

use portable_atomic::AtomicU128;
use std::sync::atomic::Ordering;

use crate::hash::{Hv, UNRESERVED};
use crate::record::Record;

/// One bucket of a [`Store`](crate::store::Store).
#[derive(Debug)]
pub(crate) struct Bucket {
    hv: AtomicU128,
    record: AtomicU128,
}

impl Bucket {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { hv: AtomicU128::new(UNRESERVED.into_bits()), record: AtomicU128::new(Record::EMPTY.encode()) }
    }

    #[inline]
    pub(crate) fn hv(&self, order: Ordering) -> Hv {
        Hv::new(self.hv.load(order))
    }

    /// Attempts to claim this bucket's hash slot for `hv`, succeeding if it
    /// was previously unreserved.
    #[inline]
    pub(crate) fn try_claim(&self, hv: Hv) -> Result<(), Hv> {
        match self.hv.compare_exchange(
            UNRESERVED.into_bits(),
            hv.into_bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(found) => Err(Hv::new(found)),
        }
    }

    #[inline]
    pub(crate) fn record(&self, order: Ordering) -> Record {
        Record::decode(self.record.load(order))
    }

    #[inline]
    pub(crate) fn compare_exchange_record(
        &self,
        current: Record,
        new: Record,
    ) -> Result<Record, Record> {
        self.record
            .compare_exchange(current.encode(), new.encode(), Ordering::AcqRel, Ordering::Acquire)
            .map(Record::decode)
            .map_err(Record::decode)
    }

    /// Forces this bucket's record cell to `new` unconditionally, used only
    /// while copying into a fresh store during migration, where no other
    /// thread can yet observe the bucket.
    #[inline]
    pub(crate) fn store_record(&self, new: Record, order: Ordering) {
        self.record.store(new.encode(), order);
    }

    /// Forces this bucket's hash cell to `hv` unconditionally, used only
    /// while copying into a fresh store during migration.
    #[inline]
    pub(crate) fn store_hv(&self, hv: Hv, order: Ordering) {
        self.hv.store(hv.into_bits(), order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unreserved_and_empty() {
        let bucket = Bucket::new();
        assert!(bucket.hv(Ordering::Relaxed).is_unreserved());
        assert!(!bucket.record(Ordering::Relaxed).is_live());
    }

    #[test]
    fn claim_is_exclusive() {
        let bucket = Bucket::new();
        assert!(bucket.try_claim(Hv::new(7)).is_ok());
        assert_eq!(bucket.try_claim(Hv::new(9)), Err(Hv::new(7)));
    }

    #[test]
    fn record_cas_detects_conflicting_update() {
        use crate::record::Info;

        let bucket = Bucket::new();
        let empty = Record::EMPTY;
        let first = Record { item: 0x1000, info: Info::live(1) };
        assert_eq!(bucket.compare_exchange_record(empty, first), Ok(empty));

        let second = Record { item: 0x2000, info: Info::live(2) };
        assert_eq!(bucket.compare_exchange_record(empty, second), Err(first));
    }
}

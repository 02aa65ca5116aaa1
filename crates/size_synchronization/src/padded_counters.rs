//! Per-thread counter arrays, one cache line per thread.
//!
//! Every array in this module has [`MAX_THREADS`](crate::thread_registry::MAX_THREADS) slots and
//! each slot is wrapped in [`CachePadded`] so that thread `a` bumping its counter never invalidates
//! the line thread `b`'s counter lives on.  Slots are written by their owning thread (plus the
//! occasional helper CAS) and read by everyone, so the write side stays contention-free.
use crossbeam::utils::CachePadded;

use crate::sync::{AtomicI64, AtomicU64, Ordering};
use crate::thread_registry::MAX_THREADS;
use crate::update_info::UpdateKind;

/// One signed running total per thread.
pub struct SignedCounters {
    cells: Box<[CachePadded<AtomicI64>]>,
}

impl SignedCounters {
    pub fn new() -> SignedCounters {
        SignedCounters {
            cells: (0..MAX_THREADS)
                .map(|_| CachePadded::new(AtomicI64::new(0)))
                .collect(),
        }
    }

    pub fn add(&self, tid: usize, delta: i64) {
        self.cells[tid].fetch_add(delta, Ordering::SeqCst);
    }

    pub fn get(&self, tid: usize) -> i64 {
        self.cells[tid].load(Ordering::SeqCst)
    }
}

impl Default for SignedCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// One unsigned counter per thread, owner-incremented.
///
/// Used for the optimistic calculator's activity counters, where only the parity and "has it
/// moved" are meaningful.
pub struct UnsignedCounters {
    cells: Box<[CachePadded<AtomicU64>]>,
}

impl UnsignedCounters {
    pub fn new() -> UnsignedCounters {
        UnsignedCounters {
            cells: (0..MAX_THREADS)
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
        }
    }

    pub fn increment(&self, tid: usize) {
        self.cells[tid].fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self, tid: usize) -> u64 {
        self.cells[tid].load(Ordering::SeqCst)
    }
}

impl Default for UnsignedCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A pair of monotone counts per thread, one per update kind.
///
/// Both kinds share the owning thread's cache line; the padding boundary that matters is the one
/// between threads.  `net` is the thread's signed contribution to the set size.
pub struct KindCounters {
    cells: Box<[CachePadded<[AtomicU64; 2]>]>,
}

impl KindCounters {
    pub fn new() -> KindCounters {
        KindCounters {
            cells: (0..MAX_THREADS)
                .map(|_| CachePadded::new([AtomicU64::new(0), AtomicU64::new(0)]))
                .collect(),
        }
    }

    pub fn cell(&self, tid: usize, kind: UpdateKind) -> &AtomicU64 {
        &self.cells[tid][kind.index()]
    }

    pub fn net(&self, tid: usize) -> i64 {
        let inserts = self.cell(tid, UpdateKind::Insert).load(Ordering::SeqCst);
        let removes = self.cell(tid, UpdateKind::Remove).load(Ordering::SeqCst);
        inserts as i64 - removes as i64
    }
}

impl Default for KindCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn signed_totals_accumulate() {
        let counters = SignedCounters::new();
        counters.add(0, 1);
        counters.add(0, 1);
        counters.add(0, -1);
        counters.add(5, -3);
        assert_eq!(counters.get(0), 1);
        assert_eq!(counters.get(5), -3);
        assert_eq!(counters.get(1), 0);
    }

    #[test]
    fn kind_counters_net_out() {
        let counters = KindCounters::new();
        counters.cell(3, UpdateKind::Insert).store(7, Ordering::SeqCst);
        counters.cell(3, UpdateKind::Remove).store(2, Ordering::SeqCst);
        assert_eq!(counters.net(3), 5);
        assert_eq!(counters.net(0), 0);
    }
}

//! The optimistic calculator.
//!
//! Updates are as cheap as they come: bump your activity counter to odd, store your linearizing
//! update and your metadata bump, bump the activity counter back to even.  Exactly two activity
//! increments per update, no announcement, no lock.
//!
//! A size performs an optimistic double-scan: record every thread's activity counter (waiting out
//! the odd ones, since an odd counter means a commit window is open), sum the metadata counters,
//! then re-read the activity counters.  If nothing moved and no thread registered meanwhile, the
//! sum is a consistent cut.  After `max_tries` failed scans the size stops burning cycles and
//! registers itself in `awaiting_sizes`; from then on every updater's exit hook donates one scan
//! attempt, and the first successful scan — the size's own or a helper's — is installed in a
//! shared [`SizeInfo`] cell for everyone stuck on it.
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;

use super::size_info::SizeInfo;
use super::{SizeCalculator, UpdateMode};
use crate::padded_counters::{SignedCounters, UnsignedCounters};
use crate::sync::{spin_loop, yield_if_loom, AtomicU64, Ordering};
use crate::thread_registry;
use crate::update_info::UpdateKind;

/// Optimistic scans a size performs before it asks for help.
pub const DEFAULT_MAX_TRIES: usize = 3;

pub struct OptimisticSizeCalculator {
    metadata: SignedCounters,
    /// Odd while the owner is inside its commit window, even outside.
    activity: UnsignedCounters,
    awaiting_sizes: CachePadded<AtomicU64>,
    size_info: ArcSwap<SizeInfo>,
    max_tries: usize,
}

impl OptimisticSizeCalculator {
    pub fn new() -> OptimisticSizeCalculator {
        OptimisticSizeCalculator::with_max_tries(DEFAULT_MAX_TRIES)
    }

    /// `max_tries = 0` sends every size straight to the help protocol.
    pub fn with_max_tries(max_tries: usize) -> OptimisticSizeCalculator {
        OptimisticSizeCalculator {
            metadata: SignedCounters::new(),
            activity: UnsignedCounters::new(),
            awaiting_sizes: CachePadded::new(AtomicU64::new(0)),
            size_info: ArcSwap::from_pointee(SizeInfo::with_value(0)),
            max_tries,
        }
    }

    /// Number of sizes currently in the help protocol.
    pub fn awaiting(&self) -> u64 {
        self.awaiting_sizes.load(Ordering::SeqCst)
    }

    /// One optimistic double-scan.  `None` means a commit or a registration moved under us.
    fn try_read(&self) -> Option<i64> {
        let bound = thread_registry::upper_bound();

        let mut seen = Vec::with_capacity(bound);
        for tid in 0..bound {
            let mut activity = self.activity.get(tid);
            // An odd counter is a window that is about to close; wait it out rather than fail,
            // the window is two stores wide.
            while activity & 1 == 1 {
                spin_loop();
                yield_if_loom();
                activity = self.activity.get(tid);
            }
            seen.push(activity);
        }

        let mut sum = 0i64;
        for tid in 0..bound {
            sum += self.metadata.get(tid);
        }

        if thread_registry::upper_bound() != bound {
            return None;
        }
        for tid in 0..bound {
            if self.activity.get(tid) != seen[tid] {
                return None;
            }
        }
        Some(sum)
    }

    /// Donate one scan attempt to a size stuck in the help protocol.
    fn help_size(&self) {
        let info = self.size_info.load_full();
        if info.get().is_some() {
            return;
        }
        if let Some(sum) = self.try_read() {
            info.install(sum);
        }
    }

    /// The cell this size should wait on: the unset one currently shared, or a fresh install.
    ///
    /// A cell that already carries a value belongs to a size that linearized before we got here;
    /// adopting it could hand us a stale answer, hence the fresh cell.
    fn fallback_cell(&self) -> Arc<SizeInfo> {
        loop {
            let current = self.size_info.load_full();
            if current.get().is_none() {
                return current;
            }
            let fresh = Arc::new(SizeInfo::new());
            let previous = self.size_info.compare_and_swap(&current, fresh.clone());
            if Arc::ptr_eq(&*previous, &current) {
                return fresh;
            }
        }
    }
}

impl Default for OptimisticSizeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeCalculator for OptimisticSizeCalculator {
    fn leave_barrier(&self) {
        if self.awaiting_sizes.load(Ordering::SeqCst) > 0 {
            self.help_size();
        }
    }

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Direct
    }

    fn fast_update_metadata(&self, kind: UpdateKind, tid: u32) {
        self.metadata.add(tid as usize, kind.delta());
    }

    fn block_size(&self, tid: u32) {
        self.activity.increment(tid as usize);
    }

    fn unblock_size(&self, tid: u32) {
        self.activity.increment(tid as usize);
    }

    fn compute(&self) -> i64 {
        for _ in 0..self.max_tries {
            if let Some(sum) = self.try_read() {
                return sum;
            }
        }

        let cell = self.fallback_cell();
        self.awaiting_sizes.fetch_add(1, Ordering::SeqCst);
        let size = loop {
            if let Some(value) = cell.get() {
                break value;
            }
            if let Some(sum) = self.try_read() {
                cell.install(sum);
                break cell.get().expect("cell was just installed");
            }
        };
        self.awaiting_sizes.fetch_sub(1, Ordering::SeqCst);
        size
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering as StdOrdering};

    fn update(calculator: &OptimisticSizeCalculator, kind: UpdateKind) {
        let tid = thread_registry::current_id();
        calculator.block_size(tid);
        calculator.fast_update_metadata(kind, tid);
        calculator.unblock_size(tid);
        calculator.leave_barrier();
    }

    #[test]
    fn sequential_counts() {
        std::thread::spawn(|| {
            let _guard = thread_registry::register().unwrap();
            let calculator = OptimisticSizeCalculator::new();

            assert_eq!(calculator.compute(), 0);
            update(&calculator, UpdateKind::Insert);
            update(&calculator, UpdateKind::Insert);
            update(&calculator, UpdateKind::Remove);
            assert_eq!(calculator.compute(), 1);
            assert_eq!(calculator.awaiting(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn every_update_is_exactly_two_activity_bumps() {
        std::thread::spawn(|| {
            let guard = thread_registry::register().unwrap();
            let calculator = OptimisticSizeCalculator::new();
            let tid = guard.id() as usize;

            for expected in 1..=5u64 {
                update(&calculator, UpdateKind::Insert);
                assert_eq!(calculator.activity.get(tid), 2 * expected);
            }
        })
        .join()
        .unwrap();
    }

    #[test]
    fn zero_tries_goes_straight_to_help() {
        std::thread::spawn(|| {
            let _guard = thread_registry::register().unwrap();
            let calculator = OptimisticSizeCalculator::with_max_tries(0);

            update(&calculator, UpdateKind::Insert);
            // No optimistic attempt is made; the fallback still self-serves.
            assert_eq!(calculator.compute(), 1);
            assert_eq!(calculator.awaiting(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn contended_sizes_settle_and_help_clears() {
        let calculator = Arc::new(OptimisticSizeCalculator::with_max_tries(2));
        let stop = Arc::new(AtomicBool::new(false));
        const UPDATERS: usize = 4;
        const ROUNDS: usize = 500;

        let mut workers = vec![];
        for _ in 0..UPDATERS {
            let calculator = calculator.clone();
            workers.push(std::thread::spawn(move || {
                let _guard = thread_registry::register().unwrap();
                for _ in 0..ROUNDS {
                    update(&calculator, UpdateKind::Insert);
                    update(&calculator, UpdateKind::Remove);
                    update(&calculator, UpdateKind::Insert);
                }
            }));
        }

        let mut sizers = vec![];
        for _ in 0..3 {
            let calculator = calculator.clone();
            let stop = stop.clone();
            sizers.push(std::thread::spawn(move || {
                let expected_max = (2 * UPDATERS * ROUNDS) as i64;
                while !stop.load(StdOrdering::SeqCst) {
                    let size = calculator.compute();
                    assert!((0..=expected_max).contains(&size), "size {size}");
                }
            }));
        }

        for worker in workers {
            worker.join().unwrap();
        }
        stop.store(true, StdOrdering::SeqCst);
        for sizer in sizers {
            sizer.join().unwrap();
        }

        assert_eq!(calculator.compute(), (UPDATERS * ROUNDS) as i64);
        assert_eq!(calculator.awaiting(), 0);
    }
}

//! The wait-free calculator.
//!
//! Every update is announced: the owner publishes an [`UpdateInfo`] on the node before its
//! linearizing store, commits the bump afterwards, and anyone who observed the node in between
//! commits it instead.  A size installs (or joins) a collecting [`CountersSnapshot`]; updaters that
//! commit while it is collecting forward their fresh value into it, so the collector never waits on
//! anyone — both sides are wait-free.
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::snapshot::CountersSnapshot;
use super::{SizeCalculator, UpdateMode};
use crate::padded_counters::KindCounters;
use crate::sync::Ordering;
use crate::thread_registry;
use crate::update_info::{UpdateInfo, UpdateKind};

pub struct SpSizeCalculator {
    metadata: KindCounters,
    snapshot: ArcSwap<CountersSnapshot>,
}

impl SpSizeCalculator {
    pub fn new() -> SpSizeCalculator {
        SpSizeCalculator {
            metadata: KindCounters::new(),
            snapshot: ArcSwap::from_pointee(CountersSnapshot::settled(0)),
        }
    }

    /// The snapshot the next size should collect into: the one already collecting if there is
    /// one (its deactivation lies in our future, so its result is valid for us too), otherwise a
    /// freshly installed one.
    fn active_snapshot(&self) -> Arc<CountersSnapshot> {
        loop {
            let current = self.snapshot.load_full();
            if current.is_collecting() {
                return current;
            }
            let fresh = Arc::new(CountersSnapshot::collecting());
            let previous = self.snapshot.compare_and_swap(&current, fresh.clone());
            if Arc::ptr_eq(&*previous, &current) {
                return fresh;
            }
        }
    }

    fn collect(&self, snapshot: &CountersSnapshot) -> i64 {
        snapshot.fill_from(&self.metadata);
        snapshot.deactivate();
        snapshot.install_size(snapshot.net_sum());
        snapshot
            .size()
            .expect("a deactivated snapshot always carries a size")
    }
}

impl Default for SpSizeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeCalculator for SpSizeCalculator {
    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Announced
    }

    fn create_update_info(&self, kind: UpdateKind) -> Arc<UpdateInfo> {
        let tid = thread_registry::current_id();
        let next = self.metadata.cell(tid as usize, kind).load(Ordering::SeqCst) + 1;
        Arc::new(UpdateInfo::new(tid, next))
    }

    fn update_metadata(&self, kind: UpdateKind, info: &UpdateInfo) {
        let cell = self.metadata.cell(info.tid() as usize, kind);
        let committed = info.counter();
        if cell.load(Ordering::SeqCst) == committed - 1 {
            // At most one of the racing helpers moves the counter.
            let _ = cell.compare_exchange(
                committed - 1,
                committed,
                Ordering::SeqCst,
                Ordering::Relaxed,
            );
        }

        let snapshot = self.snapshot.load();
        if snapshot.is_collecting() {
            snapshot.forward(info.tid() as usize, kind, committed);
        }
    }

    fn compute(&self) -> i64 {
        let snapshot = self.active_snapshot();
        self.collect(&snapshot)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering as StdOrdering};

    /// Run one announced update end to end, the way a set would.
    fn announced_update(calculator: &SpSizeCalculator, kind: UpdateKind) {
        let info = calculator.create_update_info(kind);
        calculator.update_metadata(kind, &info);
    }

    #[test]
    fn sequential_counts() {
        std::thread::spawn(|| {
            let _guard = thread_registry::register().unwrap();
            let calculator = SpSizeCalculator::new();

            assert_eq!(calculator.compute(), 0);
            for _ in 0..3 {
                announced_update(&calculator, UpdateKind::Insert);
            }
            assert_eq!(calculator.compute(), 3);
            announced_update(&calculator, UpdateKind::Remove);
            assert_eq!(calculator.compute(), 2);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn helpers_bump_at_most_once() {
        std::thread::spawn(|| {
            let _guard = thread_registry::register().unwrap();
            let calculator = Arc::new(SpSizeCalculator::new());
            let info = calculator.create_update_info(UpdateKind::Insert);

            let mut helpers = vec![];
            for _ in 0..8 {
                let calculator = calculator.clone();
                let info = info.clone();
                helpers.push(std::thread::spawn(move || {
                    calculator.update_metadata(UpdateKind::Insert, &info);
                }));
            }
            for helper in helpers {
                helper.join().unwrap();
            }

            assert_eq!(
                calculator
                    .metadata
                    .cell(info.tid() as usize, UpdateKind::Insert)
                    .load(Ordering::SeqCst),
                info.counter()
            );
            assert_eq!(calculator.compute(), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn counters_only_move_forward() {
        let calculator = Arc::new(SpSizeCalculator::new());
        let (tid_tx, tid_rx) = std::sync::mpsc::channel();

        let updater = {
            let calculator = calculator.clone();
            std::thread::spawn(move || {
                let guard = thread_registry::register().unwrap();
                tid_tx.send(guard.id()).unwrap();
                for _ in 0..2_000 {
                    announced_update(&calculator, UpdateKind::Insert);
                    announced_update(&calculator, UpdateKind::Remove);
                }
            })
        };

        let tid = tid_rx.recv().unwrap() as usize;
        let mut last = [0u64; 2];
        for _ in 0..2_000 {
            for kind in UpdateKind::BOTH {
                let seen = calculator.metadata.cell(tid, kind).load(Ordering::SeqCst);
                assert!(seen >= last[kind.index()]);
                last[kind.index()] = seen;
            }
        }
        updater.join().unwrap();
    }

    #[test]
    fn sizes_run_against_concurrent_updates() {
        let calculator = Arc::new(SpSizeCalculator::new());
        let stop = Arc::new(AtomicBool::new(false));
        const UPDATERS: usize = 4;
        const ROUNDS: usize = 500;

        let mut workers = vec![];
        for _ in 0..UPDATERS {
            let calculator = calculator.clone();
            workers.push(std::thread::spawn(move || {
                let _guard = thread_registry::register().unwrap();
                for _ in 0..ROUNDS {
                    announced_update(&calculator, UpdateKind::Insert);
                    announced_update(&calculator, UpdateKind::Remove);
                    announced_update(&calculator, UpdateKind::Insert);
                }
            }));
        }

        let sizer = {
            let calculator = calculator.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let expected_max = (UPDATERS * ROUNDS) as i64;
                while !stop.load(StdOrdering::SeqCst) {
                    let size = calculator.compute();
                    assert!((0..=expected_max).contains(&size), "size {size}");
                }
            })
        };

        for worker in workers {
            worker.join().unwrap();
        }
        stop.store(true, StdOrdering::SeqCst);
        sizer.join().unwrap();

        // Net of one per round per updater.
        assert_eq!(calculator.compute(), (UPDATERS * ROUNDS) as i64);
    }
}

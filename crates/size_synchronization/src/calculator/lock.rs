//! The lock-based calculator.
//!
//! The blunt instrument of the family: counter commits share the read side of a reader-writer
//! lock, and a size takes the write side, which makes writer acquisition a quiescence point —
//! every update has either committed before it or will commit after release.  Racing sizes elect
//! one writer by installing a fresh [`SizeInfo`] with a CAS; the losers spin on the winner's cell
//! instead of queueing on the lock.
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::size_info::SizeInfo;
use super::{SizeCalculator, UpdateMode};
use crate::padded_counters::KindCounters;
use crate::sync::{Ordering, RwLock};
use crate::thread_registry;
use crate::update_info::{UpdateInfo, UpdateKind};

pub struct LockSizeCalculator {
    metadata: KindCounters,
    lock: RwLock<()>,
    size_info: ArcSwap<SizeInfo>,
}

impl LockSizeCalculator {
    pub fn new() -> LockSizeCalculator {
        LockSizeCalculator {
            metadata: KindCounters::new(),
            lock: RwLock::new(()),
            size_info: ArcSwap::from_pointee(SizeInfo::with_value(0)),
        }
    }
}

impl Default for LockSizeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeCalculator for LockSizeCalculator {
    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Announced
    }

    fn create_update_info(&self, kind: UpdateKind) -> Arc<UpdateInfo> {
        let tid = thread_registry::current_id();
        let next = self.metadata.cell(tid as usize, kind).load(Ordering::SeqCst) + 1;
        Arc::new(UpdateInfo::new(tid, next))
    }

    fn update_metadata(&self, kind: UpdateKind, info: &UpdateInfo) {
        // Shared with every other committer; only a size excludes us.
        let _stamp = self.lock.read().unwrap();

        let cell = self.metadata.cell(info.tid() as usize, kind);
        let committed = info.counter();
        if cell.load(Ordering::SeqCst) == committed - 1 {
            let _ = cell.compare_exchange(
                committed - 1,
                committed,
                Ordering::SeqCst,
                Ordering::Relaxed,
            );
        }
    }

    fn compute(&self) -> i64 {
        let current = self.size_info.load_full();
        let fresh = Arc::new(SizeInfo::new());
        let previous = self.size_info.compare_and_swap(&current, fresh.clone());
        if Arc::ptr_eq(&*previous, &current) {
            // We won the install and do the work.
            let _writer = self.lock.write().unwrap();
            let mut total = 0i64;
            thread_registry::scan_ids(|tid| total += self.metadata.net(tid));
            fresh.install(total);
            total
        } else {
            // Whoever displaced us installed their cell after our invocation began, so their
            // result is linearizable for us as well.
            self.size_info.load_full().wait()
        }
    }
}

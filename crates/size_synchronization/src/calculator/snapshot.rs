//! The per-size snapshot of everyone's counters.
//!
//! A size operation installs one of these as "the" snapshot and fills its cells from the live
//! counters; an updater that commits while the snapshot is collecting forwards its fresh value into
//! the matching cell.  Cells only move forward (empty, then monotonically larger observations), so
//! collector and forwarders can race freely.  Clearing `collecting` freezes which updates the size
//! can still admit and is the linearization point of the size that owns the snapshot.
use crossbeam::utils::CachePadded;

use crate::padded_counters::KindCounters;
use crate::sync::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use crate::thread_registry::{self, MAX_THREADS};
use crate::update_info::UpdateKind;

/// Cell sentinel for "no observation yet". Counters can never reach it.
const EMPTY: u64 = u64::MAX;

const UNSET_SIZE: i64 = i64::MIN;

pub(crate) struct CountersSnapshot {
    cells: Box<[CachePadded<[AtomicU64; 2]>]>,
    /// Checked by every committing updater while the snapshot is current.
    collecting: CachePadded<AtomicBool>,
    /// Pre-aggregated fast-path contribution (handshake only; zero elsewhere).
    fast_size: AtomicI64,
    size: AtomicI64,
}

impl CountersSnapshot {
    /// A snapshot born collecting, all cells empty.
    pub fn collecting() -> CountersSnapshot {
        CountersSnapshot {
            cells: (0..MAX_THREADS)
                .map(|_| CachePadded::new([AtomicU64::new(EMPTY), AtomicU64::new(EMPTY)]))
                .collect(),
            collecting: CachePadded::new(AtomicBool::new(true)),
            fast_size: AtomicI64::new(0),
            size: AtomicI64::new(UNSET_SIZE),
        }
    }

    /// The settled snapshot a calculator starts with, so the first size installs a fresh one.
    pub fn settled(size: i64) -> CountersSnapshot {
        let snapshot = CountersSnapshot::collecting();
        snapshot.collecting.store(false, Ordering::SeqCst);
        snapshot.size.store(size, Ordering::SeqCst);
        snapshot
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    /// Publish an observation of `(tid, kind)`.
    ///
    /// Used by the collector with values read from the live counters and by updaters with the
    /// value they just committed; the larger observation wins, so a forwarded commit is admitted
    /// even when the collector scanned that cell first.
    pub fn forward(&self, tid: usize, kind: UpdateKind, value: u64) {
        let cell = &self.cells[tid][kind.index()];
        let mut seen = cell.load(Ordering::SeqCst);
        while seen == EMPTY || seen < value {
            match cell.compare_exchange(seen, value, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return,
                Err(current) => {
                    seen = current;
                    crate::sync::yield_if_loom();
                }
            }
        }
    }

    /// Fill every still-empty cell from the live counters, covering late-registered threads.
    pub fn fill_from(&self, counters: &KindCounters) {
        thread_registry::scan_ids(|tid| {
            for kind in UpdateKind::BOTH {
                if self.cells[tid][kind.index()].load(Ordering::SeqCst) == EMPTY {
                    let live = counters.cell(tid, kind).load(Ordering::SeqCst);
                    self.forward(tid, kind, live);
                }
            }
        });
    }

    pub fn set_fast_size(&self, value: i64) {
        self.fast_size.store(value, Ordering::SeqCst);
    }

    /// End collection. This is the owning size's linearization point.
    pub fn deactivate(&self) {
        self.collecting.store(false, Ordering::SeqCst);
    }

    /// Sum the collected cells plus the fast-path pre-aggregate. Untouched cells count as zero.
    pub fn net_sum(&self) -> i64 {
        let mut total = self.fast_size.load(Ordering::SeqCst);
        for cell in self.cells.iter() {
            for kind in UpdateKind::BOTH {
                let observed = cell[kind.index()].load(Ordering::SeqCst);
                if observed != EMPTY {
                    total += kind.delta() * observed as i64;
                }
            }
        }
        total
    }

    /// Install the computed size; first caller wins and everyone returns the winner's value.
    pub fn install_size(&self, value: i64) {
        let _ = self
            .size
            .compare_exchange(UNSET_SIZE, value, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn size(&self) -> Option<i64> {
        let value = self.size.load(Ordering::SeqCst);
        (value != UNSET_SIZE).then_some(value)
    }
}

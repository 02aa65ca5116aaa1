//! The handshake calculator.
//!
//! While no size is running, an update is a single `fetch_add` on the owner's signed fast counter
//! and nothing else — no announcement, no helping.  A size pays for that: it triggers the
//! [`IdleTimeDynamicBarrier`] into an odd phase and waits until every in-flight operation has
//! drained, at which point the fast counters are frozen (anything newly arriving registers into
//! the odd phase and takes the announcing slow path).  It then sums the fast counters into the
//! snapshot's pre-aggregate, collects the slow counters SP-style, deactivates the snapshot, and
//! triggers back to an even phase so updaters return to the fast path.
//!
//! Two phase transitions per size, by construction.  Sizes serialize on a coordinator mutex; an
//! interleaving of two barrier dances cannot be told apart from misuse of the barrier, so it is
//! simply not allowed.
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::snapshot::CountersSnapshot;
use super::{SizeCalculator, UpdateMode};
use crate::dynamic_barrier::IdleTimeDynamicBarrier;
use crate::padded_counters::{KindCounters, SignedCounters};
use crate::sync::{fence, Mutex, Ordering};
use crate::thread_registry;
use crate::update_info::{UpdateInfo, UpdateKind};

pub struct HandshakeSizeCalculator {
    barrier: IdleTimeDynamicBarrier,
    /// Fast-path contributions, one signed total per thread.
    fast: SignedCounters,
    /// Slow-path contributions, announced and helpable.
    slow: KindCounters,
    snapshot: ArcSwap<CountersSnapshot>,
    coordinator: Mutex<()>,
}

impl HandshakeSizeCalculator {
    pub fn new() -> HandshakeSizeCalculator {
        HandshakeSizeCalculator {
            barrier: IdleTimeDynamicBarrier::new(),
            fast: SignedCounters::new(),
            slow: KindCounters::new(),
            snapshot: ArcSwap::from_pointee(CountersSnapshot::settled(0)),
            coordinator: Mutex::new(()),
        }
    }

    /// The barrier, for observers that track phases.
    pub fn barrier(&self) -> &IdleTimeDynamicBarrier {
        &self.barrier
    }
}

impl Default for HandshakeSizeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeCalculator for HandshakeSizeCalculator {
    fn register_to_barrier(&self) {
        self.barrier
            .register(thread_registry::current_id() as usize);
    }

    fn leave_barrier(&self) {
        self.barrier.leave(thread_registry::current_id() as usize);
    }

    fn update_mode(&self) -> UpdateMode {
        // The phase this thread's registration landed in, not the global phase: a trigger may
        // already be underway, but it cannot linearize this operation's counters out from under a
        // registration it has to drain.
        let tid = thread_registry::current_id() as usize;
        if self.barrier.thread_phase(tid) & 1 == 0 {
            UpdateMode::Direct
        } else {
            UpdateMode::Announced
        }
    }

    fn create_update_info(&self, kind: UpdateKind) -> Arc<UpdateInfo> {
        let tid = thread_registry::current_id();
        let next = self.slow.cell(tid as usize, kind).load(Ordering::SeqCst) + 1;
        Arc::new(UpdateInfo::new(tid, next))
    }

    fn update_metadata(&self, kind: UpdateKind, info: &UpdateInfo) {
        let cell = self.slow.cell(info.tid() as usize, kind);
        let committed = info.counter();
        if cell.load(Ordering::SeqCst) == committed - 1 {
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

    fn fast_update_metadata(&self, kind: UpdateKind, tid: u32) {
        self.fast.add(tid as usize, kind.delta());
    }

    fn size_phase(&self) -> u64 {
        self.barrier.phase()
    }

    fn compute(&self) -> i64 {
        let _coordinator = self.coordinator.lock().unwrap();

        // Install before triggering, so a slow-path updater can never see a stale settled
        // snapshot while our collection is missing its commit.
        let snapshot = Arc::new(CountersSnapshot::collecting());
        self.snapshot.store(snapshot.clone());

        self.barrier.trigger();
        self.barrier.wait_quiescence();
        fence(Ordering::SeqCst);

        // Every operation that entered on the fast path has drained; nothing new can touch the
        // fast counters until the next even phase opens.
        let mut fast_total = 0i64;
        thread_registry::scan_ids(|tid| fast_total += self.fast.get(tid));
        snapshot.set_fast_size(fast_total);

        snapshot.fill_from(&self.slow);
        snapshot.deactivate();
        snapshot.install_size(snapshot.net_sum());
        let size = snapshot
            .size()
            .expect("a deactivated snapshot always carries a size");

        self.barrier.trigger();
        self.barrier.wait_quiescence();
        size
    }
}

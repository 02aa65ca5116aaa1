//! The single-size result cell shared by racing size operations.
//!
//! Holds either "not computed yet" or one computed size.  Racers CAS from unset to their value;
//! whoever loses adopts the winner's.  A size that must not share a result (because sharing could
//! hand it a value older than its own invocation) installs a fresh cell first.
use crossbeam::utils::CachePadded;

use crate::sync::{spin_loop, yield_if_loom, AtomicI64, Ordering};

const UNSET: i64 = i64::MIN;

pub(crate) struct SizeInfo {
    /// Spun on by losers and helpers; keep it off anyone else's line.
    size: CachePadded<AtomicI64>,
}

impl SizeInfo {
    pub fn new() -> SizeInfo {
        SizeInfo {
            size: CachePadded::new(AtomicI64::new(UNSET)),
        }
    }

    pub fn with_value(value: i64) -> SizeInfo {
        SizeInfo {
            size: CachePadded::new(AtomicI64::new(value)),
        }
    }

    pub fn install(&self, value: i64) {
        let _ = self
            .size
            .compare_exchange(UNSET, value, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<i64> {
        let value = self.size.load(Ordering::SeqCst);
        (value != UNSET).then_some(value)
    }

    /// Spin until some thread installs a value.
    pub fn wait(&self) -> i64 {
        loop {
            if let Some(value) = self.get() {
                return value;
            }
            spin_loop();
            yield_if_loom();
        }
    }
}

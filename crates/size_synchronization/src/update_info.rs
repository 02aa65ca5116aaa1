//! Pre-announcement records for counter bumps.
//!
//! On the announcing update path, a thread about to linearize an update first publishes an
//! [`UpdateInfo`] naming itself and the counter value its bump will produce.  The record travels on
//! the data-structure node (inserts) or in the node's removal slot (removes), so that any thread
//! observing the half-finished update can complete the bump on the owner's behalf.  The commit is
//! a CAS from `counter - 1` to `counter`, which makes helping idempotent: however many threads
//! race it, the counter moves exactly once per record.
use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// The two update kinds and their signed size contributions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Insert,
    Remove,
}

impl UpdateKind {
    pub const BOTH: [UpdateKind; 2] = [UpdateKind::Insert, UpdateKind::Remove];

    pub fn delta(self) -> i64 {
        match self {
            UpdateKind::Insert => 1,
            UpdateKind::Remove => -1,
        }
    }

    pub fn index(self) -> usize {
        match self {
            UpdateKind::Insert => 0,
            UpdateKind::Remove => 1,
        }
    }
}

/// An announced counter bump: thread `tid` will take its counter to `counter`.
///
/// Immutable once published. Shared by `Arc` between the node that carries it and every helper
/// that observed it.
#[derive(Debug)]
pub struct UpdateInfo {
    tid: u32,
    counter: u64,
}

impl UpdateInfo {
    pub fn new(tid: u32, counter: u64) -> UpdateInfo {
        UpdateInfo { tid, counter }
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

/// The slot a set embeds in its nodes to carry a pending [`UpdateInfo`].
///
/// The owner announces before its linearizing store and clears after the bump; readers peek and
/// help in between.  Readers hold the record through an `Arc`, so a clear racing a peek is safe.
pub struct UpdateInfoCell {
    slot: ArcSwapOption<UpdateInfo>,
}

impl UpdateInfoCell {
    pub fn empty() -> UpdateInfoCell {
        UpdateInfoCell {
            slot: ArcSwapOption::empty(),
        }
    }

    /// A cell born announcing, for nodes published with their insert pending.
    pub fn announcing(info: Arc<UpdateInfo>) -> UpdateInfoCell {
        UpdateInfoCell {
            slot: ArcSwapOption::from(Some(info)),
        }
    }

    pub fn announce(&self, info: Arc<UpdateInfo>) {
        self.slot.store(Some(info));
    }

    pub fn clear(&self) {
        self.slot.store(None);
    }

    pub fn pending(&self) -> Option<Arc<UpdateInfo>> {
        self.slot.load_full()
    }
}

//! The size calculators and the contract a set integrates against.
//!
//! A set parameterized over a [`SizeCalculator`] wires each of its operations to the hooks below.
//! The shape of every operation is:
//!
//! ```text
//! calculator.register_to_barrier();
//! match calculator.update_mode() {
//!     UpdateMode::Announced => {
//!         let info = calculator.create_update_info(kind);
//!         // publish the node carrying `info` (insert), or install `info` in the
//!         // node's removal slot (remove); that store is the linearization point
//!         calculator.update_metadata(kind, &info);
//!         // clear the slot
//!     }
//!     UpdateMode::Direct => {
//!         calculator.block_size(tid);
//!         // linearizing store, no announcement
//!         calculator.fast_update_metadata(kind, tid);
//!         calculator.unblock_size(tid);
//!     }
//! }
//! calculator.leave_barrier();
//! ```
//!
//! Reads follow the same bracket and must commit (via [`update_metadata`]) any pending
//! announcement they observe before returning.  `size` itself calls [`compute`] directly, outside
//! the bracket.
//!
//! [`update_metadata`]: SizeCalculator::update_metadata
//! [`compute`]: SizeCalculator::compute
use std::sync::Arc;

use crate::update_info::{UpdateInfo, UpdateKind};

mod handshake;
mod lock;
mod optimistic;
mod size_info;
mod snapshot;
mod sp;

pub use handshake::HandshakeSizeCalculator;
pub use lock::LockSizeCalculator;
pub use optimistic::OptimisticSizeCalculator;
pub use sp::SpSizeCalculator;

/// How the calculator wants the next update performed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    /// Pre-announce the counter bump on the node so observers can help complete it.
    Announced,
    /// No announcement; commit through [`SizeCalculator::fast_update_metadata`] inside the
    /// [`SizeCalculator::block_size`] / [`SizeCalculator::unblock_size`] bracket.
    Direct,
}

pub trait SizeCalculator: Send + Sync {
    /// Entry hook, called before anything else in a set operation.
    fn register_to_barrier(&self) {}

    /// Exit hook, called after the operation's result is determined.
    fn leave_barrier(&self) {}

    /// Decide the path for this operation.  Must be consulted after [`register_to_barrier`],
    /// because the answer can depend on the phase the registration landed in.
    ///
    /// [`register_to_barrier`]: SizeCalculator::register_to_barrier
    fn update_mode(&self) -> UpdateMode;

    /// Announce the calling thread's next update of `kind`.
    fn create_update_info(&self, kind: UpdateKind) -> Arc<UpdateInfo> {
        let _ = kind;
        unreachable!("this calculator never announces updates");
    }

    /// Commit an announced bump.  Helper-safe: any thread may call it with the same record any
    /// number of times, and the counter moves exactly once.
    fn update_metadata(&self, kind: UpdateKind, info: &UpdateInfo) {
        let _ = (kind, info);
        unreachable!("this calculator never announces updates");
    }

    /// Commit an unannounced update by the owning thread.
    fn fast_update_metadata(&self, kind: UpdateKind, tid: u32) {
        let _ = (kind, tid);
        unreachable!("this calculator never takes the direct path");
    }

    /// Open the calling thread's direct-update window. Paired with [`unblock_size`]; the pair
    /// leaves an odd/even trace that a concurrent size uses to avoid splitting a linearization
    /// from its counter commit.
    ///
    /// [`unblock_size`]: SizeCalculator::unblock_size
    fn block_size(&self, tid: u32) {
        let _ = tid;
    }

    /// Close the calling thread's direct-update window.
    fn unblock_size(&self, tid: u32) {
        let _ = tid;
    }

    /// The set's current size, linearizable to an instant between invocation and return.
    fn compute(&self) -> i64;

    /// The current size phase.  Even permits the fast path, odd requires the slow path; only the
    /// handshake calculator ever reports an odd value.
    fn size_phase(&self) -> u64 {
        0
    }
}

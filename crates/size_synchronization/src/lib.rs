//! Synchronization methodologies that add a linearizable `size` to concurrent sets.
//!
//! A concurrent set can answer `contains`/`insert`/`remove` scalably, but the obvious ways of
//! answering `size` are either wrong (a racy sum over buckets) or ruinous (stop the world).  This
//! crate provides the machinery to do it correctly: each participating thread keeps cache-padded
//! per-thread counters of its successful insertions and removals, and a *size calculator*
//! coordinates with in-flight updates so that the sum it returns is the set's cardinality at one
//! instant between the call and its return.
//!
//! Four calculators are provided, trading update overhead against size latency:
//!
//! - [`calculator::SpSizeCalculator`]: wait-free for both sides.  Updates pre-announce their
//!   counter bump on the node they touch so that anyone who observes the node can complete the
//!   bump; size collects a snapshot that concurrent updates forward into.
//! - [`calculator::HandshakeSizeCalculator`]: near-zero update overhead while no size is running.
//!   A size steers updaters through [`dynamic_barrier::IdleTimeDynamicBarrier`] from a plain
//!   per-thread counter onto the announcing path, collects, and steers them back.
//! - [`calculator::LockSizeCalculator`]: a reader-writer lock; updates share the read side for
//!   their counter commit, size takes the write side.
//! - [`calculator::OptimisticSizeCalculator`]: updates are two plain stores around a counter bump;
//!   size double-scans optimistically and, past a bounded retry count, is helped by the updaters
//!   themselves.
//!
//! The underlying set is not provided here; see the companion `sized_sets` crate for the
//! integration contract and a chaining hash set built on it.  Threads participate through
//! [`thread_registry`], which hands out small dense ids used to index every per-thread array.

pub mod calculator;
pub mod dynamic_barrier;
pub mod padded_counters;
mod sync;
pub mod thread_registry;
pub mod update_info;

//! A two-phase barrier for a dynamic set of threads.
//!
//! A coordinator drives the system through numbered phases.  Worker threads register while an
//! operation is in flight and leave when it completes; the coordinator calls [`trigger`] to open
//! the next phase and [`wait_quiescence`] to learn that every thread registered at trigger time has
//! crossed into it.  Even phases mean "fast path permitted", odd phases "slow path required"; the
//! handshake size calculator uses a trigger pair per size to drain fast-path updates before it
//! collects.
//!
//! The barrier is "idle-time" in the sense that a thread arriving after a trigger owes nothing for
//! the phase it missed: it joins the phase in progress (blocking until the previous one drains) and
//! behaves as if it had crossed with everyone else.
//!
//! # Representation
//!
//! Two packed 64-bit words, manipulated through plain value structs so every transition is a single
//! sequentially consistent CAS:
//!
//! - `sense_phase`: the phase counter in the low 63 bits, a one-bit *sense* in the top bit.  The
//!   barrier is inactive exactly when the sense equals the phase's parity; flipping the sense to
//!   match ("deactivation") is what releases blocked threads.
//! - `parity_waiting`: the trigger parity in the top bit, the count of registered threads in bits
//!   31..=62, the count of threads blocked on the current phase in the low 31 bits.  Packing all
//!   three lets [`trigger`] rotate the parity and zero the waiting count while reading the exact
//!   `(active, waiting)` it displaced, and lets a registering thread detect a trigger that is
//!   mid-flight (parity already rotated, phase not yet bumped).
//!
//! `waiting <= active` holds whenever a phase is active; whichever thread observes them equal
//! deactivates.  [`leave`] also attempts deactivation so that a coordinator spinning in
//! [`wait_quiescence`] is released when the last in-flight operation exits without blocking.
//!
//! [`trigger`]: IdleTimeDynamicBarrier::trigger
//! [`wait_quiescence`]: IdleTimeDynamicBarrier::wait_quiescence
//! [`leave`]: IdleTimeDynamicBarrier::leave
use crossbeam::utils::CachePadded;

use crate::sync::{spin_loop, yield_if_loom, AtomicU64, Ordering};
use crate::thread_registry::MAX_THREADS;

const FLAG_BIT: u64 = 1 << 63;
const WAITING_BITS: u32 = 31;
const WAITING_MASK: u64 = (1 << WAITING_BITS) - 1;

/// The phase counter plus the release sense.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct SensePhase {
    sense: bool,
    phase: u64,
}

impl SensePhase {
    fn unpack(word: u64) -> SensePhase {
        SensePhase {
            sense: word & FLAG_BIT != 0,
            phase: word & !FLAG_BIT,
        }
    }

    fn pack(&self) -> u64 {
        ((self.sense as u64) << 63) | self.phase
    }

    fn parity(&self) -> bool {
        self.phase & 1 == 1
    }

    fn inactive(&self) -> bool {
        self.sense == self.parity()
    }
}

/// The trigger parity plus both population counts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct ParityWaiting {
    parity: bool,
    active: u32,
    waiting: u32,
}

impl ParityWaiting {
    fn unpack(word: u64) -> ParityWaiting {
        ParityWaiting {
            parity: word & FLAG_BIT != 0,
            active: ((word & !FLAG_BIT) >> WAITING_BITS) as u32,
            waiting: (word & WAITING_MASK) as u32,
        }
    }

    fn pack(&self) -> u64 {
        debug_assert!(self.waiting as u64 <= WAITING_MASK);
        ((self.parity as u64) << 63) | ((self.active as u64) << WAITING_BITS) | self.waiting as u64
    }
}

pub struct IdleTimeDynamicBarrier {
    sense_phase: CachePadded<AtomicU64>,
    parity_waiting: CachePadded<AtomicU64>,
    /// The phase each thread last crossed into, indexed by registry id.
    thread_phases: Box<[CachePadded<AtomicU64>]>,
}

impl IdleTimeDynamicBarrier {
    pub fn new() -> IdleTimeDynamicBarrier {
        IdleTimeDynamicBarrier {
            sense_phase: CachePadded::new(AtomicU64::new(0)),
            parity_waiting: CachePadded::new(AtomicU64::new(0)),
            thread_phases: (0..MAX_THREADS)
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
        }
    }

    pub fn phase(&self) -> u64 {
        self.sense_phase().phase
    }

    pub fn thread_phase(&self, tid: usize) -> u64 {
        self.thread_phases[tid].load(Ordering::SeqCst)
    }

    fn sense_phase(&self) -> SensePhase {
        SensePhase::unpack(self.sense_phase.load(Ordering::SeqCst))
    }

    /// Join the barrier population, blocking first if a phase is mid-transition.
    ///
    /// On return the calling thread is in the newest phase and may act on its parity.
    pub fn register(&self, tid: usize) {
        loop {
            let sp = self.sense_phase();
            let word = self.parity_waiting.load(Ordering::SeqCst);
            let seen = ParityWaiting::unpack(word);

            // A trigger rotates the parity before it bumps the phase; a mismatch means one is in
            // flight and we already belong to the phase being opened.
            let mut phase = sp.phase;
            if seen.parity != sp.parity() {
                phase = sp.phase + 1;
            }
            let must_wait = sp.sense != (phase & 1 == 1);

            let mut next = seen;
            next.active += 1;
            if must_wait {
                next.waiting += 1;
            }

            if self
                .parity_waiting
                .compare_exchange(word, next.pack(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.thread_phases[tid].store(phase, Ordering::SeqCst);
                if must_wait {
                    self.block(phase);
                }
                return;
            }
            yield_if_loom();
        }
    }

    /// Drop out of the barrier population.
    pub fn leave(&self, tid: usize) {
        let _ = tid;
        let mut word = self.parity_waiting.load(Ordering::SeqCst);
        loop {
            let mut next = ParityWaiting::unpack(word);
            next.active -= 1;
            match self.parity_waiting.compare_exchange(
                word,
                next.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(current) => {
                    word = current;
                    yield_if_loom();
                }
            }
        }
        // If we were the last straggler of an active phase, release the blocked threads and the
        // coordinator ourselves; nobody else may be awake to do it.
        self.try_deactivate();
    }

    /// Cross into the current phase.
    ///
    /// No-op when the thread is already there.  A registered thread may lag the coordinator by at
    /// most one phase, because the coordinator waits for quiescence before triggering again.
    pub fn await_phase(&self, tid: usize) {
        let target = {
            let sp = self.sense_phase();
            let mine = self.thread_phases[tid].load(Ordering::SeqCst);
            if mine == sp.phase {
                return;
            }
            debug_assert_eq!(mine + 1, sp.phase);
            mine + 1
        };
        self.thread_phases[tid].store(target, Ordering::SeqCst);

        let mut word = self.parity_waiting.load(Ordering::SeqCst);
        loop {
            let mut next = ParityWaiting::unpack(word);
            next.waiting += 1;
            match self.parity_waiting.compare_exchange(
                word,
                next.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(current) => {
                    word = current;
                    yield_if_loom();
                }
            }
        }
        self.block(target);
    }

    /// Open the next phase.  Single coordinator at a time.
    ///
    /// Rotates the parity and zeroes the waiting count in one CAS (the registered population rolls
    /// over into the new phase), then bumps the phase.  With nobody registered the barrier
    /// deactivates before returning.
    pub fn trigger(&self) {
        let mut word = self.parity_waiting.load(Ordering::SeqCst);
        let displaced = loop {
            let seen = ParityWaiting::unpack(word);
            let next = ParityWaiting {
                parity: !seen.parity,
                active: seen.active,
                waiting: 0,
            };
            match self.parity_waiting.compare_exchange(
                word,
                next.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break seen,
                Err(current) => {
                    word = current;
                    yield_if_loom();
                }
            }
        };

        let mut sp_word = self.sense_phase.load(Ordering::SeqCst);
        loop {
            let sp = SensePhase::unpack(sp_word);
            let next = SensePhase {
                sense: sp.sense,
                phase: sp.phase + 1,
            };
            match self.sense_phase.compare_exchange(
                sp_word,
                next.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(current) => {
                    sp_word = current;
                    yield_if_loom();
                }
            }
        }

        if displaced.active == 0 {
            self.try_deactivate();
        }
    }

    /// Spin until the current phase has drained, i.e. every thread registered at trigger time has
    /// crossed or left.
    pub fn wait_quiescence(&self) {
        while !self.sense_phase().inactive() {
            self.try_deactivate();
            spin_loop();
            yield_if_loom();
        }
    }

    fn block(&self, phase: u64) {
        loop {
            let sp = self.sense_phase();
            if sp.sense == (phase & 1 == 1) {
                return;
            }
            self.try_deactivate();
            spin_loop();
            yield_if_loom();
        }
    }

    /// Flip the sense to match the phase parity if everyone registered is accounted for.
    ///
    /// Validated against both words: the parity check rejects a half-finished trigger, and the CAS
    /// on `sense_phase` rejects a phase that moved under us.
    fn try_deactivate(&self) {
        let sp_word = self.sense_phase.load(Ordering::SeqCst);
        let sp = SensePhase::unpack(sp_word);
        if sp.inactive() {
            return;
        }
        let pw = ParityWaiting::unpack(self.parity_waiting.load(Ordering::SeqCst));
        if pw.parity != sp.parity() || pw.waiting != pw.active {
            return;
        }
        let next = SensePhase {
            sense: sp.parity(),
            phase: sp.phase,
        };
        let _ = self.sense_phase.compare_exchange(
            sp_word,
            next.pack(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl Default for IdleTimeDynamicBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::{prop_assert_eq, proptest};

    proptest! {
        #[test]
        fn sense_phase_pack_unpack_inverses(word: u64) {
            let unpacked = SensePhase::unpack(word);
            prop_assert_eq!(unpacked.pack(), word);
        }

        #[test]
        fn parity_waiting_pack_unpack_inverses(word: u64) {
            let unpacked = ParityWaiting::unpack(word);
            prop_assert_eq!(unpacked.pack(), word);
        }
    }

    #[test]
    fn trigger_with_no_threads_deactivates_synchronously() {
        crate::sync::wrap_test(|| {
            let barrier = IdleTimeDynamicBarrier::new();
            assert_eq!(barrier.phase(), 0);

            barrier.trigger();
            assert_eq!(barrier.phase(), 1);
            assert!(barrier.sense_phase().inactive());

            barrier.trigger();
            assert_eq!(barrier.phase(), 2);
            assert!(barrier.sense_phase().inactive());
        });
    }
}

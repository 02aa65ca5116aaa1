//! Small dense thread identifiers for indexing per-thread counter arrays.
//!
//! Unlike [`std::thread::ThreadId`], these ids are reused: a departing thread returns its id to a
//! pool, and the lowest free id is handed out first, so the live ids stay densely packed near 0 and
//! a scanner can visit every counter by walking `[0, upper_bound())`.  The cost of reuse is a hard
//! cap: at most [`MAX_THREADS`] threads may be registered at once.
//!
//! The registry is process-wide.  A thread joins with [`register`], which stores the id in a
//! thread-local and returns a guard that deregisters on drop.  Counters indexed by a released id
//! stay readable; the contribution of a departed thread is still part of every future sum.
use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
// The registry is process-wide state behind a lazy_static, which loom cannot model; it sticks to
// std primitives even in loom builds.
use std::sync::atomic::{AtomicU32, Ordering};

/// Upper bound on simultaneously registered threads.
///
/// This sizes every per-thread array in the crate, so it is a compile-time constant rather than a
/// construction parameter.
pub const MAX_THREADS: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// All [`MAX_THREADS`] ids are currently held by live threads.
    #[error("all {MAX_THREADS} thread ids are in use")]
    ThreadCapExceeded,

    /// The calling thread already holds an id.
    #[error("this thread is already registered with id {0}")]
    AlreadyRegistered(u32),
}

struct IdPool {
    /// Least upper bound on every id ever issued. Monotone.
    next_id: u32,

    /// Released ids, lowest first.
    freed: BinaryHeap<Reverse<u32>>,
}

pub struct ThreadRegistry {
    pool: std::sync::Mutex<IdPool>,
    /// Mirror of `next_id` so scanners never take the pool lock.
    upper_bound: AtomicU32,
}

impl ThreadRegistry {
    pub fn new() -> ThreadRegistry {
        ThreadRegistry {
            pool: std::sync::Mutex::new(IdPool {
                next_id: 0,
                freed: BinaryHeap::new(),
            }),
            upper_bound: AtomicU32::new(0),
        }
    }

    fn allocate(&self) -> Result<u32, RegistryError> {
        let mut pool = self.pool.lock().unwrap();
        if let Some(Reverse(id)) = pool.freed.pop() {
            return Ok(id);
        }
        if pool.next_id as usize >= MAX_THREADS {
            return Err(RegistryError::ThreadCapExceeded);
        }
        let id = pool.next_id;
        pool.next_id += 1;
        self.upper_bound.store(pool.next_id, Ordering::SeqCst);
        Ok(id)
    }

    fn release(&self, id: u32) {
        self.pool.lock().unwrap().freed.push(Reverse(id));
    }

    fn upper_bound(&self) -> usize {
        self.upper_bound.load(Ordering::SeqCst) as usize
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    static ref REGISTRY: ThreadRegistry = ThreadRegistry::new();
}

std::thread_local! {
    static CURRENT_ID: Cell<Option<u32>> = const { Cell::new(None) };
}

/// A registered thread's membership. Dropping it returns the id to the pool.
pub struct Registration {
    id: u32,
    /// Ids are per-thread; the guard must be dropped where it was created.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Registration {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        deregister();
    }
}

/// Register the calling thread, assigning it the lowest free id.
pub fn register() -> Result<Registration, RegistryError> {
    CURRENT_ID.with(|current| {
        if let Some(id) = current.get() {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        let id = REGISTRY.allocate()?;
        current.set(Some(id));
        Ok(Registration {
            id,
            _not_send: std::marker::PhantomData,
        })
    })
}

/// Return the calling thread's id to the pool.
///
/// Idempotent: a second call (or a call on a thread that never registered) logs and returns, so a
/// manual `deregister` followed by a [`Registration`] drop is harmless.
pub fn deregister() {
    CURRENT_ID.with(|current| match current.take() {
        Some(id) => REGISTRY.release(id),
        None => log::warn!("deregister on a thread that holds no id"),
    })
}

/// The calling thread's id.
///
/// Panics if the thread is not registered; every per-thread code path requires an id.
pub fn current_id() -> u32 {
    try_current_id().expect("calling thread is not registered")
}

pub fn try_current_id() -> Option<u32> {
    CURRENT_ID.with(|current| current.get())
}

/// Least upper bound on every id ever issued; scan `[0, upper_bound())` to visit all counters.
pub fn upper_bound() -> usize {
    REGISTRY.upper_bound()
}

/// Visit every issued id, re-scanning the tail if registration grows the bound mid-scan.
///
/// A scanner that raced a late `register` would otherwise miss the new thread's counters; the
/// re-check makes the scan cover every id issued before it completes.
pub fn scan_ids(mut visit: impl FnMut(usize)) {
    let mut scanned = 0;
    loop {
        let bound = upper_bound();
        for tid in scanned..bound {
            visit(tid);
        }
        scanned = bound;
        if upper_bound() == bound {
            return;
        }
    }
}

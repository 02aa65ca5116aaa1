//! A chaining hash set integrated with a size calculator.
//!
//! Buckets are singly-linked chains of `Arc` nodes published through `arc-swap`: readers traverse
//! without taking anything, writers serialize per bucket on a small mutex.  A reader that lands on
//! a node mid-update sees the pending update record the writer parked there and commits the
//! counter bump itself before answering, so no answer ever gets ahead of the size bookkeeping.
//!
//! The write lock orders writers within a bucket; it is not what makes updates visible.  An insert
//! linearizes at the head store that publishes its node, an announcing remove at the store that
//! parks the removal record on the node, a direct remove at the unlink itself.
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;

use size_synchronization::calculator::{SizeCalculator, UpdateMode};
use size_synchronization::thread_registry;
use size_synchronization::update_info::{UpdateInfoCell, UpdateKind};

use crate::SizeSet;

struct Node {
    key: i64,
    next: ArcSwapOption<Node>,
    /// Pending insert announcement; the node is published carrying it.
    insert_info: UpdateInfoCell,
    /// Pending remove announcement; installing it is the removal's linearization point.
    remove_info: UpdateInfoCell,
}

struct Bucket {
    head: ArcSwapOption<Node>,
    write_lock: Mutex<()>,
}

pub struct SizedHashSet<C> {
    buckets: Box<[Bucket]>,
    hasher: ahash::RandomState,
    calculator: C,
}

impl<C: SizeCalculator> SizedHashSet<C> {
    pub fn new(buckets: usize, calculator: C) -> SizedHashSet<C> {
        assert!(buckets > 0);
        SizedHashSet {
            buckets: (0..buckets)
                .map(|_| Bucket {
                    head: ArcSwapOption::empty(),
                    write_lock: Mutex::new(()),
                })
                .collect(),
            hasher: ahash::RandomState::new(),
            calculator,
        }
    }

    /// The calculator this set was built over.
    pub fn calculator(&self) -> &C {
        &self.calculator
    }

    fn bucket(&self, key: i64) -> &Bucket {
        let slot = self.hasher.hash_one(key) as usize % self.buckets.len();
        &self.buckets[slot]
    }

    /// Commit anything the writer of this node left pending.  Returns whether the node is
    /// logically removed.
    fn help_node(&self, node: &Node) -> bool {
        if let Some(info) = node.insert_info.pending() {
            self.calculator.update_metadata(UpdateKind::Insert, &info);
        }
        if let Some(info) = node.remove_info.pending() {
            self.calculator.update_metadata(UpdateKind::Remove, &info);
            return true;
        }
        false
    }

    /// Lock-free membership walk; helps along the way.
    fn find(&self, key: i64) -> bool {
        let mut cursor = self.bucket(key).head.load_full();
        while let Some(node) = cursor {
            let removed = self.help_node(&node);
            if node.key == key {
                return !removed;
            }
            cursor = node.next.load_full();
        }
        false
    }

    /// Whether `key` is in the chain. Callers must hold the bucket's write lock, under which no
    /// announcement can be pending.
    fn chain_contains(bucket: &Bucket, key: i64) -> bool {
        let mut cursor = bucket.head.load_full();
        while let Some(node) = cursor {
            if node.key == key {
                return true;
            }
            cursor = node.next.load_full();
        }
        false
    }

    fn insert_locked(&self, bucket: &Bucket, key: i64, mode: UpdateMode) -> bool {
        let _writer = bucket.write_lock.lock().unwrap();
        if Self::chain_contains(bucket, key) {
            return false;
        }

        let next = ArcSwapOption::new(bucket.head.load_full());
        match mode {
            UpdateMode::Announced => {
                let info = self.calculator.create_update_info(UpdateKind::Insert);
                let node = Arc::new(Node {
                    key,
                    next,
                    insert_info: UpdateInfoCell::announcing(info.clone()),
                    remove_info: UpdateInfoCell::empty(),
                });
                // Publication is the linearization point; the node carries its announcement so
                // any observer can finish the commit.
                bucket.head.store(Some(node.clone()));
                self.calculator.update_metadata(UpdateKind::Insert, &info);
                node.insert_info.clear();
            }
            UpdateMode::Direct => {
                let node = Arc::new(Node {
                    key,
                    next,
                    insert_info: UpdateInfoCell::empty(),
                    remove_info: UpdateInfoCell::empty(),
                });
                let tid = thread_registry::current_id();
                self.calculator.block_size(tid);
                bucket.head.store(Some(node));
                self.calculator.fast_update_metadata(UpdateKind::Insert, tid);
                self.calculator.unblock_size(tid);
            }
        }
        true
    }

    fn remove_locked(&self, bucket: &Bucket, key: i64, mode: UpdateMode) -> bool {
        let _writer = bucket.write_lock.lock().unwrap();

        // Find the victim and its predecessor.
        let mut predecessor: Option<Arc<Node>> = None;
        let mut cursor = bucket.head.load_full();
        let victim = loop {
            match cursor {
                None => return false,
                Some(node) if node.key == key => break node,
                Some(node) => {
                    cursor = node.next.load_full();
                    predecessor = Some(node);
                }
            }
        };

        let unlink = |node: &Arc<Node>| {
            let after = node.next.load_full();
            match &predecessor {
                Some(previous) => previous.next.store(after),
                None => bucket.head.store(after),
            }
        };

        match mode {
            UpdateMode::Announced => {
                let info = self.calculator.create_update_info(UpdateKind::Remove);
                // Parking the record on the node is the linearizing mark; from here on every
                // reader treats the key as absent (and helps).
                victim.remove_info.announce(info.clone());
                self.calculator.update_metadata(UpdateKind::Remove, &info);
                unlink(&victim);
                victim.remove_info.clear();
            }
            UpdateMode::Direct => {
                let tid = thread_registry::current_id();
                self.calculator.block_size(tid);
                unlink(&victim);
                self.calculator.fast_update_metadata(UpdateKind::Remove, tid);
                self.calculator.unblock_size(tid);
            }
        }
        true
    }
}

impl<C: SizeCalculator> SizeSet for SizedHashSet<C> {
    fn contains(&self, key: i64) -> bool {
        self.calculator.register_to_barrier();
        let present = self.find(key);
        self.calculator.leave_barrier();
        present
    }

    fn insert(&self, key: i64) -> bool {
        self.calculator.register_to_barrier();
        let mode = self.calculator.update_mode();
        let inserted = self.insert_locked(self.bucket(key), key, mode);
        self.calculator.leave_barrier();
        inserted
    }

    fn remove(&self, key: i64) -> bool {
        self.calculator.register_to_barrier();
        let mode = self.calculator.update_mode();
        let removed = self.remove_locked(self.bucket(key), key, mode);
        self.calculator.leave_barrier();
        removed
    }

    fn size(&self) -> i32 {
        self.calculator
            .compute()
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    fn sum_of_keys(&self) -> i64 {
        self.calculator.register_to_barrier();
        let mut sum = 0i64;
        for bucket in self.buckets.iter() {
            let mut cursor = bucket.head.load_full();
            while let Some(node) = cursor {
                if !self.help_node(&node) {
                    sum += node.key;
                }
                cursor = node.next.load_full();
            }
        }
        self.calculator.leave_barrier();
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use size_synchronization::calculator::SpSizeCalculator;

    #[test]
    fn basic_membership() {
        std::thread::spawn(|| {
            let _guard = thread_registry::register().unwrap();
            let set = SizedHashSet::new(8, SpSizeCalculator::new());

            assert_eq!(set.size(), 0);
            assert!(!set.contains(3));

            assert!(set.insert(3));
            assert!(!set.insert(3));
            assert!(set.contains(3));
            assert_eq!(set.size(), 1);

            assert!(set.remove(3));
            assert!(!set.remove(3));
            assert!(!set.contains(3));
            assert_eq!(set.size(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn chains_survive_collisions() {
        std::thread::spawn(|| {
            let _guard = thread_registry::register().unwrap();
            // One bucket: everything collides.
            let set = SizedHashSet::new(1, SpSizeCalculator::new());

            for key in 0..20 {
                assert!(set.insert(key));
            }
            assert_eq!(set.size(), 20);
            assert_eq!(set.sum_of_keys(), (0..20).sum::<i64>());

            // Unlink from the middle, the head, and the tail of the chain.
            assert!(set.remove(10));
            assert!(set.remove(19));
            assert!(set.remove(0));
            assert_eq!(set.size(), 17);
            for key in 0..20 {
                assert_eq!(set.contains(key), !matches!(key, 0 | 10 | 19));
            }
        })
        .join()
        .unwrap();
    }
}

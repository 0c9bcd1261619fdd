//! LinearProbeTable: collision fallback below the last trie level.
//!
//! Every key in one table has the same full 32-bit hash, so there is nothing
//! left to index by; lookups scan. Tables are expected to stay small.
//!
//! Concurrency
//! - GET scans the currently published slot array without locking. A slot
//!   that is empty or not yet filled is just "not found yet".
//! - PUT, REMOVE and the reclamation passes hold the table mutex for the
//!   whole operation. Wrappers are built completely before being stored.
//! - Growth appends `CHUNK_SIZE` slots: the writer copies the slot contents
//!   into a longer array and publishes it. Indices are stable across growth,
//!   and a reader still scanning the old array sees a consistent earlier state.
//! - A reader that runs into a dead reference tries to unlink it with
//!   `try_lock`; if the table is busy it moves on.

use crate::entry::FibEntry;
use crate::reentrancy::DebugReentrancy;
use crate::strength::{RefStrength, Reference};
use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Slots appended whenever a full table needs room.
pub const CHUNK_SIZE: usize = 16;

type RefSlot<E> = ArcSwapOption<Reference<E>>;

pub(crate) struct LinearProbeTable<E> {
    hash: u32,
    slots: ArcSwap<Vec<RefSlot<E>>>,
    lock: Mutex<()>,
    reentrancy: DebugReentrancy,
}

fn empty_slots<E>(len: usize) -> Vec<RefSlot<E>> {
    (0..len).map(|_| ArcSwapOption::empty()).collect()
}

impl<E> LinearProbeTable<E> {
    /// A table for `hash`, seeded with the entry that already sat in the
    /// colliding slot and the newly created one.
    pub(crate) fn new(hash: u32, existing: Reference<E>, created: Reference<E>) -> Self {
        debug_assert_eq!(existing.hash(), hash);
        debug_assert_eq!(created.hash(), hash);
        let slots = empty_slots(CHUNK_SIZE);
        slots[0].store(Some(Arc::new(existing)));
        slots[1].store(Some(Arc::new(created)));
        Self {
            hash,
            slots: ArcSwap::from_pointee(slots),
            lock: Mutex::new(()),
            reentrancy: DebugReentrancy::new(),
        }
    }

    /// The full hash every entry in this table shares.
    pub(crate) fn hash(&self) -> u32 {
        self.hash
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.load().len()
    }

    /// Lock-free lookup.
    pub(crate) fn get<K>(&self, key: &K, generation: u64, size: &AtomicI64) -> Option<Arc<E>>
    where
        K: ?Sized,
        E: FibEntry<K>,
    {
        let slots = self.slots.load_full();
        for (index, slot) in slots.iter().enumerate() {
            let Some(reference) = slot.load_full() else {
                continue;
            };
            match reference.get() {
                Some(entry) if entry.is_like(key) => {
                    reference.touch(generation);
                    return Some(entry);
                }
                Some(_) => {}
                None => self.try_unlink_dead(index, &reference, size),
            }
        }
        None
    }

    /// Get-or-create under the table lock.
    pub(crate) fn put<K>(
        &self,
        key: &K,
        strength: RefStrength,
        generation: u64,
        new_entry: &dyn Fn(&K) -> E,
        size: &AtomicI64,
    ) -> Arc<E>
    where
        K: ?Sized,
        E: FibEntry<K>,
    {
        let _g = self.reentrancy.enter();
        let _lock = self.lock.lock();
        let slots = self.slots.load_full();
        let mut free = None;
        for (index, slot) in slots.iter().enumerate() {
            let Some(reference) = slot.load_full() else {
                free.get_or_insert(index);
                continue;
            };
            match reference.get() {
                Some(entry) if entry.is_like(key) => {
                    if strength.should_upgrade(&reference) {
                        let upgraded = reference.rewrap(strength, entry.clone(), generation);
                        slot.store(Some(Arc::new(upgraded)));
                    } else {
                        reference.touch(generation);
                    }
                    return entry;
                }
                Some(_) => {}
                None => {
                    slot.store(None);
                    size.fetch_sub(1, Ordering::Relaxed);
                    free.get_or_insert(index);
                }
            }
        }

        let entry = Arc::new(new_entry(key));
        debug_assert!(entry.is_like(key), "entry factory built an entry unlike its key");
        let reference = Arc::new(strength.wrap(entry.clone(), self.hash, generation));
        match free {
            Some(index) => slots[index].store(Some(reference)),
            None => self.grow_with(&slots, reference),
        }
        size.fetch_add(1, Ordering::Relaxed);
        entry
    }

    /// Unlink the entry like `key` under the table lock.
    pub(crate) fn remove<K>(&self, key: &K, size: &AtomicI64) -> Option<Arc<E>>
    where
        K: ?Sized,
        E: FibEntry<K>,
    {
        let _g = self.reentrancy.enter();
        let _lock = self.lock.lock();
        let slots = self.slots.load_full();
        for slot in slots.iter() {
            let Some(reference) = slot.load_full() else {
                continue;
            };
            match reference.get() {
                Some(entry) if entry.is_like(key) => {
                    slot.store(None);
                    size.fetch_sub(1, Ordering::Relaxed);
                    return Some(entry);
                }
                Some(_) => {}
                None => {
                    slot.store(None);
                    size.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
        None
    }

    /// Clears soft references older than `cutoff` (if given), then unlinks
    /// everything dead. Returns how many slots were unlinked.
    pub(crate) fn reclaim(&self, cutoff: Option<u64>, size: &AtomicI64) -> usize {
        let _g = self.reentrancy.enter();
        let _lock = self.lock.lock();
        let slots = self.slots.load_full();
        let mut unlinked = 0;
        for slot in slots.iter() {
            let Some(reference) = slot.load_full() else {
                continue;
            };
            if let Some(cutoff) = cutoff {
                reference.clear_older_than(cutoff);
            }
            if reference.is_cleared() {
                slot.store(None);
                size.fetch_sub(1, Ordering::Relaxed);
                unlinked += 1;
            }
        }
        unlinked
    }

    /// Live entries, in slot order.
    pub(crate) fn for_each_live(&self, mut f: impl FnMut(Arc<E>)) {
        let slots = self.slots.load_full();
        for slot in slots.iter() {
            if let Some(entry) = slot.load_full().and_then(|r| r.get()) {
                f(entry);
            }
        }
    }

    /// Read-path cleanup: skipped when the table is busy, and a no-op if a
    /// writer already replaced the slot.
    fn try_unlink_dead(&self, index: usize, dead: &Arc<Reference<E>>, size: &AtomicI64) {
        let Some(_lock) = self.lock.try_lock() else {
            return;
        };
        let slots = self.slots.load_full();
        let Some(slot) = slots.get(index) else {
            return;
        };
        let prev = slot.compare_and_swap(dead, None::<Arc<Reference<E>>>);
        if matches!(&*prev, Some(p) if Arc::ptr_eq(p, dead)) {
            size.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Publishes a copy of `slots` grown by one chunk, with `reference`
    /// in the first new slot. Caller holds the lock.
    fn grow_with(&self, slots: &[RefSlot<E>], reference: Arc<Reference<E>>) {
        let mut grown = empty_slots(slots.len() + CHUNK_SIZE);
        for (dst, src) in grown.iter_mut().zip(slots) {
            *dst = ArcSwapOption::new(src.load_full());
        }
        grown[slots.len()].store(Some(reference));
        tracing::trace!(
            hash = self.hash,
            capacity = grown.len(),
            "probe table grown"
        );
        self.slots.store(Arc::new(grown));
    }
}

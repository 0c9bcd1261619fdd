//! FibSet: the concurrent trie.
//!
//! Each node is `FANOUT` atomically swappable slots. A slot is empty, a leaf
//! reference to one entry, a child node one level deeper, or a linear probe
//! table once all hash bits are used up. Every structural transition is a
//! single compare-and-swap against the `Arc` observed by the preceding load;
//! holding that `Arc` keeps its address from being reused, so a successful
//! swap means nobody changed the slot in between. A thread that loses a swap
//! re-reads the slot and redoes its step.
//!
//! Slots only ever move forward: empty -> leaf -> child, or leaf -> probe
//! table at the last level. Leaves go back to empty on removal or when their
//! referent is found dead. Nodes and tables are never collapsed.

use crate::entry::{Entry, FibEntry};
use crate::fib_index::{fold_hash, index_of, FANOUT, FANOUT_BITS, MAX_DEPTH};
use crate::op::Op;
use crate::probe_table::LinearProbeTable;
use crate::reclaim::{Pressure, Reclaim};
use crate::strength::{RefStrength, Reference};
use arc_swap::ArcSwapOption;
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use core::ops::Deref;
use std::collections::hash_map::RandomState;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

enum Slot<E> {
    Leaf(Reference<E>),
    Child(Arc<Node<E>>),
    Probe(LinearProbeTable<E>),
}

type Cell<E> = ArcSwapOption<Slot<E>>;

struct Node<E> {
    slots: [Cell<E>; FANOUT],
}

impl<E> Node<E> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| ArcSwapOption::empty()),
        }
    }
}

/// Swaps `cell` from `current` to `new`; true if this call won.
fn cas<E>(cell: &Cell<E>, current: &Option<Arc<Slot<E>>>, new: Option<Arc<Slot<E>>>) -> bool {
    let prev = cell.compare_and_swap(current, new);
    match (&*prev, current) {
        (Some(p), Some(c)) => Arc::ptr_eq(p, c),
        (None, None) => true,
        _ => false,
    }
}

enum Step<E> {
    Done(Option<Arc<E>>),
    Descend(Arc<Node<E>>),
}

enum Visit<'a, E> {
    Leaf {
        cell: &'a Cell<E>,
        current: &'a Option<Arc<Slot<E>>>,
        reference: &'a Reference<E>,
    },
    Table(&'a LinearProbeTable<E>),
}

/// A concurrent set of entries, looked up by key.
///
/// `K` is the probe key type (may be unsized, e.g. `str`), `E` the stored
/// entry, `S` the hasher. Entries are created by the factory passed at
/// construction, only on PUT of an absent key, and handed out as `Arc<E>`.
///
/// Preconditions
/// - A key's hash must not change while it participates in the set.
/// - The factory must return an entry that `is_like` its key, and must not
///   call PUT/REMOVE on this set for a key with the same full hash (that
///   would re-enter a locked probe table; debug builds panic).
pub struct FibSet<K: ?Sized, E, S = RandomState> {
    root: ArcSwapOption<Node<E>>,
    size: AtomicI64,
    epoch: AtomicU64,
    new_entry: Box<dyn Fn(&K) -> E + Send + Sync>,
    hasher: S,
}

impl<K, E> FibSet<K, E>
where
    K: ?Sized + Hash,
    E: FibEntry<K>,
{
    pub fn new<F>(new_entry: F) -> Self
    where
        F: Fn(&K) -> E + Send + Sync + 'static,
    {
        Self::with_hasher(new_entry, RandomState::new())
    }
}

impl<K> Default for FibSet<K, Entry<K>>
where
    K: Clone + Eq + Hash + 'static,
{
    fn default() -> Self {
        Self::new(|k: &K| Entry::new(k.clone()))
    }
}

impl<K, E, S> FibSet<K, E, S>
where
    K: ?Sized + Hash,
    E: FibEntry<K>,
    S: BuildHasher,
{
    pub fn with_hasher<F>(new_entry: F, hasher: S) -> Self
    where
        F: Fn(&K) -> E + Send + Sync + 'static,
    {
        Self {
            root: ArcSwapOption::empty(),
            size: AtomicI64::new(0),
            epoch: AtomicU64::new(0),
            new_entry: Box::new(new_entry),
            hasher,
        }
    }

    /// The 32-bit code the trie indexes `key` by.
    pub fn hash_of(&self, key: &K) -> u32 {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        fold_hash(h.finish())
    }

    /// Lookup only; never creates.
    pub fn get(&self, key: &K) -> Option<Arc<E>> {
        self.execute(Op::Get, key, RefStrength::Strong)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Get-or-create. An existing entry held at a weaker tier is upgraded to
    /// `strength`; a stronger one is left as it is.
    pub fn put(&self, key: &K, strength: RefStrength) -> Arc<E> {
        let Some(entry) = self.execute(Op::Put, key, strength) else {
            unreachable!("put always yields an entry");
        };
        entry
    }

    pub fn put_strong(&self, key: &K) -> Arc<E> {
        self.put(key, RefStrength::Strong)
    }

    pub fn put_soft(&self, key: &K) -> Arc<E> {
        self.put(key, RefStrength::Soft)
    }

    pub fn put_weak(&self, key: &K) -> Arc<E> {
        self.put(key, RefStrength::Weak)
    }

    /// Unlinks the entry for `key` and returns it.
    pub fn remove(&self, key: &K) -> Option<Arc<E>> {
        self.execute(Op::Remove, key, RefStrength::Strong)
    }

    /// The general form behind `get`, `put` and `remove`. `strength` only
    /// matters for `Op::Put`. Returns `None` only for GET/REMOVE misses.
    pub fn execute(&self, op: Op, key: &K, strength: RefStrength) -> Option<Arc<E>> {
        let hash = self.hash_of(key);
        let mut node = self.root(op)?;
        let mut depth = 0;
        loop {
            assert!(depth < MAX_DEPTH, "trie descended past the last level");
            let index = index_of(hash, FANOUT_BITS, depth);
            match self.step(&node.slots[index], op, key, hash, strength, depth) {
                Step::Done(entry) => return entry,
                Step::Descend(child) => {
                    node = child;
                    depth += 1;
                }
            }
        }
    }

    /// Approximate number of live entries.
    ///
    /// Counts every successful insertion and unlink; while operations are in
    /// flight it may be off in either direction, and references reclaimed but
    /// not yet unlinked still count until a sweep or access finds them.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed).max(0) as u64
    }

    pub fn len_estimate(&self) -> usize {
        usize::try_from(self.size()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Current reclamation epoch; soft references touched in this epoch
    /// survive the next moderate pass.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Snapshot of every live entry, compared by identity.
    ///
    /// Not atomic across the set: each slot is read once, so entries added or
    /// removed during the walk may or may not appear.
    pub fn all_entries(&self) -> hashbrown::HashSet<EntryRef<E>> {
        let mut out = hashbrown::HashSet::with_capacity(self.len_estimate());
        self.walk(|visit| match visit {
            Visit::Leaf { reference, .. } => {
                if let Some(entry) = reference.get() {
                    out.insert(EntryRef(entry));
                }
            }
            Visit::Table(table) => table.for_each_live(|entry| {
                out.insert(EntryRef(entry));
            }),
        });
        out
    }

    /// Unlinks references whose referent is gone. Returns how many.
    pub fn sweep(&self) -> usize {
        let unlinked = self.unlink_dead(None);
        if unlinked > 0 {
            tracing::debug!(unlinked, remaining = self.size(), "swept dead references");
        }
        unlinked
    }

    /// Clears soft references according to `pressure`, advances the epoch,
    /// then unlinks everything dead. Strong entries are never touched; weak
    /// ones only go once their last holder is gone. Returns how many slots
    /// were unlinked.
    pub fn reclaim(&self, pressure: Pressure) -> usize {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        let cutoff = pressure.cutoff(epoch);
        let unlinked = self.unlink_dead(Some(cutoff));
        tracing::debug!(
            ?pressure,
            epoch,
            unlinked,
            remaining = self.size(),
            "reclamation pass"
        );
        unlinked
    }

    fn root(&self, op: Op) -> Option<Arc<Node<E>>> {
        if let Some(root) = self.root.load_full() {
            return Some(root);
        }
        if !op.creates() {
            return None;
        }
        let fresh = Arc::new(Node::new());
        let prev = self
            .root
            .compare_and_swap(&None::<Arc<Node<E>>>, Some(fresh.clone()));
        match &*prev {
            None => {
                tracing::trace!("root node allocated");
                Some(fresh)
            }
            Some(existing) => Some(existing.clone()),
        }
    }

    fn create(&self, key: &K) -> Arc<E> {
        let entry = Arc::new((self.new_entry)(key));
        debug_assert!(entry.is_like(key), "entry factory built an entry unlike its key");
        entry
    }

    /// Resolves `op` at one slot, retrying until a swap sticks or the
    /// outcome no longer depends on one.
    fn step(
        &self,
        cell: &Cell<E>,
        op: Op,
        key: &K,
        hash: u32,
        strength: RefStrength,
        depth: usize,
    ) -> Step<E> {
        loop {
            let current = cell.load_full();
            let Some(slot) = current.as_deref() else {
                if !op.creates() {
                    return Step::Done(None);
                }
                let entry = self.create(key);
                let leaf = Slot::Leaf(strength.wrap(entry.clone(), hash, self.epoch()));
                if cas(cell, &current, Some(Arc::new(leaf))) {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return Step::Done(Some(entry));
                }
                continue;
            };

            let reference = match slot {
                Slot::Child(child) => return Step::Descend(child.clone()),
                Slot::Probe(table) => {
                    assert_eq!(
                        table.hash(),
                        hash,
                        "probe table reached with a different hash"
                    );
                    let entry = match op {
                        Op::Get => table.get(key, self.epoch(), &self.size),
                        Op::Put => Some(table.put(
                            key,
                            strength,
                            self.epoch(),
                            &*self.new_entry,
                            &self.size,
                        )),
                        Op::Remove => table.remove(key, &self.size),
                    };
                    return Step::Done(entry);
                }
                Slot::Leaf(reference) => reference,
            };

            let Some(entry) = reference.get() else {
                // Reclaimed: unlink it, then look again whoever won.
                if cas(cell, &current, None) {
                    self.size.fetch_sub(1, Ordering::Relaxed);
                }
                continue;
            };

            if entry.is_like(key) {
                match op {
                    Op::Get => {
                        reference.touch(self.epoch());
                        return Step::Done(Some(entry));
                    }
                    Op::Put => {
                        if !strength.should_upgrade(reference) {
                            reference.touch(self.epoch());
                            return Step::Done(Some(entry));
                        }
                        let upgraded = reference.rewrap(strength, entry.clone(), self.epoch());
                        if cas(cell, &current, Some(Arc::new(Slot::Leaf(upgraded)))) {
                            return Step::Done(Some(entry));
                        }
                    }
                    Op::Remove => {
                        if cas(cell, &current, None) {
                            self.size.fetch_sub(1, Ordering::Relaxed);
                            return Step::Done(Some(entry));
                        }
                    }
                }
                continue;
            }

            // Another key shares this slot's path so far.
            if !op.creates() {
                return Step::Done(None);
            }

            if depth + 1 < MAX_DEPTH {
                let child = Node::new();
                child.slots[index_of(reference.hash(), FANOUT_BITS, depth + 1)]
                    .store(current.clone());
                let child = Arc::new(child);
                if cas(cell, &current, Some(Arc::new(Slot::Child(child.clone())))) {
                    tracing::trace!(depth = depth + 1, "split leaf into child node");
                    return Step::Descend(child);
                }
                continue;
            }

            debug_assert_eq!(reference.hash(), hash, "distinct hashes share a full path");
            let created = self.create(key);
            let epoch = self.epoch();
            let table = LinearProbeTable::new(
                hash,
                reference.rewrap(reference.strength(), entry, epoch),
                strength.wrap(created.clone(), hash, epoch),
            );
            if cas(cell, &current, Some(Arc::new(Slot::Probe(table)))) {
                self.size.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(hash, "full hash collision, probe table created");
                return Step::Done(Some(created));
            }
        }
    }

    /// Depth-first walk over every reachable leaf and probe table. Slot
    /// contents are read once each; concurrent changes are simply missed.
    fn walk(&self, mut visit: impl FnMut(Visit<'_, E>)) {
        let Some(root) = self.root.load_full() else {
            return;
        };
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for cell in node.slots.iter() {
                let current = cell.load_full();
                match current.as_deref() {
                    None => {}
                    Some(Slot::Child(child)) => stack.push(child.clone()),
                    Some(Slot::Probe(table)) => visit(Visit::Table(table)),
                    Some(Slot::Leaf(reference)) => visit(Visit::Leaf {
                        cell,
                        current: &current,
                        reference,
                    }),
                }
            }
        }
    }

    fn unlink_dead(&self, cutoff: Option<u64>) -> usize {
        let mut unlinked = 0;
        self.walk(|visit| match visit {
            Visit::Leaf {
                cell,
                current,
                reference,
            } => {
                if let Some(cutoff) = cutoff {
                    reference.clear_older_than(cutoff);
                }
                // Losing this swap means someone else already moved the slot on.
                if reference.is_cleared() && cas(cell, current, None) {
                    self.size.fetch_sub(1, Ordering::Relaxed);
                    unlinked += 1;
                }
            }
            Visit::Table(table) => unlinked += table.reclaim(cutoff, &self.size),
        });
        unlinked
    }
}

impl<K, E, S> Reclaim for FibSet<K, E, S>
where
    K: ?Sized + Hash,
    E: FibEntry<K> + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn sweep(&self) -> usize {
        FibSet::sweep(self)
    }

    fn reclaim(&self, pressure: Pressure) -> usize {
        FibSet::reclaim(self, pressure)
    }
}

impl<K: ?Sized, E, S> fmt::Debug for FibSet<K, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FibSet")
            .field("size", &self.size.load(Ordering::Relaxed))
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// An entry compared and hashed by identity, as returned by `all_entries`.
pub struct EntryRef<E>(Arc<E>);

impl<E> EntryRef<E> {
    pub fn as_arc(&self) -> &Arc<E> {
        &self.0
    }

    pub fn into_arc(self) -> Arc<E> {
        self.0
    }
}

impl<E> Deref for EntryRef<E> {
    type Target = E;
    fn deref(&self) -> &E {
        &self.0
    }
}

impl<E> Clone for EntryRef<E> {
    fn clone(&self) -> Self {
        EntryRef(self.0.clone())
    }
}

impl<E> PartialEq for EntryRef<E> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<E> Eq for EntryRef<E> {}

impl<E> Hash for EntryRef<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl<E: fmt::Debug> fmt::Debug for EntryRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//! fib-set: a concurrent trie set whose entries are held strongly, softly or
//! weakly, for process-wide caches of things that are expensive to build but
//! cheap to rebuild.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: many readers and writers, no global lock, graceful behaviour
//!   when keys collide, and caller-chosen eviction per entry.
//! - Layers:
//!   - `fib_index`: maps a 32-bit hash and a depth to a slot index with a
//!     Fibonacci multiplicative hash, `FANOUT_BITS` bits per level.
//!   - `strength`: `RefStrength` and `Reference<E>`, the strength-qualified
//!     handle that actually sits in a slot.
//!   - `probe_table`: `LinearProbeTable<E>`, a mutex-guarded growable array
//!     for keys whose full 32-bit hashes are equal.
//!   - `fib_set`: `FibSet<K, E, S>`, the trie. Nodes are arrays of
//!     atomically swappable slots; descent bottoms out at a leaf or a probe
//!     table.
//!   - `reclaim` / `sweeper`: memory-pressure passes that clear soft
//!     references, plus an optional background thread.
//!   - `string_cache`: a string interner built on the set.
//!
//! Constraints
//! - Lock-free on the trie: every slot transition is one compare-and-swap
//!   against the `Arc` read just before. Losers re-read and retry.
//! - Only PUT ever creates an entry, and only if the key is absent; under
//!   contention exactly one creation wins and all racers see that entry.
//! - Nodes are never collapsed. Empty slots are reused by later PUTs.
//! - The size counter is approximate while operations are in flight and
//!   never reported below zero.
//!
//! Collision handling
//! - The index function is a bijection on the 32-bit hash, so two keys can
//!   only share a path through all `MAX_DEPTH` levels if their hashes are
//!   equal. At that point the leaf is replaced by a `LinearProbeTable`
//!   tagged with that hash; reaching a table with a different hash is an
//!   invariant violation and panics.
//! - Tables only grow, in chunks of `CHUNK_SIZE` slots. GET scans them
//!   without taking the lock.
//!
//! Reference strengths
//! - Strong: kept until removed.
//! - Soft: kept until a reclamation pass clears it. Each set keeps an epoch
//!   counter; hits stamp soft references with the current epoch, and a
//!   `Pressure::Moderate` pass clears those not stamped since the previous
//!   pass. `Pressure::Severe` clears all of them.
//! - Weak: kept while somebody outside the set still holds the entry.
//! - PUT upgrades a weaker stored reference in place and never downgrades.
//!
//! Reentrancy policy
//! - The entry factory runs without any lock on the trie path. On the probe
//!   table path it runs under the table mutex; calling PUT/REMOVE on the
//!   same table from the factory would deadlock. Debug builds catch this
//!   with a thread-local reentrancy guard and panic instead.
//!
//! Notes and non-goals
//! - No exact size under concurrent mutation.
//! - Dead references are unlinked lazily: by the access that finds them, by
//!   `sweep`, or by a reclamation pass.
//! - Keys must hash the same for as long as they are in the set.

mod entry;
mod fib_index;
mod fib_set;
mod op;
mod probe_table;
mod probe_table_proptest;
mod reclaim;
mod reentrancy;
mod strength;
mod string_cache;
mod sweeper;

// Public surface
pub use entry::{Entry, FibEntry, KeyedEntry};
pub use fib_index::{fold_hash, index_of, FANOUT, FANOUT_BITS, GOLDEN_RATIO, MAX_DEPTH, MUL32};
pub use fib_set::{EntryRef, FibSet};
pub use op::Op;
pub use probe_table::CHUNK_SIZE;
pub use reclaim::{Pressure, Reclaim, Reclaimer, Registration};
pub use reentrancy::{DebugReentrancy, ReentrancyGuard};
pub use strength::{RefStrength, Reference};
pub use string_cache::{Interned, StringCache};
pub use sweeper::{Sweeper, SweeperBuilder, SweeperError};

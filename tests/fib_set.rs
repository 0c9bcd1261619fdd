// FibSet integration test suite.
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Singleton: at most one live entry per key, whoever wins the race.
// - Round trip: put/get/remove agree on entry identity.
// - Strength: upgrades are monotonic; strong entries survive every pass;
//   weak entries go with their last holder; soft ones under pressure.
// - Collisions: keys sharing a full hash all stay reachable past the
//   last trie level.
// - Size: once the set is quiescent, size() equals the live entry count.
use fib_set::{Entry, FibSet, Pressure, RefStrength, Sweeper, FANOUT, MAX_DEPTH};
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0x5eed
    }
}

// Keeps three hash bits so most keys land in shared probe tables.
#[derive(Clone, Default)]
struct NarrowBuildHasher;
#[derive(Default)]
struct NarrowHasher(u64);
impl BuildHasher for NarrowBuildHasher {
    type Hasher = NarrowHasher;
    fn build_hasher(&self) -> Self::Hasher {
        NarrowHasher::default()
    }
}
impl Hasher for NarrowHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = self.0.wrapping_mul(31).wrapping_add(b as u64);
        }
    }
    fn finish(&self) -> u64 {
        self.0 & 0x7
    }
}

type StrSet<S = std::collections::hash_map::RandomState> = FibSet<str, Entry<String>, S>;

fn string_set() -> StrSet {
    FibSet::new(|k: &str| Entry::new(k.to_string()))
}

fn colliding_set() -> StrSet<ConstBuildHasher> {
    FibSet::with_hasher(|k: &str| Entry::new(k.to_string()), ConstBuildHasher)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// Test: singleton-per-key under contention.
// Assumes: all threads start together behind a barrier.
// Verifies: every concurrent put for one key returns the same entry.
#[test]
fn concurrent_puts_observe_one_entry() {
    const THREADS: usize = 16;
    let set = Arc::new(string_set());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let set = set.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                set.put_strong("hot")
            })
        })
        .collect();
    let seen: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for e in &seen[1..] {
        assert!(Arc::ptr_eq(e, &seen[0]));
    }
    assert_eq!(set.size(), 1);
}

// Test: singleton-per-key on the probe table path.
// Assumes: a constant hasher sends every key down one path.
// Verifies: racing puts on colliding keys still yield one entry per key.
#[test]
fn concurrent_puts_on_colliding_keys_observe_one_entry_each() {
    const THREADS: usize = 8;
    const KEYS: usize = 24;
    let set = Arc::new(colliding_set());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let set = set.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                // Each thread walks the keys in a different order.
                (0..KEYS)
                    .map(|i| (i + t * 5) % KEYS)
                    .map(|i| (i, set.put_strong(&format!("c{i}"))))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut first: Vec<Option<Arc<Entry<String>>>> = vec![None; KEYS];
    for h in handles {
        for (i, e) in h.join().unwrap() {
            match &first[i] {
                Some(f) => assert!(Arc::ptr_eq(f, &e), "two entries for c{i}"),
                None => first[i] = Some(e),
            }
        }
    }
    assert_eq!(set.size(), KEYS as u64);
}

// Test: round trip.
// Verifies: put then get yields the same entry; remove then get yields None.
#[test]
fn put_get_remove_round_trip() {
    let set = string_set();
    let e = set.put_strong("k");
    assert!(Arc::ptr_eq(&set.get("k").unwrap(), &e));
    assert!(set.contains("k"));
    assert!(Arc::ptr_eq(&set.remove("k").unwrap(), &e));
    assert!(set.get("k").is_none());
    assert!(!set.contains("k"));
    assert!(set.is_empty());
}

// Test: strength monotonic upgrade.
// Assumes: the caller drops every handle before the reclamation pass.
// Verifies: weak-then-strong survives; weak-only is evicted.
#[test]
fn upgraded_entry_survives_reclamation_weak_only_does_not() {
    init_tracing();
    let set = string_set();
    let w = set.put_weak("upgraded");
    let s = set.put_strong("upgraded");
    assert!(Arc::ptr_eq(&w, &s));
    let only_weak = set.put_weak("weak-only");
    assert_eq!(set.size(), 2);
    drop((w, s, only_weak));

    assert_eq!(set.reclaim(Pressure::Severe), 1);
    assert!(set.get("upgraded").is_some());
    assert!(set.get("weak-only").is_none());
    assert_eq!(set.size(), 1);
}

// Test: no implicit downgrade.
// Verifies: a weaker put on a strong entry keeps it strong.
#[test]
fn weaker_put_never_downgrades() {
    let set = string_set();
    let s = set.put_strong("k");
    let w = set.put_weak("k");
    assert!(Arc::ptr_eq(&s, &w));
    drop((s, w));
    set.reclaim(Pressure::Severe);
    assert!(set.get("k").is_some());
}

// Test: soft references age by epoch.
// Assumes: a moderate pass clears soft references untouched since the
// previous pass.
// Verifies: one pass of grace; a touch buys another; severe clears all.
#[test]
fn soft_entries_age_across_moderate_passes() {
    let set = string_set();
    drop(set.put_soft("touched"));
    drop(set.put_soft("idle"));
    assert_eq!(set.epoch(), 0);

    assert_eq!(set.reclaim(Pressure::Moderate), 0);
    assert_eq!(set.epoch(), 1);
    assert!(set.get("touched").is_some());

    assert_eq!(set.reclaim(Pressure::Moderate), 1);
    assert!(set.get("idle").is_none());
    assert!(set.get("touched").is_some());

    assert_eq!(set.reclaim(Pressure::Severe), 1);
    assert!(set.is_empty());
}

fn assert_soft_put_rearms_after_pass<S: BuildHasher>(set: &StrSet<S>) {
    let held = set.put_soft("k");
    set.reclaim(Pressure::Severe);
    let again = set.put_soft("k");
    assert!(Arc::ptr_eq(&again, &held), "cleared soft entry duplicated");
    let size = set.size();
    drop((held, again));

    // Re-armed: only the next pass may take it.
    assert_eq!(set.sweep(), 0);
    assert!(set.get("k").is_some(), "soft entry vanished without a pass");
    assert_eq!(set.size(), size);
    assert_eq!(set.reclaim(Pressure::Severe), 1);
    assert!(set.get("k").is_none());
    assert_eq!(set.size(), size - 1);
}

// Test: soft put after a reclamation pass.
// Assumes: the pass cleared the set's own hold while a caller held the entry.
// Verifies: the same entry is returned, and the put restores the set's hold
// so the entry outlives its callers until the next pass.
#[test]
fn soft_put_after_pass_rearms_held_entry() {
    assert_soft_put_rearms_after_pass(&string_set());
}

// Test: same as above on the probe table path.
// Assumes: a constant hasher and a strong neighbour force a probe table.
#[test]
fn soft_put_after_pass_rearms_held_entry_in_probe_table() {
    let set = colliding_set();
    let _x = set.put_strong("x");
    assert_soft_put_rearms_after_pass(&set);
    assert!(set.get("x").is_some());
}

// Test: a weak put does not re-arm.
// Verifies: a cleared soft entry re-put at WEAK goes with its last holder.
#[test]
fn weak_put_after_pass_does_not_rearm() {
    let set = string_set();
    let held = set.put_soft("k");
    set.reclaim(Pressure::Severe);
    assert!(Arc::ptr_eq(&set.put_weak("k"), &held));
    drop(held);
    assert!(set.get("k").is_none());
    assert_eq!(set.size(), 0);
}

// Test: sweep unlinks only what is already dead.
#[test]
fn sweep_unlinks_dead_weak_entries() {
    let set = string_set();
    let keep = set.put_weak("keep");
    let gone = set.put_weak("gone");
    set.put_soft("soft");
    drop(gone);
    assert_eq!(set.sweep(), 1);
    assert_eq!(set.size(), 2);
    assert!(set.get("keep").is_some());
    assert!(set.get("soft").is_some());
    drop(keep);
}

// Test: collision fallback.
// Assumes: every key hashes to the same value.
// Verifies: more keys than MAX_DEPTH * FANOUT are all found by exact key.
#[test]
fn colliding_keys_beyond_trie_capacity_are_all_found() {
    init_tracing();
    let n = MAX_DEPTH * FANOUT + 40;
    let set = colliding_set();
    let held: Vec<_> = (0..n).map(|i| set.put_strong(&format!("key{i}"))).collect();
    assert_eq!(set.size(), n as u64);
    for (i, e) in held.iter().enumerate() {
        assert!(Arc::ptr_eq(&set.get(&format!("key{i}")).unwrap(), e));
    }
    assert!(set.get("absent").is_none());

    for i in (0..n).step_by(2) {
        assert!(set.remove(&format!("key{i}")).is_some());
    }
    assert_eq!(set.size(), (n / 2) as u64);
    for i in 0..n {
        assert_eq!(set.contains(&format!("key{i}")), i % 2 == 1);
    }
    assert_eq!(set.all_entries().len(), n / 2);
}

// Test: weak entries on the probe table path are reclaimed.
#[test]
fn colliding_weak_entries_are_reclaimed() {
    let set = colliding_set();
    let strong = set.put_strong("s");
    let weak: Vec<_> = (0..10).map(|i| set.put_weak(&format!("w{i}"))).collect();
    assert_eq!(set.size(), 11);
    drop(weak);
    assert_eq!(set.reclaim(Pressure::Moderate), 10);
    assert_eq!(set.size(), 1);
    assert!(Arc::ptr_eq(&set.get("s").unwrap(), &strong));
}

// Test: size estimate convergence.
// Assumes: no operations are in flight once all threads are joined.
// Verifies: size() equals the exact number of live entries.
#[test]
fn size_converges_after_concurrent_inserts_and_removes() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 400;
    let set = Arc::new(string_set());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let set = set.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    set.put_strong(&format!("{t}:{i}"));
                    // Overlapping keys shared by every thread.
                    set.put_strong(&format!("shared:{}", i % 50));
                }
                for i in (0..PER_THREAD).step_by(2) {
                    set.remove(&format!("{t}:{i}"));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let expected = THREADS * PER_THREAD / 2 + 50;
    assert_eq!(set.size(), expected as u64);
    assert_eq!(set.all_entries().len(), expected);
}

// Test: the a/b/c scenario.
// Verifies: a re-put after remove creates a new, distinct entry.
#[test]
fn abc_scenario() {
    let set = string_set();
    set.put_strong("a");
    let b = set.put_strong("b");
    set.put_strong("c");
    assert_eq!(set.size(), 3);

    assert!(set.remove("b").is_some());
    assert!(set.get("b").is_none());
    assert_eq!(set.size(), 2);

    let b2 = set.put("b", RefStrength::Soft);
    assert!(!Arc::ptr_eq(&b, &b2));
    assert_eq!(b2.key(), "b");
    assert_eq!(set.size(), 3);
}

// Test: Default set keyed by an owned type.
#[test]
fn default_set_clones_keys_into_entries() {
    let set: FibSet<u64, Entry<u64>> = FibSet::default();
    let e = set.put_strong(&42);
    assert_eq!(*e.key(), 42);
    assert!(Arc::ptr_eq(&set.get(&42).unwrap(), &e));
    assert!(set.get(&7).is_none());
}

// Test: all_entries snapshots by identity.
#[test]
fn all_entries_contains_every_live_entry_once() {
    let set = string_set();
    let held: Vec<_> = (0..100).map(|i| set.put_strong(&i.to_string())).collect();
    let all = set.all_entries();
    assert_eq!(all.len(), 100);
    for e in &held {
        assert!(all.iter().any(|r| Arc::ptr_eq(r.as_arc(), e)));
    }
}

// Test: background passes racing structural mutation.
// Assumes: a sweeper ticking every millisecond, alternating plain sweeps
// with moderate and severe passes, while mutators churn a shared key pool
// on a hasher that keeps three bits.
// Verifies: strong keys outside the churn pool are never lost, and once
// everything has stopped size() agrees with a walk of the live entries.
#[test]
fn size_converges_after_passes_race_mutation() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 2_000;
    const CHURN: usize = 48;
    const PINNED: usize = 16;
    const MIN_TICKS: usize = 16;
    init_tracing();

    let set: Arc<StrSet<NarrowBuildHasher>> = Arc::new(FibSet::with_hasher(
        |k: &str| Entry::new(k.to_string()),
        NarrowBuildHasher,
    ));
    for i in 0..PINNED {
        set.put_strong(&format!("pinned{i}"));
    }

    let ticks = Arc::new(AtomicUsize::new(0));
    let sweeper = {
        let ticks = ticks.clone();
        Sweeper::builder()
            .interval(Duration::from_millis(1))
            .pressure(move || match ticks.fetch_add(1, Ordering::Relaxed) % 4 {
                1 => Some(Pressure::Moderate),
                3 => Some(Pressure::Severe),
                _ => None,
            })
            .spawn(set.clone())
            .unwrap()
    };

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let set = set.clone();
            let barrier = barrier.clone();
            let ticks = ticks.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut held = Vec::new();
                // Keep mutating until the sweeper has made several passes.
                let mut round = 0;
                while round < ROUNDS || ticks.load(Ordering::Relaxed) < MIN_TICKS {
                    round += 1;
                    let k = format!("churn{}", (round * 7 + t * 13) % CHURN);
                    match (round + t) % 5 {
                        0 => held.push(set.put_strong(&k)),
                        1 => held.push(set.put_weak(&k)),
                        2 => held.push(set.put_soft(&k)),
                        3 => {
                            set.remove(&k);
                        }
                        _ => {
                            if let Some(e) = set.get(&k) {
                                assert_eq!(e.key(), &k);
                            }
                        }
                    }
                    if held.len() > 8 {
                        held.remove(0);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    sweeper.shutdown();
    assert!(ticks.load(Ordering::Relaxed) >= MIN_TICKS);

    set.sweep();
    let all = set.all_entries();
    assert_eq!(set.size() as usize, all.len());
    for i in 0..PINNED {
        assert!(set.get(&format!("pinned{i}")).is_some(), "pinned{i} lost");
    }
}

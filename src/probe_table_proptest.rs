#![cfg(test)]

// Property tests for LinearProbeTable kept inside the crate, since the table
// is not part of the public surface.

use crate::entry::Entry;
use crate::probe_table::LinearProbeTable;
use crate::strength::RefStrength;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

const HASH: u32 = 7;
const POOL: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

type E = Entry<String>;

#[derive(Clone, Debug)]
enum OpI {
    Put(usize, RefStrength),
    Get(usize),
    Remove(usize),
    Release(usize),
    Reclaim,
}

fn arb_strength() -> impl Strategy<Value = RefStrength> {
    proptest::sample::select(RefStrength::ALL.to_vec())
}

fn arb_ops() -> impl Strategy<Value = Vec<OpI>> {
    let idx = 0..POOL.len();
    let op = prop_oneof![
        3 => (idx.clone(), arb_strength()).prop_map(|(i, s)| OpI::Put(i, s)),
        2 => idx.clone().prop_map(OpI::Get),
        1 => idx.clone().prop_map(OpI::Remove),
        2 => idx.prop_map(OpI::Release),
        1 => Just(OpI::Reclaim),
    ];
    proptest::collection::vec(op, 1..80)
}

// What the table is expected to hold for one key.
struct Stored {
    strength: RefStrength,
    soft_cleared: bool,
    identity: Weak<E>,
}

struct Model {
    stored: HashMap<&'static str, Stored>,
    held: HashMap<&'static str, Arc<E>>,
}

impl Model {
    fn present(&self, k: &str) -> bool {
        match self.stored.get(k) {
            None => false,
            Some(s) => match s.strength {
                RefStrength::Strong => true,
                RefStrength::Soft if !s.soft_cleared => true,
                _ => s.identity.strong_count() > 0,
            },
        }
    }

    fn identity(&self, k: &str) -> Option<Arc<E>> {
        self.stored.get(k).and_then(|s| s.identity.upgrade())
    }
}

fn factory(k: &str) -> E {
    Entry::new(k.to_string())
}

// Property: the table behaves like a map from key to (strength, identity)
// where PUT never creates a second live entry, upgrades are monotonic, weak
// entries vanish with their last holder, and a severe reclamation pass
// leaves exactly the live entries counted.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_matches_model(ops in arb_ops()) {
        let size = AtomicI64::new(2);
        let seed0 = Arc::new(Entry::new("seed0".to_string()));
        let seed1 = Arc::new(Entry::new("seed1".to_string()));
        let table = LinearProbeTable::new(
            HASH,
            RefStrength::Strong.wrap(seed0, HASH, 0),
            RefStrength::Strong.wrap(seed1, HASH, 0),
        );
        let mut model = Model { stored: HashMap::new(), held: HashMap::new() };

        for op in ops {
            match op {
                OpI::Put(i, strength) => {
                    let k = POOL[i];
                    let existing = model.present(k).then(|| model.identity(k)).flatten();
                    let got = table.put(k, strength, 0, &factory, &size);
                    prop_assert_eq!(got.key().as_str(), k);
                    match existing {
                        Some(e) => {
                            prop_assert!(Arc::ptr_eq(&got, &e), "put must return the live entry");
                            let s = model.stored.get_mut(k).expect("present implies stored");
                            if strength > s.strength {
                                s.strength = strength;
                                s.soft_cleared = false;
                            } else if strength == s.strength {
                                // A soft put re-arms a cleared soft reference.
                                s.soft_cleared = false;
                            }
                        }
                        None => {
                            model.stored.insert(k, Stored {
                                strength,
                                soft_cleared: false,
                                identity: Arc::downgrade(&got),
                            });
                        }
                    }
                    model.held.insert(k, got);
                }
                OpI::Get(i) => {
                    let k = POOL[i];
                    let got = table.get(k, 0, &size);
                    prop_assert_eq!(got.is_some(), model.present(k));
                    if let Some(got) = got {
                        let e = model.identity(k).expect("present implies identity");
                        prop_assert!(Arc::ptr_eq(&got, &e));
                    }
                }
                OpI::Remove(i) => {
                    let k = POOL[i];
                    let present = model.present(k);
                    prop_assert_eq!(table.remove(k, &size).is_some(), present);
                    if present {
                        model.stored.remove(k);
                    }
                }
                OpI::Release(i) => {
                    model.held.remove(POOL[i]);
                }
                OpI::Reclaim => {
                    table.reclaim(Some(u64::MAX), &size);
                    for s in model.stored.values_mut() {
                        if s.strength == RefStrength::Soft {
                            s.soft_cleared = true;
                        }
                    }
                    let live: Vec<_> = model
                        .stored
                        .keys()
                        .copied()
                        .filter(|k| model.present(k))
                        .collect();
                    model.stored.retain(|k, _| live.contains(k));
                    prop_assert_eq!(size.load(Ordering::Relaxed), 2 + live.len() as i64);
                }
            }

            // Seeds are strong and never touched.
            prop_assert!(table.get("seed0", 0, &size).is_some());
        }

        let mut seen = Vec::new();
        table.for_each_live(|e| seen.push(e.key().clone()));
        let expected = POOL.iter().filter(|k| model.present(k)).count() + 2;
        prop_assert_eq!(seen.len(), expected);
    }
}

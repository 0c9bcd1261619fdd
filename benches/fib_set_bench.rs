use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use fib_set::{Entry, FibSet, StringCache};
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type StrSet<S = std::collections::hash_map::RandomState> = FibSet<str, Entry<String>, S>;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn string_set() -> StrSet {
    FibSet::new(|k: &str| Entry::new(k.to_string()))
}

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
        0
    }
}

fn bench_put(c: &mut Criterion) {
    c.bench_function("fib_set_put_10k", |b| {
        let keys: Vec<_> = lcg(1).take(10_000).map(key).collect();
        b.iter_batched(
            string_set,
            |set| {
                for k in &keys {
                    set.put_strong(k);
                }
                black_box(set)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("fib_set_get_hit", |b| {
        let set = string_set();
        let keys: Vec<_> = lcg(7).take(20_000).map(key).collect();
        for k in &keys {
            set.put_strong(k);
        }
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(set.get(k).unwrap());
        })
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("fib_set_get_miss", |b| {
        let set = string_set();
        for x in lcg(11).take(10_000) {
            set.put_strong(&key(x));
        }
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            // generate keys unlikely in set
            let k = key(miss.next().unwrap());
            black_box(set.get(&k));
        })
    });
}

fn bench_collision_path(c: &mut Criterion) {
    c.bench_function("fib_set_probe_table_get_64", |b| {
        let set: StrSet<ConstBuildHasher> =
            FibSet::with_hasher(|k: &str| Entry::new(k.to_string()), ConstBuildHasher);
        let keys: Vec<_> = lcg(3).take(64).map(key).collect();
        for k in &keys {
            set.put_strong(k);
        }
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(set.get(k).unwrap());
        })
    });
}

fn bench_contended_put(c: &mut Criterion) {
    c.bench_function("fib_set_put_contended_4x1k", |b| {
        let keys: Arc<Vec<_>> = Arc::new(lcg(5).take(1_000).map(key).collect());
        b.iter_batched(
            || Arc::new(string_set()),
            |set| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        let set = set.clone();
                        let keys = keys.clone();
                        thread::spawn(move || {
                            for k in keys.iter() {
                                set.put_strong(k);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
                black_box(set)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_intern(c: &mut Criterion) {
    c.bench_function("string_cache_intern_hit", |b| {
        let cache = StringCache::new();
        let keys: Vec<_> = lcg(13).take(1_000).map(key).collect();
        let _held: Vec<_> = keys.iter().map(|k| cache.intern(k)).collect();
        let mut it = keys.iter().cycle();
        b.iter(|| black_box(cache.intern(it.next().unwrap())))
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_put, bench_get_hit, bench_get_miss, bench_collision_path,
        bench_contended_put, bench_intern
}
criterion_main!(benches);

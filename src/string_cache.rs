//! String interning on top of `FibSet`.
//!
//! Equal strings interned through the same cache share one allocation for as
//! long as the cache holds them. The strength used for interning decides how
//! long that is: strong until removed, soft until memory pressure, weak until
//! the last `Interned` handle is dropped.

use crate::entry::Entry;
use crate::fib_set::FibSet;
use crate::reclaim::{Pressure, Reclaim, Reclaimer};
use crate::strength::RefStrength;
use core::fmt;
use core::ops::Deref;
use std::sync::{Arc, LazyLock};

type StrEntry = Entry<Box<str>>;

/// A shared, interned string.
#[derive(Clone)]
pub struct Interned(Arc<StrEntry>);

impl Interned {
    pub fn as_str(&self) -> &str {
        self.0.key()
    }

    /// True if both handles point at the same interned allocation.
    pub fn ptr_eq(&self, other: &Interned) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Interned {
    type Target = str;
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for Interned {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for Interned {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.as_str() == other.as_str()
    }
}

impl Eq for Interned {}

impl PartialEq<str> for Interned {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Interned {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl core::hash::Hash for Interned {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for Interned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Interned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// A concurrent string interner.
pub struct StringCache {
    set: FibSet<str, StrEntry>,
    empty: Interned,
}

static GLOBAL: LazyLock<Arc<StringCache>> = LazyLock::new(|| {
    let cache = Arc::new(StringCache::new());
    Reclaimer::global().register(&cache).detach();
    cache
});

impl StringCache {
    pub fn new() -> Self {
        Self {
            set: FibSet::new(|s: &str| Entry::new(Box::from(s))),
            empty: Interned(Arc::new(Entry::new(Box::from("")))),
        }
    }

    /// The process-wide cache, registered with `Reclaimer::global()`.
    pub fn global() -> &'static Arc<StringCache> {
        &GLOBAL
    }

    /// Already interned `s`, if any. Never interns.
    pub fn get(&self, s: &str) -> Option<Interned> {
        if s.is_empty() {
            return Some(self.empty.clone());
        }
        self.set.get(s).map(Interned)
    }

    pub fn intern(&self, s: &str) -> Interned {
        self.intern_with(s, RefStrength::Strong)
    }

    pub fn intern_soft(&self, s: &str) -> Interned {
        self.intern_with(s, RefStrength::Soft)
    }

    pub fn intern_weak(&self, s: &str) -> Interned {
        self.intern_with(s, RefStrength::Weak)
    }

    pub fn intern_with(&self, s: &str, strength: RefStrength) -> Interned {
        if s.is_empty() {
            return self.empty.clone();
        }
        Interned(self.set.put(s, strength))
    }

    /// Drops the cache's hold on `s`. Outstanding handles stay valid. The
    /// empty string is never stored, so removing it returns false.
    pub fn remove(&self, s: &str) -> bool {
        !s.is_empty() && self.set.remove(s).is_some()
    }

    pub fn len_estimate(&self) -> usize {
        self.set.len_estimate()
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Reclaim for StringCache {
    fn sweep(&self) -> usize {
        self.set.sweep()
    }

    fn reclaim(&self, pressure: Pressure) -> usize {
        self.set.reclaim(pressure)
    }
}

impl fmt::Debug for StringCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringCache")
            .field("len_estimate", &self.len_estimate())
            .finish()
    }
}

//! Entries: what the set stores, and how a raw key is matched against them.

use arc_swap::ArcSwapOption;
use core::borrow::Borrow;
use core::fmt;
use core::ptr;
use std::sync::Arc;

/// Key-to-entry matching used by the set instead of entry-to-entry equality.
///
/// The set probes with a borrowed `&K` and never builds a throwaway entry for
/// it. Entry kinds may override the comparison, e.g. to match on a
/// normalised form of the key.
pub trait FibEntry<K: ?Sized> {
    fn is_like(&self, key: &K) -> bool;
}

/// Plain entry: an immutable key.
pub struct Entry<K> {
    key: K,
}

impl<K> Entry<K> {
    pub fn new(key: K) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn into_key(self) -> K {
        self.key
    }
}

impl<K, Q> FibEntry<Q> for Entry<K>
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    #[inline]
    fn is_like(&self, key: &Q) -> bool {
        self.key.borrow() == key
    }
}

impl<K: fmt::Debug> fmt::Debug for Entry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entry").field(&self.key).finish()
    }
}

/// Entry with a value slot, which turns a set of these into a concurrent map.
///
/// The key is immutable; the value is swapped atomically. Values are handed
/// out as `Arc<V>` and `compare_and_set` compares by identity, not by `Eq`.
pub struct KeyedEntry<K, V> {
    key: K,
    value: ArcSwapOption<V>,
}

impl<K, V> KeyedEntry<K, V> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            value: ArcSwapOption::empty(),
        }
    }

    pub fn with_value(key: K, value: V) -> Self {
        Self {
            key,
            value: ArcSwapOption::from_pointee(value),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn get_value(&self) -> Option<Arc<V>> {
        self.value.load_full()
    }

    /// Stores `value` and returns the previous one.
    pub fn set_value(&self, value: V) -> Option<Arc<V>> {
        self.value.swap(Some(Arc::new(value)))
    }

    /// Clears the value slot and returns what it held.
    pub fn take_value(&self) -> Option<Arc<V>> {
        self.value.swap(None)
    }

    /// Replaces the value with `new` only if the slot still holds exactly
    /// `expected` (pointer identity; `None` means empty).
    pub fn compare_and_set(&self, expected: Option<&Arc<V>>, new: Option<Arc<V>>) -> bool {
        let current: *const V = expected.map_or(ptr::null(), Arc::as_ptr);
        let prev = self.value.compare_and_swap(current, new);
        let prev: *const V = (*prev).as_ref().map_or(ptr::null(), Arc::as_ptr);
        prev == current
    }
}

impl<K, V, Q> FibEntry<Q> for KeyedEntry<K, V>
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    #[inline]
    fn is_like(&self, key: &Q) -> bool {
        self.key.borrow() == key
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for KeyedEntry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedEntry")
            .field("key", &self.key)
            .field("value", &self.value.load_full())
            .finish()
    }
}

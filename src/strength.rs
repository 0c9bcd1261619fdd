//! Reference strength: how firmly the set holds on to an entry.
//!
//! There is no tracing collector underneath, so the three tiers are an
//! explicit policy rather than a runtime service:
//!
//! - `Strong` holds an `Arc<E>`; the set alone keeps the entry alive.
//! - `Soft` holds a clearable `Arc<E>` plus a generation tag. Only a
//!   reclamation pass under memory pressure clears it, least recently
//!   touched generation first (see `reclaim::Pressure`). A cleared soft
//!   reference behaves like a weak one: the entry stays reachable while a
//!   caller still holds it.
//! - `Weak` holds a `std::sync::Weak<E>`: the entry goes away as soon as
//!   the last caller drops it, without any pass running.
//!
//! Every wrapper also remembers the 32-bit hash of its key so it can be moved
//! into a deeper node without hashing the key again.

use arc_swap::ArcSwapOption;
use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Ordered weakest to strongest, so `a > b` reads "a is stronger than b".
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum RefStrength {
    Weak,
    Soft,
    Strong,
}

impl RefStrength {
    pub const ALL: [RefStrength; 3] = [RefStrength::Weak, RefStrength::Soft, RefStrength::Strong];

    /// True if `existing` must be re-wrapped to hold at `self`: it is a
    /// weaker tier, or a soft reference a reclamation pass has cleared.
    /// Upgrades are monotonic: a weaker request never downgrades.
    #[inline]
    pub fn should_upgrade<E>(self, existing: &Reference<E>) -> bool {
        let held = existing.strength();
        self > held || (self == held && !existing.is_armed())
    }

    /// Wraps `entry` for storage at this strength.
    pub fn wrap<E>(self, entry: Arc<E>, hash: u32, generation: u64) -> Reference<E> {
        let holder = match self {
            RefStrength::Strong => Holder::Strong(entry),
            RefStrength::Soft => Holder::Soft {
                weak: Arc::downgrade(&entry),
                strong: ArcSwapOption::new(Some(entry)),
            },
            RefStrength::Weak => Holder::Weak(Arc::downgrade(&entry)),
        };
        Reference {
            hash,
            generation: AtomicU64::new(generation),
            holder,
        }
    }
}

enum Holder<E> {
    Strong(Arc<E>),
    Soft {
        strong: ArcSwapOption<E>,
        weak: Weak<E>,
    },
    Weak(Weak<E>),
}

/// A strength-qualified handle to an entry, as stored in a set slot.
///
/// Wrappers are built completely before they are published to a slot and
/// are never modified in place, apart from a soft wrapper being cleared and
/// its generation being refreshed.
pub struct Reference<E> {
    hash: u32,
    generation: AtomicU64,
    holder: Holder<E>,
}

impl<E> Reference<E> {
    pub fn strength(&self) -> RefStrength {
        match self.holder {
            Holder::Strong(_) => RefStrength::Strong,
            Holder::Soft { .. } => RefStrength::Soft,
            Holder::Weak(_) => RefStrength::Weak,
        }
    }

    /// Hash of the key the entry was created for.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// The referent, or `None` once it has been reclaimed.
    pub fn get(&self) -> Option<Arc<E>> {
        match &self.holder {
            Holder::Strong(e) => Some(e.clone()),
            Holder::Soft { strong, weak } => strong.load_full().or_else(|| weak.upgrade()),
            Holder::Weak(w) => w.upgrade(),
        }
    }

    /// False only for a soft reference whose own hold a reclamation pass
    /// has dropped; it then keeps the entry only while callers do.
    pub fn is_armed(&self) -> bool {
        match &self.holder {
            Holder::Soft { strong, .. } => strong.load().is_some(),
            _ => true,
        }
    }

    pub fn is_cleared(&self) -> bool {
        match &self.holder {
            Holder::Strong(_) => false,
            Holder::Soft { weak, .. } => weak.strong_count() == 0,
            Holder::Weak(w) => w.strong_count() == 0,
        }
    }

    /// Marks a soft reference as used in `generation`.
    #[inline]
    pub(crate) fn touch(&self, generation: u64) {
        if let Holder::Soft { .. } = self.holder {
            self.generation.fetch_max(generation, Ordering::Relaxed);
        }
    }

    /// Clears a soft reference last touched before `cutoff`. Returns true if
    /// this call dropped the set's hold on the referent.
    pub(crate) fn clear_older_than(&self, cutoff: u64) -> bool {
        match &self.holder {
            Holder::Soft { strong, .. } if self.generation() < cutoff => {
                strong.swap(None).is_some()
            }
            _ => false,
        }
    }

    /// A new wrapper for the same key at `strength`, pointing at `entry`.
    pub(crate) fn rewrap(&self, strength: RefStrength, entry: Arc<E>, generation: u64) -> Self {
        strength.wrap(entry, self.hash, generation.max(self.generation()))
    }
}

impl<E> fmt::Debug for Reference<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("strength", &self.strength())
            .field("hash", &format_args!("{:#010x}", self.hash))
            .field("generation", &self.generation())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

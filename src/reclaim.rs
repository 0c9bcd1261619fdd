//! Memory-pressure driven reclamation.
//!
//! Soft references are only ever cleared here. A `Reclaimer` is the
//! process-wide pressure signal: sets register with it, and whoever observes
//! memory pressure (an allocator hook, a cgroup watcher, the `Sweeper`)
//! calls `signal`, which runs a reclamation pass on every live target.
//!
//! Registrations are generational `slotmap` keys over `Weak` handles, so a
//! dropped set neither leaks nor needs to unregister explicitly; its stale
//! slot is pruned on the next fan-out.

use parking_lot::Mutex;
use slotmap::{DefaultKey, SlotMap};
use std::sync::{Arc, LazyLock, Weak};

/// How hard a reclamation pass should squeeze soft references.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Pressure {
    /// Clear soft references not touched since the previous pass.
    Moderate,
    /// Clear every soft reference.
    Severe,
}

impl Pressure {
    /// Soft references with a generation below the returned cutoff are
    /// cleared by a pass that starts in `epoch`.
    pub fn cutoff(self, epoch: u64) -> u64 {
        match self {
            Pressure::Moderate => epoch,
            Pressure::Severe => u64::MAX,
        }
    }
}

/// Something holding reclaimable references.
pub trait Reclaim: Send + Sync {
    /// Unlinks references whose referent is already gone; returns how many.
    fn sweep(&self) -> usize;

    /// Clears soft references per `pressure`, then unlinks; returns how many.
    fn reclaim(&self, pressure: Pressure) -> usize;
}

/// Registry of reclaim targets.
#[derive(Default)]
pub struct Reclaimer {
    targets: Mutex<SlotMap<DefaultKey, Weak<dyn Reclaim>>>,
}

static GLOBAL: LazyLock<Reclaimer> = LazyLock::new(Reclaimer::new);

impl Reclaimer {
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(SlotMap::with_key()),
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static Reclaimer {
        &GLOBAL
    }

    /// Registers `target` until the returned guard is dropped (or, after
    /// `detach`, until the target itself is dropped).
    pub fn register<R>(&self, target: &Arc<R>) -> Registration<'_>
    where
        R: Reclaim + 'static,
    {
        let target: Arc<dyn Reclaim> = target.clone();
        let key = self.targets.lock().insert(Arc::downgrade(&target));
        Registration { owner: self, key }
    }

    /// Number of registrations, including ones whose target is gone but
    /// not yet pruned.
    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs a reclamation pass on every live target. Returns the total
    /// number of unlinked references.
    pub fn signal(&self, pressure: Pressure) -> usize {
        let unlinked: usize = self.live().iter().map(|t| t.reclaim(pressure)).sum();
        tracing::debug!(?pressure, unlinked, "pressure signalled");
        unlinked
    }

    /// Sweeps every live target.
    pub fn sweep(&self) -> usize {
        self.live().iter().map(|t| t.sweep()).sum()
    }

    /// Upgrades every registration, pruning dead ones. Passes run on the
    /// returned handles after the registry lock is released, so a target may
    /// register or unregister from inside its own pass.
    fn live(&self) -> Vec<Arc<dyn Reclaim>> {
        let mut targets = self.targets.lock();
        let before = targets.len();
        let mut live = Vec::with_capacity(before);
        targets.retain(|_, weak| match weak.upgrade() {
            Some(target) => {
                live.push(target);
                true
            }
            None => false,
        });
        if targets.len() < before {
            tracing::debug!(pruned = before - targets.len(), "pruned dropped reclaim targets");
        }
        live
    }

    fn unregister(&self, key: DefaultKey) {
        self.targets.lock().remove(key);
    }
}

impl Reclaim for Reclaimer {
    fn sweep(&self) -> usize {
        Reclaimer::sweep(self)
    }

    fn reclaim(&self, pressure: Pressure) -> usize {
        self.signal(pressure)
    }
}

impl core::fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("targets", &self.len())
            .finish()
    }
}

/// Keeps a target registered; unregisters on drop.
#[must_use = "dropping a Registration unregisters the target immediately"]
pub struct Registration<'a> {
    owner: &'a Reclaimer,
    key: DefaultKey,
}

impl Registration<'_> {
    /// Keeps the target registered for as long as it lives.
    pub fn detach(self) {
        core::mem::forget(self);
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.owner.unregister(self.key);
    }
}

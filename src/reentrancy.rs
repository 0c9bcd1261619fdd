//! Debug-only reentrancy guard for per-table critical sections.
//!
//! A probe table runs the entry factory while holding its mutex. A factory
//! that calls back into PUT/REMOVE on the same table from the same thread
//! would deadlock. In debug builds each guarded section records its owner id
//! in a thread-local list, and entering a section the current thread already
//! holds panics instead of hanging. Other threads are unaffected and simply
//! wait on the mutex. In release builds this compiles to a zero-cost no-op.

use core::marker::PhantomData;

#[cfg(debug_assertions)]
use std::cell::RefCell;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(debug_assertions)]
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[cfg(debug_assertions)]
thread_local! {
    static HELD: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Per-instance reentrancy tracker. Embed this next to a lock and take
/// `let _g = self.reentrancy.enter();` before acquiring it.
#[derive(Debug)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    id: u64,
}

impl DebugReentrancy {
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Enter a guarded section. In debug builds, panics if the current
    /// thread is already inside a section guarded by this instance.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let id = self.id;
            HELD.with(|held| {
                let mut held = held.borrow_mut();
                assert!(
                    !held.contains(&id),
                    "reentrancy detected: nested entry into a locked probe table"
                );
                held.push(id);
            });
            ReentrancyGuard {
                id,
                _pd: PhantomData,
            }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard { _pd: PhantomData }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`. Must be dropped on the
/// thread that created it, hence `!Send`.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    id: u64,
    _pd: PhantomData<(&'a (), *mut ())>,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let id = self.id;
            HELD.with(|held| {
                let mut held = held.borrow_mut();
                let pos = held.iter().rposition(|&h| h == id);
                debug_assert!(pos.is_some());
                if let Some(pos) = pos {
                    held.remove(pos);
                }
            });
        }
    }
}

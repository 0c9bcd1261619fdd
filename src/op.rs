//! The operation threaded through the descent, so one code path serves
//! lookups, get-or-create and removal.

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Op {
    /// Lookup only; never allocates and never creates.
    Get,
    /// Get-or-create, upgrading the stored reference strength if needed.
    Put,
    /// Unlink and return the entry if present.
    Remove,
}

impl Op {
    /// True for operations that never change the set's structure.
    #[inline]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Op::Get)
    }

    /// True for the one operation that may create an entry (and the root).
    #[inline]
    pub const fn creates(self) -> bool {
        matches!(self, Op::Put)
    }
}

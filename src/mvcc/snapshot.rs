//! MVCC snapshot - an immutable "is this hybrid time committed?" predicate
//!
//! A snapshot is a pure value copied out of the manager under its lock.
//! Once taken it never changes, so readers evaluate it against row versions
//! without any further coordination with the manager.

use std::collections::BTreeSet;
use std::fmt;

use crate::time::HybridTime;

/// A point-in-time view of which operations have committed.
///
/// Three pieces of state describe the view:
/// - `all_committed_before`: every hybrid time strictly below this
///   watermark is committed
/// - `committed`: out-of-order commits ("holes") at or above the watermark
/// - `none_committed_at_or_after`: upper bound past which nothing has
///   committed, so lookups can bail out early
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccSnapshot {
    pub(crate) all_committed_before: HybridTime,
    pub(crate) none_committed_at_or_after: HybridTime,
    pub(crate) committed: BTreeSet<u64>,
}

impl MvccSnapshot {
    /// Snapshot of a manager that has not committed anything yet.
    pub fn new() -> Self {
        Self::clean_at(HybridTime::INITIAL)
    }

    /// Snapshot in which every hybrid time below `ht` is committed and
    /// nothing else is. A clean snapshot has no holes by construction.
    pub fn clean_at(ht: HybridTime) -> Self {
        MvccSnapshot {
            all_committed_before: ht,
            none_committed_at_or_after: ht,
            committed: BTreeSet::new(),
        }
    }

    /// Snapshot that considers every operation committed.
    pub fn including_all_operations() -> Self {
        Self::clean_at(HybridTime::MAX)
    }

    /// Snapshot that considers no operation committed.
    pub fn including_no_operations() -> Self {
        Self::clean_at(HybridTime::MIN)
    }

    /// Whether the operation at `ht` is committed in this snapshot.
    #[inline]
    pub fn is_committed(&self, ht: HybridTime) -> bool {
        if ht < self.all_committed_before {
            return true;
        }
        if ht >= self.none_committed_at_or_after {
            return false;
        }
        self.committed.contains(&ht.value())
    }

    /// Cheap filter: false only when provably nothing at or after `ht`
    /// has committed.
    #[inline]
    pub fn may_have_committed_operations_at_or_after(&self, ht: HybridTime) -> bool {
        ht < self.none_committed_at_or_after
    }

    /// Cheap filter: false only when provably everything at or before `ht`
    /// has committed.
    ///
    /// A hybrid time equal to the watermark counts as fully committed when
    /// it is itself in the committed set: the watermark could not advance
    /// past it only because nothing newer existed to advance to.
    #[inline]
    pub fn may_have_uncommitted_operations_at_or_before(&self, ht: HybridTime) -> bool {
        ht > self.all_committed_before
            || (ht == self.all_committed_before && !self.committed.contains(&ht.value()))
    }

    /// True when the snapshot is a pure cutoff, with no out-of-order holes.
    pub fn is_clean(&self) -> bool {
        self.committed.is_empty()
    }

    /// Record `ht` as committed, maintaining the upper bound.
    pub(crate) fn add_committed(&mut self, ht: HybridTime) {
        if self.is_committed(ht) {
            return;
        }
        self.committed.insert(ht.value());
        if self.none_committed_at_or_after <= ht {
            self.none_committed_at_or_after = ht.incremented();
        }
    }

    /// Drop committed entries the watermark has folded over.
    pub(crate) fn trim_committed_below(&mut self, watermark: HybridTime) {
        self.committed.retain(|&ts| ts >= watermark.value());
    }
}

impl Default for MvccSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MvccSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snapshot[committed={{T|T < {}", self.all_committed_before)?;
        if !self.committed.is_empty() {
            write!(f, " or (T in {{")?;
            for (i, ts) in self.committed.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", ts)?;
            }
            write!(f, "}})")?;
        }
        write!(f, "}}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_holes(
        watermark: u64,
        holes: &[u64],
        upper_bound: u64,
    ) -> MvccSnapshot {
        MvccSnapshot {
            all_committed_before: HybridTime::new(watermark),
            none_committed_at_or_after: HybridTime::new(upper_bound),
            committed: holes.iter().copied().collect(),
        }
    }

    #[test]
    fn test_fresh_snapshot_commits_nothing() {
        let snap = MvccSnapshot::new();
        assert_eq!(snap.to_string(), "Snapshot[committed={T|T < 1}]");
        assert!(!snap.is_committed(HybridTime::new(1)));
        assert!(!snap.is_committed(HybridTime::new(2)));
        assert!(snap.is_clean());
    }

    #[test]
    fn test_point_in_time_snapshot() {
        let snap = MvccSnapshot::clean_at(HybridTime::new(10));
        assert!(snap.is_committed(HybridTime::new(1)));
        assert!(snap.is_committed(HybridTime::new(9)));
        assert!(!snap.is_committed(HybridTime::new(10)));
        assert!(!snap.is_committed(HybridTime::new(11)));
    }

    #[test]
    fn test_holes_above_watermark() {
        let snap = snapshot_with_holes(10, &[11, 13], 14);
        assert!(snap.is_committed(HybridTime::new(9)));
        assert!(!snap.is_committed(HybridTime::new(10)));
        assert!(snap.is_committed(HybridTime::new(11)));
        assert!(!snap.is_committed(HybridTime::new(12)));
        assert!(snap.is_committed(HybridTime::new(13)));
        assert!(!snap.is_committed(HybridTime::new(14)));
        assert!(!snap.is_clean());
    }

    #[test]
    fn test_may_have_committed_operations_at_or_after() {
        let snap = snapshot_with_holes(10, &[11, 13], 14);
        assert!(snap.may_have_committed_operations_at_or_after(HybridTime::new(9)));
        assert!(snap.may_have_committed_operations_at_or_after(HybridTime::new(10)));
        assert!(snap.may_have_committed_operations_at_or_after(HybridTime::new(12)));
        assert!(snap.may_have_committed_operations_at_or_after(HybridTime::new(13)));
        assert!(!snap.may_have_committed_operations_at_or_after(HybridTime::new(14)));
        assert!(!snap.may_have_committed_operations_at_or_after(HybridTime::new(15)));

        let all = MvccSnapshot::including_all_operations();
        assert!(all.may_have_committed_operations_at_or_after(HybridTime::new(1)));
        assert!(all.may_have_committed_operations_at_or_after(HybridTime::new(12345)));

        let none = MvccSnapshot::including_no_operations();
        assert!(!none.may_have_committed_operations_at_or_after(HybridTime::new(1)));
        assert!(!none.may_have_committed_operations_at_or_after(HybridTime::new(12345)));

        let clean = MvccSnapshot::clean_at(HybridTime::new(10));
        assert!(clean.may_have_committed_operations_at_or_after(HybridTime::new(9)));
        assert!(!clean.may_have_committed_operations_at_or_after(HybridTime::new(10)));
    }

    #[test]
    fn test_may_have_uncommitted_operations_at_or_before() {
        let snap = snapshot_with_holes(10, &[11, 13], 14);
        assert!(!snap.may_have_uncommitted_operations_at_or_before(HybridTime::new(9)));
        assert!(snap.may_have_uncommitted_operations_at_or_before(HybridTime::new(10)));
        assert!(snap.may_have_uncommitted_operations_at_or_before(HybridTime::new(11)));
        assert!(snap.may_have_uncommitted_operations_at_or_before(HybridTime::new(13)));
        assert!(snap.may_have_uncommitted_operations_at_or_before(HybridTime::new(14)));
        assert!(snap.may_have_uncommitted_operations_at_or_before(HybridTime::new(15)));

        let all = MvccSnapshot::including_all_operations();
        assert!(!all.may_have_uncommitted_operations_at_or_before(HybridTime::new(1)));
        assert!(!all.may_have_uncommitted_operations_at_or_before(HybridTime::new(12345)));

        let none = MvccSnapshot::including_no_operations();
        assert!(none.may_have_uncommitted_operations_at_or_before(HybridTime::new(1)));
        assert!(none.may_have_uncommitted_operations_at_or_before(HybridTime::new(12345)));

        let clean = MvccSnapshot::clean_at(HybridTime::new(10));
        assert!(!clean.may_have_uncommitted_operations_at_or_before(HybridTime::new(9)));
        assert!(clean.may_have_uncommitted_operations_at_or_before(HybridTime::new(10)));
    }

    #[test]
    fn test_watermark_hole_at_same_time_counts_as_committed() {
        // A lone committed operation can leave the watermark sitting exactly
        // on its hybrid time with nothing newer to advance to; nothing at or
        // before it can be uncommitted.
        let snap = snapshot_with_holes(10, &[10], 11);
        assert!(!snap.may_have_uncommitted_operations_at_or_before(HybridTime::new(10)));
    }

    #[test]
    fn test_add_committed_maintains_upper_bound() {
        let mut snap = MvccSnapshot::new();
        snap.add_committed(HybridTime::new(5));
        assert!(snap.is_committed(HybridTime::new(5)));
        assert_eq!(snap.none_committed_at_or_after, HybridTime::new(6));

        // Re-adding a committed hybrid time changes nothing.
        snap.add_committed(HybridTime::new(5));
        assert_eq!(snap.committed.len(), 1);

        snap.add_committed(HybridTime::new(3));
        assert_eq!(snap.none_committed_at_or_after, HybridTime::new(6));
    }

    #[test]
    fn test_trim_committed_below() {
        let mut snap = snapshot_with_holes(1, &[2, 3, 7], 8);
        snap.trim_committed_below(HybridTime::new(4));
        assert_eq!(snap.committed.iter().copied().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_display_sorts_holes() {
        let snap = snapshot_with_holes(1, &[3, 2], 4);
        assert_eq!(
            snap.to_string(),
            "Snapshot[committed={T|T < 1 or (T in {2,3})}]"
        );
    }
}

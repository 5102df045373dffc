//! Scoped write operation - RAII guard for the operation lifecycle
//!
//! Ties a started operation to its owning call stack so that every exit
//! path, including early returns and panics, leaves the manager in a
//! terminal state: an operation that was never committed is aborted when
//! the guard drops.

use crate::mvcc::manager::MvccManager;
use crate::time::HybridTime;

/// A write operation bound to the scope that started it.
///
/// Construction starts the operation and stores its hybrid time; dropping
/// the guard without a prior `commit()` aborts it.
///
/// ```
/// use std::sync::Arc;
/// use tabletbase::{LogicalClock, MvccManager, ScopedWriteOperation};
///
/// let mgr = MvccManager::new(Arc::new(LogicalClock::default()));
/// let mut op = ScopedWriteOperation::new(&mgr);
/// // ... perform the mutation at op.hybrid_time() ...
/// op.start_applying();
/// op.commit();
/// ```
pub struct ScopedWriteOperation<'a> {
    manager: &'a MvccManager,
    hybrid_time: HybridTime,
    done: bool,
}

impl<'a> ScopedWriteOperation<'a> {
    /// Start an operation at the current clock reading.
    pub fn new(manager: &'a MvccManager) -> Self {
        ScopedWriteOperation {
            manager,
            hybrid_time: manager.start_operation(),
            done: false,
        }
    }

    /// Start a commit-wait operation at the latest cluster-wide bound.
    pub fn new_at_latest(manager: &'a MvccManager) -> Self {
        ScopedWriteOperation {
            manager,
            hybrid_time: manager.start_operation_at_latest(),
            done: false,
        }
    }

    /// The hybrid time assigned to this operation.
    pub fn hybrid_time(&self) -> HybridTime {
        self.hybrid_time
    }

    /// Mark the operation as applying; it is now guaranteed to commit.
    pub fn start_applying(&self) {
        self.manager.start_applying_operation(self.hybrid_time);
    }

    /// Commit the operation. The guard becomes inert.
    pub fn commit(&mut self) {
        self.manager.commit_operation(self.hybrid_time);
        self.done = true;
    }

    /// Abort the operation explicitly instead of waiting for the drop.
    pub fn abort(mut self) {
        self.abort_inner();
    }

    fn abort_inner(&mut self) {
        self.manager.abort_operation(self.hybrid_time);
        self.done = true;
    }
}

impl Drop for ScopedWriteOperation<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.abort_inner();
        }
    }
}

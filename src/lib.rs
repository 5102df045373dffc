//! TabletBase MVCC Engine
//!
//! Multi-version concurrency control core for the TabletBase distributed
//! tablet storage node. Assigns each write a monotonically ordered hybrid
//! time, tracks which hybrid times have committed, and hands readers
//! immutable snapshots they can evaluate without taking any lock.

pub mod mvcc;
pub mod time;

// Re-export main types
pub use mvcc::{MvccManager, MvccSnapshot, ScopedWriteOperation};
pub use time::{Clock, HybridTime, LogicalClock};

/// MVCC engine error type
#[derive(Debug, thiserror::Error)]
pub enum TabletError {
    /// A replayed operation could not be registered because the manager's
    /// invariants already rule its hybrid time out.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A wait expired before its condition was satisfied.
    #[error("Timed out waiting for hybrid time {0}")]
    TimedOut(HybridTime),

    /// The clock cannot satisfy the requested wait.
    #[error("Not supported: {0}")]
    NotSupported(&'static str),
}

pub type Result<T> = std::result::Result<T, TabletError>;

//! MVCC (Multi-Version Concurrency Control) subsystem
//!
//! Lets readers see a consistent point-in-time view while writers keep
//! committing:
//! - Writers stamp each operation with a clock-assigned hybrid time
//! - Readers grab an immutable snapshot and evaluate it lock-free
//! - The watermark folds contiguous commits so snapshots stay small
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              MvccManager                         │
//! │  - Tracks in-flight and applying operations      │
//! │  - Folds committed hybrid times into watermark   │
//! │  - Wakes waiters blocked on clean snapshots      │
//! ├──────────────────────────────────────────────────┤
//! │  MvccSnapshot                                    │
//! │  - Immutable "is T committed?" predicate         │
//! │  - Watermark + out-of-order commit holes         │
//! ├──────────────────────────────────────────────────┤
//! │  ScopedWriteOperation                            │
//! │  - Guard tying an operation to its call stack    │
//! │  - Aborts on drop unless explicitly committed    │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod manager;
pub mod operation;
pub mod snapshot;

pub use manager::MvccManager;
pub use operation::ScopedWriteOperation;
pub use snapshot::MvccSnapshot;

//! Hybrid time and clock abstractions
//!
//! Every MVCC operation is stamped with a `HybridTime`, a totally ordered
//! logical instant. The `Clock` trait is the boundary to whatever supplies
//! those instants; `LogicalClock` is the built-in counter implementation
//! used for tests, replay, and single-node deployments.

pub mod clock;
pub mod hybrid_time;

pub use clock::{Clock, LogicalClock};
pub use hybrid_time::HybridTime;

//! Hybrid time - the logical timestamp assigned to every MVCC operation

use std::fmt;

use serde::{Deserialize, Serialize};

/// A totally ordered logical instant.
///
/// Hybrid times are opaque to everything except the clock that mints them;
/// the rest of the engine only compares them and moves them across the wire
/// in their 64-bit external form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct HybridTime(u64);

impl HybridTime {
    /// Lowest representable hybrid time, earlier than any operation.
    pub const MIN: HybridTime = HybridTime(0);

    /// Highest representable hybrid time, later than any operation.
    pub const MAX: HybridTime = HybridTime(u64::MAX);

    /// First hybrid time a fresh clock hands out.
    pub const INITIAL: HybridTime = HybridTime(1);

    /// Create a hybrid time from its 64-bit external form.
    pub const fn new(value: u64) -> Self {
        HybridTime(value)
    }

    /// The 64-bit external form.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The hybrid time immediately before this one, saturating at `MIN`.
    pub const fn decremented(self) -> Self {
        HybridTime(self.0.saturating_sub(1))
    }

    /// The hybrid time immediately after this one, saturating at `MAX`.
    pub const fn incremented(self) -> Self {
        HybridTime(self.0.saturating_add(1))
    }
}

impl fmt::Display for HybridTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for HybridTime {
    fn from(value: u64) -> Self {
        HybridTime(value)
    }
}

impl From<HybridTime> for u64 {
    fn from(ht: HybridTime) -> u64 {
        ht.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_and_sentinels() {
        assert!(HybridTime::MIN < HybridTime::INITIAL);
        assert!(HybridTime::INITIAL < HybridTime::new(2));
        assert!(HybridTime::new(2) < HybridTime::MAX);
    }

    #[test]
    fn test_external_form_round_trip() {
        let ht = HybridTime::new(42);
        assert_eq!(ht.value(), 42);
        assert_eq!(HybridTime::from(u64::from(ht)), ht);
    }

    #[test]
    fn test_increment_decrement_saturate() {
        assert_eq!(HybridTime::new(10).decremented(), HybridTime::new(9));
        assert_eq!(HybridTime::MIN.decremented(), HybridTime::MIN);
        assert_eq!(HybridTime::new(10).incremented(), HybridTime::new(11));
        assert_eq!(HybridTime::MAX.incremented(), HybridTime::MAX);
    }

    #[test]
    fn test_serde_is_transparent() {
        let ht = HybridTime::new(77);
        assert_eq!(serde_json::to_string(&ht).unwrap(), "77");
        let back: HybridTime = serde_json::from_str("77").unwrap();
        assert_eq!(back, ht);
    }
}

//! Bulk-deletion guard.
//!
//! A write that wipes out most of a non-trivial collection is far more often a
//! transient bug (empty render, failed load) than a deliberate action, so such
//! writes are refused. Small collections may always be emptied.

use crate::error::GuardRejection;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardPolicy {
    /// Collections with fewer items than this are never guarded.
    pub min_items: usize,
    /// Largest share of the collection a single write may remove.
    pub max_removal_fraction: f64,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            min_items: 3,
            max_removal_fraction: 2.0 / 3.0,
        }
    }
}

impl GuardPolicy {
    pub fn check(&self, previous: usize, next: usize) -> Result<(), GuardRejection> {
        if previous < self.min_items || next >= previous {
            return Ok(());
        }
        if next == 0 {
            return Err(GuardRejection::Cleared { previous });
        }
        let removed = previous - next;
        if removed as f64 / previous as f64 > self.max_removal_fraction {
            return Err(GuardRejection::BulkRemoval { previous, removed });
        }
        Ok(())
    }

    /// Whether a collection of `count` items is large enough to be protected.
    pub fn protects(&self, count: usize) -> bool {
        count >= self.min_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_collections_can_be_emptied() {
        let policy = GuardPolicy::default();
        assert!(policy.check(1, 0).is_ok());
        assert!(policy.check(2, 0).is_ok());
    }

    #[test]
    fn test_clearing_three_or_more_is_blocked() {
        let policy = GuardPolicy::default();
        assert_eq!(policy.check(3, 0), Err(GuardRejection::Cleared { previous: 3 }));
        assert_eq!(policy.check(40, 0), Err(GuardRejection::Cleared { previous: 40 }));
    }

    #[test]
    fn test_bulk_removal_threshold() {
        let policy = GuardPolicy::default();
        // Exactly two-thirds is allowed
        assert!(policy.check(3, 1).is_ok());
        assert!(policy.check(9, 3).is_ok());
        // More than two-thirds is not
        assert_eq!(
            policy.check(9, 2),
            Err(GuardRejection::BulkRemoval { previous: 9, removed: 7 })
        );
        assert!(policy.check(6, 1).is_err());
    }

    #[test]
    fn test_growth_and_small_removals_pass() {
        let policy = GuardPolicy::default();
        assert!(policy.check(0, 10).is_ok());
        assert!(policy.check(10, 10).is_ok());
        assert!(policy.check(10, 9).is_ok());
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = GuardPolicy { min_items: 10, max_removal_fraction: 0.5 };
        assert!(policy.check(9, 0).is_ok());
        assert!(policy.check(10, 5).is_ok());
        assert!(policy.check(10, 4).is_err());
        assert!(policy.protects(10));
        assert!(!policy.protects(9));
    }
}

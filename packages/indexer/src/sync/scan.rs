use std::time::Duration;

/// One rung of the adaptive scan ladder.
///
/// The first level is the normal chunking. Each following level is only used
/// for ranges whose scan failed at the level above.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanLevel {
    /// Blocks per `getLogs` request
    pub chunk_size: u64,
    /// Hydration calls issued together before pausing
    pub hydrate_group: usize,
    /// Pause after each hydration group, and before each range at fallback levels
    pub pause: Duration,
}

/// Totals for one top-level range after every fallback attempt
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RangeOutcome {
    pub added: usize,
    /// Ids seen in logs whose core record could not be hydrated
    pub missed: usize,
    /// Sub-ranges that still failed at the last level
    pub failed: Vec<(u64, u64)>,
    pub cancelled: bool,
}

impl RangeOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.missed == 0 && !self.cancelled
    }
}

/// Split the inclusive range `[from, to]` into consecutive pieces of at most `size` blocks
pub fn partition(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_range_exactly() {
        assert_eq!(partition(1, 300, 100), vec![(1, 100), (101, 200), (201, 300)]);
        assert_eq!(partition(5, 12, 5), vec![(5, 9), (10, 12)]);
        assert_eq!(partition(7, 7, 10_000), vec![(7, 7)]);
    }

    #[test]
    fn partition_of_empty_range_is_empty() {
        assert!(partition(10, 9, 100).is_empty());
    }

    #[test]
    fn partition_treats_zero_size_as_one() {
        assert_eq!(partition(1, 3, 0), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn partition_stops_at_u64_max() {
        assert_eq!(partition(u64::MAX - 1, u64::MAX, 10), vec![(u64::MAX - 1, u64::MAX)]);
    }

    #[test]
    fn outcome_completeness() {
        assert!(RangeOutcome::default().is_complete());
        let missed = RangeOutcome {
            missed: 1,
            ..RangeOutcome::default()
        };
        assert!(!missed.is_complete());
        let failed = RangeOutcome {
            failed: vec![(1, 2)],
            ..RangeOutcome::default()
        };
        assert!(!failed.is_complete());
    }
}

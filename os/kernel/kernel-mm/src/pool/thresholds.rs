//! Low/high occupancy thresholds.

use core::fmt;
use kernel_memory_addresses::{MIB, PageSize, Size4K};

/// A low/high pair in pages. `low < high` holds for every constructed pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ThresholdPair {
    low: u64,
    high: u64,
}

/// Where a value falls relative to a [`ThresholdPair`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Level {
    Low,
    Normal,
    High,
}

impl ThresholdPair {
    /// Order the pair; an equal pair gets its high mark raised by one page
    /// (or its low mark lowered, at the top of the range).
    #[must_use]
    pub const fn new(low: u64, high: u64) -> Self {
        let (low, high) = if low > high { (high, low) } else { (low, high) };
        let (low, high) = match (low == high, high.checked_add(1)) {
            (false, _) => (low, high),
            (true, Some(raised)) => (low, raised),
            (true, None) => (low - 1, high),
        };
        Self { low, high }
    }

    #[inline]
    #[must_use]
    pub const fn low(&self) -> u64 {
        self.low
    }

    #[inline]
    #[must_use]
    pub const fn high(&self) -> u64 {
        self.high
    }

    #[must_use]
    pub const fn classify(&self, pages: u64) -> Level {
        if pages < self.low {
            Level::Low
        } else if pages < self.high {
            Level::Normal
        } else {
            Level::High
        }
    }
}

impl fmt::Display for ThresholdPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "low {} / high {} pages", self.low, self.high)
    }
}

/// Thresholds for both pools.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PoolThresholds {
    pub paged: ThresholdPair,
    pub nonpaged: ThresholdPair,
}

impl PoolThresholds {
    /// Thresholds for pools of the given sizes, in bytes.
    #[must_use]
    pub const fn derive(paged_bytes: u64, nonpaged_bytes: u64) -> Self {
        let paged = pages(paged_bytes);
        let nonpaged = pages(nonpaged_bytes);
        Self {
            paged: ThresholdPair::new(min(pages(30 * MIB), paged / 5), min(pages(60 * MIB), paged * 2 / 5)),
            nonpaged: ThresholdPair::new(min(pages(8 * MIB), nonpaged / 3), min(pages(20 * MIB), nonpaged / 2)),
        }
    }
}

const fn pages(bytes: u64) -> u64 {
    bytes >> Size4K::SHIFT
}

const fn min(a: u64, b: u64) -> u64 {
    if a < b { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_always_ordered() {
        for (low, high) in [(0, 0), (5, 5), (9, 3), (u64::MAX, u64::MAX), (1, 2)] {
            let pair = ThresholdPair::new(low, high);
            assert!(pair.low() < pair.high(), "{pair}");
        }
        assert_eq!(ThresholdPair::new(9, 3), ThresholdPair::new(3, 9));
        assert_eq!(ThresholdPair::new(4, 4).high(), 5);
    }

    #[test]
    fn fractions_and_caps() {
        let t = PoolThresholds::derive(100 * MIB, 12 * MIB);
        assert_eq!(t.paged.low(), pages(20 * MIB));
        assert_eq!(t.paged.high(), pages(40 * MIB));
        assert_eq!(t.nonpaged.low(), pages(4 * MIB));
        assert_eq!(t.nonpaged.high(), pages(6 * MIB));

        let big = PoolThresholds::derive(1024 * MIB, 1024 * MIB);
        assert_eq!(big.paged.low(), pages(30 * MIB));
        assert_eq!(big.paged.high(), pages(60 * MIB));
        assert_eq!(big.nonpaged.low(), pages(8 * MIB));
        assert_eq!(big.nonpaged.high(), pages(20 * MIB));
    }

    #[test]
    fn tiny_pools_still_separate() {
        let t = PoolThresholds::derive(0, Size4K::SIZE);
        assert!(t.paged.low() < t.paged.high());
        assert!(t.nonpaged.low() < t.nonpaged.high());
    }

    #[test]
    fn classification() {
        let pair = ThresholdPair::new(10, 20);
        assert_eq!(pair.classify(9), Level::Low);
        assert_eq!(pair.classify(10), Level::Normal);
        assert_eq!(pair.classify(20), Level::High);
    }
}

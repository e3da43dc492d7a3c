//! Resident page budget, commit accounting and limits derived from
//! available memory.

use crate::config::{ConfigOverrides, Override, keys};
use crate::layout::ArchConstants;
use kernel_memory_addresses::{MIB, PageSize, Size4K, round_up_to};

/// Pages held back from the resident budget for the system to stay fluid.
pub const FLUID_PHYSICAL_PAGES: u64 = 32;

/// Pages of commit left out of the initial commit limit.
const COMMIT_RESERVE: u64 = 1024;

/// Pages kept out of the largest working set.
const WORKING_SET_RESERVE: u64 = 512;

/// Pages below the architecture's working-set ceiling the maximum stops at.
pub const WORKING_SET_MAXIMUM_SLACK: u64 = 5;

/// Commit limit before available memory is known.
pub const INITIAL_COMMIT_LIMIT: u64 = (2048 * MIB) >> Size4K::SHIFT;

const DEFAULT_POOL_USAGE_PERCENT: u64 = 80;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("resident budget would start negative: {available} pages available, {reserved} reserved")]
    Negative { available: u64, reserved: u64 },
    #[error("resident budget exhausted: {requested} pages requested, {remaining} left")]
    Exhausted { requested: u64, remaining: u64 },
}

/// Pages not yet committed to any purpose.
///
/// Every page-table frame built during Phase0 is charged here.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResidentBudget {
    remaining: u64,
    at_init: u64,
}

impl ResidentBudget {
    /// Budget left after the fluid reserve, the initial nonpaged pool and the
    /// system cache working-set minimum.
    ///
    /// # Errors
    /// The reserves exceed what is available.
    pub fn new(available: u64, nonpaged_initial_pages: u64, cache_ws_minimum: u64) -> Result<Self, BudgetError> {
        let reserved = FLUID_PHYSICAL_PAGES + nonpaged_initial_pages + cache_ws_minimum;
        let remaining = available
            .checked_sub(reserved)
            .ok_or(BudgetError::Negative { available, reserved })?;
        log::debug!("resident budget: {remaining} pages ({available} available, {reserved} reserved)");
        Ok(Self {
            remaining,
            at_init: remaining,
        })
    }

    /// Take `pages` out of the budget.
    ///
    /// # Errors
    /// Fewer than `pages` remain; the budget is unchanged.
    pub fn charge(&mut self, pages: u64) -> Result<(), BudgetError> {
        self.remaining = self.remaining.checked_sub(pages).ok_or(BudgetError::Exhausted {
            requested: pages,
            remaining: self.remaining,
        })?;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Pages charged since construction.
    #[inline]
    #[must_use]
    pub const fn charged(&self) -> u64 {
        self.at_init - self.remaining
    }
}

/// Committed pages against a commit limit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CommitCounter {
    committed: u64,
    limit: u64,
}

impl Default for CommitCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            committed: 0,
            limit: INITIAL_COMMIT_LIMIT,
        }
    }

    /// Record `pages` as committed. Boot-time commitments are not refused;
    /// going over the limit is logged.
    pub fn commit(&mut self, pages: u64) {
        self.committed = self.committed.saturating_add(pages);
        if self.committed > self.limit {
            log::warn!("commit {} exceeds limit {}", self.committed, self.limit);
        }
    }

    pub const fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    #[inline]
    #[must_use]
    pub const fn committed(&self) -> u64 {
        self.committed
    }

    #[inline]
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }
}

/// Limits computed once available memory is final.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DerivedLimits {
    pub commit_limit: u64,
    /// Pages.
    pub maximum_working_set: u64,
    /// Bytes per prototype PTE allocation.
    pub allocation_fragment: u64,
    pub pool_usage_percent: u64,
}

impl DerivedLimits {
    /// `max_working_set` is the architecture's bound after any user-space
    /// adjustment.
    #[must_use]
    pub fn derive(
        c: &ArchConstants,
        available: u64,
        total_pages: u64,
        max_working_set: u64,
        overrides: &ConfigOverrides,
    ) -> Self {
        let commit_limit = if available > COMMIT_RESERVE {
            available - COMMIT_RESERVE
        } else {
            available
        };
        let maximum_working_set = available
            .saturating_sub(WORKING_SET_RESERVE)
            .min(max_working_set.saturating_sub(WORKING_SET_MAXIMUM_SLACK));

        let limits = Self {
            commit_limit,
            maximum_working_set,
            allocation_fragment: allocation_fragment(c, total_pages, overrides.get(keys::ALLOCATION_FRAGMENT)),
            pool_usage_percent: match overrides.get(keys::POOL_USAGE_MAXIMUM) {
                Override::Value(p) => p.clamp(5, 100),
                _ => DEFAULT_POOL_USAGE_PERCENT,
            },
        };
        log::debug!("{limits:?}");
        limits
    }
}

fn allocation_fragment(c: &ArchConstants, total_pages: u64, request: Override) -> u64 {
    const FRAGMENT_32: u64 = 64 * 1024;
    match request {
        Override::Value(kib) => round_up_to(kib.saturating_mul(1024), Size4K::SIZE)
            .unwrap_or(c.allocation_fragment_max)
            .clamp(Size4K::SIZE, c.allocation_fragment_max),
        Override::Maximum => c.allocation_fragment_max,
        Override::Default if c.is_64bit() => 64 * MIB,
        Override::Default if total_pages < 64 * 1024 => FRAGMENT_32 / 4,
        Override::Default if total_pages < 256 * 1024 => FRAGMENT_32 / 2,
        Override::Default => FRAGMENT_32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{AMD64, X86};

    #[test]
    fn budget_reserves_and_charges() {
        let mut budget = ResidentBudget::new(10_000, 100, 688).unwrap();
        assert_eq!(budget.remaining(), 10_000 - 32 - 100 - 688);
        budget.charge(3).unwrap();
        assert_eq!(budget.charged(), 3);

        let left = budget.remaining();
        assert_eq!(
            budget.charge(left + 1),
            Err(BudgetError::Exhausted {
                requested: left + 1,
                remaining: left
            })
        );
        assert_eq!(budget.remaining(), left);
    }

    #[test]
    fn budget_cannot_start_negative() {
        assert_eq!(
            ResidentBudget::new(500, 200, 288),
            Err(BudgetError::Negative {
                available: 500,
                reserved: 520
            })
        );
    }

    #[test]
    fn commit_limit_and_working_set() {
        let limits = DerivedLimits::derive(&X86, 100_000, 131_072, X86.max_working_set, &ConfigOverrides::new());
        assert_eq!(limits.commit_limit, 100_000 - 1024);
        assert_eq!(limits.maximum_working_set, 100_000 - 512);
        assert_eq!(limits.pool_usage_percent, 80);

        let small = DerivedLimits::derive(&X86, 1000, 1100, X86.max_working_set, &ConfigOverrides::new());
        assert_eq!(small.commit_limit, 1000);

        let huge = DerivedLimits::derive(&X86, u64::from(u32::MAX), 1 << 32, 100, &ConfigOverrides::new());
        assert_eq!(huge.maximum_working_set, 100 - WORKING_SET_MAXIMUM_SLACK);
    }

    #[test]
    fn fragment_scales_with_memory_on_32_bit() {
        let none = ConfigOverrides::new();
        let at = |pages| DerivedLimits::derive(&X86, pages, pages, X86.max_working_set, &none).allocation_fragment;
        assert_eq!(at(32 * 1024), 16 * 1024);
        assert_eq!(at(128 * 1024), 32 * 1024);
        assert_eq!(at(512 * 1024), 64 * 1024);
        assert_eq!(
            DerivedLimits::derive(&AMD64, 1000, 1000, AMD64.max_working_set, &none).allocation_fragment,
            64 * MIB
        );
    }

    #[test]
    fn fragment_override_is_rounded_and_bounded() {
        let derive = |kib| {
            let o = ConfigOverrides::new().with(keys::ALLOCATION_FRAGMENT, kib);
            DerivedLimits::derive(&X86, 10_000, 10_000, X86.max_working_set, &o).allocation_fragment
        };
        assert_eq!(derive(6), 8 * 1024);
        assert_eq!(derive(1), 4 * 1024);
        assert_eq!(derive(1 << 20), 2 * MIB);
    }

    #[test]
    fn pool_usage_is_clamped() {
        let o = ConfigOverrides::new().with(keys::POOL_USAGE_MAXIMUM, 2);
        assert_eq!(
            DerivedLimits::derive(&X86, 10_000, 10_000, X86.max_working_set, &o).pool_usage_percent,
            5
        );
        let o = ConfigOverrides::new().with(keys::POOL_USAGE_MAXIMUM, 250);
        assert_eq!(
            DerivedLimits::derive(&X86, 10_000, 10_000, X86.max_working_set, &o).pool_usage_percent,
            100
        );
    }
}

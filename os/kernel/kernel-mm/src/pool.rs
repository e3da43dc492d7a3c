//! # Pool Space Constructor
//!
//! Sizes the paged pool inside the window the layout reserved for it, builds
//! its table scaffolding and creates the two allocation-tracking bitmaps.
//!
//! ```text
//!  paged pool window ─────────────────────────────────────────────┐
//!  ├── first page-table span ──┤                                  │
//!  │  PTEs demand-zero          │  no page table yet               │
//!  │  allocation bits clear     │  allocation bits set             │
//!  └────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! After Phase0 the state lives behind the pool mutex; callers that also need
//! frames take the pool mutex first and the frame lock inside it.

mod thresholds;

pub use thresholds::{Level, PoolThresholds, ThresholdPair};

use crate::bitmap::Bitmap;
use crate::budget::{BudgetError, ResidentBudget};
use crate::config::{ConfigOverrides, Override, ProductType, keys};
use crate::layout::AddressSpaceLayout;
use kernel_memory_addresses::{MIB, PageSize, Size4K, VirtualAddress, VirtualRange, mib_to_pages, round_up_to};
use kernel_sync::SpinMutex;
use kernel_vmem::{
    FrameLock, HierarchyError, PageTableHierarchy, PagingDepth, PagingLevel, Protection, ZeroedFrameSource,
};

/// Smallest paged pool.
pub const MINIMUM_PAGED_POOL: u64 = 32 * MIB;

/// Smallest paged pool on a server with more than 24 MiB.
pub const MINIMUM_PAGED_POOL_SERVER: u64 = 48 * MIB;

/// Pages left over when the paged pool is locked into memory.
const LOCKED_RESERVE_PAGES: u64 = 2048;

/// Paged pool state shared after Phase0.
pub type PagedPool = SpinMutex<PagedPoolState>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no memory for {bits}-bit pool bitmaps")]
    NoMemory { bits: u64 },
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
}

/// Inputs to paged pool sizing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PoolSizingConfig {
    pub request: Override,
    /// Back the whole pool with frames up front.
    pub lock_into_memory: bool,
    pub server: bool,
    pub total_pages: u64,
    pub available_pages: u64,
}

impl PoolSizingConfig {
    #[must_use]
    pub fn new(overrides: &ConfigOverrides, product: ProductType, total_pages: u64, available_pages: u64) -> Self {
        Self {
            request: overrides.get(keys::PAGED_POOL_SIZE),
            lock_into_memory: overrides.flag(keys::LOCK_PAGED_POOL),
            server: product.is_server(),
            total_pages,
            available_pages,
        }
    }

    /// Pool size in bytes for `layout`, before any locked-mode reduction.
    ///
    /// `levels` is the paging depth; three or more levels double the default.
    #[must_use]
    pub fn size_for(&self, layout: &AddressSpaceLayout, levels: u32) -> u64 {
        let c = layout.architecture.constants();
        let window = layout.paged_pool_maximum();

        let mut size = match self.request {
            Override::Maximum => window,
            Override::Value(bytes) => bytes,
            Override::Default => {
                let size = layout.nonpaged_pool.maximum_bytes.saturating_mul(2);
                if levels >= 3 { size.saturating_mul(2) } else { size }
            }
        };
        if self.server && self.total_pages > mib_to_pages(24) {
            size = size.max(MINIMUM_PAGED_POOL_SERVER);
        }

        let size = size.min(window).clamp(MINIMUM_PAGED_POOL, c.max_paged_pool);
        round_up_to(size, c.page_table_span()).map_or(window, |s| s.min(window))
    }

    /// Size the locked pool can have, or `None` when locking cannot be
    /// honored with `nonpageable` pages left.
    fn locked_size(&self, requested: u64, nonpageable: u64, pde_span: u64) -> Option<u64> {
        let nonpageable = nonpageable.checked_sub(LOCKED_RESERVE_PAGES)?;
        let available = self.available_pages.checked_sub(LOCKED_RESERVE_PAGES)?;
        let pages = (requested >> Size4K::SHIFT).min(nonpageable).min(available);
        let bytes = (pages << Size4K::SHIFT) / pde_span * pde_span;
        (bytes >= requested / 5 * 4 && bytes >= MINIMUM_PAGED_POOL).then_some(bytes)
    }
}

/// The constructed paged pool.
#[derive(Debug, Clone)]
pub struct PagedPoolState {
    range: VirtualRange,
    allocation_map: Bitmap,
    end_of_allocation_map: Bitmap,
    locked: bool,
    next_expansion: VirtualAddress,
    committed_pages: u64,
}

impl PagedPoolState {
    /// Size the pool, build its tables and bitmaps.
    ///
    /// Every frame taken here is charged to `budget`.
    ///
    /// # Errors
    /// Frames, bitmap memory or budget ran out.
    pub fn build<D: PagingDepth, S: ZeroedFrameSource>(
        layout: &AddressSpaceLayout,
        cfg: &PoolSizingConfig,
        tables: &mut PageTableHierarchy<D>,
        frames: &FrameLock<S>,
        budget: &mut ResidentBudget,
    ) -> Result<Self, PoolError> {
        let c = layout.architecture.constants();
        let mut size = cfg.size_for(layout, D::LEVELS);

        let mut locked = false;
        if cfg.lock_into_memory {
            if let Some(bytes) = cfg.locked_size(size, budget.remaining(), c.pde_span) {
                size = bytes;
                locked = true;
            } else {
                log::warn!("paged pool cannot be locked into memory; left pageable");
            }
        }

        let start = layout.paged_pool.start();
        let range = VirtualRange::from_len(start, size).ok_or(HierarchyError::InvalidRange(layout.paged_pool))?;

        // Directory levels over the pool, plus system views where they follow it.
        let directories = if layout.architecture.is_64bit() {
            VirtualRange::new(start, layout.system_view.end()).unwrap_or(range)
        } else {
            range
        };
        let mut committed = tables.ensure_tables(directories, PagingLevel::DirectoryPointer, frames)?;

        let first_table = VirtualRange::from_len(start, c.page_table_span().min(size)).unwrap_or(range);
        committed += if locked {
            tables.back_with_frames(range, Protection::kernel_rw(), frames)?
        } else {
            tables.ensure_mapped(first_table, frames)?
        };
        budget.charge(committed)?;

        let pages = range.pages();
        let bits = usize::try_from(pages).map_err(|_| PoolError::NoMemory { bits: pages })?;
        let mut allocation_map = Bitmap::try_new(bits).map_err(|_| PoolError::NoMemory { bits: pages })?;
        let end_of_allocation_map = Bitmap::try_new(bits).map_err(|_| PoolError::NoMemory { bits: pages })?;
        if !locked {
            #[allow(clippy::cast_possible_truncation)]
            let first = c.ptes_per_page as usize;
            allocation_map.set_all();
            allocation_map.clear_range(0..first);
        }

        let next_expansion = if locked { range.end() } else { first_table.end() };
        log::info!(
            "paged pool {range}: {} KiB{}, {committed} frames",
            size / 1024,
            if locked { " locked" } else { "" }
        );

        Ok(Self {
            range,
            allocation_map,
            end_of_allocation_map,
            locked,
            next_expansion,
            committed_pages: committed,
        })
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> VirtualRange {
        self.range
    }

    #[inline]
    #[must_use]
    pub const fn size_in_bytes(&self) -> u64 {
        self.range.len()
    }

    #[inline]
    #[must_use]
    pub const fn size_in_pages(&self) -> u64 {
        self.range.pages()
    }

    /// Clear bits are pages that can be handed out.
    #[must_use]
    pub const fn allocation_map(&self) -> &Bitmap {
        &self.allocation_map
    }

    #[must_use]
    pub const fn end_of_allocation_map(&self) -> &Bitmap {
        &self.end_of_allocation_map
    }

    /// Whether the pool was locked into memory.
    #[inline]
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Start of the first page-table span without a page table.
    #[inline]
    #[must_use]
    pub const fn next_expansion(&self) -> VirtualAddress {
        self.next_expansion
    }

    /// Frames charged while building the pool.
    #[inline]
    #[must_use]
    pub const fn committed_pages(&self) -> u64 {
        self.committed_pages
    }
}

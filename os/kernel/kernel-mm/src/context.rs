//! State built during bootstrap and the read-only view other subsystems get.

use crate::budget::{CommitCounter, DerivedLimits, ResidentBudget};
use crate::cartographer::PhysicalMemoryMap;
use crate::config::BootConfig;
use crate::events::{MemoryEvents, MemoryThresholds};
use crate::frame_validity::FrameValidityBitmap;
use crate::layout::{AddressSpaceLayout, Platform};
use crate::pool::{PagedPool, PoolThresholds};
use crate::shared_page::SharedUserData;
use crate::size_class::{SystemSizeClass, Tunables};
use kernel_memory_addresses::FrameNumber;
use kernel_vmem::{PageTableHierarchy, PagingDepth};

/// Page-table entry type of platform `P`.
pub type EntryOf<P> = <<P as Platform>::Depth as PagingDepth>::Entry;

/// Everything the memory manager builds while the system boots.
///
/// Owned by the [`PhaseSequencer`](crate::phase::PhaseSequencer); later
/// subsystems see it through [`MmView`].
pub struct BootstrapContext<P: Platform, E> {
    pub(crate) config: BootConfig,
    pub(crate) map: PhysicalMemoryMap,
    pub(crate) validity: FrameValidityBitmap,
    pub(crate) layout: AddressSpaceLayout,
    pub(crate) tunables: Tunables,
    pub(crate) budget: ResidentBudget,
    pub(crate) commit: CommitCounter,
    pub(crate) limits: DerivedLimits,
    pub(crate) tables: PageTableHierarchy<P::Depth>,
    pub(crate) paged_pool: PagedPool,
    pub(crate) pool_thresholds: PoolThresholds,
    pub(crate) events: MemoryEvents<E>,
    pub(crate) shared_user_data: Option<SharedUserData<EntryOf<P>>>,
    pub(crate) available_pages: u64,
}

impl<P: Platform, E> BootstrapContext<P, E> {
    #[must_use]
    pub fn view(&self) -> MmView<'_> {
        MmView {
            layout: &self.layout,
            map: &self.map,
            validity: &self.validity,
            tunables: &self.tunables,
            limits: &self.limits,
            commit: &self.commit,
            budget: &self.budget,
            paged_pool: &self.paged_pool,
            pool_thresholds: &self.pool_thresholds,
            memory_thresholds: self.events.thresholds(),
            available_pages: self.available_pages,
            shared_user_data: self.shared_user_data.map(|s| s.frame),
        }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &BootConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn tables(&self) -> &PageTableHierarchy<P::Depth> {
        &self.tables
    }

    #[inline]
    #[must_use]
    pub const fn events(&self) -> &MemoryEvents<E> {
        &self.events
    }

    #[inline]
    #[must_use]
    pub const fn shared_user_data(&self) -> Option<&SharedUserData<EntryOf<P>>> {
        self.shared_user_data.as_ref()
    }
}

/// Read-only access to the memory manager's boot results.
#[derive(Copy, Clone)]
pub struct MmView<'a> {
    layout: &'a AddressSpaceLayout,
    map: &'a PhysicalMemoryMap,
    validity: &'a FrameValidityBitmap,
    tunables: &'a Tunables,
    limits: &'a DerivedLimits,
    commit: &'a CommitCounter,
    budget: &'a ResidentBudget,
    paged_pool: &'a PagedPool,
    pool_thresholds: &'a PoolThresholds,
    memory_thresholds: MemoryThresholds,
    available_pages: u64,
    shared_user_data: Option<FrameNumber>,
}

impl<'a> MmView<'a> {
    #[must_use]
    pub const fn layout(&self) -> &'a AddressSpaceLayout {
        self.layout
    }

    #[must_use]
    pub const fn memory_map(&self) -> &'a PhysicalMemoryMap {
        self.map
    }

    #[must_use]
    pub const fn frame_validity(&self) -> &'a FrameValidityBitmap {
        self.validity
    }

    #[must_use]
    pub const fn size_class(&self) -> SystemSizeClass {
        self.tunables.size_class
    }

    #[must_use]
    pub const fn tunables(&self) -> &'a Tunables {
        self.tunables
    }

    #[must_use]
    pub const fn limits(&self) -> &'a DerivedLimits {
        self.limits
    }

    #[must_use]
    pub const fn commit(&self) -> &'a CommitCounter {
        self.commit
    }

    /// Resident pages not yet committed to anything.
    #[must_use]
    pub const fn resident_available(&self) -> u64 {
        self.budget.remaining()
    }

    /// The paged pool; take its lock before reading the bitmaps.
    #[must_use]
    pub const fn paged_pool(&self) -> &'a PagedPool {
        self.paged_pool
    }

    #[must_use]
    pub const fn pool_thresholds(&self) -> &'a PoolThresholds {
        self.pool_thresholds
    }

    #[must_use]
    pub const fn memory_thresholds(&self) -> MemoryThresholds {
        self.memory_thresholds
    }

    #[must_use]
    pub const fn available_pages(&self) -> u64 {
        self.available_pages
    }

    /// Frame of the shared user data page, once Phase1 has mapped it.
    #[must_use]
    pub const fn shared_user_data(&self) -> Option<FrameNumber> {
        self.shared_user_data
    }
}

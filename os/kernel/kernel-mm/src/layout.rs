//! # Address Space Layout
//!
//! The fixed partitioning of the virtual address space, computed once in
//! Phase0 by [`plan`] and read-only afterwards.
//!
//! ## 32-bit, default split
//!
//! ```text
//!  0x0000_0000 ┌──────────────────────────┐
//!              │ user space               │
//!  0x7FFF_0000 ├──────────────────────────┤ user probe address
//!  0x8000_0000 ├──────────────────────────┤ system range start
//!              │ kernel, HAL, boot images │
//!              ├──────────────────────────┤
//!              │ system views             │
//!              ├──────────────────────────┤
//!              │ session space            │
//!  0xC000_0000 ├──────────────────────────┤
//!              │ page tables, hyperspace  │
//!  0xC0C0_0000 ├──────────────────────────┤ system cache working set
//!  0xC100_0000 ├──────────────────────────┤
//!              │ system cache             │
//!  0xE100_0000 ├──────────────────────────┤
//!              │ paged pool               │
//!  0xEB00_0000 ├──────────────────────────┤
//!              │ system PTEs              │
//!              ├──────────────────────────┤
//!              │ nonpaged pool            │
//!  0xFFBE_0000 ├──────────────────────────┤
//!              │ crash dump, HAL          │
//!  0xFFDF_0000 ├──────────────────────────┤ shared user data
//!  0xFFFF_FFFF └──────────────────────────┘
//! ```
//!
//! ## 64-bit
//!
//! Session space sits directly below the system cache, and system views
//! occupy the top of the paged pool window so that they come out of the pool
//! budget when both would not fit.
//!
//! The relative order of regions depends only on the architecture and on
//! whether the 3 GB user-space bias is active; [`AddressSpaceLayout::validate`]
//! checks it.

pub mod arch;
mod planner;
mod session;

pub use arch::{
    AMD64, Amd64Platform, ArchConstants, Platform, PlatformVisitor, X86, X86_PAE, X86PaePlatform, X86Platform,
};
pub use planner::{LayoutInputs, plan};
pub use session::SessionLayout;

use crate::config::Architecture;
use core::fmt;
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress, VirtualRange};
use kernel_vmem::PagingDepth;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("{first} and {second} overlap")]
    Overlap { first: RegionKind, second: RegionKind },
    #[error("{second} starts below {first}")]
    OutOfOrder { first: RegionKind, second: RegionKind },
    #[error("{0} is not translatable at this paging depth")]
    NotTranslatable(RegionKind),
    #[error("no virtual address space left for {0}")]
    Exhausted(RegionKind),
}

/// Named regions of the layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegionKind {
    UserSpace,
    /// System space gained by shrinking user space.
    ExtraSystemSpace,
    SharedUserData,
    SystemCacheWorkingSet,
    SessionSpace,
    SystemView,
    SystemCache,
    BootImage,
    PagedPool,
    SystemPtes,
    NonPagedPool,
}

impl RegionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserSpace => "user space",
            Self::ExtraSystemSpace => "extra system space",
            Self::SharedUserData => "shared user data",
            Self::SystemCacheWorkingSet => "system cache working set",
            Self::SessionSpace => "session space",
            Self::SystemView => "system views",
            Self::SystemCache => "system cache",
            Self::BootImage => "boot image",
            Self::PagedPool => "paged pool",
            Self::SystemPtes => "system PTEs",
            Self::NonPagedPool => "nonpaged pool",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub range: VirtualRange,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<24} {}", self.kind.as_str(), self.range)
    }
}

/// Where user space ends and system space begins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UserSpaceSplit {
    pub highest_user_address: VirtualAddress,
    pub user_probe_address: VirtualAddress,
    pub system_range_start: VirtualAddress,
    /// Space between the system range start and the architected start,
    /// when user space was reduced below the default.
    pub extra_system_space: Option<VirtualRange>,
    /// Largest working set in pages, following the size of user space.
    pub maximum_working_set: u64,
}

impl UserSpaceSplit {
    #[must_use]
    pub const fn architected(c: &ArchConstants) -> Self {
        Self {
            highest_user_address: VirtualAddress::new(c.highest_user_address),
            user_probe_address: VirtualAddress::new(c.user_probe_address),
            system_range_start: VirtualAddress::new(c.system_range_start),
            extra_system_space: None,
            maximum_working_set: c.max_working_set,
        }
    }

    /// User space as a range.
    #[must_use]
    pub fn user_range(&self) -> VirtualRange {
        VirtualRange::new(VirtualAddress::new(0), self.user_probe_address)
            .unwrap_or(VirtualRange::empty(VirtualAddress::new(0)))
    }
}

/// The system PTE region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SystemPtes {
    pub range: VirtualRange,
    pub count: u64,
}

/// Nonpaged pool region and its initial and maximum sizes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NonPagedPoolLayout {
    pub range: VirtualRange,
    pub initial_bytes: u64,
    pub maximum_bytes: u64,
}

impl NonPagedPoolLayout {
    #[inline]
    #[must_use]
    pub const fn initial_pages(&self) -> u64 {
        self.initial_bytes >> Size4K::SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn maximum_pages(&self) -> u64 {
        self.maximum_bytes >> Size4K::SHIFT
    }
}

/// Every region boundary of the system address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpaceLayout {
    pub architecture: Architecture,
    pub virtual_bias: bool,
    pub split: UserSpaceSplit,
    pub session: SessionLayout,
    pub system_view: VirtualRange,
    /// Only tracked when boot images grow down from the paged pool start.
    pub boot_image: Option<VirtualRange>,
    pub system_cache_working_set: VirtualRange,
    pub system_cache: VirtualRange,
    /// Largest the system cache could grow, in pages.
    pub system_cache_max_pages: u64,
    /// The paged pool window; its length is the largest admissible pool.
    pub paged_pool: VirtualRange,
    pub system_ptes: SystemPtes,
    pub nonpaged_pool: NonPagedPoolLayout,
    pub shared_user_data: VirtualRange,
}

impl AddressSpaceLayout {
    /// Largest paged pool the layout can hold, in bytes.
    #[inline]
    #[must_use]
    pub const fn paged_pool_maximum(&self) -> u64 {
        self.paged_pool.len()
    }

    /// Named regions in architected order.
    pub fn regions(&self) -> impl Iterator<Item = Region> + '_ {
        let r = |kind, range| Some(Region { kind, range });
        let user = r(RegionKind::UserSpace, self.split.user_range());
        let extra = self
            .split
            .extra_system_space
            .and_then(|range| r(RegionKind::ExtraSystemSpace, range));
        let shared = r(RegionKind::SharedUserData, self.shared_user_data);
        let cache_ws = r(RegionKind::SystemCacheWorkingSet, self.system_cache_working_set);
        let session = r(RegionKind::SessionSpace, self.session.range);
        let view = r(RegionKind::SystemView, self.system_view);
        let cache = r(RegionKind::SystemCache, self.system_cache);
        let boot = self.boot_image.and_then(|range| r(RegionKind::BootImage, range));
        let paged = r(RegionKind::PagedPool, self.paged_pool);
        let ptes = r(RegionKind::SystemPtes, self.system_ptes.range);
        let nonpaged = r(RegionKind::NonPagedPool, self.nonpaged_pool.range);

        let ordered = match (self.architecture.is_64bit(), self.virtual_bias) {
            (true, _) => [user, shared, cache_ws, session, cache, paged, view, ptes, nonpaged, None, None],
            (false, false) => [user, extra, view, session, cache_ws, cache, paged, ptes, nonpaged, shared, None],
            (false, true) => [user, extra, cache_ws, cache, session, view, boot, paged, ptes, nonpaged, shared],
        };
        ordered.into_iter().flatten()
    }

    /// Check that regions are translatable, in order and pairwise disjoint.
    ///
    /// # Errors
    /// The first violated property.
    pub fn validate<D: PagingDepth>(&self) -> Result<(), LayoutError> {
        let mut previous: Option<Region> = None;
        for region in self.regions() {
            let translatable = region.range.last().is_none_or(|last| {
                D::is_translatable(region.range.start()) && D::is_translatable(last)
            });
            if !translatable {
                return Err(LayoutError::NotTranslatable(region.kind));
            }
            if let Some(prev) = previous {
                if prev.range.overlaps(&region.range) {
                    return Err(LayoutError::Overlap {
                        first: prev.kind,
                        second: region.kind,
                    });
                }
                if region.range.start() < prev.range.end() {
                    return Err(LayoutError::OutOfOrder {
                        first: prev.kind,
                        second: region.kind,
                    });
                }
            }
            previous = Some(region);
        }

        // Consecutive checks imply pairwise disjointness; this is the cheap
        // confirmation for debug builds.
        debug_assert!(self.regions().all(|a| self
            .regions()
            .filter(|b| b.kind != a.kind)
            .all(|b| !a.range.overlaps(&b.range))));
        Ok(())
    }
}

impl fmt::Display for AddressSpaceLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for region in self.regions() {
            writeln!(f, "{region}")?;
        }
        Ok(())
    }
}

//! System size classification and the tunables it selects.
//!
//! The class is derived from physical memory alone and only picks tuning
//! values; the layout planner never consults it.

use crate::config::ProductType;
use core::fmt;
use kernel_memory_addresses::mib_to_pages;

/// At or below this many pages a system is small.
pub const MM_SMALL_SYSTEM: u64 = mib_to_pages(13);

/// At or below this many pages a system is still small, with larger clusters.
pub const MM_MEDIUM_SYSTEM: u64 = mib_to_pages(19);

const CACHE_WS_MINIMUM_BASE: u64 = 288;
const MINIMUM_FREE_PAGES: u64 = 26;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SystemSizeClass {
    Small,
    Medium,
    Large,
}

impl SystemSizeClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for SystemSizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values tuned by system size and product type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Tunables {
    pub size_class: SystemSizeClass,
    pub maximum_dead_kernel_stacks: u32,
    pub modified_page_maximum: u64,
    /// System cache working-set minimum, in pages.
    pub system_cache_ws_minimum: u64,
    pub data_cluster_size: u32,
    pub code_cluster_size: u32,
    pub read_cluster_size: u32,
    pub in_page_support_minimum: u32,
    pub throttle_top: u64,
    pub throttle_bottom: u64,
    pub minimum_free_pages: u64,
    pub freed_expansion_pool_maximum: u64,
}

impl Tunables {
    /// Tunables for a machine with `total_pages` of physical memory.
    #[must_use]
    pub const fn derive(total_pages: u64, product: ProductType) -> Self {
        let mut t = if total_pages <= MM_SMALL_SYSTEM {
            Self::base(SystemSizeClass::Small, 0, 100, 0, [0, 1, 2], 2)
        } else if total_pages <= MM_MEDIUM_SYSTEM {
            Self::base(SystemSizeClass::Small, 2, 150, 100, [1, 2, 4], 3)
        } else {
            Self::base(SystemSizeClass::Medium, 5, 300, 400, [3, 7, 7], 4)
        };

        if total_pages < mib_to_pages(24) {
            t.system_cache_ws_minimum = 32;
        }

        let large_at = if product.is_server() { 64 } else { 32 };
        if total_pages >= mib_to_pages(large_at) {
            t.size_class = SystemSizeClass::Large;
        }

        if total_pages > mib_to_pages(33) {
            t.modified_page_maximum = 800;
            t.system_cache_ws_minimum += 500;
            t.in_page_support_minimum += 4;
        }

        t.freed_expansion_pool_maximum = if total_pages > mib_to_pages(1000) {
            300
        } else if total_pages > mib_to_pages(500) {
            100
        } else {
            5
        };

        if product.is_server() {
            t.throttle_top = 450;
            t.throttle_bottom = 80;
            t.minimum_free_pages = 81;
            t.in_page_support_minimum += 8;
        }
        t
    }

    const fn base(
        size_class: SystemSizeClass,
        dead_stacks: u32,
        modified_maximum: u64,
        cache_ws_extra: u64,
        [data, code, read]: [u32; 3],
        in_page: u32,
    ) -> Self {
        Self {
            size_class,
            maximum_dead_kernel_stacks: dead_stacks,
            modified_page_maximum: modified_maximum,
            system_cache_ws_minimum: CACHE_WS_MINIMUM_BASE + cache_ws_extra,
            data_cluster_size: data,
            code_cluster_size: code,
            read_cluster_size: read,
            in_page_support_minimum: in_page,
            throttle_top: 250,
            throttle_bottom: 30,
            minimum_free_pages: MINIMUM_FREE_PAGES,
            freed_expansion_pool_maximum: 5,
        }
    }
}

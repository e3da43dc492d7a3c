//! Per-architecture address-space constants and the platform composition point.

use crate::config::Architecture;
use kernel_memory_addresses::{MIB, PageSize, Size4K};
use kernel_vmem::{FourLevel, PagingDepth, ThreeLevel, TwoLevel};

const KIB: u64 = 1024;
const GIB: u64 = 1024 * MIB;

/// Fixed virtual-address constants of one architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchConstants {
    pub architecture: Architecture,
    /// Bytes mapped by one page-directory entry.
    pub pde_span: u64,
    /// Entries in one page-table page.
    pub ptes_per_page: u64,

    pub highest_user_address: u64,
    pub user_probe_address: u64,
    pub system_range_start: u64,

    pub session_space_end: u64,
    pub session_maximum_total: u64,
    pub session_image_default: u64,
    /// Working set plus the session structure.
    pub session_ws_default: u64,
    pub session_view_default: u64,
    pub session_pool_default: u64,

    pub system_cache_working_set: u64,
    pub system_cache_start: u64,
    pub system_cache_end: u64,
    pub paged_pool_start: u64,
    pub lowest_nonpaged_system_start: u64,
    pub nonpaged_pool_end: u64,

    pub default_system_view_size: u64,

    pub system_ptes_minimum: u64,
    pub system_ptes_default: u64,
    pub system_ptes_maximum: u64,

    pub max_paged_pool: u64,
    pub max_additional_nonpaged_pool: u64,
    /// Largest working set, in pages, before any user-space adjustment.
    pub max_working_set: u64,
    /// Largest prototype PTE allocation fragment, bytes.
    pub allocation_fragment_max: u64,

    pub shared_user_data: u64,
}

/// Size of the per-session control structure.
pub const SESSION_STRUCT_SIZE: u64 = 64 * KIB;

/// Boot image bytes that fit below paged pool without moving it.
pub const BOOT_IMAGE_SLACK: u64 = 16 * MIB;

const X86_COMMON: ArchConstants = ArchConstants {
    architecture: Architecture::X86,
    pde_span: 4 * MIB,
    ptes_per_page: 1024,

    highest_user_address: 0x7FFE_FFFF,
    user_probe_address: 0x7FFF_0000,
    system_range_start: 0x8000_0000,

    session_space_end: 0xC000_0000,
    session_maximum_total: 512 * MIB,
    session_image_default: 8 * MIB,
    session_ws_default: 4 * MIB,
    session_view_default: 20 * MIB,
    session_pool_default: 16 * MIB,

    system_cache_working_set: 0xC0C0_0000,
    system_cache_start: 0xC100_0000,
    system_cache_end: 0xE100_0000,
    paged_pool_start: 0xE100_0000,
    lowest_nonpaged_system_start: 0xEB00_0000,
    nonpaged_pool_end: 0xFFBE_0000,

    default_system_view_size: 16 * MIB,

    system_ptes_minimum: 7000,
    system_ptes_default: 11000,
    system_ptes_maximum: 50000,

    max_paged_pool: 0xFFBE_0000 - 0xE100_0000,
    max_additional_nonpaged_pool: 128 * MIB,
    max_working_set: (2 * GIB - 64 * MIB) >> Size4K::SHIFT,
    allocation_fragment_max: 2 * MIB,

    shared_user_data: 0xFFDF_0000,
};

pub const X86: ArchConstants = X86_COMMON;

pub const X86_PAE: ArchConstants = ArchConstants {
    architecture: Architecture::X86Pae,
    pde_span: 2 * MIB,
    ptes_per_page: 512,
    ..X86_COMMON
};

pub const AMD64: ArchConstants = ArchConstants {
    architecture: Architecture::Amd64,
    pde_span: 2 * MIB,
    ptes_per_page: 512,

    highest_user_address: 0x0000_07FF_FFFE_FFFF,
    user_probe_address: 0x0000_07FF_FFFF_0000,
    system_range_start: 0xFFFF_0800_0000_0000,

    session_space_end: 0xFFFF_F980_0000_0000,
    session_maximum_total: GIB,
    session_image_default: 16 * MIB,
    session_ws_default: 16 * MIB,
    session_view_default: 104 * MIB,
    session_pool_default: 64 * MIB,

    system_cache_working_set: 0xFFFF_F780_0000_1000,
    system_cache_start: 0xFFFF_F980_0000_0000,
    system_cache_end: 0xFFFF_FA80_0000_0000,
    paged_pool_start: 0xFFFF_FA80_0000_0000,
    lowest_nonpaged_system_start: 0xFFFF_FAA0_0000_0000,
    nonpaged_pool_end: 0xFFFF_FAE0_0000_0000,

    default_system_view_size: 104 * MIB,

    system_ptes_minimum: 7000,
    system_ptes_default: 11000,
    system_ptes_maximum: 16 * 1024 * 1024,

    max_paged_pool: 128 * GIB,
    max_additional_nonpaged_pool: 128 * GIB,
    max_working_set: (8 * 1024 * GIB - 64 * MIB) >> Size4K::SHIFT,
    allocation_fragment_max: 64 * MIB,

    shared_user_data: 0xFFFF_F780_0000_0000,
};

impl ArchConstants {
    #[inline]
    #[must_use]
    pub const fn is_64bit(&self) -> bool {
        self.architecture.is_64bit()
    }

    /// PDE span in whole MiB, the granularity of MiB-valued overrides.
    #[inline]
    #[must_use]
    pub const fn pde_mib(&self) -> u64 {
        self.pde_span / MIB
    }

    /// Bytes mapped by one page-table page.
    #[inline]
    #[must_use]
    pub const fn page_table_span(&self) -> u64 {
        self.ptes_per_page * Size4K::SIZE
    }

    /// Default session total: all four sub-regions at their defaults.
    #[inline]
    #[must_use]
    pub const fn session_default_total(&self) -> u64 {
        self.session_image_default
            + self.session_ws_default
            + self.session_view_default
            + self.session_pool_default
    }
}

impl Architecture {
    #[must_use]
    pub const fn constants(self) -> &'static ArchConstants {
        match self {
            Self::X86 => &X86,
            Self::X86Pae => &X86_PAE,
            Self::Amd64 => &AMD64,
        }
    }

    /// Run `visitor` with the platform type matching `self`.
    ///
    /// This is the one place where the runtime architecture turns into a
    /// paging depth at the type level.
    pub fn dispatch<V: PlatformVisitor>(self, visitor: V) -> V::Output {
        match self {
            Self::X86 => visitor.visit::<X86Platform>(),
            Self::X86Pae => visitor.visit::<X86PaePlatform>(),
            Self::Amd64 => visitor.visit::<Amd64Platform>(),
        }
    }
}

/// An architecture together with its paging depth.
pub trait Platform: Copy + Send + Sync + 'static {
    type Depth: PagingDepth;
    const CONSTANTS: &'static ArchConstants;
}

/// Callback for [`Architecture::dispatch`].
pub trait PlatformVisitor {
    type Output;
    fn visit<P: Platform>(self) -> Self::Output;
}

#[derive(Debug, Copy, Clone)]
pub struct X86Platform;

#[derive(Debug, Copy, Clone)]
pub struct X86PaePlatform;

#[derive(Debug, Copy, Clone)]
pub struct Amd64Platform;

impl Platform for X86Platform {
    type Depth = TwoLevel;
    const CONSTANTS: &'static ArchConstants = &X86;
}

impl Platform for X86PaePlatform {
    type Depth = ThreeLevel;
    const CONSTANTS: &'static ArchConstants = &X86_PAE;
}

impl Platform for Amd64Platform {
    type Depth = FourLevel;
    const CONSTANTS: &'static ArchConstants = &AMD64;
}

const _: () = {
    assert!(X86.pde_span == 1024 * Size4K::SIZE);
    assert!(X86_PAE.pde_span == 512 * Size4K::SIZE);
    assert!(AMD64.pde_span == 512 * Size4K::SIZE);
    assert!(X86.session_default_total() == 48 * MIB);
    assert!(AMD64.session_default_total() == 200 * MIB);
    assert!(X86.session_ws_default > SESSION_STRUCT_SIZE);
    assert!(AMD64.session_ws_default > SESSION_STRUCT_SIZE);
    assert!(AMD64.paged_pool_start + AMD64.max_paged_pool == AMD64.lowest_nonpaged_system_start);
};

#[cfg(test)]
mod tests {
    use super::*;

    struct Levels;

    impl PlatformVisitor for Levels {
        type Output = (u32, u64);

        fn visit<P: Platform>(self) -> Self::Output {
            (<P::Depth as PagingDepth>::LEVELS, P::CONSTANTS.pde_span)
        }
    }

    #[test]
    fn dispatch_selects_matching_depth() {
        assert_eq!(Architecture::X86.dispatch(Levels), (2, 4 * MIB));
        assert_eq!(Architecture::X86Pae.dispatch(Levels), (3, 2 * MIB));
        assert_eq!(Architecture::Amd64.dispatch(Levels), (4, 2 * MIB));
    }

    #[test]
    fn depth_and_constants_agree() {
        assert_eq!(TwoLevel::pde_span(), X86.pde_span);
        assert_eq!(ThreeLevel::pde_span(), X86_PAE.pde_span);
        assert_eq!(FourLevel::pde_span(), AMD64.pde_span);
        assert_eq!(FourLevel::ptes_per_page(), AMD64.ptes_per_page);
        assert_eq!(TwoLevel::ptes_per_page(), X86.ptes_per_page);
    }

    #[test]
    fn constants_by_architecture() {
        assert_eq!(Architecture::X86Pae.constants().system_cache_start, 0xC100_0000);
        assert_eq!(X86.pde_mib(), 4);
        assert_eq!(AMD64.page_table_span(), 2 * MIB);
    }
}

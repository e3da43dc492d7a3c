//! # Paging Depth
//!
//! One implementation of [`PagingDepth`] per supported translation scheme.
//! Everything that depends on "how many levels" is expressed through this
//! trait, so the rest of the memory manager never branches on architecture.
//!
//! | Depth | Root table | Entries (root / other) | Entry size | Directory entry span |
//! |-------|------------|------------------------|------------|----------------------|
//! | [`TwoLevel`] | Directory | 1024 / 1024 | 32-bit | 4 MiB |
//! | [`ThreeLevel`] | Directory pointer | 4 / 512 | 64-bit | 2 MiB |
//! | [`FourLevel`] | Extended directory | 512 / 512 | 64-bit | 2 MiB |

use crate::entry::{PageTableEntry, X64Entry, X86Entry};
use core::fmt;
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};

/// A level of the translation tree.
///
/// `PageTable` is the lowest level: its entries map 4 KiB pages. Every other
/// level holds entries that point at a table one level below.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PagingLevel {
    PageTable = 1,
    Directory = 2,
    DirectoryPointer = 3,
    ExtendedDirectory = 4,
}

impl PagingLevel {
    /// Levels from the top of a four-level tree down to the page table.
    pub const DESCENDING: [Self; 4] = [
        Self::ExtendedDirectory,
        Self::DirectoryPointer,
        Self::Directory,
        Self::PageTable,
    ];

    /// 1 for the page table, 4 for the extended directory.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self as u32
    }

    /// The level whose tables this level's entries point at.
    #[inline]
    #[must_use]
    pub const fn below(self) -> Option<Self> {
        match self {
            Self::PageTable => None,
            Self::Directory => Some(Self::PageTable),
            Self::DirectoryPointer => Some(Self::Directory),
            Self::ExtendedDirectory => Some(Self::DirectoryPointer),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PageTable => "page table",
            Self::Directory => "directory",
            Self::DirectoryPointer => "directory pointer",
            Self::ExtendedDirectory => "extended directory",
        }
    }
}

impl fmt::Display for PagingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile-time description of a translation scheme.
pub trait PagingDepth: Copy + fmt::Debug + Send + Sync + 'static {
    /// Entry layout used at every level.
    type Entry: PageTableEntry;

    /// Human-readable name for diagnostics.
    const NAME: &'static str;

    /// Number of table levels, including the page table.
    const LEVELS: u32;

    /// log2 of the entries in a non-root table.
    const TABLE_BITS: u32;

    /// log2 of the entries in the root table.
    const ROOT_BITS: u32;

    /// Width of the translated virtual address.
    const VA_BITS: u32;

    /// Level of the root table.
    #[inline]
    #[must_use]
    fn root_level() -> PagingLevel {
        match Self::LEVELS {
            2 => PagingLevel::Directory,
            3 => PagingLevel::DirectoryPointer,
            _ => PagingLevel::ExtendedDirectory,
        }
    }

    /// Levels of this tree, root first, page table last.
    fn levels() -> impl Iterator<Item = PagingLevel> {
        PagingLevel::DESCENDING
            .into_iter()
            .filter(|l| l.number() <= Self::LEVELS)
    }

    /// Directory levels strictly between the root and the page table.
    ///
    /// Empty for a two-level tree.
    fn intermediate_levels() -> impl Iterator<Item = PagingLevel> {
        Self::levels().filter(|l| *l != Self::root_level() && *l != PagingLevel::PageTable)
    }

    /// Number of entries in a table at `level`.
    #[inline]
    #[must_use]
    fn entries(level: PagingLevel) -> usize {
        let bits = if level == Self::root_level() {
            Self::ROOT_BITS
        } else {
            Self::TABLE_BITS
        };
        1 << bits
    }

    /// Bytes mapped by one entry at `level`.
    #[inline]
    #[must_use]
    fn span(level: PagingLevel) -> u64 {
        Size4K::SIZE << (Self::TABLE_BITS * (level.number() - 1))
    }

    /// Index of `va` in a table at `level`.
    #[inline]
    #[must_use]
    fn index(va: VirtualAddress, level: PagingLevel) -> usize {
        let shift = Size4K::SHIFT + Self::TABLE_BITS * (level.number() - 1);
        #[allow(clippy::cast_possible_truncation)]
        let raw = (va.as_u64() >> shift) as usize;
        raw & (Self::entries(level) - 1)
    }

    /// Bytes mapped by one page-table page, i.e. one directory entry.
    #[inline]
    #[must_use]
    fn pde_span() -> u64 {
        Self::span(PagingLevel::Directory)
    }

    /// Entries in one page-table page.
    #[inline]
    #[must_use]
    fn ptes_per_page() -> u64 {
        1 << Self::TABLE_BITS
    }

    /// One past the highest translatable address, or `None` for the full 64-bit space.
    #[inline]
    #[must_use]
    fn address_limit() -> Option<u64> {
        1_u64.checked_shl(Self::VA_BITS)
    }

    /// Whether `va` can be translated by this scheme.
    ///
    /// Four-level addresses must be canonical (bits 63..48 equal to bit 47).
    #[must_use]
    fn is_translatable(va: VirtualAddress) -> bool {
        if Self::VA_BITS >= 64 {
            return true;
        }
        let v = va.as_u64();
        if Self::LEVELS < 4 {
            return v >> Self::VA_BITS == 0;
        }
        let upper = v >> (Self::VA_BITS - 1);
        upper == 0 || upper == (u64::MAX >> (Self::VA_BITS - 1))
    }
}

/// Classic 32-bit paging: directory and page table, 1024 entries each.
#[derive(Debug, Copy, Clone, Default)]
pub struct TwoLevel;

/// 32-bit PAE paging: a four-entry pointer table above 512-entry tables.
#[derive(Debug, Copy, Clone, Default)]
pub struct ThreeLevel;

/// 48-bit long-mode paging.
#[derive(Debug, Copy, Clone, Default)]
pub struct FourLevel;

impl PagingDepth for TwoLevel {
    type Entry = X86Entry;
    const NAME: &'static str = "2-level";
    const LEVELS: u32 = 2;
    const TABLE_BITS: u32 = 10;
    const ROOT_BITS: u32 = 10;
    const VA_BITS: u32 = 32;
}

impl PagingDepth for ThreeLevel {
    type Entry = X64Entry;
    const NAME: &'static str = "3-level";
    const LEVELS: u32 = 3;
    const TABLE_BITS: u32 = 9;
    const ROOT_BITS: u32 = 2;
    const VA_BITS: u32 = 32;
}

impl PagingDepth for FourLevel {
    type Entry = X64Entry;
    const NAME: &'static str = "4-level";
    const LEVELS: u32 = 4;
    const TABLE_BITS: u32 = 9;
    const ROOT_BITS: u32 = 9;
    const VA_BITS: u32 = 48;
}

const _: () = {
    // The root table must cover exactly the translatable width.
    assert!(12 + TwoLevel::TABLE_BITS + TwoLevel::ROOT_BITS == TwoLevel::VA_BITS);
    assert!(12 + 2 * ThreeLevel::TABLE_BITS + ThreeLevel::ROOT_BITS == ThreeLevel::VA_BITS);
    assert!(12 + 3 * FourLevel::TABLE_BITS + FourLevel::ROOT_BITS == FourLevel::VA_BITS);
};

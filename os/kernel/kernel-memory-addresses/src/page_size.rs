use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the spans mapped by one entry at some paging level.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Display + fmt::Debug
{
    /// Span in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE).
    const SHIFT: u32;
    /// Number of 4 KiB pages in one span.
    const PAGES: u64 = Self::SIZE >> 12;

    fn as_str() -> &'static str;

    /// Whether `value` is a multiple of this span.
    #[inline]
    #[must_use]
    fn is_aligned(value: u64) -> bool {
        value & (Self::SIZE - 1) == 0
    }
}

macro_rules! page_size {
    ($(#[$doc:meta])* $name:ident, $size:expr, $shift:literal, $label:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u64 = $size;
            const SHIFT: u32 = $shift;

            fn as_str() -> &'static str {
                $label
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(Self::as_str())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&self, f)
            }
        }
    };
}

page_size!(
    /// 4 KiB: one page, the span of a single page-table entry.
    Size4K, 4096, 12, "4K"
);

page_size!(
    /// 2 MiB: span of a directory entry when tables hold 512 entries.
    Size2M, 2 * 1024 * 1024, 21, "2M"
);

page_size!(
    /// 4 MiB: span of a directory entry when tables hold 1024 entries.
    Size4M, 4 * 1024 * 1024, 22, "4M"
);

page_size!(
    /// 1 GiB: span of a directory-pointer entry.
    Size1G, 1024 * 1024 * 1024, 30, "1G"
);

const _: () = {
    assert!(Size4K::SIZE == 1 << Size4K::SHIFT);
    assert!(Size2M::SIZE == 1 << Size2M::SHIFT);
    assert!(Size4M::SIZE == 1 << Size4M::SHIFT);
    assert!(Size1G::SIZE == 1 << Size1G::SHIFT);
};

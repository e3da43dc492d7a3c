use crate::{PageSize, Size4K};
use core::fmt;

/// Physical frame number (PFN).
///
/// The index of a 4 KiB unit of physical memory, i.e. the physical address
/// shifted right by [`Size4K::SHIFT`].
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let f = FrameNumber::new(100);
/// assert_eq!(f.checked_add(50), Some(FrameNumber::new(150)));
/// assert_eq!(f.base_address(), Some(100 * 4096));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u64);

impl FrameNumber {
    /// Largest frame number whose base address is still representable.
    pub const MAX: Self = Self(u64::MAX >> Size4K::SHIFT);

    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The frame containing physical byte address `pa`.
    #[inline]
    #[must_use]
    pub const fn from_physical(pa: u64) -> Self {
        Self(pa >> Size4K::SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Physical byte address of the first byte of this frame.
    #[inline]
    #[must_use]
    pub const fn base_address(self) -> Option<u64> {
        if self.0 > Self::MAX.0 {
            None
        } else {
            Some(self.0 << Size4K::SHIFT)
        }
    }

    /// The frame `pages` frames after this one.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, pages: u64) -> Option<Self> {
        match self.0.checked_add(pages) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Number of frames from `earlier` up to (excluding) `self`.
    #[inline]
    #[must_use]
    pub const fn checked_distance(self, earlier: Self) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({:#x})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {:#x}", self.0)
    }
}

impl From<u64> for FrameNumber {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

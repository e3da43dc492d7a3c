use crate::{PageSize, Size4K, VirtualAddress};
use core::fmt;

/// Half-open virtual address range `[start, end)`.
///
/// ### Invariants
/// - `start <= end`; enforced by the constructors.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let a = VirtualRange::new(VirtualAddress::new(0x1000), VirtualAddress::new(0x3000)).unwrap();
/// let b = VirtualRange::new(VirtualAddress::new(0x3000), VirtualAddress::new(0x4000)).unwrap();
/// assert!(!a.overlaps(&b));
/// assert_eq!(a.len(), 0x2000);
/// ```
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualRange {
    start: VirtualAddress,
    end: VirtualAddress,
}

impl VirtualRange {
    /// Range from `start` up to (excluding) `end`; `None` if `end < start`.
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress) -> Option<Self> {
        if end.as_u64() < start.as_u64() {
            None
        } else {
            Some(Self { start, end })
        }
    }

    /// Range of `len` bytes starting at `start`; `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn from_len(start: VirtualAddress, len: u64) -> Option<Self> {
        match start.checked_add(len) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    /// Empty range anchored at `at`.
    #[inline]
    #[must_use]
    pub const fn empty(at: VirtualAddress) -> Self {
        Self { start: at, end: at }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    /// Last byte address inside the range, if non-empty.
    #[inline]
    #[must_use]
    pub const fn last(&self) -> Option<VirtualAddress> {
        if self.is_empty() {
            None
        } else {
            Some(VirtualAddress::new(self.end.as_u64() - 1))
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.as_u64() == self.start.as_u64()
    }

    /// Number of 4 KiB pages touched by the range.
    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let first = self.start.as_u64() >> Size4K::SHIFT;
        let last = (self.end.as_u64() - 1) >> Size4K::SHIFT;
        last - first + 1
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.start.as_u64() && va.as_u64() < self.end.as_u64()
    }

    /// Whether the two ranges share at least one byte. Empty ranges never overlap.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.as_u64() < other.end.as_u64()
            && other.start.as_u64() < self.end.as_u64()
    }

    /// Whether both ends are aligned to the span `S`.
    #[inline]
    #[must_use]
    pub fn is_aligned<S: PageSize>(&self) -> bool {
        self.start.is_aligned::<S>() && self.end.is_aligned::<S>()
    }

    /// Iterate the base address of every `span`-sized slot touched by the range.
    ///
    /// `span` must be a power of two.
    pub fn slots(&self, span: u64) -> impl Iterator<Item = VirtualAddress> + use<> {
        debug_assert!(span.is_power_of_two());
        let first = self.start.align_down_to(span).as_u64();
        let end = self.end.as_u64();
        let count = if self.is_empty() {
            0
        } else {
            ((end - 1 - first) / span) + 1
        };
        (0..count).map(move |i| VirtualAddress::new(first + i * span))
    }
}

impl fmt::Debug for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VirtualRange(0x{:016X}..0x{:016X})",
            self.start.as_u64(),
            self.end.as_u64()
        )
    }
}

impl fmt::Display for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

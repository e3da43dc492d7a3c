use crate::PageSize;
use core::fmt;

/// Virtual memory address.
///
/// Carries the *kind* of address at the type level so virtual boundaries are
/// not mixed up with frame numbers or byte counts. No canonicality check is
/// performed; 32-bit layouts simply keep the upper half zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xC0C0_1234);
/// assert_eq!(va.align_down::<Size4M>().as_u64(), 0xC0C0_0000);
/// assert_eq!(va.align_up::<Size4K>().unwrap().as_u64(), 0xC0C0_2000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_sub(self, bytes: u64) -> Option<Self> {
        match self.0.checked_sub(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Byte distance from `lower` up to `self`, or `None` if `lower > self`.
    #[inline]
    #[must_use]
    pub const fn checked_offset_from(self, lower: Self) -> Option<u64> {
        self.0.checked_sub(lower.0)
    }

    /// Align down to the span `S`.
    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0 & !(S::SIZE - 1))
    }

    /// Align up to the span `S`; `None` if that leaves the address space.
    #[inline]
    #[must_use]
    pub const fn align_up<S: PageSize>(self) -> Option<Self> {
        match self.0.checked_add(S::SIZE - 1) {
            Some(v) => Some(Self(v & !(S::SIZE - 1))),
            None => None,
        }
    }

    /// Align down to an arbitrary power-of-two `span` in bytes.
    #[inline]
    #[must_use]
    pub const fn align_down_to(self, span: u64) -> Self {
        debug_assert!(span.is_power_of_two());
        Self(self.0 & !(span - 1))
    }

    #[inline]
    #[must_use]
    pub fn is_aligned<S: PageSize>(self) -> bool {
        S::is_aligned(self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Size2M, Size4K};

    #[test]
    fn alignment_helpers() {
        let a = VirtualAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u64(), 0x12000);
        assert_eq!(a.align_up::<Size4K>().map(VirtualAddress::as_u64), Some(0x13000));
        assert_eq!(a.align_down_to(0x100).as_u64(), 0x12300);
        assert!(VirtualAddress::new(0x40_0000).is_aligned::<Size2M>());
    }

    #[test]
    fn checked_arithmetic() {
        let top = VirtualAddress::new(u64::MAX - 10);
        assert_eq!(top.checked_add(11), None);
        assert_eq!(VirtualAddress::new(5).checked_sub(6), None);
        assert_eq!(top.align_up::<Size4K>(), None);
        assert_eq!(
            VirtualAddress::new(0x3000).checked_offset_from(VirtualAddress::new(0x1000)),
            Some(0x2000)
        );
    }
}

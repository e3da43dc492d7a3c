//! # Frame Numbers and Virtual Address Ranges
//!
//! Strongly typed wrappers for the raw quantities that boot-time memory
//! management code juggles: physical frame numbers, virtual addresses and
//! half-open virtual ranges.
//!
//! ## Overview
//!
//! Early memory-manager code mixes three kinds of integers that are all `u64`
//! underneath and all easy to confuse:
//!
//! | Concept | Type | Description |
//! |----------|----------|-------------|
//! | Physical frame | [`FrameNumber`] | Index of a 4 KiB unit of physical memory. |
//! | Virtual address | [`VirtualAddress`] | A byte address in some address space. |
//! | Virtual range | [`VirtualRange`] | A half-open `[start, end)` span of virtual addresses. |
//!
//! Page and table spans are expressed through the sealed [`PageSize`] marker
//! trait so that alignment helpers take the span at the type level:
//!
//! - [`Size4K`]: the base page and the span of one page-table entry
//! - [`Size2M`]: span of one page-directory entry with 512-entry tables
//! - [`Size4M`]: span of one page-directory entry with 1024-entry tables
//! - [`Size1G`]: span of one directory-pointer entry
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let start = VirtualAddress::new(0xFFFF_FA80_0000_0000);
//! let range = VirtualRange::from_len(start, 3 * Size2M::SIZE).unwrap();
//! assert_eq!(range.pages(), 3 * 512);
//! assert!(range.contains(VirtualAddress::new(0xFFFF_FA80_0020_0000)));
//!
//! let frame = FrameNumber::from_physical(0x0040_1000);
//! assert_eq!(frame.as_u64(), 0x401);
//! ```
//!
//! ## Design Notes
//!
//! - Scalar wrappers are `#[repr(transparent)]` over `u64`.
//! - Arithmetic that can leave the representable range is `checked_*` and
//!   returns `Option`; nothing here wraps silently.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod page_size;
mod virtual_address;
mod virtual_range;

pub use frame_number::FrameNumber;
pub use page_size::{PageSize, Size1G, Size2M, Size4K, Size4M};
pub use virtual_address::VirtualAddress;
pub use virtual_range::VirtualRange;

/// Bytes in one mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Number of 4 KiB pages needed to hold `bytes`, rounded up.
#[inline]
#[must_use]
pub const fn bytes_to_pages(bytes: u64) -> u64 {
    bytes.div_ceil(Size4K::SIZE)
}

/// Number of 4 KiB pages in `mib` mebibytes.
#[inline]
#[must_use]
pub const fn mib_to_pages(mib: u64) -> u64 {
    (mib * MIB) >> Size4K::SHIFT
}

/// Round `x` up to a multiple of `a`. `a` must be non-zero.
///
/// Returns `None` if the rounded value does not fit into `u64`.
///
/// ```rust
/// # use kernel_memory_addresses::round_up_to;
/// assert_eq!(round_up_to(5, 2), Some(6));
/// assert_eq!(round_up_to(6, 2), Some(6));
/// assert_eq!(round_up_to(u64::MAX, 2), None);
/// ```
#[inline]
#[must_use]
pub const fn round_up_to(x: u64, a: u64) -> Option<u64> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v / a * a),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_conversions() {
        assert_eq!(bytes_to_pages(0), 0);
        assert_eq!(bytes_to_pages(1), 1);
        assert_eq!(bytes_to_pages(4096), 1);
        assert_eq!(bytes_to_pages(4097), 2);
        assert_eq!(mib_to_pages(13), 3328);
        assert_eq!(mib_to_pages(19), 4864);
    }

    #[test]
    fn rounding_is_checked() {
        assert_eq!(round_up_to(0, 4), Some(0));
        assert_eq!(round_up_to(3, 4), Some(4));
        assert_eq!(round_up_to(u64::MAX - 1, 4), None);
    }
}

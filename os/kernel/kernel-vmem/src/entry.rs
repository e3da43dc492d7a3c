//! # Page-Table Entries
//!
//! The hierarchy builder only ever needs a handful of operations on an entry:
//! read its frame, ask whether it is valid, make it valid, or mark it as
//! demand-zero with a given protection. [`PageTableEntry`] captures exactly
//! that; the bit layouts live in [`X86Entry`] and [`X64Entry`].
//!
//! ## Encoding of invalid entries
//!
//! An invalid entry whose frame field is non-zero carries a [`Protection`]
//! in that field. Such an entry is *demand-zero*: the first touch hands out a
//! fresh zeroed page with that protection. An all-zero entry was never
//! touched by the memory manager.

mod x64;
mod x86;

pub use x64::X64Entry;
pub use x86::X86Entry;

use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::FrameNumber;

/// Access rights of a mapping, independent of any entry layout.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Protection {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub user: bool,
    #[bits(4)]
    __: u8,
}

impl Protection {
    /// Kernel read/write, no execute. Used for table frames and pool pages.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_readable(true).with_writable(true)
    }

    /// User-visible read-only, no execute.
    #[inline]
    #[must_use]
    pub const fn user_read_only() -> Self {
        Self::new().with_readable(true).with_user(true)
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.into_bits() == 0
    }
}

/// Architecture-independent view of one page-table entry.
pub trait PageTableEntry: Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// Highest frame number the layout can reference.
    const MAX_FRAME: u64;

    /// Whether the hardware will use this entry for translation.
    fn is_valid(&self) -> bool;

    /// The referenced frame, if the entry is valid.
    fn frame(&self) -> Option<FrameNumber>;

    /// Point the entry at `frame` and make it valid.
    ///
    /// `frame` must not exceed [`MAX_FRAME`](Self::MAX_FRAME).
    fn set_valid(&mut self, frame: FrameNumber, protection: Protection);

    /// Make the entry invalid and demand-zero with `protection`.
    fn set_demand_zero(&mut self, protection: Protection);

    /// Protection of a valid entry, or the recorded protection of an invalid one.
    fn protection(&self) -> Protection;

    /// Raw bits, widened to 64 bits.
    fn raw(&self) -> u64;

    /// Whether the entry is invalid but carries a protection.
    #[inline]
    fn is_demand_zero(&self) -> bool {
        !self.is_valid() && !self.protection().is_none()
    }

    /// Whether `frame` fits this layout.
    #[inline]
    fn can_reference(frame: FrameNumber) -> bool {
        frame.as_u64() <= Self::MAX_FRAME
    }
}

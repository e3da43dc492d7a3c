use super::{PageTableEntry, Protection};
use bitfield_struct::bitfield;
use kernel_memory_addresses::FrameNumber;

/// 64-bit entry shared by PAE and long-mode paging.
///
/// | Bits   | Field |
/// |--------|-------|
/// | 0      | present |
/// | 1      | writable |
/// | 2      | user |
/// | 3–4    | write-through, cache-disable |
/// | 5–6    | accessed, dirty |
/// | 7      | large page |
/// | 8      | global |
/// | 9–11   | software |
/// | 12–51  | frame, or protection while invalid |
/// | 52–62  | software |
/// | 63     | no-execute |
#[bitfield(u64)]
pub struct X64Entry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub large_page: bool,
    pub global: bool,
    #[bits(3)]
    pub software_low: u8,
    #[bits(40)]
    frame_bits: u64,
    #[bits(11)]
    pub software_high: u16,
    pub no_execute: bool,
}

impl PageTableEntry for X64Entry {
    const MAX_FRAME: u64 = (1 << 40) - 1;

    #[inline]
    fn is_valid(&self) -> bool {
        self.present()
    }

    #[inline]
    fn frame(&self) -> Option<FrameNumber> {
        self.present().then(|| FrameNumber::new(self.frame_bits()))
    }

    fn set_valid(&mut self, frame: FrameNumber, protection: Protection) {
        debug_assert!(Self::can_reference(frame), "{frame} exceeds 52-bit physical");
        *self = Self::new()
            .with_present(true)
            .with_writable(protection.writable())
            .with_user(protection.user())
            .with_no_execute(!protection.executable())
            .with_frame_bits(frame.as_u64());
    }

    fn set_demand_zero(&mut self, protection: Protection) {
        *self = Self::new().with_frame_bits(u64::from(protection.into_bits()));
    }

    fn protection(&self) -> Protection {
        if self.present() {
            Protection::new()
                .with_readable(true)
                .with_writable(self.writable())
                .with_executable(!self.no_execute())
                .with_user(self.user())
        } else {
            #[allow(clippy::cast_possible_truncation)]
            Protection::from_bits(self.frame_bits() as u8)
        }
    }

    #[inline]
    fn raw(&self) -> u64 {
        self.into_bits()
    }
}

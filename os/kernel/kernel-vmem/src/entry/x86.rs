use super::{PageTableEntry, Protection};
use bitfield_struct::bitfield;
use kernel_memory_addresses::FrameNumber;

/// 32-bit entry of classic two-level paging.
///
/// | Bits  | Field |
/// |-------|-------|
/// | 0     | present |
/// | 1     | writable |
/// | 2     | user |
/// | 3–4   | write-through, cache-disable |
/// | 5–6   | accessed, dirty |
/// | 7     | large page |
/// | 8     | global |
/// | 9–11  | software |
/// | 12–31 | frame, or protection while invalid |
#[bitfield(u32)]
pub struct X86Entry {
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
    pub software: u8,
    #[bits(20)]
    frame_bits: u32,
}

impl PageTableEntry for X86Entry {
    const MAX_FRAME: u64 = (1 << 20) - 1;

    #[inline]
    fn is_valid(&self) -> bool {
        self.present()
    }

    #[inline]
    fn frame(&self) -> Option<FrameNumber> {
        self.present()
            .then(|| FrameNumber::new(u64::from(self.frame_bits())))
    }

    fn set_valid(&mut self, frame: FrameNumber, protection: Protection) {
        debug_assert!(Self::can_reference(frame), "{frame} exceeds 32-bit paging");
        #[allow(clippy::cast_possible_truncation)]
        let bits = frame.as_u64() as u32;
        *self = Self::new()
            .with_present(true)
            .with_writable(protection.writable())
            .with_user(protection.user())
            .with_frame_bits(bits);
    }

    fn set_demand_zero(&mut self, protection: Protection) {
        *self = Self::new().with_frame_bits(u32::from(protection.into_bits()));
    }

    fn protection(&self) -> Protection {
        if self.present() {
            Protection::new()
                .with_readable(true)
                .with_writable(self.writable())
                .with_executable(true)
                .with_user(self.user())
        } else {
            #[allow(clippy::cast_possible_truncation)]
            Protection::from_bits(self.frame_bits() as u8)
        }
    }

    #[inline]
    fn raw(&self) -> u64 {
        u64::from(self.into_bits())
    }
}

//! # Boot Hand-off Block

use crate::memory::MemoryDescriptor;
use kernel_memory_addresses::{FrameNumber, PageSize, Size4K};

/// Borrowed view of what the loader hands the memory manager.
#[derive(Debug, Copy, Clone)]
pub struct BootHandoff<'a> {
    /// Physical memory map, in whatever order the loader produced it.
    pub descriptors: &'a [MemoryDescriptor],

    /// Pages spanned by the loader-placed boot image (kernel, HAL, boot drivers, registry).
    pub loader_pages_spanned: u64,

    /// Highest frame number that could ever be populated, including hot-add.
    pub highest_possible_frame: FrameNumber,

    /// The kernel was linked to run with a 3 GB user address space.
    pub virtual_bias: bool,

    /// Raw load options string, e.g. `"USERVA=2800 NOEXECUTE"`.
    pub load_options: &'a str,
}

impl<'a> BootHandoff<'a> {
    #[must_use]
    pub const fn new(descriptors: &'a [MemoryDescriptor], highest_possible_frame: FrameNumber) -> Self {
        Self {
            descriptors,
            loader_pages_spanned: 0,
            highest_possible_frame,
            virtual_bias: false,
            load_options: "",
        }
    }

    /// Size of the boot image in bytes.
    #[inline]
    #[must_use]
    pub const fn boot_image_bytes(&self) -> u64 {
        self.loader_pages_spanned.saturating_mul(Size4K::SIZE)
    }

    /// The `USERVA=<MiB>` option, if present.
    ///
    /// Only the leading decimal digits after `=` are read; a missing or
    /// non-numeric value yields `Some(0)`, matching an unparseable option.
    #[must_use]
    pub fn user_va_limit_mb(&self) -> Option<u64> {
        let at = self.load_options.find("USERVA")?;
        let rest = &self.load_options[at..];
        let eq = rest.find('=')?;
        let value = rest[eq + 1..]
            .trim_start()
            .bytes()
            .take_while(u8::is_ascii_digit)
            .fold(0_u64, |acc, d| {
                acc.saturating_mul(10).saturating_add(u64::from(d - b'0'))
            });
        Some(value)
    }
}

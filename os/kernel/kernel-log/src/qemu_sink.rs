use crate::LogSink;
use core::fmt;

/// QEMU's `-debugcon` port.
const QEMU_DEBUG_PORT: u16 = 0x402;

/// Writes bytes to QEMU's debug console port.
///
/// Harmless on real hardware, where the port is normally unused.
#[derive(Debug, Default, Copy, Clone)]
pub struct QemuSink;

impl QemuSink {
    #[inline]
    fn putc(b: u8) {
        // SAFETY: writing the debug port has no memory effects.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") b,
                options(nomem, nostack, preserves_flags)
            );
        }
    }
}

impl fmt::Write for QemuSink {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        s.bytes().for_each(Self::putc);
        Ok(())
    }
}

impl LogSink for QemuSink {}

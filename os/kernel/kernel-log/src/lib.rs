//! # Early Boot Logging
//!
//! A `log::Log` implementation usable before the kernel has a heap, a
//! console driver or a scheduler. Every record becomes one line,
//!
//! ```text
//! [INFO] kernel_mm::phase: memory manager phase 0 done
//! ```
//!
//! written to a [`LogSink`].
//!
//! ## Sinks
//!
//! ```text
//! log::info!(..)
//!     ↓
//! BootLogger (level filter, SpinMutex around the sink)
//!     ↓
//! LogSink ──┬── MemorySink: last N lines, dumped by the fatal-stop path
//!           └── QemuSink:   I/O port 0x402 (`qemu` feature, x86 only)
//! ```
//!
//! ## Installation
//!
//! The logger lives in a `static` [`SyncOnceCell`](kernel_sync::SyncOnceCell).
//! [`BootLogger::install`] publishes it and registers it with `log`:
//!
//! ```rust
//! use kernel_log::{BootLogger, MemorySink};
//! use kernel_sync::SyncOnceCell;
//! use log::LevelFilter;
//!
//! static LOGGER: SyncOnceCell<BootLogger<MemorySink<32, 128>>> = SyncOnceCell::new();
//!
//! let logger = BootLogger::new(MemorySink::new(), LevelFilter::Debug)
//!     .install(&LOGGER)
//!     .unwrap();
//! log::info!("memory manager starting");
//! assert_eq!(logger.with_sink(|s| s.len()), 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;
mod memory_sink;
#[cfg(all(feature = "qemu", any(target_arch = "x86", target_arch = "x86_64")))]
mod qemu_sink;

pub use logger::{BootLogger, LoggerError};
pub use memory_sink::MemorySink;
#[cfg(all(feature = "qemu", any(target_arch = "x86", target_arch = "x86_64")))]
pub use qemu_sink::QemuSink;

/// Destination for formatted log lines.
pub trait LogSink: core::fmt::Write + Send {
    /// Push out anything buffered.
    fn flush(&mut self) {}
}

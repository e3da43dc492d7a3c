//! # Boot-Time Page Table Construction
//!
//! Architecture-neutral building blocks for the first page tables the memory
//! manager creates during boot.
//!
//! ## What you get
//! - [`PagingDepth`] with [`TwoLevel`], [`ThreeLevel`] and [`FourLevel`]
//!   implementations, so level counts, spans and indices are decided at one
//!   composition point.
//! - [`PageTableEntry`], an opaque entry trait, with the bit layouts
//!   [`X86Entry`] (32-bit) and [`X64Entry`] (PAE and long mode).
//! - [`FrameArena`], table storage addressed by checked [`FrameIndex`] values.
//! - [`FrameLock`] around a [`ZeroedFrameSource`], the global frame-allocation
//!   lock with a bounded retry against a replenishing zeroed list.
//! - [`PageTableHierarchy`], the builder that instantiates missing levels for a
//!   virtual range.
//!
//! ## Translation trees
//!
//! ```text
//!  2-level   Directory(1024) ─────────────────────────▶ PageTable(1024) ─▶ 4 KiB
//!  3-level   DirectoryPointer(4) ──▶ Directory(512) ──▶ PageTable(512)  ─▶ 4 KiB
//!  4-level   ExtendedDirectory(512) ─▶ DirectoryPointer(512) ─▶ Directory(512) ─▶ PageTable(512) ─▶ 4 KiB
//! ```
//!
//! A directory entry always spans one page-table page: 4 MiB on the
//! two-level tree, 2 MiB otherwise.
//!
//! ## Example
//!
//! ```rust
//! # use kernel_vmem::*;
//! # use kernel_memory_addresses::*;
//! struct Frames(u64, u64);
//! impl ZeroedFrameSource for Frames {
//!     fn try_take_zeroed(&mut self) -> FrameTake {
//!         if self.0 == self.1 { return FrameTake::Exhausted; }
//!         self.0 += 1;
//!         FrameTake::Frame(FrameNumber::new(self.0 - 1))
//!     }
//!     fn available(&self) -> u64 { self.1 - self.0 }
//! }
//!
//! let frames = FrameLock::new(Frames(1, 64));
//! let arena = FrameArena::new(FrameNumber::new(0), 64);
//! let mut tables = PageTableHierarchy::<FourLevel>::new(arena, FrameNumber::new(0)).unwrap();
//!
//! let pool = VirtualRange::from_len(VirtualAddress::new(0xFFFF_FA80_0000_0000), Size2M::SIZE).unwrap();
//! assert_eq!(tables.ensure_mapped(pool, &frames).unwrap(), 3);
//! assert_eq!(tables.ensure_mapped(pool, &frames).unwrap(), 0);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

extern crate alloc;

mod arena;
mod depth;
mod entry;
mod frame_source;
mod hierarchy;

pub use arena::{ArenaError, FrameArena, FrameIndex};
pub use depth::{FourLevel, PagingDepth, PagingLevel, ThreeLevel, TwoLevel};
pub use entry::{PageTableEntry, Protection, X64Entry, X86Entry};
pub use frame_source::{
    FrameExhausted, FrameLock, FrameTake, MAX_ZEROED_FRAME_RETRIES, ZeroedFrameSource,
};
pub use hierarchy::{HierarchyError, PageTableHierarchy};

//! # Boot Hand-off Interface
//!
//! Data the boot loader passes to the memory manager before anything else in
//! the kernel runs: the raw physical memory descriptor list and the handful of
//! scalar facts the address-space planner needs.
//!
//! ## Overview
//!
//! The loader describes physical memory as an unordered list of typed
//! extents. The memory manager never produces this list; it only reads it.
//!
//! ```text
//!  Loader                                  Memory manager
//! ┌──────────────────────────┐            ┌──────────────────────────┐
//! │ MemoryDescriptor[]       │ ─────────▶ │ Cartographer             │
//! │  { kind, base, pages }   │            │  filter + online merge   │
//! ├──────────────────────────┤            ├──────────────────────────┤
//! │ loader_pages_spanned     │ ─────────▶ │ Layout planner           │
//! │ virtual_bias (3 GB user) │            │  user/system split,      │
//! │ load_options "USERVA=…"  │            │  session space, pools    │
//! ├──────────────────────────┤            ├──────────────────────────┤
//! │ highest_possible_frame   │ ─────────▶ │ Frame validity bitmap    │
//! └──────────────────────────┘            └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! ### Memory descriptors ([`memory`])
//! * [`MemoryType`](memory::MemoryType): what the loader used an extent for
//! * [`MemoryDescriptor`](memory::MemoryDescriptor): one `{ kind, base_page, page_count }` record
//!
//! ### Hand-off block ([`boot`])
//! * [`BootHandoff`](boot::BootHandoff): the borrowed view of everything above
//!
//! ## ABI
//!
//! [`MemoryDescriptor`](memory::MemoryDescriptor) and
//! [`MemoryType`](memory::MemoryType) are `#[repr(C)]` / `#[repr(u32)]` so a
//! loader written in another language can fill them directly.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;

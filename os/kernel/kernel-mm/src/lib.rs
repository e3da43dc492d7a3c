//! # Memory Manager Bootstrap
//!
//! Brings the virtual memory manager up in three phases, before general
//! allocation, paging or driver loading is possible.
//!
//! ```text
//!  BootHandoff ─▶ Cartographer ─▶ PhysicalMemoryMap ─┬─▶ FrameValidityBitmap
//!                                                    │
//!  BootConfig ──────────────────▶ Layout Planner ◀───┘
//!                                      │
//!                                      ▼
//!                  AddressSpaceLayout ─┬─▶ Tunables, ResidentBudget
//!                                      ▼
//!                  PageTableHierarchy ─▶ PagedPoolState ─▶ PoolThresholds
//!                                      │
//!                     Phase1 ──────────┴─▶ shared user data, MemoryEvents,
//!                                          system threads
//! ```
//!
//! [`PhaseSequencer`] owns everything built along the way in a
//! [`BootstrapContext`]; other subsystems read it through [`MmView`].
//! [`boot`] selects the paging depth from [`Architecture`] and runs all three
//! phases.
//!
//! Threads, named events and the executive pager are supplied by the host
//! through the traits in [`collaborators`].

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod bitmap;
pub mod budget;
pub mod cartographer;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod frame_validity;
pub mod layout;
pub mod phase;
pub mod pool;
pub mod shared_page;
pub mod size_class;

pub use config::{Architecture, BootConfig, ConfigOverrides, Override, ProductType};
pub use context::{BootstrapContext, MmView};
pub use error::{BootstrapError, PhaseOutcome, StopCode};
pub use phase::{BootPhase, PhaseSequencer, boot};

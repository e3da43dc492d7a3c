//! Services the boot initializer consumes but does not implement.
//!
//! Threads, named kernel objects and the executive pager belong to other
//! subsystems. Phase1 and Phase2 reach them only through these traits, so
//! the sequencer can run against recording fakes on the host.

use crate::events::{AccessEntry, EventError};
use core::fmt;

/// The long-running threads Phase1 starts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SystemThread {
    ModifiedPageWriter,
    BalanceSetManager,
    SwapWorker,
}

impl SystemThread {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ModifiedPageWriter => "modified page writer",
            Self::BalanceSetManager => "balance set manager",
            Self::SwapWorker => "swap worker",
        }
    }
}

impl fmt::Display for SystemThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not start the {thread}")]
pub struct ThreadStartError {
    pub thread: SystemThread,
}

/// Creates system threads.
pub trait ThreadSpawner {
    /// Create `thread` and let it run.
    ///
    /// # Errors
    /// The thread object could not be created.
    fn spawn(&mut self, thread: SystemThread) -> Result<(), ThreadStartError>;
}

/// A synchronization event other subsystems can wait on.
///
/// Handles are shared with waiters, so signaling goes through `&self`.
pub trait SignalEvent {
    fn set(&self);
    fn clear(&self);
    fn is_signaled(&self) -> bool;
}

/// Creates named, access-controlled notification events.
pub trait EventFactory {
    type Event: SignalEvent;

    /// Create the event `name` in the kernel object namespace, unsignaled.
    ///
    /// # Errors
    /// The name is taken or the object could not be allocated.
    fn create_named(&mut self, name: &'static str, access: &[AccessEntry]) -> Result<Self::Event, EventError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("boot-only code could not be made pageable")]
pub struct PagerError;

/// The executive's control over boot-only code residency.
pub trait ExecutivePager {
    /// Release the lock that keeps boot-only code resident.
    ///
    /// # Errors
    /// The code stays resident; boot continues.
    fn make_boot_code_pageable(&mut self) -> Result<(), PagerError>;
}

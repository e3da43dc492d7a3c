//! Fatal boot errors and the stop codes reported for them.

use crate::budget::BudgetError;
use crate::cartographer::CartographerError;
use crate::collaborators::ThreadStartError;
use crate::events::EventError;
use crate::frame_validity::FrameValidityError;
use crate::layout::LayoutError;
use crate::pool::PoolError;
use core::fmt;
use kernel_vmem::HierarchyError;

/// Diagnostic code handed to the fatal-stop handler.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StopCode {
    /// The physical run table could not be built.
    InstallMoreMemory = 0x100,
    /// The frame validity bitmap could not be built.
    InstallMoreMemoryBitmap = 0x101,
    NoPagesAvailable = 0x102,
    ResidentBudgetExhausted = 0x103,
    InconsistentLayout = 0x104,
    CollaboratorFailed = 0x105,
}

impl StopCode {
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for StopCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({:#x})", self.code())
    }
}

/// Why a phase could not complete. Every variant halts boot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("{total_pages} pages of memory ({free_pages} free) is not enough to boot")]
    InsufficientMemory { total_pages: u64, free_pages: u64 },
    #[error(transparent)]
    Cartographer(#[from] CartographerError),
    #[error(transparent)]
    FrameValidity(#[from] FrameValidityError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Thread(#[from] ThreadStartError),
    #[error("phase called out of order")]
    OutOfOrder,
}

impl BootstrapError {
    #[must_use]
    pub const fn stop_code(&self) -> StopCode {
        match self {
            Self::InsufficientMemory { .. } | Self::Cartographer(_) => StopCode::InstallMoreMemory,
            Self::FrameValidity(_) => StopCode::InstallMoreMemoryBitmap,
            Self::Hierarchy(_) | Self::Pool(PoolError::Hierarchy(_) | PoolError::NoMemory { .. }) => {
                StopCode::NoPagesAvailable
            }
            Self::Budget(_) | Self::Pool(PoolError::Budget(_)) => StopCode::ResidentBudgetExhausted,
            Self::Layout(_) | Self::OutOfOrder => StopCode::InconsistentLayout,
            Self::Event(_) | Self::Thread(_) => StopCode::CollaboratorFailed,
        }
    }
}

/// The boolean view of a phase result the host boot sequence acts on.
pub trait PhaseOutcome {
    /// `false` means halt the system.
    fn is_success(&self) -> bool;

    /// Code for the fatal-stop handler, if the phase failed.
    fn stop_code(&self) -> Option<StopCode>;
}

impl PhaseOutcome for Result<(), BootstrapError> {
    #[inline]
    fn is_success(&self) -> bool {
        self.is_ok()
    }

    fn stop_code(&self) -> Option<StopCode> {
        self.as_ref().err().map(BootstrapError::stop_code)
    }
}

//! # Loader Memory Descriptors

use kernel_memory_addresses::FrameNumber;

/// What the boot loader used a physical extent for.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MemoryType {
    ExceptionBlock = 0,
    SystemBlock = 1,
    /// Unused RAM.
    Free = 2,
    /// Pages the firmware reported as defective.
    Bad = 3,
    /// The loader's own image; reclaimable once the kernel runs.
    LoadedProgram = 4,
    /// Firmware scratch memory; reclaimable.
    FirmwareTemporary = 5,
    /// Firmware runtime memory; must never be touched.
    FirmwarePermanent = 6,
    OsloaderHeap = 7,
    OsloaderStack = 8,
    SystemCode = 9,
    HalCode = 10,
    BootDriver = 11,
    ConsoleInDriver = 12,
    ConsoleOutDriver = 13,
    StartupDpcStack = 14,
    StartupKernelStack = 15,
    StartupPanicStack = 16,
    StartupPcrPage = 17,
    StartupPdrPage = 18,
    RegistryData = 19,
    MemoryData = 20,
    NlsData = 21,
    /// Vendor-private memory.
    SpecialMemory = 22,
    /// Reserved for binary-translation instrumentation.
    BbtMemory = 23,
    Reserve = 24,
}

impl MemoryType {
    /// Whether the pages are free to the page allocator as soon as the
    /// memory manager starts.
    #[inline]
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(
            self,
            Self::Free | Self::LoadedProgram | Self::FirmwareTemporary | Self::OsloaderStack
        )
    }

    /// Whether the pages are real RAM the kernel may ever manage.
    ///
    /// Defective, firmware-owned, vendor-private and instrumentation ranges
    /// are excluded.
    #[inline]
    #[must_use]
    pub const fn is_usable_ram(self) -> bool {
        !matches!(
            self,
            Self::Bad | Self::FirmwarePermanent | Self::SpecialMemory | Self::BbtMemory
        )
    }

    /// All variants, in discriminant order.
    pub const ALL: [Self; 25] = [
        Self::ExceptionBlock,
        Self::SystemBlock,
        Self::Free,
        Self::Bad,
        Self::LoadedProgram,
        Self::FirmwareTemporary,
        Self::FirmwarePermanent,
        Self::OsloaderHeap,
        Self::OsloaderStack,
        Self::SystemCode,
        Self::HalCode,
        Self::BootDriver,
        Self::ConsoleInDriver,
        Self::ConsoleOutDriver,
        Self::StartupDpcStack,
        Self::StartupKernelStack,
        Self::StartupPanicStack,
        Self::StartupPcrPage,
        Self::StartupPdrPage,
        Self::RegistryData,
        Self::MemoryData,
        Self::NlsData,
        Self::SpecialMemory,
        Self::BbtMemory,
        Self::Reserve,
    ];

    /// Number of distinct memory types.
    pub const COUNT: usize = Self::ALL.len();

    #[inline]
    #[must_use]
    pub const fn as_index(self) -> usize {
        self as usize
    }
}

/// One extent from the loader's memory map.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryDescriptor {
    pub kind: MemoryType,
    pub base_page: FrameNumber,
    pub page_count: u64,
}

impl MemoryDescriptor {
    #[inline]
    #[must_use]
    pub const fn new(kind: MemoryType, base_page: u64, page_count: u64) -> Self {
        Self {
            kind,
            base_page: FrameNumber::new(base_page),
            page_count,
        }
    }

    /// First frame after the extent, or `None` if that is not representable.
    #[inline]
    #[must_use]
    pub const fn end_page(&self) -> Option<FrameNumber> {
        self.base_page.checked_add(self.page_count)
    }
}

const _: () = {
    let mut i = 0;
    while i < MemoryType::COUNT {
        assert!(MemoryType::ALL[i] as usize == i);
        i += 1;
    }
};

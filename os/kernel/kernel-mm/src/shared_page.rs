//! The page shared between the kernel and every user address space.
//!
//! The kernel writes the page through its system address; user processes
//! read the same frame through a user-visible, read-only entry that each new
//! address space copies from [`SharedUserData::user_template`].

use kernel_memory_addresses::{FrameNumber, VirtualRange};
use kernel_vmem::{
    FrameLock, HierarchyError, PageTableEntry, PageTableHierarchy, PagingDepth, Protection,
    ZeroedFrameSource,
};

/// The double-mapped shared data page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SharedUserData<E> {
    pub page: VirtualRange,
    pub frame: FrameNumber,
    /// Entry copied into every process's page table.
    pub user_template: E,
    /// Protection the frame's owning entry is recorded with.
    pub original_protection: Protection,
}

impl<E: PageTableEntry> SharedUserData<E> {
    /// Back the kernel page at `page` and derive the user entry from it.
    ///
    /// Returns the mapping and the number of frames allocated for it.
    ///
    /// # Errors
    /// A table or the data page itself could not be allocated.
    pub fn map<D, S>(
        page: VirtualRange,
        tables: &mut PageTableHierarchy<D>,
        frames: &FrameLock<S>,
    ) -> Result<(Self, u64), HierarchyError>
    where
        D: PagingDepth<Entry = E>,
        S: ZeroedFrameSource,
    {
        let allocated = tables.back_with_frames(page, Protection::kernel_rw(), frames)?;
        let frame = tables
            .translate(page.start())
            .ok_or(HierarchyError::InvalidRange(page))?;

        let mut user_template = E::default();
        user_template.set_valid(frame, Protection::user_read_only());

        let mapping = Self {
            page,
            frame,
            user_template,
            original_protection: Protection::kernel_rw(),
        };
        log::info!("shared user data at {} in {frame}", page.start());
        Ok((mapping, allocated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{AMD64, X86};
    use crate::testing::hierarchy;
    use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};
    use kernel_vmem::{FourLevel, TwoLevel};

    fn page(va: u64) -> VirtualRange {
        VirtualRange::from_len(VirtualAddress::new(va), Size4K::SIZE).unwrap()
    }

    #[test]
    fn user_entry_shares_the_kernel_frame() {
        let (mut tables, frames) = hierarchy::<TwoLevel>(8);
        let (shared, allocated) = SharedUserData::map(page(X86.shared_user_data), &mut tables, &frames).unwrap();

        assert_eq!(allocated, 2);
        assert_eq!(tables.translate(shared.page.start()), Some(shared.frame));
        assert_eq!(shared.user_template.frame(), Some(shared.frame));
        assert!(shared.user_template.protection().user());
        assert!(!shared.user_template.protection().writable());
        assert!(shared.original_protection.writable());
    }

    #[test]
    fn mapping_twice_reuses_the_frame() {
        let (mut tables, frames) = hierarchy::<FourLevel>(16);
        let va = page(AMD64.shared_user_data);
        let (first, allocated) = SharedUserData::map(va, &mut tables, &frames).unwrap();
        assert_eq!(allocated, 4);
        let (second, again) = SharedUserData::map(va, &mut tables, &frames).unwrap();
        assert_eq!(again, 0);
        assert_eq!(first.frame, second.frame);
    }
}

//! # Page Table Hierarchy Builder
//!
//! Instantiates the missing levels of a translation tree for a virtual
//! range. Only table scaffolding is created: page-table entries inside the
//! range become demand-zero, data pages are not populated unless asked for
//! through [`PageTableHierarchy::back_with_frames`].
//!
//! ```text
//!  range ──────────────────────────────┐
//!                                       ▼
//!  root ──▶ [entry valid?] ──no──▶ take zeroed frame ──▶ install table ──▶ mark entry valid
//!              │ yes                                                        │
//!              ▼                                                            ▼
//!          next level ◀──────────────────────────────────────────────────────┘
//!              ⋮
//!  page table ──▶ every PTE in range: demand-zero (kernel read/write)
//! ```
//!
//! Each directory slot is visited once per call no matter how many lower
//! entries the range covers, and a slot that is already valid costs nothing.
//! Calling [`ensure_mapped`](PageTableHierarchy::ensure_mapped) twice on the
//! same range therefore allocates nothing the second time.

use crate::arena::{ArenaError, FrameArena, FrameIndex};
use crate::depth::{PagingDepth, PagingLevel};
use crate::entry::{PageTableEntry, Protection};
use crate::frame_source::{FrameExhausted, FrameLock, ZeroedFrameSource};
use core::marker::PhantomData;
use kernel_memory_addresses::{FrameNumber, PageSize, Size4K, VirtualAddress, VirtualRange};

/// Failures of the hierarchy builder. All of them are fatal during boot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    /// No zeroed frame for a table at `level`, or for a data page when
    /// `level` is the page table.
    #[error("out of frames for a {level}: {cause}")]
    OutOfFrames {
        level: PagingLevel,
        cause: FrameExhausted,
    },
    #[error("range {0} is not translatable")]
    InvalidRange(VirtualRange),
    #[error("{frame} cannot be referenced by a page-table entry")]
    FrameNotAddressable { frame: FrameNumber },
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

/// A translation tree whose tables live in a [`FrameArena`].
pub struct PageTableHierarchy<D: PagingDepth> {
    arena: FrameArena<D::Entry>,
    root: FrameIndex,
    frames_allocated: u64,
    _depth: PhantomData<D>,
}

impl<D: PagingDepth> PageTableHierarchy<D> {
    /// Adopt `root_frame` as the (zeroed) root table.
    ///
    /// # Errors
    /// `root_frame` is outside the arena window.
    pub fn new(mut arena: FrameArena<D::Entry>, root_frame: FrameNumber) -> Result<Self, HierarchyError> {
        let root_level = D::root_level();
        let root = arena.install(root_frame, root_level, D::entries(root_level))?;
        log::debug!("{} hierarchy rooted at {root_frame}", D::NAME);
        Ok(Self {
            arena,
            root,
            frames_allocated: 0,
            _depth: PhantomData,
        })
    }

    #[inline]
    #[must_use]
    pub const fn root_frame(&self) -> FrameNumber {
        self.arena.frame_of(self.root)
    }

    /// Frames taken from the source over the lifetime of this hierarchy.
    #[inline]
    #[must_use]
    pub const fn frames_allocated(&self) -> u64 {
        self.frames_allocated
    }

    #[must_use]
    pub const fn arena(&self) -> &FrameArena<D::Entry> {
        &self.arena
    }

    /// Make every directory entry covering `range` valid, from the root down
    /// to and including `lowest`.
    ///
    /// `lowest = Directory` creates page-table pages; higher levels stop
    /// earlier. Returns the number of frames allocated.
    ///
    /// # Errors
    /// See [`HierarchyError`].
    pub fn ensure_tables<S: ZeroedFrameSource>(
        &mut self,
        range: VirtualRange,
        lowest: PagingLevel,
        frames: &FrameLock<S>,
    ) -> Result<u64, HierarchyError> {
        debug_assert!(lowest >= PagingLevel::Directory);
        if range.is_empty() {
            return Ok(0);
        }
        Self::check_range(range)?;

        let mut allocated = 0;
        for level in D::levels().take_while(|l| *l >= lowest) {
            let Some(child) = level.below() else { break };
            for slot in range.slots(D::span(level)) {
                let table = self
                    .table_for(slot, level)?
                    .ok_or(ArenaError::NotTable { frame: self.root_frame() })?;
                let i = D::index(slot, level);
                if self.arena.table(table)?[i].is_valid() {
                    continue;
                }

                let frame = self.take_frame(frames, child)?;
                self.arena.install(frame, child, D::entries(child))?;
                self.arena.table_mut(table)?[i].set_valid(frame, Protection::kernel_rw());
                allocated += 1;
                log::trace!("{child} for {slot} in {frame}");
            }
        }

        self.frames_allocated += allocated;
        Ok(allocated)
    }

    /// Build all table scaffolding for `range` and mark its page-table
    /// entries demand-zero. Entries that are already valid are left alone.
    ///
    /// Returns the number of table frames allocated.
    ///
    /// # Errors
    /// See [`HierarchyError`].
    pub fn ensure_mapped<S: ZeroedFrameSource>(
        &mut self,
        range: VirtualRange,
        frames: &FrameLock<S>,
    ) -> Result<u64, HierarchyError> {
        let allocated = self.ensure_tables(range, PagingLevel::Directory, frames)?;
        for page in range.slots(Size4K::SIZE) {
            let entry = self.pte_mut(page)?;
            if !entry.is_valid() && !entry.is_demand_zero() {
                entry.set_demand_zero(Protection::kernel_rw());
            }
        }
        log::debug!(
            "{range}: {} pages demand-zero, {allocated} table frames",
            range.pages()
        );
        Ok(allocated)
    }

    /// Like [`ensure_mapped`](Self::ensure_mapped), then back every page of
    /// `range` with its own zeroed frame.
    ///
    /// Returns the number of frames allocated, tables and data pages together.
    ///
    /// # Errors
    /// See [`HierarchyError`].
    pub fn back_with_frames<S: ZeroedFrameSource>(
        &mut self,
        range: VirtualRange,
        protection: Protection,
        frames: &FrameLock<S>,
    ) -> Result<u64, HierarchyError> {
        let tables = self.ensure_tables(range, PagingLevel::Directory, frames)?;
        let mut pages = 0;
        for page in range.slots(Size4K::SIZE) {
            if self.pte_mut(page)?.is_valid() {
                continue;
            }
            let frame = self.take_frame(frames, PagingLevel::PageTable)?;
            self.pte_mut(page)?.set_valid(frame, protection);
            pages += 1;
        }
        self.frames_allocated += pages;
        log::debug!("{range}: backed {pages} pages, {tables} table frames");
        Ok(tables + pages)
    }

    /// Entry at `level` for `va`, if every table above it exists.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress, level: PagingLevel) -> Option<D::Entry> {
        let table = self.table_for(va, level).ok()??;
        self.arena
            .table(table)
            .ok()
            .map(|t| t[D::index(va, level)])
    }

    /// Page-table entry for `va`.
    #[inline]
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<D::Entry> {
        self.entry(va, PagingLevel::PageTable)
    }

    /// Frame backing `va`, if mapped.
    #[inline]
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<FrameNumber> {
        self.lookup(va).and_then(|e| e.frame())
    }

    fn check_range(range: VirtualRange) -> Result<(), HierarchyError> {
        let fits = range.last().is_some_and(|last| {
            D::is_translatable(range.start())
                && D::is_translatable(last)
                && D::address_limit().is_none_or(|limit| range.len() <= limit)
        });
        if fits {
            Ok(())
        } else {
            Err(HierarchyError::InvalidRange(range))
        }
    }

    fn take_frame<S: ZeroedFrameSource>(
        &self,
        frames: &FrameLock<S>,
        level: PagingLevel,
    ) -> Result<FrameNumber, HierarchyError> {
        let frame = frames
            .take_zeroed()
            .map_err(|cause| HierarchyError::OutOfFrames { level, cause })?;
        if D::Entry::can_reference(frame) {
            Ok(frame)
        } else {
            Err(HierarchyError::FrameNotAddressable { frame })
        }
    }

    /// Walk from the root to the table at `level` that translates `va`.
    fn table_for(&self, va: VirtualAddress, level: PagingLevel) -> Result<Option<FrameIndex>, ArenaError> {
        let mut table = self.root;
        for current in D::levels() {
            if current == level {
                return Ok(Some(table));
            }
            let entry = self.arena.table(table)?[D::index(va, current)];
            let Some(next) = entry.frame() else {
                return Ok(None);
            };
            table = self.arena.index_of(next)?;
        }
        Ok(None)
    }

    fn pte_mut(&mut self, va: VirtualAddress) -> Result<&mut D::Entry, HierarchyError> {
        let table = self
            .table_for(va, PagingLevel::PageTable)?
            .ok_or(ArenaError::NotTable { frame: self.root_frame() })?;
        Ok(&mut self.arena.table_mut(table)?[D::index(va, PagingLevel::PageTable)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::{FourLevel, ThreeLevel, TwoLevel};
    use crate::frame_source::testing::BumpZeroedSource;
    use kernel_memory_addresses::{Size1G, Size2M, Size4M};

    const POOL: u64 = 0xFFFF_FA80_0000_0000;

    fn range(start: u64, len: u64) -> VirtualRange {
        VirtualRange::from_len(VirtualAddress::new(start), len).unwrap()
    }

    fn hierarchy<D: PagingDepth>(frames: u64) -> (PageTableHierarchy<D>, FrameLock<BumpZeroedSource>) {
        let arena = FrameArena::new(FrameNumber::new(0), frames + 1);
        let h = PageTableHierarchy::<D>::new(arena, FrameNumber::new(0)).unwrap();
        (h, FrameLock::new(BumpZeroedSource::new(1, frames + 1)))
    }

    #[test]
    fn four_level_builds_one_chain() {
        let (mut h, frames) = hierarchy::<FourLevel>(16);
        let r = range(POOL, 3 * Size4K::SIZE);
        assert_eq!(h.ensure_mapped(r, &frames).unwrap(), 3);
        assert_eq!(h.arena().tables_at(PagingLevel::DirectoryPointer), 1);
        assert_eq!(h.arena().tables_at(PagingLevel::Directory), 1);
        assert_eq!(h.arena().tables_at(PagingLevel::PageTable), 1);

        for page in r.slots(Size4K::SIZE) {
            let e = h.lookup(page).unwrap();
            assert!(e.is_demand_zero());
            assert_eq!(e.protection(), Protection::kernel_rw());
        }
        let after = h.lookup(VirtualAddress::new(POOL + 3 * Size4K::SIZE)).unwrap();
        assert!(!after.is_valid());
        assert!(!after.is_demand_zero());
    }

    #[test]
    fn second_call_allocates_nothing() {
        let (mut h, frames) = hierarchy::<FourLevel>(16);
        let r = range(POOL + Size2M::SIZE - Size4K::SIZE, 2 * Size4K::SIZE);
        assert_eq!(h.ensure_mapped(r, &frames).unwrap(), 4);
        assert_eq!(h.ensure_mapped(r, &frames).unwrap(), 0);
        assert_eq!(h.frames_allocated(), 4);
        assert_eq!(frames.into_inner().taken, 4);
    }

    #[test]
    fn one_table_per_slot_not_per_entry() {
        let (mut h, frames) = hierarchy::<FourLevel>(32);
        // 8 MiB spans four page-table pages under a single directory.
        assert_eq!(h.ensure_mapped(range(POOL, 4 * Size2M::SIZE), &frames).unwrap(), 6);
    }

    #[test]
    fn two_level_needs_only_page_tables() {
        let (mut h, frames) = hierarchy::<TwoLevel>(4);
        let r = range(0xE100_0000, Size4M::SIZE);
        assert_eq!(h.ensure_mapped(r, &frames).unwrap(), 1);
        assert!(h.lookup(VirtualAddress::new(0xE13F_F000)).unwrap().is_demand_zero());
        assert_eq!(TwoLevel::intermediate_levels().count(), 0);
    }

    #[test]
    fn three_level_root_has_four_slots() {
        let (mut h, frames) = hierarchy::<ThreeLevel>(4);
        assert_eq!(h.ensure_mapped(range(0xE100_0000, Size4K::SIZE), &frames).unwrap(), 2);
        let pdpte = h.entry(VirtualAddress::new(0xE100_0000), PagingLevel::DirectoryPointer).unwrap();
        assert!(pdpte.is_valid());
    }

    #[test]
    fn directory_levels_only() {
        let (mut h, frames) = hierarchy::<FourLevel>(8);
        let r = range(POOL, 3 * Size1G::SIZE);
        assert_eq!(h.ensure_tables(r, PagingLevel::DirectoryPointer, &frames).unwrap(), 4);
        assert_eq!(h.arena().tables_at(PagingLevel::PageTable), 0);
        assert!(h.lookup(VirtualAddress::new(POOL)).is_none());
    }

    #[test]
    fn exhaustion_reports_level() {
        let (mut h, frames) = hierarchy::<FourLevel>(1);
        let err = h.ensure_mapped(range(POOL, Size4K::SIZE), &frames).unwrap_err();
        assert_eq!(
            err,
            HierarchyError::OutOfFrames {
                level: PagingLevel::Directory,
                cause: FrameExhausted::Empty
            }
        );
    }

    #[test]
    fn backing_allocates_data_frames() {
        let (mut h, frames) = hierarchy::<FourLevel>(16);
        let r = range(POOL, 2 * Size4K::SIZE);
        assert_eq!(h.back_with_frames(r, Protection::kernel_rw(), &frames).unwrap(), 5);
        assert_eq!(h.translate(VirtualAddress::new(POOL)), Some(FrameNumber::new(4)));
        assert_eq!(
            h.translate(VirtualAddress::new(POOL + Size4K::SIZE)),
            Some(FrameNumber::new(5))
        );
        assert_eq!(h.back_with_frames(r, Protection::kernel_rw(), &frames).unwrap(), 0);
        assert_eq!(h.frames_allocated(), 5);
    }

    #[test]
    fn non_canonical_ranges_are_rejected() {
        let (mut h, frames) = hierarchy::<FourLevel>(4);
        let r = range(0x0000_7FFF_FFFF_F000, 2 * Size4K::SIZE);
        assert_eq!(h.ensure_mapped(r, &frames), Err(HierarchyError::InvalidRange(r)));

        let (mut h, frames) = hierarchy::<TwoLevel>(4);
        let r = range(0xFFFF_F000, 2 * Size4K::SIZE);
        assert!(matches!(h.ensure_mapped(r, &frames), Err(HierarchyError::InvalidRange(_))));
        assert_eq!(h.ensure_mapped(range(0x1000, 0), &frames), Ok(0));
    }
}

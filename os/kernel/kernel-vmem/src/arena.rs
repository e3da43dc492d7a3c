//! # Frame Arena
//!
//! Storage for the contents of frames that hold page tables. Table frames are
//! addressed by [`FrameIndex`], which can only be obtained from
//! [`FrameArena::index_of`] and therefore always lies inside the arena's
//! frame window.

use crate::depth::PagingLevel;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use kernel_memory_addresses::FrameNumber;

/// Errors raised by [`FrameArena`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("{frame} lies outside the arena window")]
    OutOfWindow { frame: FrameNumber },
    #[error("{frame} already holds a page table")]
    AlreadyTable { frame: FrameNumber },
    #[error("{frame} does not hold a page table")]
    NotTable { frame: FrameNumber },
}

/// Checked index of a frame inside a [`FrameArena`] window.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameIndex(u64);

impl FrameIndex {
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

struct Table<E> {
    level: PagingLevel,
    entries: Box<[E]>,
}

/// Page-table frames inside the window `[base, base + len)`.
pub struct FrameArena<E> {
    base: FrameNumber,
    len: u64,
    tables: BTreeMap<FrameIndex, Table<E>>,
}

impl<E: Copy + Default> FrameArena<E> {
    /// Arena covering `len` frames starting at `base`.
    #[must_use]
    pub const fn new(base: FrameNumber, len: u64) -> Self {
        Self {
            base,
            len,
            tables: BTreeMap::new(),
        }
    }

    /// Checked conversion from a frame number.
    ///
    /// # Errors
    /// [`ArenaError::OutOfWindow`] if `frame` is outside the window.
    pub const fn index_of(&self, frame: FrameNumber) -> Result<FrameIndex, ArenaError> {
        match frame.checked_distance(self.base) {
            Some(offset) if offset < self.len => Ok(FrameIndex(offset)),
            _ => Err(ArenaError::OutOfWindow { frame }),
        }
    }

    #[inline]
    #[must_use]
    pub const fn frame_of(&self, index: FrameIndex) -> FrameNumber {
        FrameNumber::new(self.base.as_u64() + index.0)
    }

    /// Start tracking `frame` as a zeroed table of `entries` entries.
    ///
    /// # Errors
    /// The frame is outside the window or already a table.
    pub fn install(
        &mut self,
        frame: FrameNumber,
        level: PagingLevel,
        entries: usize,
    ) -> Result<FrameIndex, ArenaError> {
        let index = self.index_of(frame)?;
        if self.tables.contains_key(&index) {
            return Err(ArenaError::AlreadyTable { frame });
        }
        self.tables.insert(
            index,
            Table {
                level,
                entries: vec![E::default(); entries].into_boxed_slice(),
            },
        );
        Ok(index)
    }

    /// Entries of the table at `index`.
    ///
    /// # Errors
    /// [`ArenaError::NotTable`] if no table was installed there.
    pub fn table(&self, index: FrameIndex) -> Result<&[E], ArenaError> {
        self.tables
            .get(&index)
            .map(|t| &*t.entries)
            .ok_or(ArenaError::NotTable {
                frame: self.frame_of(index),
            })
    }

    /// Mutable entries of the table at `index`.
    ///
    /// # Errors
    /// [`ArenaError::NotTable`] if no table was installed there.
    pub fn table_mut(&mut self, index: FrameIndex) -> Result<&mut [E], ArenaError> {
        let frame = self.frame_of(index);
        self.tables
            .get_mut(&index)
            .map(|t| &mut *t.entries)
            .ok_or(ArenaError::NotTable { frame })
    }

    /// Level of the table at `index`, if one is installed.
    #[must_use]
    pub fn level_of(&self, index: FrameIndex) -> Option<PagingLevel> {
        self.tables.get(&index).map(|t| t.level)
    }

    /// Number of installed tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Installed tables at `level`.
    #[must_use]
    pub fn tables_at(&self, level: PagingLevel) -> usize {
        self.tables.values().filter(|t| t.level == level).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_checked_against_window() {
        let arena = FrameArena::<u32>::new(FrameNumber::new(100), 10);
        assert!(arena.index_of(FrameNumber::new(99)).is_err());
        assert!(arena.index_of(FrameNumber::new(110)).is_err());
        let i = arena.index_of(FrameNumber::new(109)).unwrap();
        assert_eq!(i.as_u64(), 9);
        assert_eq!(arena.frame_of(i), FrameNumber::new(109));
    }

    #[test]
    fn install_once() {
        let mut arena = FrameArena::<u32>::new(FrameNumber::new(0), 4);
        let i = arena
            .install(FrameNumber::new(2), PagingLevel::PageTable, 8)
            .unwrap();
        assert_eq!(arena.table(i).unwrap().len(), 8);
        assert_eq!(
            arena.install(FrameNumber::new(2), PagingLevel::PageTable, 8),
            Err(ArenaError::AlreadyTable {
                frame: FrameNumber::new(2)
            })
        );
        arena.table_mut(i).unwrap()[3] = 7;
        assert_eq!(arena.table(i).unwrap()[3], 7);
        assert_eq!(arena.tables_at(PagingLevel::PageTable), 1);
    }

    #[test]
    fn missing_table_is_reported() {
        let arena = FrameArena::<u32>::new(FrameNumber::new(0), 4);
        let i = arena.index_of(FrameNumber::new(1)).unwrap();
        assert_eq!(
            arena.table(i),
            Err(ArenaError::NotTable {
                frame: FrameNumber::new(1)
            })
        );
    }
}

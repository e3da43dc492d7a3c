//! # Physical Memory Cartographer
//!
//! Turns the loader's descriptor list into a compact table of usable
//! physical runs.
//!
//! ```text
//!  descriptors (loader order)          runs
//!  ┌──────────────┬─────┬────┐         ┌─────┬────┐
//!  │ Free         │ 100 │ 50 │──┐      │ 100 │ 75 │
//!  │ LoadedProgram│ 150 │ 25 │──┴────▶ ├─────┼────┤
//!  │ Bad          │ 200 │  8 │  ✗      │ 400 │ 10 │
//!  │ Free         │ 400 │ 10 │───────▶ └─────┴────┘
//!  └──────────────┴─────┴────┘
//! ```
//!
//! Descriptors are merged online: one is folded into the previous run when it
//! starts exactly where that run ends. Nothing is sorted, so a loader that
//! hands out-of-order descriptors gets more, smaller runs but never a wrong
//! map.

use alloc::vec::Vec;
use core::fmt;
use kernel_info::memory::{MemoryDescriptor, MemoryType};
use kernel_memory_addresses::FrameNumber;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartographerError {
    /// The run table could not be reserved.
    #[error("no memory for a table of {runs} physical runs")]
    NoMemory { runs: usize },
    /// A hot-added run overlaps memory that is already described.
    #[error("run {0} overlaps the existing memory map")]
    Overlap(PhysicalRun),
}

/// A maximal contiguous range of usable frames.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalRun {
    pub base_page: FrameNumber,
    pub page_count: u64,
}

impl PhysicalRun {
    #[inline]
    #[must_use]
    pub const fn new(base_page: u64, page_count: u64) -> Self {
        Self {
            base_page: FrameNumber::new(base_page),
            page_count,
        }
    }

    /// First frame after the run.
    #[inline]
    #[must_use]
    pub const fn end_page(&self) -> Option<FrameNumber> {
        self.base_page.checked_add(self.page_count)
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        match frame.checked_distance(self.base_page) {
            Some(offset) => offset < self.page_count,
            None => false,
        }
    }

    /// Whether `next` starts exactly where `self` ends.
    #[inline]
    #[must_use]
    pub fn precedes(&self, next: &Self) -> bool {
        self.end_page() == Some(next.base_page)
    }
}

impl fmt::Debug for PhysicalRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalRun({:#x}, {:#x})", self.base_page.as_u64(), self.page_count)
    }
}

impl fmt::Display for PhysicalRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} +{}", self.base_page, self.page_count)
    }
}

/// Set of memory types that count as installed RAM.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct IncludeSet(u32);

const _: () = assert!(MemoryType::COUNT <= u32::BITS as usize);

impl IncludeSet {
    /// Everything except bad, firmware-permanent, vendor-private and
    /// instrumentation memory.
    pub const DEFAULT: Self = Self::all()
        .without(MemoryType::Bad)
        .without(MemoryType::FirmwarePermanent)
        .without(MemoryType::SpecialMemory)
        .without(MemoryType::BbtMemory);

    #[must_use]
    pub const fn all() -> Self {
        Self((1 << MemoryType::COUNT) - 1)
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn with(self, kind: MemoryType) -> Self {
        Self(self.0 | (1 << kind.as_index()))
    }

    #[must_use]
    pub const fn without(self, kind: MemoryType) -> Self {
        Self(self.0 & !(1 << kind.as_index()))
    }

    #[must_use]
    pub const fn contains(self, kind: MemoryType) -> bool {
        self.0 & (1 << kind.as_index()) != 0
    }
}

impl Default for IncludeSet {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for IncludeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(MemoryType::ALL.iter().filter(|k| self.contains(**k)))
            .finish()
    }
}

/// Ordered table of [`PhysicalRun`]s plus page aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysicalMemoryMap {
    runs: Vec<PhysicalRun>,
    total_pages: u64,
    free_pages: u64,
}

impl PhysicalMemoryMap {
    /// Filter `descriptors` by `include` and coalesce adjacent ones.
    ///
    /// # Errors
    /// [`CartographerError::NoMemory`] if the run table cannot be reserved.
    pub fn build(descriptors: &[MemoryDescriptor], include: IncludeSet) -> Result<Self, CartographerError> {
        let included = descriptors
            .iter()
            .filter(|d| include.contains(d.kind) && d.page_count != 0);

        let upper_bound = included.clone().count();
        let mut runs = Vec::new();
        runs.try_reserve_exact(upper_bound)
            .map_err(|_| CartographerError::NoMemory { runs: upper_bound })?;

        let mut map = Self {
            runs,
            total_pages: 0,
            free_pages: 0,
        };
        let mut ordered = true;

        for d in included {
            let extent = PhysicalRun {
                base_page: d.base_page,
                page_count: d.page_count,
            };
            map.total_pages += d.page_count;
            if d.kind.is_free() {
                map.free_pages += d.page_count;
            }

            match map.runs.last_mut() {
                Some(last) if last.precedes(&extent) => last.page_count += extent.page_count,
                Some(last) => {
                    ordered &= last.base_page < extent.base_page;
                    map.runs.push(extent);
                }
                None => map.runs.push(extent),
            }
        }

        if ordered {
            debug_assert!(map.is_canonical(), "coalesced runs are not canonical: {:?}", map.runs);
        } else {
            log::warn!("memory descriptors out of order; runs left uncoalesced");
        }

        log::info!(
            "physical memory: {} runs, {} pages ({} free)",
            map.runs.len(),
            map.total_pages,
            map.free_pages
        );
        Ok(map)
    }

    #[inline]
    #[must_use]
    pub fn runs(&self) -> &[PhysicalRun] {
        &self.runs
    }

    /// Sum of all included pages.
    #[inline]
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Included pages the loader left free for the allocator.
    #[inline]
    #[must_use]
    pub const fn free_pages(&self) -> u64 {
        self.free_pages
    }

    #[must_use]
    pub fn lowest_frame(&self) -> Option<FrameNumber> {
        self.runs.iter().map(|r| r.base_page).min()
    }

    /// Highest frame covered by any run.
    #[must_use]
    pub fn highest_frame(&self) -> Option<FrameNumber> {
        self.runs
            .iter()
            .filter(|r| r.page_count != 0)
            .filter_map(|r| r.base_page.checked_add(r.page_count - 1))
            .max()
    }

    #[must_use]
    pub fn contains(&self, frame: FrameNumber) -> bool {
        self.runs.iter().any(|r| r.contains(frame))
    }

    /// Sorted, non-empty, non-overlapping and non-adjacent.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.runs.iter().all(|r| r.page_count != 0)
            && self.runs.windows(2).all(|w| {
                w[0].end_page()
                    .is_some_and(|end| end < w[1].base_page)
            })
    }

    /// Add hot-plugged memory, merging with neighbors where adjacent.
    ///
    /// # Errors
    /// The run overlaps existing memory, or the table cannot grow.
    pub fn add_run(&mut self, run: PhysicalRun) -> Result<(), CartographerError> {
        if run.page_count == 0 {
            return Ok(());
        }
        let Some(run_end) = run.end_page() else {
            return Err(CartographerError::Overlap(run));
        };
        if self.runs.iter().any(|r| {
            r.end_page().is_some_and(|end| r.base_page < run_end && run.base_page < end)
        }) {
            return Err(CartographerError::Overlap(run));
        }

        let at = self.runs.partition_point(|r| r.base_page < run.base_page);
        let merge_prev = at > 0 && self.runs[at - 1].precedes(&run);
        let merge_next = self.runs.get(at).is_some_and(|next| run.precedes(next));

        match (merge_prev, merge_next) {
            (true, true) => {
                let next = self.runs.remove(at);
                self.runs[at - 1].page_count += run.page_count + next.page_count;
            }
            (true, false) => self.runs[at - 1].page_count += run.page_count,
            (false, true) => {
                self.runs[at].base_page = run.base_page;
                self.runs[at].page_count += run.page_count;
            }
            (false, false) => {
                self.runs
                    .try_reserve(1)
                    .map_err(|_| CartographerError::NoMemory { runs: self.runs.len() + 1 })?;
                self.runs.insert(at, run);
            }
        }

        self.total_pages = self.runs.iter().map(|r| r.page_count).sum();
        self.free_pages += run.page_count;
        log::info!("hot-added {run}; {} pages in {} runs", self.total_pages, self.runs.len());
        Ok(())
    }
}

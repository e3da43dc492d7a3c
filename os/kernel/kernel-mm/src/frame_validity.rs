//! # Frame Validity Index
//!
//! One bit per possible frame number; a set bit means the frame is real,
//! installed memory. The bitmap is sized for the highest frame that could
//! ever appear, including hot-add, so it is never reallocated and readers
//! can query it without a lock.

use crate::bitmap::Bitmap;
use crate::cartographer::{PhysicalMemoryMap, PhysicalRun};
use kernel_memory_addresses::FrameNumber;

/// Frame numbers must index a bitmap whose length fits in 32 bits.
pub const MAX_TRACKED_FRAMES: u64 = 1 << 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameValidityError {
    #[error("no memory for a {bytes}-byte frame validity bitmap")]
    NoMemory { bytes: u64 },
    #[error("{highest} is beyond the trackable frame range")]
    HighestFrameTooLarge { highest: FrameNumber },
    #[error("run {run} lies beyond the highest possible frame")]
    RunOutOfRange { run: PhysicalRun },
}

#[derive(Debug, Clone)]
pub struct FrameValidityBitmap {
    bits: Bitmap,
    highest_possible: FrameNumber,
}

impl FrameValidityBitmap {
    /// Bitmap for `[0, highest_possible]` with every page of `map` set.
    ///
    /// # Errors
    /// `highest_possible + 1` does not fit the frame-number bound, a run of
    /// `map` lies above `highest_possible`, or the bitmap cannot be
    /// allocated.
    pub fn build(map: &PhysicalMemoryMap, highest_possible: FrameNumber) -> Result<Self, FrameValidityError> {
        let frames = highest_possible
            .as_u64()
            .checked_add(1)
            .filter(|n| *n < MAX_TRACKED_FRAMES)
            .ok_or(FrameValidityError::HighestFrameTooLarge {
                highest: highest_possible,
            })?;
        let len = usize::try_from(frames).map_err(|_| FrameValidityError::HighestFrameTooLarge {
            highest: highest_possible,
        })?;

        let mut bits = Bitmap::try_new(len).map_err(|_| FrameValidityError::NoMemory {
            bytes: frames.div_ceil(32) * 4,
        })?;
        bits.clear_all();

        let mut index = Self {
            bits,
            highest_possible,
        };
        for run in map.runs() {
            index.set_run(*run)?;
        }

        log::info!(
            "frame validity bitmap: {} of {} frames valid, {} bytes",
            index.valid_pages(),
            frames,
            index.bits.size_in_bytes()
        );
        Ok(index)
    }

    #[inline]
    #[must_use]
    pub const fn highest_possible(&self) -> FrameNumber {
        self.highest_possible
    }

    #[must_use]
    pub fn is_valid(&self, frame: FrameNumber) -> bool {
        usize::try_from(frame.as_u64()).is_ok_and(|i| self.bits.get(i))
    }

    #[must_use]
    pub fn valid_pages(&self) -> u64 {
        self.bits.count_set() as u64
    }

    /// Record hot-added memory.
    ///
    /// # Errors
    /// The run extends past the highest possible frame.
    pub fn mark_added(&mut self, run: PhysicalRun) -> Result<(), FrameValidityError> {
        self.set_run(run)?;
        log::debug!("frame validity: added {run}");
        Ok(())
    }

    /// Valid frames regrouped into maximal runs.
    pub fn iter_valid_runs(&self) -> impl Iterator<Item = PhysicalRun> + '_ {
        self.bits
            .set_runs()
            .map(|r| PhysicalRun::new(r.start as u64, (r.end - r.start) as u64))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_run(&mut self, run: PhysicalRun) -> Result<(), FrameValidityError> {
        let start = run.base_page.as_u64();
        let end = start.saturating_add(run.page_count);
        let clipped_end = end.min(self.highest_possible.as_u64().saturating_add(1));
        if clipped_end > start {
            // Both ends are below 2^32 here.
            self.bits.set_range(start as usize..clipped_end as usize);
        }
        if end == clipped_end {
            Ok(())
        } else {
            Err(FrameValidityError::RunOutOfRange { run })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartographer::IncludeSet;
    use alloc::vec::Vec;
    use kernel_info::memory::{MemoryDescriptor, MemoryType};

    fn map(runs: &[(u64, u64)]) -> PhysicalMemoryMap {
        let descriptors: Vec<_> = runs
            .iter()
            .map(|(b, c)| MemoryDescriptor::new(MemoryType::Free, *b, *c))
            .collect();
        PhysicalMemoryMap::build(&descriptors, IncludeSet::DEFAULT).unwrap()
    }

    #[test]
    fn bits_follow_runs() {
        let m = map(&[(100, 50), (150, 25), (400, 10)]);
        let v = FrameValidityBitmap::build(&m, FrameNumber::new(1023)).unwrap();
        assert!(!v.is_valid(FrameNumber::new(99)));
        assert!(v.is_valid(FrameNumber::new(100)));
        assert!(v.is_valid(FrameNumber::new(174)));
        assert!(!v.is_valid(FrameNumber::new(175)));
        assert!(v.is_valid(FrameNumber::new(409)));
        assert!(!v.is_valid(FrameNumber::new(5000)));
        assert_eq!(v.valid_pages(), 85);
    }

    #[test]
    fn runs_round_trip() {
        let m = map(&[(0, 31), (32, 64), (200, 1), (1000, 24)]);
        let v = FrameValidityBitmap::build(&m, FrameNumber::new(1023)).unwrap();
        let runs: Vec<_> = v.iter_valid_runs().collect();
        assert_eq!(runs, m.runs());
    }

    #[test]
    fn bound_is_checked() {
        let m = map(&[(0, 1)]);
        assert_eq!(
            FrameValidityBitmap::build(&m, FrameNumber::new(u64::from(u32::MAX))).unwrap_err(),
            FrameValidityError::HighestFrameTooLarge {
                highest: FrameNumber::new(u64::from(u32::MAX))
            }
        );
        assert!(FrameValidityBitmap::build(&m, FrameNumber::new(u64::MAX)).is_err());
    }

    #[test]
    fn map_above_highest_frame_is_rejected() {
        let m = map(&[(0, 0x8000)]);
        assert_eq!(
            FrameValidityBitmap::build(&m, FrameNumber::new(0x4000)).unwrap_err(),
            FrameValidityError::RunOutOfRange {
                run: PhysicalRun::new(0, 0x8000)
            }
        );
    }

    #[test]
    fn hot_add() {
        let m = map(&[(0, 8)]);
        let mut v = FrameValidityBitmap::build(&m, FrameNumber::new(63)).unwrap();
        v.mark_added(PhysicalRun::new(8, 8)).unwrap();
        assert_eq!(v.iter_valid_runs().collect::<Vec<_>>(), [PhysicalRun::new(0, 16)]);

        let beyond = PhysicalRun::new(60, 8);
        assert_eq!(
            v.mark_added(beyond),
            Err(FrameValidityError::RunOutOfRange { run: beyond })
        );
        assert!(v.is_valid(FrameNumber::new(63)));
    }
}

//! # Zeroed Frame Supply
//!
//! Table frames must start out zeroed. The global free-frame source is shared
//! with other boot-time consumers, so every removal goes through
//! [`FrameLock`], which wraps the source in a [`SpinMutex`] and holds it only
//! for the single take.
//!
//! A source may report that its zeroed list is momentarily empty while
//! zeroing is in progress. [`FrameLock::take_zeroed`] then drops the lock,
//! lets the supply catch up and tries again, at most
//! [`MAX_ZEROED_FRAME_RETRIES`] times.

use core::hint::spin_loop;
use kernel_memory_addresses::FrameNumber;
use kernel_sync::SpinMutex;

/// Upper bound on retries against a replenishing zeroed list.
pub const MAX_ZEROED_FRAME_RETRIES: u32 = 16;

/// Result of one attempt to take a zeroed frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameTake {
    /// A zeroed frame, now owned by the caller.
    Frame(FrameNumber),
    /// No zeroed frame right now, but free frames are being zeroed.
    Replenishing,
    /// No frames left at all.
    Exhausted,
}

/// The free-frame source.
pub trait ZeroedFrameSource: Send {
    /// Remove one zeroed frame. Called with the frame lock held.
    fn try_take_zeroed(&mut self) -> FrameTake;

    /// Free frames left, zeroed or not.
    fn available(&self) -> u64;

    /// Give the source a chance to zero more frames between retries.
    fn replenish(&mut self) {}
}

/// No zeroed frame could be obtained.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameExhausted {
    #[error("no free frames remain")]
    Empty,
    #[error("zeroed frame list still empty after {retries} retries")]
    RetriesExceeded { retries: u32 },
}

/// The frame-allocation lock around a [`ZeroedFrameSource`].
///
/// This is always the innermost lock.
pub struct FrameLock<S> {
    source: SpinMutex<S>,
}

impl<S: ZeroedFrameSource> FrameLock<S> {
    pub const fn new(source: S) -> Self {
        Self {
            source: SpinMutex::new(source),
        }
    }

    /// Take one zeroed frame, retrying a bounded number of times while the
    /// source is replenishing.
    ///
    /// # Errors
    /// The source is exhausted or never produced a zeroed frame in time.
    pub fn take_zeroed(&self) -> Result<FrameNumber, FrameExhausted> {
        let mut retries = 0;
        loop {
            match self.source.with_lock(S::try_take_zeroed) {
                FrameTake::Frame(frame) => {
                    log::trace!("took zeroed {frame}");
                    return Ok(frame);
                }
                FrameTake::Exhausted => return Err(FrameExhausted::Empty),
                FrameTake::Replenishing if retries < MAX_ZEROED_FRAME_RETRIES => {
                    retries += 1;
                    spin_loop();
                    self.source.with_lock(S::replenish);
                }
                FrameTake::Replenishing => {
                    return Err(FrameExhausted::RetriesExceeded { retries });
                }
            }
        }
    }

    /// Free frames left in the source.
    pub fn available(&self) -> u64 {
        self.source.with_lock(|s| s.available())
    }

    /// Run `f` against the source with the lock held.
    pub fn with_source<U>(&self, f: impl FnOnce(&mut S) -> U) -> U {
        self.source.with_lock(f)
    }

    pub fn into_inner(self) -> S {
        self.source.into_inner()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::BumpZeroedSource;
    use super::*;

    #[test]
    fn takes_in_order_until_empty() {
        let lock = FrameLock::new(BumpZeroedSource::new(10, 12));
        assert_eq!(lock.take_zeroed(), Ok(FrameNumber::new(10)));
        assert_eq!(lock.take_zeroed(), Ok(FrameNumber::new(11)));
        assert_eq!(lock.take_zeroed(), Err(FrameExhausted::Empty));
        assert_eq!(lock.available(), 0);
    }

    #[test]
    fn bounded_retry_succeeds_after_replenish() {
        let mut source = BumpZeroedSource::new(0, 4);
        source.stalls = 3;
        let lock = FrameLock::new(source);
        assert_eq!(lock.take_zeroed(), Ok(FrameNumber::new(0)));
    }

    #[test]
    fn bounded_retry_gives_up() {
        let mut source = BumpZeroedSource::new(0, 4);
        source.stalls = MAX_ZEROED_FRAME_RETRIES + 1;
        let lock = FrameLock::new(source);
        assert_eq!(
            lock.take_zeroed(),
            Err(FrameExhausted::RetriesExceeded {
                retries: MAX_ZEROED_FRAME_RETRIES
            })
        );
        assert_eq!(lock.into_inner().taken, 0);
    }
}

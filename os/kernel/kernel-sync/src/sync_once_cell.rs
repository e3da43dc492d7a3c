use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const PUBLISHED: u8 = 2;

/// Write-once cell usable from `static` items.
///
/// The first writer wins; concurrent readers spin until the value is
/// published and never observe a partial write.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// The published value, if any.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == PUBLISHED {
            // SAFETY: PUBLISHED is only stored after the write completed.
            Some(unsafe { self.published() })
        } else {
            None
        }
    }

    /// Publish `value` if the cell is still empty.
    ///
    /// # Errors
    /// Hands `value` back if another writer got there first.
    pub fn set(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }

        // SAFETY: WRITING grants exclusive write access.
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(PUBLISHED, Ordering::Release);
        Ok(())
    }

    /// Initialize at most once and return the published value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }

        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            let v = init();
            // SAFETY: WRITING grants exclusive write access.
            unsafe {
                (*self.value.get()).write(v);
            }
            self.state.store(PUBLISHED, Ordering::Release);
        } else {
            while self.state.load(Ordering::Acquire) != PUBLISHED {
                spin_loop();
            }
        }

        // SAFETY: either we published above or we waited for PUBLISHED.
        unsafe { self.published() }
    }

    /// # Safety
    /// `state` must be `PUBLISHED`.
    #[inline]
    unsafe fn published(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == PUBLISHED {
            // SAFETY: published values are initialized and dropped exactly once here.
            unsafe { self.value.get_mut().assume_init_drop() }
        }
    }
}

// SAFETY: shared access only after publication; a single writer publishes.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}

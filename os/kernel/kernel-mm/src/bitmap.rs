//! Owned, fixed-length bitmap over 32-bit words.

use alloc::vec::Vec;
use alloc::collections::TryReserveError;
use core::fmt;
use core::ops::Range;

const WORD_BITS: usize = u32::BITS as usize;

#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u32>,
    len: usize,
}

impl Bitmap {
    /// A bitmap of `len` clear bits.
    ///
    /// # Errors
    /// The backing words could not be reserved.
    pub fn try_new(len: usize) -> Result<Self, TryReserveError> {
        let count = len.div_ceil(WORD_BITS);
        let mut words = Vec::new();
        words.try_reserve_exact(count)?;
        words.resize(count, 0);
        Ok(Self { words, len })
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes of backing storage.
    #[inline]
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.words.len() * size_of::<u32>()
    }

    /// Out-of-range indices read as clear.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, bit) = split_index(index);
        (self.words[word] >> bit) & 1 != 0
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        let (word, bit) = split_index(index);
        self.words[word] |= 1 << bit;
    }

    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < self.len);
        let (word, bit) = split_index(index);
        self.words[word] &= !(1 << bit);
    }

    /// Set every bit in `range`, clipped to the bitmap.
    pub fn set_range(&mut self, range: Range<usize>) {
        self.fill(range, true);
    }

    /// Clear every bit in `range`, clipped to the bitmap.
    pub fn clear_range(&mut self, range: Range<usize>) {
        self.fill(range, false);
    }

    pub fn set_all(&mut self) {
        self.fill(0..self.len, true);
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    #[must_use]
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn all_clear(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Maximal runs of set bits, in increasing order.
    pub fn set_runs(&self) -> SetRuns<'_> {
        SetRuns {
            bitmap: self,
            next: 0,
        }
    }

    fn fill(&mut self, range: Range<usize>, value: bool) {
        let end = range.end.min(self.len);
        let mut i = range.start;
        while i < end {
            let (word, bit) = split_index(i);
            let n = (WORD_BITS - bit).min(end - i);
            let mask = if n == WORD_BITS {
                u32::MAX
            } else {
                ((1_u32 << n) - 1) << bit
            };
            if value {
                self.words[word] |= mask;
            } else {
                self.words[word] &= !mask;
            }
            i += n;
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("set", &self.count_set())
            .finish()
    }
}

/// Iterator over `start..end` runs of set bits.
pub struct SetRuns<'a> {
    bitmap: &'a Bitmap,
    next: usize,
}

impl Iterator for SetRuns<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.bitmap.len;
        let mut i = self.next;

        // Skip clear bits a word at a time where possible.
        while i < len {
            let (word, bit) = split_index(i);
            if bit == 0 && self.bitmap.words[word] == 0 {
                i += WORD_BITS;
            } else if self.bitmap.get(i) {
                break;
            } else {
                i += 1;
            }
        }
        if i >= len {
            self.next = len;
            return None;
        }

        let start = i;
        while i < len {
            let (word, bit) = split_index(i);
            if bit == 0 && self.bitmap.words[word] == u32::MAX && i + WORD_BITS <= len {
                i += WORD_BITS;
            } else if self.bitmap.get(i) {
                i += 1;
            } else {
                break;
            }
        }
        self.next = i;
        Some(start..i)
    }
}

const fn split_index(index: usize) -> (usize, usize) {
    (index / WORD_BITS, index % WORD_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn ranges_cross_word_boundaries() {
        let mut b = Bitmap::try_new(100).unwrap();
        b.set_range(30..70);
        assert_eq!(b.count_set(), 40);
        assert!(!b.get(29));
        assert!(b.get(30));
        assert!(b.get(69));
        assert!(!b.get(70));

        b.clear_range(32..64);
        assert_eq!(b.count_set(), 8);
    }

    #[test]
    fn ranges_are_clipped() {
        let mut b = Bitmap::try_new(10).unwrap();
        b.set_range(8..1000);
        assert_eq!(b.count_set(), 2);
        assert!(!b.get(10));
        assert!(!b.get(usize::MAX));
    }

    #[test]
    fn runs() {
        let mut b = Bitmap::try_new(200).unwrap();
        b.set_range(0..3);
        b.set_range(32..96);
        b.set(150);
        b.set_range(198..200);
        let runs: Vec<_> = b.set_runs().collect();
        assert_eq!(runs, vec![0..3, 32..96, 150..151, 198..200]);
    }

    #[test]
    fn set_all_respects_length() {
        let mut b = Bitmap::try_new(33).unwrap();
        b.set_all();
        assert_eq!(b.count_set(), 33);
        assert_eq!(b.set_runs().collect::<Vec<_>>(), vec![0..33]);
        b.clear_all();
        assert!(b.all_clear());
        assert_eq!(b.size_in_bytes(), 8);
    }
}

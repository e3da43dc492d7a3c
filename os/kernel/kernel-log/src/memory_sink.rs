use crate::LogSink;
use core::fmt;

/// Ring of the most recent `LINES` log lines, each truncated to `WIDTH` bytes.
///
/// Needs no heap. Once full, the oldest line is overwritten.
pub struct MemorySink<const LINES: usize, const WIDTH: usize> {
    buf: [[u8; WIDTH]; LINES],
    lens: [usize; LINES],
    /// Slot the next completed line goes into.
    next: usize,
    /// Completed lines, at most `LINES`.
    count: usize,
    current: [u8; WIDTH],
    current_len: usize,
}

impl<const LINES: usize, const WIDTH: usize> Default for MemorySink<LINES, WIDTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const LINES: usize, const WIDTH: usize> MemorySink<LINES, WIDTH> {
    const NON_EMPTY: () = assert!(LINES > 0 && WIDTH > 0);

    #[must_use]
    pub const fn new() -> Self {
        let () = Self::NON_EMPTY;
        Self {
            buf: [[0; WIDTH]; LINES],
            lens: [0; LINES],
            next: 0,
            count: 0,
            current: [0; WIDTH],
            current_len: 0,
        }
    }

    /// Number of completed lines held.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Completed lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        let first = (self.next + LINES - self.count) % LINES;
        (0..self.count).map(move |i| {
            let slot = (first + i) % LINES;
            let bytes = &self.buf[slot][..self.lens[slot]];
            // Truncation may split a character; fall back to the valid prefix.
            match core::str::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
            }
        })
    }

    /// Write all completed lines to `out`, oldest first.
    ///
    /// # Errors
    /// Propagates the first error of `out`.
    pub fn dump(&self, out: &mut impl fmt::Write) -> fmt::Result {
        self.lines().try_for_each(|line| writeln!(out, "{line}"))
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.count = 0;
        self.current_len = 0;
    }

    fn push_byte(&mut self, b: u8) {
        if b == b'\n' {
            self.buf[self.next] = self.current;
            self.lens[self.next] = self.current_len;
            self.next = (self.next + 1) % LINES;
            self.count = (self.count + 1).min(LINES);
            self.current_len = 0;
        } else if self.current_len < WIDTH {
            self.current[self.current_len] = b;
            self.current_len += 1;
        }
    }
}

impl<const LINES: usize, const WIDTH: usize> fmt::Write for MemorySink<LINES, WIDTH> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        s.bytes().for_each(|b| self.push_byte(b));
        Ok(())
    }
}

impl<const LINES: usize, const WIDTH: usize> LogSink for MemorySink<LINES, WIDTH> {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn keeps_most_recent_lines() {
        let mut sink = MemorySink::<2, 16>::new();
        writeln!(sink, "one").unwrap();
        writeln!(sink, "two").unwrap();
        writeln!(sink, "three").unwrap();
        write!(sink, "partial").unwrap();
        assert_eq!(sink.lines().collect::<Vec<_>>(), ["two", "three"]);
    }

    #[test]
    fn truncates_long_lines() {
        let mut sink = MemorySink::<2, 4>::new();
        writeln!(sink, "abcdefgh").unwrap();
        assert_eq!(sink.lines().collect::<Vec<_>>(), ["abcd"]);
    }

    #[test]
    fn truncation_never_splits_characters() {
        let mut sink = MemorySink::<1, 5>::new();
        writeln!(sink, "abcdé").unwrap();
        assert_eq!(sink.lines().next(), Some("abcd"));
    }

    #[test]
    fn dump_and_clear() {
        let mut sink = MemorySink::<4, 16>::new();
        writeln!(sink, "a").unwrap();
        writeln!(sink, "b").unwrap();
        let mut out = String::new();
        sink.dump(&mut out).unwrap();
        assert_eq!(out, "a\nb\n");
        sink.clear();
        assert!(sink.is_empty());
    }
}

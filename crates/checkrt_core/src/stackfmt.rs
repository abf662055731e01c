//! Formatting into a fixed buffer on the stack.
//!
//! Used wherever a heap allocation is off the table: inside the budgeted
//! allocator (which would re-enter itself) and in a freshly forked child
//! (where another thread may have held the malloc lock at fork time).

use core::fmt;

/// A [`fmt::Write`] sink backed by an inline array.
///
/// Output beyond `N` bytes is dropped; the writer never fails, so
/// `write!` into it cannot return an error. Truncation may split a
/// multibyte character, which is why only bytes are exposed.
#[derive(Debug)]
pub struct StackWriter<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> Default for StackWriter<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> StackWriter<N> {
    /// An empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            truncated: false,
        }
    }

    /// The bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Whether some output did not fit.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Forget everything written so far.
    pub fn clear(&mut self) {
        self.len = 0;
        self.truncated = false;
    }
}

impl<const N: usize> fmt::Write for StackWriter<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

//! Growable byte buffer used on both sides of a connection.
//!
//! The input buffer accumulates raw socket reads until the parser consumes
//! a prefix; the output buffer accumulates serialized response data until
//! the reactor flushes it. Consuming from the front is O(1) amortized:
//! a start offset is advanced and the allocation is compacted lazily.

use std::fmt;
use std::io;
use std::ops::Deref;

/// Consumed prefix larger than this triggers compaction on the next write.
const COMPACT_THRESHOLD: usize = 4096;

pub struct Buf {
    data: Vec<u8>,
    start: usize,
}

impl Buf {
    pub fn new() -> Buf {
        Buf { data: Vec::new(), start: 0 }
    }

    pub fn with_capacity(cap: usize) -> Buf {
        Buf { data: Vec::with_capacity(cap), start: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contiguous view of the unconsumed bytes.
    pub fn pull_up(&self) -> &[u8] {
        &self.data[self.start..]
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact_if_needed();
        self.data.extend_from_slice(bytes);
    }

    /// Drop `n` bytes from the front.
    ///
    /// # Panics
    ///
    /// Panics if `n` is larger than the buffer length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consumed {} bytes of {}", n, self.len());
        self.start += n;
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }
    }

    /// Remove an inner range (used to strip chunk-size lines out of a
    /// partially parsed body).
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn remove_range(&mut self, from: usize, to: usize) {
        assert!(from <= to && self.start + to <= self.data.len());
        self.data.drain(self.start + from..self.start + to);
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    /// Move all unconsumed bytes into `other`, leaving `self` empty.
    pub fn drain_into(&mut self, other: &mut Buf) {
        other.extend(self.pull_up());
        self.clear();
    }

    /// Read once from `r` into the buffer. Returns the number of bytes
    /// read (0 on EOF).
    pub fn read_from<R: io::Read>(&mut self, r: &mut R, max: usize)
        -> io::Result<usize>
    {
        self.compact_if_needed();
        let old_len = self.data.len();
        self.data.resize(old_len + max, 0);
        match r.read(&mut self.data[old_len..]) {
            Ok(n) => {
                self.data.truncate(old_len + n);
                Ok(n)
            }
            Err(e) => {
                self.data.truncate(old_len);
                Err(e)
            }
        }
    }

    /// Write as much as possible to `w`, consuming written bytes.
    /// Returns the number of bytes written.
    pub fn write_to<W: io::Write>(&mut self, w: &mut W) -> io::Result<usize> {
        let mut total = 0;
        while !self.is_empty() {
            match w.write(self.pull_up()) {
                Ok(0) => break,
                Ok(n) => {
                    self.consume(n);
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn compact_if_needed(&mut self) {
        if self.start > COMPACT_THRESHOLD {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }
}

impl Deref for Buf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.pull_up()
    }
}

impl io::Write for Buf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Buf[{} bytes]", self.len())
    }
}

/// Find the first occurrence of `needle` in `haystack`.
pub fn find_substr(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::{find_substr, Buf};

    #[test]
    fn consume_and_compact() {
        let mut buf = Buf::new();
        buf.extend(b"hello world");
        buf.consume(6);
        assert_eq!(&buf[..], b"world");
        buf.consume(5);
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn remove_range_strips_inner_bytes() {
        let mut buf = Buf::new();
        buf.extend(b"aaa5\r\nbbb");
        buf.consume(3);
        buf.remove_range(0, 3);
        assert_eq!(&buf[..], b"bbb");
    }

    #[test]
    fn drain_into_moves_everything() {
        let mut a = Buf::new();
        let mut b = Buf::new();
        a.extend(b"abc");
        b.extend(b"de");
        a.drain_into(&mut b);
        assert!(a.is_empty());
        assert_eq!(&b[..], b"deabc");
    }

    #[test]
    fn find_substr_matches() {
        assert_eq!(find_substr(b"a\r\n\r\nb", b"\r\n\r\n"), Some(1));
        assert_eq!(find_substr(b"abc", b"\r\n"), None);
        assert_eq!(find_substr(b"", b"x"), None);
    }
}

use std::io::{self, Read};

/// An owning fill buffer for the parser.
///
/// The backing storage is allocated lazily on the first fill and reused for
/// every fill after that.
#[derive(Debug)]
pub(crate) struct Buffer {
    contents: Vec<u8>,
    capacity: usize,
    len: usize,
}

impl Buffer {
    pub(crate) fn with_capacity(capacity: usize) -> Buffer {
        Buffer { contents: Vec::new(), capacity, len: 0 }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// The loaded region of the current fill.
    pub(crate) fn loaded(&self) -> &[u8] {
        &self.contents[..self.len]
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Discards the previous fill and reads from `rdr` until the buffer is
    /// full or the reader reports EOF. Returns `true` on EOF.
    pub(crate) fn fill<R: Read>(&mut self, rdr: &mut R) -> io::Result<bool> {
        if self.contents.is_empty() {
            self.contents.resize(self.capacity, 0);
        }
        self.len = 0;
        while self.len < self.contents.len() {
            match rdr.read(&mut self.contents[self.len..]) {
                Ok(0) => return Ok(true),
                Ok(n) => self.len += n,
                Err(ref err)
                    if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::Buffer;

    // A reader that hands out one byte at a time, with a spurious
    // interruption before each read.
    struct Trickle<'a> {
        data: &'a [u8],
        interrupted: bool,
    }

    impl<'a> std::io::Read for Trickle<'a> {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::ErrorKind::Interrupted.into());
            }
            self.interrupted = false;
            match self.data.split_first() {
                Some((&b, rest)) => {
                    self.data = rest;
                    out[0] = b;
                    Ok(1)
                }
                None => Ok(0),
            }
        }
    }

    #[test]
    fn fills_through_partial_and_interrupted_reads() {
        let mut rdr = Trickle { data: b"abcdef", interrupted: false };
        let mut buf = Buffer::with_capacity(4);

        assert!(!buf.fill(&mut rdr).unwrap());
        assert_eq!(buf.loaded(), b"abcd");

        assert!(buf.fill(&mut rdr).unwrap());
        assert_eq!(buf.loaded(), b"ef");
    }

    #[test]
    fn eof_on_empty_reader() {
        let mut rdr = std::io::empty();
        let mut buf = Buffer::with_capacity(8);
        assert!(buf.fill(&mut rdr).unwrap());
        assert_eq!(buf.loaded(), b"");
    }
}

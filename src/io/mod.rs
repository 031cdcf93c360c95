mod local;
mod memory;
mod sink;

pub use local::LocalFileReader;
pub use memory::MemoryReader;
pub use sink::{ArchiveSink, SeekableSink, StreamSink};

use std::io::{self, Read};

/// Trait for random access reading from a data source
pub trait ReadAt {
    /// Read data at the specified offset into the buffer
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely from `offset`, failing with `UnexpectedEof` on a short source.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(offset, buf) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    offset += n as u64;
                    buf = &mut buf[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Sequential [`Read`] view over a byte range of a [`ReadAt`] source.
pub struct RangeReader<'a> {
    source: &'a dyn ReadAt,
    position: u64,
    end: u64,
}

impl<'a> RangeReader<'a> {
    pub fn new(source: &'a dyn ReadAt, start: u64, len: u64) -> Self {
        Self {
            source,
            position: start,
            end: start.saturating_add(len),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }
}

impl Read for RangeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.remaining()) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self.source.read_at(self.position, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended inside entry data",
            ));
        }
        self.position += n as u64;
        Ok(n)
    }
}

use std::io::{self, Seek, SeekFrom, Write};

/// Output target for archive writing.
///
/// Offsets recorded in the central directory come from [`position`](Self::position),
/// which is tracked as bytes are written, so non-seekable targets never need
/// backward patching.
pub trait ArchiveSink: Write {
    /// Offset of the next byte to be written.
    fn position(&self) -> u64;

    /// Whether [`patch`](Self::patch) can rewrite earlier bytes.
    fn is_seekable(&self) -> bool;

    /// Overwrite bytes at an earlier `offset` and return to the current position.
    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;
}

/// Sink over a seekable writer; local headers are patched in place.
pub struct SeekableSink<W: Write + Seek> {
    inner: W,
    position: u64,
}

impl<W: Write + Seek> SeekableSink<W> {
    pub fn new(mut inner: W) -> io::Result<Self> {
        let position = inner.stream_position()?;
        Ok(Self { inner, position })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Write for SeekableSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> ArchiveSink for SeekableSink<W> {
    fn position(&self) -> u64 {
        self.position
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(bytes)?;
        self.inner.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }
}

/// Sink over a forward-only writer; entries carry data descriptors.
pub struct StreamSink<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StreamSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> ArchiveSink for StreamSink<W> {
    fn position(&self) -> u64 {
        self.position
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn patch(&mut self, _offset: u64, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "cannot patch a non-seekable output",
        ))
    }
}

impl<S: ArchiveSink + ?Sized> ArchiveSink for &mut S {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        (**self).patch(offset, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn seekable_sink_patches_and_returns() {
        let mut sink = SeekableSink::new(Cursor::new(Vec::new())).unwrap();
        sink.write_all(b"hello world").unwrap();
        sink.patch(0, b"J").unwrap();
        sink.write_all(b"!").unwrap();
        assert_eq!(sink.position(), 12);
        assert_eq!(sink.into_inner().into_inner(), b"Jello world!");
    }

    #[test]
    fn stream_sink_tracks_position_and_refuses_patch() {
        let mut sink = StreamSink::new(Vec::new());
        sink.write_all(b"abc").unwrap();
        assert_eq!(sink.position(), 3);
        assert!(sink.patch(0, b"x").is_err());
    }
}

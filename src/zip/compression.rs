//! Compression method selection and the compress/decompress pipeline stages.

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

use crate::error::{ZipError, ZipResult};

/// Method field value announcing WinZip AES; the real method is in the extra field.
pub const AES_METHOD: u16 = 99;

/// Compression method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    Stored,
    #[default]
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    pub fn name(&self) -> String {
        match self {
            CompressionMethod::Stored => "Stored".to_string(),
            CompressionMethod::Deflate => "Defl:N".to_string(),
            CompressionMethod::Unknown(v) => format!("Unk:{v:03}"),
        }
    }

    /// Methods this crate can both read and write.
    pub fn ensure_supported(&self) -> ZipResult<()> {
        match self {
            CompressionMethod::Unknown(v) => Err(ZipError::UnsupportedMethod(*v)),
            _ => Ok(()),
        }
    }
}

/// Deflate effort. Ignored for stored entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Store without compression.
    None,
    BestSpeed,
    #[default]
    Default,
    BestCompression,
    /// Explicit zlib level, 0 through 9.
    Level(u32),
}

impl CompressionLevel {
    pub fn to_flate2(self) -> Compression {
        match self {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::BestSpeed => Compression::fast(),
            CompressionLevel::Default => Compression::default(),
            CompressionLevel::BestCompression => Compression::best(),
            CompressionLevel::Level(n) => Compression::new(n.min(9)),
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, CompressionLevel::None | CompressionLevel::Level(0))
    }
}

/// Compression stage of an entry write pipeline.
pub enum Compressor<W: Write> {
    Stored(W),
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> Compressor<W> {
    pub fn new(inner: W, method: CompressionMethod, level: CompressionLevel) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Compressor::Stored(inner)),
            CompressionMethod::Deflate => Ok(Compressor::Deflate(DeflateEncoder::new(
                inner,
                level.to_flate2(),
            ))),
            CompressionMethod::Unknown(v) => Err(ZipError::UnsupportedMethod(v)),
        }
    }

    pub fn get_mut(&mut self) -> &mut W {
        match self {
            Compressor::Stored(w) => w,
            Compressor::Deflate(e) => e.get_mut(),
        }
    }

    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Stored(w) => Ok(w),
            Compressor::Deflate(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Stored(w) => w.write(buf),
            Compressor::Deflate(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Stored(w) => w.flush(),
            Compressor::Deflate(e) => e.flush(),
        }
    }
}

/// Decompression stage of an entry read pipeline.
pub enum Decompressor<R: Read> {
    Stored(R),
    Deflate(DeflateDecoder<R>),
}

impl<R: Read> Decompressor<R> {
    pub fn new(inner: R, method: CompressionMethod) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Decompressor::Stored(inner)),
            CompressionMethod::Deflate => Ok(Decompressor::Deflate(DeflateDecoder::new(inner))),
            CompressionMethod::Unknown(v) => Err(ZipError::UnsupportedMethod(v)),
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        match self {
            Decompressor::Stored(r) => r,
            Decompressor::Deflate(d) => d.get_mut(),
        }
    }

    /// The inner reader. Input the deflate decoder buffered but did not use
    /// is lost.
    pub fn into_inner(self) -> R {
        match self {
            Decompressor::Stored(r) => r,
            Decompressor::Deflate(d) => d.into_inner(),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Stored(r) => r.read(buf),
            Decompressor::Deflate(d) => d.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_codes() {
        assert_eq!(CompressionMethod::from_u16(0), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::from_u16(14).as_u16(), 14);
        assert!(matches!(
            CompressionMethod::from_u16(12).ensure_supported(),
            Err(ZipError::UnsupportedMethod(12))
        ));
    }

    #[test]
    fn deflate_pipeline_round_trip() {
        let data = b"compressible text ".repeat(200);
        let mut compressor =
            Compressor::new(Vec::new(), CompressionMethod::Deflate, CompressionLevel::BestCompression)
                .unwrap();
        compressor.write_all(&data).unwrap();
        let packed = compressor.finish().unwrap();
        assert!(packed.len() < data.len() / 4);

        let mut out = Vec::new();
        Decompressor::new(&packed[..], CompressionMethod::Deflate)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn level_zero_counts_as_none() {
        assert!(CompressionLevel::Level(0).is_none());
        assert!(!CompressionLevel::BestSpeed.is_none());
    }
}

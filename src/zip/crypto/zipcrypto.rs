//! Traditional PKWARE encryption ("ZipCrypto").
//!
//! Three 32-bit keys are seeded from the password and updated with every
//! plaintext byte. Each encrypted entry starts with a 12-byte header whose
//! last byte is a quick password check.

use rand::RngCore;
use std::io::{self, Read, Write};

use crate::error::{ZipError, ZipResult};
use crate::zip::structures::FLAG_DATA_DESCRIPTOR;

pub const HEADER_LEN: usize = 12;

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

fn crc32_step(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
}

/// Which value the last header byte is checked against.
///
/// The format does not record which convention a writer used; `Auto`
/// picks the time variant for entries with a data descriptor (where the CRC
/// is unknown when the header is written) and the CRC variant otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordCheck {
    #[default]
    Auto,
    Crc,
    DosTime,
}

impl PasswordCheck {
    pub fn check_byte(self, flags: u16, crc32: u32, dos_datetime: u32) -> u8 {
        let use_time = match self {
            PasswordCheck::Auto => flags & FLAG_DATA_DESCRIPTOR != 0,
            PasswordCheck::Crc => false,
            PasswordCheck::DosTime => true,
        };
        if use_time {
            (dos_datetime >> 8) as u8
        } else {
            (crc32 >> 24) as u8
        }
    }
}

#[derive(Clone)]
pub struct ZipCryptoKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCryptoKeys {
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            key0: 0x1234_5678,
            key1: 0x2345_6789,
            key2: 0x3456_7890,
        };
        for &b in password {
            keys.update(b);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.key0 = crc32_step(self.key0, plain);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.key2 = crc32_step(self.key2, (self.key1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let t = (self.key2 | 2) as u16;
        (t.wrapping_mul(t ^ 1) >> 8) as u8
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }
}

/// Decrypting reader; the password is checked before any data is returned.
pub struct ZipCryptoReader<R> {
    inner: R,
    keys: ZipCryptoKeys,
}

impl<R: Read> ZipCryptoReader<R> {
    pub fn new(mut inner: R, password: &[u8], expected_check: u8, entry: &str) -> ZipResult<Self> {
        let mut keys = ZipCryptoKeys::new(password);
        let mut header = [0u8; HEADER_LEN];
        inner.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ZipError::truncated("encryption header")
            } else {
                ZipError::from(e)
            }
        })?;
        let mut last = 0u8;
        for b in header {
            last = keys.decrypt_byte(b);
        }
        if last != expected_check {
            return Err(ZipError::BadPassword(entry.to_owned()));
        }
        Ok(Self { inner, keys })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for b in &mut buf[..n] {
            *b = self.keys.decrypt_byte(*b);
        }
        Ok(n)
    }
}

pub struct ZipCryptoWriter<W> {
    inner: W,
    keys: ZipCryptoKeys,
    scratch: Vec<u8>,
}

impl<W: Write> ZipCryptoWriter<W> {
    /// Write the encryption header and return the writer for the content.
    pub fn new(mut inner: W, password: &[u8], check_byte: u8) -> io::Result<Self> {
        let mut keys = ZipCryptoKeys::new(password);
        let mut header = [0u8; HEADER_LEN];
        rand::rng().fill_bytes(&mut header[..HEADER_LEN - 1]);
        header[HEADER_LEN - 1] = check_byte;
        for b in &mut header {
            *b = keys.encrypt_byte(*b);
        }
        inner.write_all(&header)?;
        Ok(Self {
            inner,
            keys,
            scratch: Vec::new(),
        })
    }

    pub fn finish(self) -> io::Result<W> {
        Ok(self.inner)
    }
}

impl<W: Write> Write for ZipCryptoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // The key state advances per byte, so a chunk is never written partially.
        self.scratch.clear();
        self.scratch
            .extend(buf.iter().map(|&b| self.keys.encrypt_byte(b)));
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

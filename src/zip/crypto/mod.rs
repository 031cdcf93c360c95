pub mod aes;
pub mod zipcrypto;

pub use aes::{AesReader, AesStrength, AesWriter};
pub use zipcrypto::{PasswordCheck, ZipCryptoReader, ZipCryptoWriter};

use std::io::{self, Read, Write};

/// Per-entry encryption scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMethod {
    #[default]
    None,
    /// Traditional PKWARE encryption.
    PkzipWeak,
    WinZipAes128,
    WinZipAes192,
    WinZipAes256,
}

impl EncryptionMethod {
    pub fn is_encrypted(self) -> bool {
        self != EncryptionMethod::None
    }

    pub fn aes_strength(self) -> Option<AesStrength> {
        match self {
            EncryptionMethod::WinZipAes128 => Some(AesStrength::Aes128),
            EncryptionMethod::WinZipAes192 => Some(AesStrength::Aes192),
            EncryptionMethod::WinZipAes256 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn from_aes_strength(strength: AesStrength) -> Self {
        match strength {
            AesStrength::Aes128 => EncryptionMethod::WinZipAes128,
            AesStrength::Aes192 => EncryptionMethod::WinZipAes192,
            AesStrength::Aes256 => EncryptionMethod::WinZipAes256,
        }
    }

    /// Bytes encryption adds on top of the compressed data.
    pub fn overhead(self) -> u64 {
        match self {
            EncryptionMethod::None => 0,
            EncryptionMethod::PkzipWeak => zipcrypto::HEADER_LEN as u64,
            other => other.aes_strength().map_or(0, AesStrength::overhead),
        }
    }
}

/// Decryption stage of an entry read pipeline.
pub enum Decryptor<R> {
    Plain(R),
    ZipCrypto(ZipCryptoReader<R>),
    Aes(AesReader<R>),
}

impl<R: Read> Decryptor<R> {
    pub fn into_inner(self) -> R {
        match self {
            Decryptor::Plain(r) => r,
            Decryptor::ZipCrypto(r) => r.into_inner(),
            Decryptor::Aes(r) => r.into_inner(),
        }
    }
}

impl<R: Read> Read for Decryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decryptor::Plain(r) => r.read(buf),
            Decryptor::ZipCrypto(r) => r.read(buf),
            Decryptor::Aes(r) => r.read(buf),
        }
    }
}

/// Encryption stage of an entry write pipeline.
pub enum Encryptor<W: Write> {
    Plain(W),
    ZipCrypto(ZipCryptoWriter<W>),
    Aes(AesWriter<W>),
}

impl<W: Write> Encryptor<W> {
    /// Flush trailing data (the AES MAC) and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encryptor::Plain(w) => Ok(w),
            Encryptor::ZipCrypto(w) => w.finish(),
            Encryptor::Aes(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for Encryptor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encryptor::Plain(w) => w.write(buf),
            Encryptor::ZipCrypto(w) => w.write(buf),
            Encryptor::Aes(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encryptor::Plain(w) => w.flush(),
            Encryptor::ZipCrypto(w) => w.flush(),
            Encryptor::Aes(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overhead_per_method() {
        assert_eq!(EncryptionMethod::None.overhead(), 0);
        assert_eq!(EncryptionMethod::PkzipWeak.overhead(), 12);
        assert_eq!(EncryptionMethod::WinZipAes128.overhead(), 8 + 2 + 10);
        assert_eq!(EncryptionMethod::WinZipAes192.overhead(), 12 + 2 + 10);
        assert_eq!(EncryptionMethod::WinZipAes256.overhead(), 16 + 2 + 10);
    }
}

//! WinZip AES encryption (AE-1 / AE-2).
//!
//! Layout of an encrypted entry's data:
//!
//! ```text
//! salt (8/12/16) | password verifier (2) | ciphertext | HMAC-SHA1 (10)
//! ```
//!
//! Keys come from PBKDF2-HMAC-SHA1 over the password and salt. The content
//! is encrypted with AES-CTR using a little-endian counter starting at 1,
//! and the MAC is computed over the ciphertext.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use ctr::Ctr128LE;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::io::{self, Read, Write};

use crate::error::{ZipError, ZipResult};

pub const PBKDF2_ROUNDS: u32 = 1000;
pub const VERIFIER_LEN: usize = 2;
pub const AUTH_CODE_LEN: usize = 10;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    /// Decode the strength byte of the AES extra field.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Aes128),
            2 => Some(Self::Aes192),
            3 => Some(Self::Aes256),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Aes128 => 1,
            Self::Aes192 => 2,
            Self::Aes256 => 3,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    pub fn salt_len(self) -> usize {
        self.key_len() / 2
    }

    /// Bytes added to the compressed size: salt, verifier and MAC.
    pub fn overhead(self) -> u64 {
        (self.salt_len() + VERIFIER_LEN + AUTH_CODE_LEN) as u64
    }
}

struct DerivedKeys {
    cipher_key: Vec<u8>,
    mac_key: Vec<u8>,
    verifier: [u8; VERIFIER_LEN],
}

fn derive_keys(password: &[u8], salt: &[u8], strength: AesStrength) -> DerivedKeys {
    let key_len = strength.key_len();
    let mut derived = vec![0u8; key_len * 2 + VERIFIER_LEN];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ROUNDS, &mut derived);
    DerivedKeys {
        cipher_key: derived[..key_len].to_vec(),
        mac_key: derived[key_len..key_len * 2].to_vec(),
        verifier: [derived[key_len * 2], derived[key_len * 2 + 1]],
    }
}

enum CtrCipher {
    Aes128(Ctr128LE<Aes128>),
    Aes192(Ctr128LE<Aes192>),
    Aes256(Ctr128LE<Aes256>),
}

impl CtrCipher {
    fn new(strength: AesStrength, key: &[u8]) -> ZipResult<Self> {
        let mut iv = [0u8; 16];
        iv[0] = 1;
        let bad_key = |_| ZipError::Argument("AES key has the wrong length".into());
        Ok(match strength {
            AesStrength::Aes128 => Self::Aes128(Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?),
            AesStrength::Aes192 => Self::Aes192(Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?),
            AesStrength::Aes256 => Self::Aes256(Ctr128LE::new_from_slices(key, &iv).map_err(bad_key)?),
        })
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes192(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// Keystream plus running MAC for one entry.
struct AesCipher {
    ctr: CtrCipher,
    mac: HmacSha1,
}

impl AesCipher {
    fn new(keys: &DerivedKeys, strength: AesStrength) -> ZipResult<Self> {
        let mac = <HmacSha1 as Mac>::new_from_slice(&keys.mac_key)
            .map_err(|_| ZipError::Argument("invalid HMAC key".into()))?;
        Ok(Self {
            ctr: CtrCipher::new(strength, &keys.cipher_key)?,
            mac,
        })
    }

    fn decrypt(&mut self, buf: &mut [u8]) {
        self.mac.update(buf);
        self.ctr.apply(buf);
    }

    fn encrypt(&mut self, buf: &mut [u8]) {
        self.ctr.apply(buf);
        self.mac.update(buf);
    }

    fn verify(&self, code: &[u8]) -> bool {
        self.mac.clone().verify_truncated_left(code).is_ok()
    }

    fn auth_code(&self) -> [u8; AUTH_CODE_LEN] {
        let full = self.mac.clone().finalize().into_bytes();
        let mut code = [0u8; AUTH_CODE_LEN];
        code.copy_from_slice(&full[..AUTH_CODE_LEN]);
        code
    }
}

enum Ciphertext {
    /// Length known from the headers.
    Known { remaining: u64 },
    /// Read until the inner reader ends, holding back the trailing MAC.
    Unbounded { pending: Vec<u8>, exhausted: bool },
}

/// Decrypting reader. A wrong password is reported by [`AesReader::new`];
/// a MAC mismatch is reported by the read that reaches the end of the data.
pub struct AesReader<R> {
    inner: R,
    cipher: AesCipher,
    ciphertext: Ciphertext,
    entry: String,
    verified: bool,
}

impl<R: Read> AesReader<R> {
    /// `data_len` is the entry's full compressed size (salt, verifier and MAC
    /// included), or `None` when the reader ends exactly at the MAC.
    pub fn new(
        mut inner: R,
        password: &[u8],
        strength: AesStrength,
        data_len: Option<u64>,
        entry: &str,
    ) -> ZipResult<Self> {
        let ciphertext = match data_len {
            Some(len) => Ciphertext::Known {
                remaining: len.checked_sub(strength.overhead()).ok_or_else(|| {
                    ZipError::BadRead(format!("AES entry {entry} is shorter than its overhead"))
                })?,
            },
            None => Ciphertext::Unbounded {
                pending: Vec::new(),
                exhausted: false,
            },
        };

        let mut header = vec![0u8; strength.salt_len() + VERIFIER_LEN];
        inner.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ZipError::truncated("AES header")
            } else {
                ZipError::from(e)
            }
        })?;
        let (salt, verifier) = header.split_at(strength.salt_len());
        let keys = derive_keys(password, salt, strength);
        if verifier != keys.verifier {
            return Err(ZipError::BadPassword(entry.to_owned()));
        }

        Ok(Self {
            inner,
            cipher: AesCipher::new(&keys, strength)?,
            ciphertext,
            entry: entry.to_owned(),
            verified: false,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn authenticate(&mut self, code: &[u8]) -> io::Result<usize> {
        if !self.cipher.verify(code) {
            return Err(ZipError::AuthenticationFailed(self.entry.clone()).into());
        }
        self.verified = true;
        Ok(0)
    }
}

impl<R: Read> Read for AesReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.verified || buf.is_empty() {
            return Ok(0);
        }
        match &mut self.ciphertext {
            Ciphertext::Known { remaining } => {
                if *remaining == 0 {
                    let mut code = [0u8; AUTH_CODE_LEN];
                    self.inner
                        .read_exact(&mut code)
                        .map_err(|_| io::Error::from(ZipError::truncated("AES authentication code")))?;
                    return self.authenticate(&code);
                }
                let want = (buf.len() as u64).min(*remaining) as usize;
                let n = self.inner.read(&mut buf[..want])?;
                if n == 0 {
                    return Err(ZipError::truncated("AES ciphertext").into());
                }
                *remaining -= n as u64;
                self.cipher.decrypt(&mut buf[..n]);
                Ok(n)
            }
            Ciphertext::Unbounded { pending, exhausted } => {
                let mut chunk = [0u8; 8192];
                while pending.len() <= AUTH_CODE_LEN && !*exhausted {
                    let n = self.inner.read(&mut chunk)?;
                    if n == 0 {
                        *exhausted = true;
                    } else {
                        pending.extend_from_slice(&chunk[..n]);
                    }
                }
                let available = pending.len().saturating_sub(AUTH_CODE_LEN);
                if available == 0 {
                    if pending.len() < AUTH_CODE_LEN {
                        return Err(ZipError::truncated("AES authentication code").into());
                    }
                    let code = std::mem::take(pending);
                    return self.authenticate(&code);
                }
                let n = available.min(buf.len());
                buf[..n].copy_from_slice(&pending[..n]);
                pending.drain(..n);
                self.cipher.decrypt(&mut buf[..n]);
                Ok(n)
            }
        }
    }
}

/// Encrypting writer; [`finish`](AesWriter::finish) appends the MAC.
pub struct AesWriter<W> {
    inner: W,
    cipher: AesCipher,
    scratch: Vec<u8>,
}

impl<W: Write> AesWriter<W> {
    pub fn new(mut inner: W, password: &[u8], strength: AesStrength) -> ZipResult<Self> {
        let mut salt = vec![0u8; strength.salt_len()];
        rand::rng().fill_bytes(&mut salt);
        let keys = derive_keys(password, &salt, strength);
        inner.write_all(&salt)?;
        inner.write_all(&keys.verifier)?;
        Ok(Self {
            inner,
            cipher: AesCipher::new(&keys, strength)?,
            scratch: Vec::new(),
        })
    }

    pub fn finish(mut self) -> io::Result<W> {
        let code = self.cipher.auth_code();
        self.inner.write_all(&code)?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for AesWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.cipher.encrypt(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

//! One file or directory inside an archive.
//!
//! An entry read from an archive starts as a stub built from its central
//! directory record. Its local header is read the first time content is
//! needed, which fixes the data offset. Entries added in memory stay dirty
//! until they are saved.

use chrono::NaiveDateTime;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{ZipError, ZipResult};
use crate::io::{RangeReader, ReadAt};
use crate::zip::compression::{CompressionLevel, CompressionMethod, Decompressor};
use crate::zip::crypto::{AesReader, Decryptor, EncryptionMethod, PasswordCheck, ZipCryptoReader};
use crate::zip::datetime;
use crate::zip::encoding::TextEncoding;
use crate::zip::extra::{self, ExtraRecord};
use crate::zip::options::ZipSettings;
use crate::zip::structures::{
    LocalFileHeader, HOST_DOS, HOST_UNIX, LOCAL_FILE_HEADER_SIGNATURE, VERSION_MADE_BY,
};

/// MS-DOS directory attribute bit.
pub const ATTRIBUTE_DIRECTORY: u32 = 0x10;
pub const ATTRIBUTE_READONLY: u32 = 0x01;
pub const ATTRIBUTE_ARCHIVE: u32 = 0x20;
/// Internal attribute bit marking text content.
const INTERNAL_TEXT: u16 = 0x0001;

/// Where an entry stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Added or modified in memory; nothing written yet.
    Dirty,
    /// Known from the central directory only.
    Stub,
    /// Local header confirmed; data offset known.
    HeaderRead,
    /// Content has been extracted, or compressed into a saved archive.
    Materialized,
}

/// Opens the content of a delegate-backed entry. The reader is dropped once
/// the entry has been written.
pub type OpenDelegate = Box<dyn FnMut(&str) -> io::Result<Box<dyn Read>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderState {
    Stub,
    Read { header_len: u64, data_offset: u64 },
}

/// Location and encoding of an entry's data inside a backing archive.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveData {
    pub local_header_offset: u64,
    /// Stored size, encryption overhead included.
    pub compressed_size: u64,
    pub method: CompressionMethod,
    pub encryption: EncryptionMethod,
    /// General purpose flags of the original headers.
    pub flags: u16,
    pub crc32: u32,
    pub dos_datetime: u32,
    /// Modification time the stored headers describe.
    pub last_modified: NaiveDateTime,
    /// Timestamp records of the central header, as stored.
    pub time_extra: Vec<ExtraRecord>,
    /// 1 or 2 for AES entries, 0 otherwise.
    pub aes_version: u16,
    pub header: HeaderState,
}

/// How an entry's uncompressed content is obtained.
pub(crate) enum EntrySource {
    Archive(ArchiveData),
    File(PathBuf),
    Bytes(Vec<u8>),
    Delegate(OpenDelegate),
}

impl fmt::Debug for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySource::Archive(data) => f.debug_tuple("Archive").field(data).finish(),
            EntrySource::File(path) => f.debug_tuple("File").field(path).finish(),
            EntrySource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            EntrySource::Delegate(_) => f.write_str("Delegate"),
        }
    }
}

#[derive(Debug)]
pub struct ZipEntry {
    pub(crate) name: String,
    pub(crate) comment: String,
    pub(crate) uncompressed_size: u64,
    pub(crate) compressed_size: u64,
    pub(crate) crc32: u32,
    pub(crate) last_modified: NaiveDateTime,
    pub(crate) accessed: Option<NaiveDateTime>,
    pub(crate) created: Option<NaiveDateTime>,
    pub(crate) external_attributes: u32,
    pub(crate) internal_attributes: u16,
    pub(crate) version_made_by: u16,
    pub(crate) compression_method: CompressionMethod,
    pub(crate) compression_level: CompressionLevel,
    pub(crate) encryption: EncryptionMethod,
    pub(crate) password: Option<String>,
    pub(crate) password_check: PasswordCheck,
    pub(crate) text_encoding: TextEncoding,
    pub(crate) use_unicode: bool,
    pub(crate) emit_ntfs_times: bool,
    pub(crate) emit_unix_times: bool,
    /// Extra records this crate does not generate itself, kept verbatim.
    pub(crate) extra: Vec<ExtraRecord>,
    pub(crate) source: EntrySource,
    /// Content settings changed since the entry was read from an archive.
    pub(crate) restream: bool,
    pub(crate) materialized: bool,
}

/// Normalise a name for storage: forward slashes, no leading `/` or `./`.
pub fn normalize_name(name: &str) -> ZipResult<String> {
    let mut name = name.replace('\\', "/");
    while let Some(rest) = name.strip_prefix("./").or_else(|| name.strip_prefix('/')) {
        name = rest.to_string();
    }
    if name.is_empty() || name == "/" {
        return Err(ZipError::Argument("entry name must not be blank".into()));
    }
    Ok(name)
}

fn default_version_made_by() -> u16 {
    let host = if cfg!(unix) { HOST_UNIX } else { HOST_DOS };
    (host as u16) << 8 | VERSION_MADE_BY
}

impl ZipEntry {
    /// A dirty entry configured from the archive settings.
    pub(crate) fn new(name: &str, source: EntrySource, settings: &ZipSettings) -> ZipResult<Self> {
        let (method, level) = settings.effective_compression();
        let is_unix = cfg!(unix);
        Ok(Self {
            name: normalize_name(name)?,
            comment: String::new(),
            uncompressed_size: 0,
            compressed_size: 0,
            crc32: 0,
            last_modified: datetime::now(),
            accessed: None,
            created: None,
            external_attributes: if is_unix { 0o100644 << 16 } else { ATTRIBUTE_ARCHIVE },
            internal_attributes: 0,
            version_made_by: default_version_made_by(),
            compression_method: method,
            compression_level: level,
            encryption: settings.encryption,
            password: settings.password.clone(),
            password_check: settings.password_check,
            text_encoding: settings.text_encoding,
            use_unicode: settings.use_unicode,
            emit_ntfs_times: settings.emit_ntfs_times,
            emit_unix_times: settings.emit_unix_times,
            extra: Vec::new(),
            source,
            restream: false,
            materialized: false,
        })
    }

    pub(crate) fn from_bytes(name: &str, bytes: Vec<u8>, settings: &ZipSettings) -> ZipResult<Self> {
        let size = bytes.len() as u64;
        let mut entry = Self::new(name, EntrySource::Bytes(bytes), settings)?;
        entry.uncompressed_size = size;
        Ok(entry)
    }

    pub(crate) fn from_delegate(name: &str, open: OpenDelegate, settings: &ZipSettings) -> ZipResult<Self> {
        Self::new(name, EntrySource::Delegate(open), settings)
    }

    /// Entry for a file or directory on disk, taking times and attributes
    /// from its metadata.
    pub(crate) fn from_path(name: &str, path: &Path, settings: &ZipSettings) -> ZipResult<Self> {
        let meta = fs::metadata(path)?;
        let mut entry = if meta.is_dir() {
            let mut entry = Self::new(name, EntrySource::Bytes(Vec::new()), settings)?;
            entry.mark_as_directory();
            entry
        } else {
            let mut entry = Self::new(name, EntrySource::File(path.to_path_buf()), settings)?;
            entry.uncompressed_size = meta.len();
            entry
        };
        if let Ok(modified) = meta.modified() {
            entry.last_modified = datetime::system_time_to_datetime(modified);
        }
        entry.accessed = meta.accessed().ok().map(datetime::system_time_to_datetime);
        entry.created = meta.created().ok().map(datetime::system_time_to_datetime);
        entry.external_attributes = attributes_from_metadata(&meta);
        Ok(entry)
    }

    /// Turn the entry into an empty directory: trailing `/`, no content,
    /// directory attribute set.
    pub fn mark_as_directory(&mut self) {
        if !self.name.ends_with('/') {
            self.name.push('/');
        }
        self.source = EntrySource::Bytes(Vec::new());
        self.uncompressed_size = 0;
        self.compressed_size = 0;
        self.crc32 = 0;
        self.compression_method = CompressionMethod::Stored;
        self.compression_level = CompressionLevel::None;
        self.encryption = EncryptionMethod::None;
        self.external_attributes |= ATTRIBUTE_DIRECTORY;
        if self.version_made_by >> 8 == HOST_UNIX as u16 {
            self.external_attributes = (0o040755 << 16) | (self.external_attributes & 0xFFFF);
        }
        self.restream = false;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Stored size, encryption overhead included. Zero until written.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn last_modified(&self) -> NaiveDateTime {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, time: NaiveDateTime) {
        self.last_modified = time;
    }

    pub fn accessed(&self) -> Option<NaiveDateTime> {
        self.accessed
    }

    pub fn created(&self) -> Option<NaiveDateTime> {
        self.created
    }

    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub fn set_external_attributes(&mut self, attributes: u32) {
        self.external_attributes = attributes;
    }

    /// Unix permission bits, when the entry was made on a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attributes >> 16;
        (self.version_made_by >> 8 == HOST_UNIX as u16 && mode != 0).then_some(mode)
    }

    /// A trailing `/`, no content and a directory attribute. Entries that
    /// record no attributes at all are judged by name and size alone.
    pub fn is_directory(&self) -> bool {
        self.has_directory_name() && self.uncompressed_size == 0 && self.has_directory_attribute()
    }

    pub(crate) fn has_directory_name(&self) -> bool {
        self.name.ends_with('/')
    }

    fn has_directory_attribute(&self) -> bool {
        self.external_attributes == 0
            || self.external_attributes & ATTRIBUTE_DIRECTORY != 0
            || (self.external_attributes >> 16) & 0o170000 == 0o040000
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    /// Changing the method of an entry read from an archive forces it to be
    /// recompressed on the next save.
    pub fn set_compression_method(&mut self, method: CompressionMethod) -> ZipResult<()> {
        method.ensure_supported()?;
        if self.is_directory() {
            return Ok(());
        }
        if method != self.compression_method {
            self.compression_method = method;
            self.restream = true;
        }
        Ok(())
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.compression_level
    }

    pub fn set_compression_level(&mut self, level: CompressionLevel) {
        if self.is_directory() || level == self.compression_level {
            return;
        }
        self.compression_level = level;
        if level.is_none() {
            self.compression_method = CompressionMethod::Stored;
        } else if self.compression_method == CompressionMethod::Stored {
            self.compression_method = CompressionMethod::Deflate;
        }
        self.restream = true;
    }

    pub fn encryption(&self) -> EncryptionMethod {
        self.encryption
    }

    pub fn uses_encryption(&self) -> bool {
        self.encryption.is_encrypted()
    }

    /// Changing the encryption of an entry read from an archive forces it to
    /// be re-encrypted on the next save; reading it back then needs the
    /// entry's current password.
    pub fn set_encryption(&mut self, encryption: EncryptionMethod) {
        if self.is_directory() {
            return;
        }
        if encryption != self.encryption {
            self.encryption = encryption;
            self.restream = true;
        }
    }

    /// Password used to read this entry and, when it is rewritten, to encrypt it.
    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    pub fn is_text(&self) -> bool {
        self.internal_attributes & INTERNAL_TEXT != 0
    }

    pub fn set_is_text(&mut self, text: bool) {
        if text {
            self.internal_attributes |= INTERNAL_TEXT;
        } else {
            self.internal_attributes &= !INTERNAL_TEXT;
        }
    }

    pub fn use_unicode(&self) -> bool {
        self.use_unicode
    }

    pub fn set_use_unicode(&mut self, unicode: bool) {
        self.use_unicode = unicode;
    }

    /// Space saved as a percentage of the uncompressed size.
    pub fn compression_ratio(&self) -> f64 {
        if self.uncompressed_size == 0 {
            return 0.0;
        }
        let stored = self.compressed_size.saturating_sub(self.encryption.overhead());
        100.0 * (1.0 - stored as f64 / self.uncompressed_size as f64)
    }

    pub fn state(&self) -> EntryState {
        match &self.source {
            _ if self.materialized => EntryState::Materialized,
            EntrySource::Archive(data) if !self.restream => match data.header {
                HeaderState::Stub => EntryState::Stub,
                HeaderState::Read { .. } => EntryState::HeaderRead,
            },
            _ => EntryState::Dirty,
        }
    }

    /// Offset of the local header in the backing archive.
    pub fn local_header_offset(&self) -> Option<u64> {
        match &self.source {
            EntrySource::Archive(data) => Some(data.local_header_offset),
            _ => None,
        }
    }

    /// Local header length, once it has been read.
    pub fn header_len(&self) -> Option<u64> {
        match &self.source {
            EntrySource::Archive(ArchiveData {
                header: HeaderState::Read { header_len, .. },
                ..
            }) => Some(*header_len),
            _ => None,
        }
    }

    pub fn data_offset(&self) -> Option<u64> {
        match &self.source {
            EntrySource::Archive(ArchiveData {
                header: HeaderState::Read { data_offset, .. },
                ..
            }) => Some(*data_offset),
            _ => None,
        }
    }

    pub(crate) fn dos_datetime(&self) -> u32 {
        datetime::datetime_to_dos(&self.last_modified)
    }

    /// Whether the compressed bytes can be copied from the backing archive
    /// instead of recompressing.
    pub(crate) fn can_copy_raw(&self) -> bool {
        matches!(self.source, EntrySource::Archive(_)) && !self.restream
    }

    pub(crate) fn archive_data(&self) -> Option<&ArchiveData> {
        match &self.source {
            EntrySource::Archive(data) => Some(data),
            _ => None,
        }
    }

    /// Timestamp records of the stored local header.
    pub(crate) fn stored_local_times(&self, source: &dyn ReadAt) -> ZipResult<Vec<ExtraRecord>> {
        let Some(data) = self.archive_data() else {
            return Ok(Vec::new());
        };
        let mut fixed = [0u8; LocalFileHeader::SIZE];
        source
            .read_exact_at(data.local_header_offset, &mut fixed)
            .map_err(|_| ZipError::truncated("local file header"))?;
        let (name_len, extra_len) = LocalFileHeader::variable_lengths(&fixed)?;
        let mut field = vec![0u8; extra_len as usize];
        let offset = data.local_header_offset + LocalFileHeader::SIZE as u64 + name_len as u64;
        source
            .read_exact_at(offset, &mut field)
            .map_err(|_| ZipError::truncated("local extra field"))?;
        Ok(extra::time_records(&extra::parse_extra(&field)?))
    }

    /// Read the local header if that has not happened yet and return the
    /// offset of the entry's data.
    ///
    /// The local extra field may differ in length from the central one, so
    /// the data offset is only known after this.
    pub(crate) fn ensure_header_read(&mut self, source: &dyn ReadAt) -> ZipResult<u64> {
        let EntrySource::Archive(data) = &mut self.source else {
            return Err(ZipError::BadState(format!(
                "entry {} has not been saved to an archive",
                self.name
            )));
        };
        if let HeaderState::Read { data_offset, .. } = data.header {
            return Ok(data_offset);
        }

        let mut fixed = [0u8; LocalFileHeader::SIZE];
        source
            .read_exact_at(data.local_header_offset, &mut fixed)
            .map_err(|_| ZipError::truncated("local file header"))?;
        if fixed[..4] != LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes() {
            return Err(ZipError::BadRead(format!(
                "no local header for {} at offset {}",
                self.name, data.local_header_offset
            )));
        }
        let (name_len, extra_len) = LocalFileHeader::variable_lengths(&fixed)?;
        let header_len = (LocalFileHeader::SIZE + name_len as usize + extra_len as usize) as u64;
        let data_offset = data.local_header_offset + header_len;
        if data_offset.saturating_add(data.compressed_size) > source.size() {
            return Err(ZipError::truncated(&format!("data of {}", self.name)));
        }
        data.header = HeaderState::Read {
            header_len,
            data_offset,
        };
        tracing::trace!(entry = %self.name, header_len, data_offset, "read local header");
        Ok(data_offset)
    }

    /// Raw stored bytes (compressed and possibly encrypted) of an archive entry.
    pub(crate) fn raw_reader<'a>(&mut self, source: &'a dyn ReadAt) -> ZipResult<RangeReader<'a>> {
        let data_offset = self.ensure_header_read(source)?;
        let size = self.archive_data().map_or(0, |d| d.compressed_size);
        Ok(RangeReader::new(source, data_offset, size))
    }

    /// Decrypting, decompressing, verifying reader over archive content.
    pub(crate) fn open_archive_reader<'a>(
        &mut self,
        source: &'a dyn ReadAt,
        password: Option<&str>,
    ) -> ZipResult<EntryReader<RangeReader<'a>>> {
        let raw = self.raw_reader(source)?;
        let Some(data) = self.archive_data() else {
            return Err(ZipError::BadState(format!("entry {} has no archive data", self.name)));
        };
        let data = data.clone();
        let decryptor = open_decryptor(
            raw,
            &self.name,
            &data,
            Some(data.compressed_size),
            password.or(self.password.as_deref()),
            self.password_check,
        )?;
        EntryReader::new(
            decryptor,
            data.method,
            &self.name,
            self.uncompressed_size,
            (data.aes_version != 2).then_some(data.crc32),
        )
    }
}

/// Wrap `raw` in the decryption stage `data` calls for.
///
/// `data_len` is the stored size when known; streaming readers pass `None`.
pub(crate) fn open_decryptor<R: Read>(
    raw: R,
    name: &str,
    data: &ArchiveData,
    data_len: Option<u64>,
    password: Option<&str>,
    check: PasswordCheck,
) -> ZipResult<Decryptor<R>> {
    if !data.encryption.is_encrypted() {
        return Ok(Decryptor::Plain(raw));
    }
    let Some(password) = password else {
        return Err(ZipError::BadPassword(format!("{name} (no password given)")));
    };
    match data.encryption.aes_strength() {
        Some(strength) => Ok(Decryptor::Aes(AesReader::new(
            raw,
            password.as_bytes(),
            strength,
            data_len,
            name,
        )?)),
        None => {
            let expected = check.check_byte(data.flags, data.crc32, data.dos_datetime);
            Ok(Decryptor::ZipCrypto(ZipCryptoReader::new(
                raw,
                password.as_bytes(),
                expected,
                name,
            )?))
        }
    }
}

#[cfg(unix)]
fn attributes_from_metadata(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    let mut attributes = (meta.permissions().mode() & 0xFFFF) << 16;
    if meta.is_dir() {
        attributes |= ATTRIBUTE_DIRECTORY;
    }
    if meta.permissions().readonly() {
        attributes |= ATTRIBUTE_READONLY;
    }
    attributes
}

#[cfg(not(unix))]
fn attributes_from_metadata(meta: &fs::Metadata) -> u32 {
    let mut attributes = if meta.is_dir() { ATTRIBUTE_DIRECTORY } else { ATTRIBUTE_ARCHIVE };
    if meta.permissions().readonly() {
        attributes |= ATTRIBUTE_READONLY;
    }
    attributes
}

/// Content stream of an entry.
///
/// Tracks size and CRC-32 while reading and checks both when the data ends.
/// For AES entries the authentication code is checked at the same point.
pub struct EntryReader<R: Read> {
    inner: Decompressor<Decryptor<R>>,
    hasher: crc32fast::Hasher,
    name: String,
    expected_size: u64,
    expected_crc: Option<u32>,
    read: u64,
    finished: bool,
}

impl<R: Read> EntryReader<R> {
    pub(crate) fn new(
        decryptor: Decryptor<R>,
        method: CompressionMethod,
        name: &str,
        expected_size: u64,
        expected_crc: Option<u32>,
    ) -> ZipResult<Self> {
        Ok(Self {
            inner: Decompressor::new(decryptor, method)?,
            hasher: crc32fast::Hasher::new(),
            name: name.to_owned(),
            expected_size,
            expected_crc,
            read: 0,
            finished: false,
        })
    }

    pub fn entry_name(&self) -> &str {
        &self.name
    }

    /// Bytes returned so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    fn finish(&mut self) -> ZipResult<()> {
        // The decompressor may stop before the decryptor has seen its trailer.
        io::copy(self.inner.get_mut(), &mut io::sink())?;
        if self.read != self.expected_size {
            return Err(ZipError::BadRead(format!(
                "{}: expected {} bytes, got {}",
                self.name, self.expected_size, self.read
            )));
        }
        let actual = self.hasher.clone().finalize();
        if let Some(expected) = self.expected_crc {
            if actual != expected {
                return Err(ZipError::CrcMismatch {
                    entry: self.name.clone(),
                    expected,
                    actual,
                });
            }
        }
        self.finished = true;
        Ok(())
    }

    /// Close the stream, failing if it was not read to the end or the
    /// content does not verify.
    pub fn close(mut self) -> ZipResult<()> {
        if self.finished {
            return Ok(());
        }
        let mut probe = [0u8; 1];
        match self.read(&mut probe) {
            Ok(0) if self.finished => Ok(()),
            Ok(_) => Err(ZipError::BadRead(format!(
                "{} closed before all content was read",
                self.name
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Read> Read for EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.finish()?;
            return Ok(0);
        }
        self.read += n as u64;
        if self.read > self.expected_size {
            return Err(ZipError::BadRead(format!(
                "{} holds more data than its declared {} bytes",
                self.name, self.expected_size
            ))
            .into());
        }
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

//! Entry and central directory writer.
//!
//! Every entry goes through the same three steps: [`start_entry`] writes the
//! local header, a [`ContentWriter`] compresses and encrypts the content into
//! the sink, and [`finish_entry`] either patches the local header in place
//! (seekable sinks) or appends a data descriptor (bit 3). Offsets for the
//! central directory come from the sink's running position, so forward-only
//! sinks never need to seek.
//!
//! Zip64 decisions follow [`Zip64Option`]. A local header cannot grow after
//! it has been written, so Zip64 fields in local headers are decided up front
//! from the size hint; central directory records are decided from the final
//! sizes.

use chrono::NaiveDateTime;
use std::fs::{self, File};
use std::io::{self, Read, Write};

use crate::error::{ZipError, ZipResult};
use crate::io::{ArchiveSink, ReadAt};
use crate::zip::compression::{AES_METHOD, CompressionLevel, CompressionMethod, Compressor};
use crate::zip::crypto::{
    AesStrength, AesWriter, EncryptionMethod, Encryptor, PasswordCheck, ZipCryptoWriter,
};
use crate::zip::datetime;
use crate::zip::encoding;
use crate::zip::entry::{ArchiveData, EntrySource, HeaderState, ZipEntry};
use crate::zip::extra::{
    self, AesExtraField, ExtendedTimestamp, ExtraRecord, NtfsTimes, Zip64ExtendedInfo,
};
use crate::zip::options::Zip64Option;
use crate::zip::progress::copy_chunked;
use crate::zip::structures::*;

/// Worst case size of `n` bytes after deflate, stored blocks included.
fn deflate_bound(n: u64) -> u64 {
    n.saturating_add(n / 16383 * 5).saturating_add(64)
}

/// Fails with [`ZipError::Zip64Required`] when `policy` forbids Zip64 and the
/// entry count cannot be stored in the end record.
pub(crate) fn check_entry_count(count: usize, policy: Zip64Option) -> ZipResult<()> {
    if policy == Zip64Option::Never && count >= ZIP64_COUNT_SENTINEL as usize {
        return Err(ZipError::Zip64Required(format!("{count} entries")));
    }
    Ok(())
}

/// Everything about an entry's headers that is known before its data is written.
#[derive(Debug, Clone)]
pub(crate) struct WritePlan {
    pub name: String,
    name_bytes: Vec<u8>,
    comment_bytes: Vec<u8>,
    utf8: bool,
    pub method: CompressionMethod,
    level: CompressionLevel,
    pub encryption: EncryptionMethod,
    password: Option<String>,
    password_check: PasswordCheck,
    pub dos_datetime: u32,
    last_modified: NaiveDateTime,
    /// Timestamp records as the central header carries them.
    time_extra: Vec<ExtraRecord>,
    version_made_by: u16,
    internal_attributes: u16,
    external_attributes: u32,
    aes_version: u16,
    local_extra: Vec<ExtraRecord>,
    central_extra: Vec<ExtraRecord>,
    /// CRC of the content when computed ahead of writing.
    pub known_crc: Option<u32>,
}

impl WritePlan {
    /// Plan for `entry`. `raw` describes the stored data when the compressed
    /// bytes are copied unchanged from an existing archive.
    pub fn new(entry: &ZipEntry, raw: Option<&ArchiveData>, empty: bool) -> ZipResult<Self> {
        let (method, level, encryption, aes_version) = match raw {
            Some(data) => (
                data.method,
                entry.compression_level,
                data.encryption,
                data.aes_version.max(1),
            ),
            None if entry.is_directory() => (
                CompressionMethod::Stored,
                CompressionLevel::None,
                EncryptionMethod::None,
                1,
            ),
            None if empty => (CompressionMethod::Stored, CompressionLevel::None, entry.encryption, 1),
            None => (entry.compression_method, entry.compression_level, entry.encryption, 1),
        };
        if raw.is_none() {
            method.ensure_supported()?;
        }
        if raw.is_none() && encryption.is_encrypted() && entry.password.is_none() {
            return Err(ZipError::Argument(format!(
                "entry {} is to be encrypted but has no password",
                entry.name
            )));
        }

        let (mut name_bytes, name_utf8) =
            encoding::encode(&entry.name, entry.text_encoding, entry.use_unicode);
        let (mut comment_bytes, comment_utf8) =
            encoding::encode(&entry.comment, entry.text_encoding, entry.use_unicode);
        let utf8 = name_utf8 || comment_utf8;
        if utf8 {
            // The flag covers name and comment alike.
            name_bytes = entry.name.as_bytes().to_vec();
            comment_bytes = entry.comment.as_bytes().to_vec();
        }

        // Copied entries keep their stored times unless the time was changed.
        // Data descriptors and the time-based password check tie the check
        // byte to the stored DOS time, so copied PKZIP entries always keep it.
        let stored_times = raw.filter(|data| data.last_modified == entry.last_modified);
        let dos_datetime = match raw {
            Some(data)
                if stored_times.is_some()
                    || (data.encryption == EncryptionMethod::PkzipWeak
                        && data.flags & FLAG_DATA_DESCRIPTOR != 0) =>
            {
                data.dos_datetime
            }
            _ => entry.dos_datetime(),
        };

        let mut local_extra = Vec::new();
        let mut central_extra = Vec::new();
        if let Some(strength) = encryption.aes_strength() {
            let record = AesExtraField {
                version: aes_version,
                strength: strength.as_byte(),
                method: method.as_u16(),
            }
            .to_record();
            local_extra.push(record.clone());
            central_extra.push(record);
        }
        let time_extra = match stored_times {
            // The local forms replace these when the copy is written.
            Some(data) => {
                local_extra.extend(data.time_extra.iter().cloned());
                data.time_extra.clone()
            }
            None => {
                let mut records = Vec::new();
                if entry.emit_ntfs_times {
                    let modified = datetime::datetime_to_filetime(&entry.last_modified);
                    let record = NtfsTimes {
                        modified,
                        accessed: entry.accessed.as_ref().map_or(modified, datetime::datetime_to_filetime),
                        created: entry.created.as_ref().map_or(modified, datetime::datetime_to_filetime),
                    }
                    .to_record();
                    local_extra.push(record.clone());
                    records.push(record);
                }
                if entry.emit_unix_times {
                    let stamp = ExtendedTimestamp {
                        modified: Some(datetime::datetime_to_unix_i32(&entry.last_modified)),
                        accessed: entry.accessed.as_ref().map(datetime::datetime_to_unix_i32),
                        created: entry.created.as_ref().map(datetime::datetime_to_unix_i32),
                    };
                    local_extra.push(stamp.to_record(true));
                    records.push(stamp.to_record(false));
                }
                records
            }
        };
        central_extra.extend(time_extra.iter().cloned());
        local_extra.extend(entry.extra.iter().cloned());
        central_extra.extend(entry.extra.iter().cloned());

        Ok(Self {
            name: entry.name.clone(),
            name_bytes,
            comment_bytes,
            utf8,
            method,
            level,
            encryption,
            password: entry.password.clone(),
            password_check: entry.password_check,
            dos_datetime,
            last_modified: entry.last_modified,
            time_extra,
            version_made_by: entry.version_made_by,
            internal_attributes: entry.internal_attributes,
            external_attributes: entry.external_attributes,
            aes_version,
            local_extra,
            central_extra,
            known_crc: None,
        })
    }

    /// Number of leading AES records in the extra fields.
    fn aes_records(&self) -> usize {
        usize::from(self.encryption.aes_strength().is_some())
    }

    fn base_flags(&self) -> u16 {
        let mut flags = 0;
        if self.encryption.is_encrypted() {
            flags |= FLAG_ENCRYPTED;
        }
        if self.utf8 {
            flags |= FLAG_UTF8;
        }
        flags
    }

    /// Traditional encryption with a CRC check byte needs the CRC before the
    /// first byte of data is written.
    pub fn needs_precomputed_crc(&self) -> bool {
        self.encryption == EncryptionMethod::PkzipWeak && self.password_check == PasswordCheck::Crc
    }

    /// Traditional encryption under the automatic check uses the DOS time,
    /// which comes with a data descriptor.
    fn wants_descriptor(&self) -> bool {
        self.encryption == EncryptionMethod::PkzipWeak && self.password_check == PasswordCheck::Auto
    }

    fn method_field(&self) -> u16 {
        if self.encryption.aes_strength().is_some() {
            AES_METHOD
        } else {
            self.method.as_u16()
        }
    }

    fn version_needed(&self, zip64: bool) -> u16 {
        if self.encryption.aes_strength().is_some() {
            VERSION_AES
        } else if zip64 {
            VERSION_ZIP64
        } else {
            VERSION_DEFAULT
        }
    }

    fn check_byte(&self, flags: u16) -> u8 {
        self.password_check
            .check_byte(flags, self.known_crc.unwrap_or(0), self.dos_datetime)
    }

    fn local_header(
        &self,
        flags: u16,
        crc32: u32,
        compressed: u64,
        uncompressed: u64,
        zip64: bool,
    ) -> ZipResult<LocalFileHeader> {
        let (time, date) = datetime::split_dos(self.dos_datetime);
        let mut records = Vec::with_capacity(self.local_extra.len() + 1);
        let (compressed_field, uncompressed_field) = if zip64 {
            records.push(
                Zip64ExtendedInfo {
                    uncompressed_size: Some(uncompressed),
                    compressed_size: Some(compressed),
                    ..Default::default()
                }
                .to_record(),
            );
            (ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            let narrow = |v: u64, what: &str| {
                u32::try_from(v).map_err(|_| ZipError::Zip64Required(format!("{} {what}", self.name)))
            };
            (narrow(compressed, "compressed size")?, narrow(uncompressed, "size")?)
        };
        records.extend(self.local_extra.iter().cloned());
        Ok(LocalFileHeader {
            version_needed: self.version_needed(zip64),
            flags,
            compression_method: self.method_field(),
            last_mod_time: time,
            last_mod_date: date,
            crc32,
            compressed_size: compressed_field,
            uncompressed_size: uncompressed_field,
            file_name: self.name_bytes.clone(),
            extra_field: extra::emit_extra(&records)?,
        })
    }
}

/// Local header written, data not yet finished.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingEntry {
    pub local_header_offset: u64,
    pub data_offset: u64,
    pub header_len: u64,
    pub flags: u16,
    pub local_zip64: bool,
}

/// A finished entry, as the central directory will describe it.
#[derive(Debug, Clone)]
pub(crate) struct CentralRecord {
    pub plan: WritePlan,
    pub flags: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
    pub header_len: u64,
    pub data_offset: u64,
}

impl CentralRecord {
    /// Location of the written data, for rebinding the entry to the new archive.
    pub fn archive_data(&self) -> ArchiveData {
        ArchiveData {
            local_header_offset: self.local_header_offset,
            compressed_size: self.compressed_size,
            method: self.plan.method,
            encryption: self.plan.encryption,
            flags: self.flags,
            crc32: self.crc32,
            dos_datetime: self.plan.dos_datetime,
            last_modified: self.plan.last_modified,
            time_extra: self.plan.time_extra.clone(),
            aes_version: if self.plan.encryption.aes_strength().is_some() {
                self.plan.aes_version
            } else {
                0
            },
            header: HeaderState::Read {
                header_len: self.header_len,
                data_offset: self.data_offset,
            },
        }
    }

    fn central_header(&self, policy: Zip64Option) -> ZipResult<CentralDirectoryHeader> {
        let plan = &self.plan;
        let overflow = exceeds_u32(self.uncompressed_size)
            || exceeds_u32(self.compressed_size)
            || exceeds_u32(self.local_header_offset);
        if overflow && policy == Zip64Option::Never {
            return Err(ZipError::Zip64Required(plan.name.clone()));
        }
        let always = policy == Zip64Option::Always;
        let pick = |v: u64| (always || exceeds_u32(v)).then_some(v);
        let info = Zip64ExtendedInfo {
            uncompressed_size: pick(self.uncompressed_size),
            compressed_size: pick(self.compressed_size),
            local_header_offset: pick(self.local_header_offset),
            disk_start: None,
        };
        let field = |v: Option<u64>, actual: u64| match v {
            Some(_) => ZIP64_SENTINEL,
            None => actual as u32,
        };

        let mut records = Vec::with_capacity(plan.central_extra.len() + 1);
        if !info.is_empty() {
            records.push(info.to_record());
        }
        records.extend(plan.central_extra.iter().cloned());

        let (time, date) = datetime::split_dos(plan.dos_datetime);
        Ok(CentralDirectoryHeader {
            version_made_by: plan.version_made_by,
            version_needed: plan.version_needed(!info.is_empty()),
            flags: self.flags,
            compression_method: plan.method_field(),
            last_mod_time: time,
            last_mod_date: date,
            crc32: self.crc32,
            compressed_size: field(info.compressed_size, self.compressed_size),
            uncompressed_size: field(info.uncompressed_size, self.uncompressed_size),
            disk_number_start: 0,
            internal_attributes: plan.internal_attributes,
            external_attributes: plan.external_attributes,
            local_header_offset: field(info.local_header_offset, self.local_header_offset),
            file_name: plan.name_bytes.clone(),
            extra_field: extra::emit_extra(&records)?,
            file_comment: plan.comment_bytes.clone(),
        })
    }
}

/// Write the local header of a new entry.
///
/// Forward-only sinks always get a data descriptor. `size_hint` decides
/// whether the local header carries Zip64 sizes under
/// [`Zip64Option::AsNecessary`]; without a hint it does not, and content
/// that then overflows 4 GiB fails in [`finish_entry`].
pub(crate) fn start_entry<S: ArchiveSink>(
    sink: &mut S,
    plan: &WritePlan,
    size_hint: Option<u64>,
    policy: Zip64Option,
) -> ZipResult<PendingEntry> {
    let mut flags = plan.base_flags();
    if !sink.is_seekable() || plan.wants_descriptor() {
        flags |= FLAG_DATA_DESCRIPTOR;
    }
    if plan.needs_precomputed_crc() && plan.known_crc.is_none() {
        return Err(ZipError::Argument(format!(
            "{}: a CRC based password check needs the content in advance",
            plan.name
        )));
    }

    let bound = size_hint.map(|n| {
        let n = if plan.method == CompressionMethod::Deflate { deflate_bound(n) } else { n };
        n.saturating_add(plan.encryption.overhead())
    });
    let local_zip64 = match policy {
        Zip64Option::Never => {
            if let Some(n) = size_hint.filter(|&n| exceeds_u32(n)) {
                return Err(ZipError::Zip64Required(format!("{} ({n} bytes)", plan.name)));
            }
            false
        }
        Zip64Option::Always => true,
        Zip64Option::AsNecessary => bound.is_some_and(exceeds_u32),
    };

    let local_header_offset = sink.position();
    let header = plan.local_header(flags, 0, 0, 0, local_zip64)?;
    header.write(sink)?;
    let header_len = header.len();
    tracing::trace!(entry = %plan.name, offset = local_header_offset, local_zip64, "wrote local header");
    Ok(PendingEntry {
        local_header_offset,
        data_offset: local_header_offset + header_len,
        header_len,
        flags,
        local_zip64,
    })
}

/// Compress-then-encrypt writer for one entry's content.
pub(crate) struct ContentWriter<W: Write> {
    compressor: Compressor<Encryptor<W>>,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> ContentWriter<W> {
    pub fn new(inner: W, plan: &WritePlan, flags: u16) -> ZipResult<Self> {
        let password = plan.password.as_deref().unwrap_or_default().as_bytes();
        let encryptor = match plan.encryption {
            EncryptionMethod::None => Encryptor::Plain(inner),
            EncryptionMethod::PkzipWeak => {
                Encryptor::ZipCrypto(ZipCryptoWriter::new(inner, password, plan.check_byte(flags))?)
            }
            other => {
                let strength = other.aes_strength().unwrap_or(AesStrength::Aes256);
                Encryptor::Aes(AesWriter::new(inner, password, strength)?)
            }
        };
        Ok(Self {
            compressor: Compressor::new(encryptor, plan.method, plan.level)?,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        })
    }

    /// Flush compressor and cipher; returns the inner writer, CRC and
    /// uncompressed size.
    pub fn finish(self) -> ZipResult<(W, u32, u64)> {
        let encryptor = self.compressor.finish()?;
        let inner = encryptor.finish()?;
        Ok((inner, self.hasher.finalize(), self.written))
    }
}

impl<W: Write> Write for ContentWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.compressor.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.compressor.flush()
    }
}

/// Complete an entry whose data ends at the sink's current position.
pub(crate) fn finish_entry<S: ArchiveSink>(
    sink: &mut S,
    plan: WritePlan,
    pending: PendingEntry,
    crc32: u32,
    uncompressed_size: u64,
) -> ZipResult<CentralRecord> {
    let compressed_size = sink.position() - pending.data_offset;
    if !pending.local_zip64 && (exceeds_u32(compressed_size) || exceeds_u32(uncompressed_size)) {
        return Err(ZipError::Zip64Required(format!(
            "{} grew past 4 GiB without Zip64 fields in its local header",
            plan.name
        )));
    }
    // AE-2 entries would store 0 here; this writer produces AE-1.
    let stored_crc = crc32;

    if pending.flags & FLAG_DATA_DESCRIPTOR != 0 {
        DataDescriptor {
            crc32: stored_crc,
            compressed_size,
            uncompressed_size,
        }
        .write(sink, pending.local_zip64)?;
    } else {
        let header = plan.local_header(
            pending.flags,
            stored_crc,
            compressed_size,
            uncompressed_size,
            pending.local_zip64,
        )?;
        let mut bytes = Vec::with_capacity(pending.header_len as usize);
        header.write(&mut bytes)?;
        if bytes.len() as u64 != pending.header_len {
            return Err(ZipError::BadState(format!(
                "local header of {} changed length while patching",
                plan.name
            )));
        }
        sink.patch(pending.local_header_offset, &bytes)?;
    }

    Ok(CentralRecord {
        plan,
        flags: pending.flags,
        crc32: stored_crc,
        compressed_size,
        uncompressed_size,
        local_header_offset: pending.local_header_offset,
        header_len: pending.header_len,
        data_offset: pending.data_offset,
    })
}

fn content_size_hint(entry: &ZipEntry) -> ZipResult<Option<u64>> {
    Ok(match &entry.source {
        EntrySource::Bytes(bytes) => Some(bytes.len() as u64),
        EntrySource::File(path) => Some(fs::metadata(path)?.len()),
        EntrySource::Archive(_) => Some(entry.uncompressed_size),
        EntrySource::Delegate(_) => None,
    })
}

/// Open the uncompressed content of an entry.
fn open_content<'a>(
    entry: &'a mut ZipEntry,
    archive: Option<&'a dyn ReadAt>,
) -> ZipResult<Box<dyn Read + 'a>> {
    if matches!(entry.source, EntrySource::Archive(_)) {
        let archive = archive.ok_or_else(|| {
            ZipError::BadState(format!("the archive holding {} is not open", entry.name))
        })?;
        return Ok(Box::new(entry.open_archive_reader(archive, None)?));
    }
    match &mut entry.source {
        EntrySource::Bytes(bytes) => Ok(Box::new(&bytes[..])),
        EntrySource::File(path) => Ok(Box::new(File::open(path)?)),
        EntrySource::Delegate(open) => Ok(open(&entry.name)?),
        EntrySource::Archive(_) => Err(ZipError::BadState("unreachable archive source".into())),
    }
}

fn content_crc(entry: &mut ZipEntry, archive: Option<&dyn ReadAt>) -> ZipResult<u32> {
    let mut reader = open_content(entry, archive)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Write one entry of an archive being saved, either by copying its stored
/// bytes from `archive` or by streaming its content through the
/// compression and encryption stages.
///
/// `on_bytes` receives the running byte count and the expected total.
pub(crate) fn write_entry<S: ArchiveSink>(
    sink: &mut S,
    entry: &mut ZipEntry,
    archive: Option<&dyn ReadAt>,
    policy: Zip64Option,
    on_bytes: &mut dyn FnMut(u64, u64) -> ZipResult<()>,
) -> ZipResult<CentralRecord> {
    if entry.can_copy_raw() {
        return copy_entry(sink, entry, archive, policy, on_bytes);
    }

    let size_hint = content_size_hint(entry)?;
    let mut plan = WritePlan::new(entry, None, size_hint == Some(0))?;
    if plan.needs_precomputed_crc() {
        plan.known_crc = Some(content_crc(entry, archive)?);
    }
    tracing::debug!(entry = %plan.name, method = ?plan.method, encryption = ?plan.encryption, "compressing entry");

    let pending = start_entry(sink, &plan, size_hint, policy)?;
    let total = size_hint.unwrap_or(0);
    let (crc32, uncompressed) = {
        let mut reader = open_content(entry, archive)?;
        let mut writer = ContentWriter::new(&mut *sink, &plan, pending.flags)?;
        copy_chunked(&mut reader, &mut writer, |n| on_bytes(n, total))?;
        let (_, crc32, uncompressed) = writer.finish()?;
        (crc32, uncompressed)
    };
    finish_entry(sink, plan, pending, crc32, uncompressed)
}

/// Copy an unchanged entry's stored bytes into the new archive.
fn copy_entry<S: ArchiveSink>(
    sink: &mut S,
    entry: &mut ZipEntry,
    archive: Option<&dyn ReadAt>,
    policy: Zip64Option,
    on_bytes: &mut dyn FnMut(u64, u64) -> ZipResult<()>,
) -> ZipResult<CentralRecord> {
    let archive = archive.ok_or_else(|| {
        ZipError::BadState(format!("the archive holding {} is not open", entry.name))
    })?;
    let mut raw = entry.raw_reader(archive)?;
    let data = entry
        .archive_data()
        .cloned()
        .ok_or_else(|| ZipError::BadState(format!("{} has no stored data", entry.name)))?;
    let mut plan = WritePlan::new(entry, Some(&data), false)?;
    if data.last_modified == entry.last_modified {
        let at = plan.aes_records();
        let rest = plan.local_extra.split_off(at + plan.time_extra.len());
        plan.local_extra.truncate(at);
        plan.local_extra.extend(entry.stored_local_times(archive)?);
        plan.local_extra.extend(rest);
    }
    tracing::debug!(entry = %plan.name, bytes = data.compressed_size, "copying stored entry unchanged");

    let mut flags = plan.base_flags() | (data.flags & FLAG_COMPRESSION_OPTIONS);
    if data.encryption == EncryptionMethod::PkzipWeak {
        flags |= data.flags & FLAG_DATA_DESCRIPTOR;
    }
    let compressed = data.compressed_size;
    let uncompressed = entry.uncompressed_size;
    let local_zip64 = match policy {
        Zip64Option::Always => true,
        _ => exceeds_u32(compressed) || exceeds_u32(uncompressed),
    };
    if local_zip64 && policy == Zip64Option::Never {
        return Err(ZipError::Zip64Required(plan.name.clone()));
    }

    let local_header_offset = sink.position();
    let header = plan.local_header(flags, data.crc32, compressed, uncompressed, local_zip64)?;
    header.write(sink)?;
    let data_offset = sink.position();
    let copied = copy_chunked(&mut raw, sink, |n| on_bytes(n, compressed))?;
    if copied != compressed {
        return Err(ZipError::truncated(&format!("stored data of {}", plan.name)));
    }
    if flags & FLAG_DATA_DESCRIPTOR != 0 {
        DataDescriptor {
            crc32: data.crc32,
            compressed_size: compressed,
            uncompressed_size: uncompressed,
        }
        .write(sink, local_zip64)?;
    }

    Ok(CentralRecord {
        plan,
        flags,
        crc32: data.crc32,
        compressed_size: compressed,
        uncompressed_size: uncompressed,
        local_header_offset,
        header_len: header.len(),
        data_offset,
    })
}

/// Write the central directory and end records after the last entry.
pub(crate) fn write_central_directory<S: ArchiveSink>(
    sink: &mut S,
    records: &[CentralRecord],
    comment: &[u8],
    policy: Zip64Option,
) -> ZipResult<()> {
    check_entry_count(records.len(), policy)?;
    if comment.len() as u64 > MAX_COMMENT_SIZE {
        return Err(ZipError::Argument(format!(
            "archive comment of {} bytes exceeds 65535",
            comment.len()
        )));
    }

    let cd_offset = sink.position();
    for record in records {
        record.central_header(policy)?.write(sink)?;
    }
    let cd_size = sink.position() - cd_offset;
    let count = records.len() as u64;

    let zip64 = policy == Zip64Option::Always
        || count >= ZIP64_COUNT_SENTINEL as u64
        || exceeds_u32(cd_size)
        || exceeds_u32(cd_offset);
    if zip64 && policy == Zip64Option::Never {
        return Err(ZipError::Zip64Required("central directory".into()));
    }

    if zip64 {
        let eocd64_offset = sink.position();
        Zip64EOCD {
            eocd64_size: (Zip64EOCD::MIN_SIZE - 12) as u64,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: count,
            total_entries: count,
            cd_size,
            cd_offset,
        }
        .write(sink)?;
        Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset,
            total_disks: 1,
        }
        .write(sink)?;
        tracing::debug!(entries = count, cd_offset, "wrote Zip64 end of central directory");
    }

    let count16 = count.min(ZIP64_COUNT_SENTINEL as u64) as u16;
    let narrow = |v: u64| if exceeds_u32(v) { ZIP64_SENTINEL } else { v as u32 };
    EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: count16,
        total_entries: count16,
        cd_size: narrow(cd_size),
        cd_offset: narrow(cd_offset),
        comment_len: comment.len() as u16,
        comment: comment.to_vec(),
    }
    .write(sink)?;
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryReader, SeekableSink, StreamSink};
    use crate::zip::options::ZipSettings;
    use crate::zip::parser::ZipParser;
    use crate::zip::progress::Progress;
    use std::io::Cursor;

    fn entry(name: &str, data: &[u8]) -> ZipEntry {
        ZipEntry::from_bytes(name, data.to_vec(), &ZipSettings::default()).unwrap()
    }

    fn write_all<S: ArchiveSink>(sink: &mut S, entries: &mut [ZipEntry], policy: Zip64Option) {
        let mut records = Vec::new();
        for e in entries.iter_mut() {
            records.push(write_entry(sink, e, None, policy, &mut |_, _| Ok(())).unwrap());
        }
        write_central_directory(sink, &records, b"", policy).unwrap();
    }

    fn read_back(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let source = MemoryReader::new(bytes);
        let dir = ZipParser::new(&source)
            .read_directory(&ZipSettings::default(), &mut Progress::default(), None)
            .unwrap();
        dir.entries
            .into_iter()
            .map(|mut e| {
                let mut out = Vec::new();
                e.open_archive_reader(&source, None)
                    .unwrap()
                    .read_to_end(&mut out)
                    .unwrap();
                (e.name.clone(), out)
            })
            .collect()
    }

    #[test]
    fn seekable_output_patches_headers() {
        let mut sink = SeekableSink::new(Cursor::new(Vec::new())).unwrap();
        let mut entries = vec![entry("a.txt", b"alpha alpha alpha"), entry("empty", b"")];
        write_all(&mut sink, &mut entries, Zip64Option::AsNecessary);
        let bytes = sink.into_inner().into_inner();

        let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(header.flags & FLAG_DATA_DESCRIPTOR, 0);
        assert_eq!(header.crc32, crc32fast::hash(b"alpha alpha alpha"));
        assert_eq!(header.uncompressed_size, 17);

        let back = read_back(bytes);
        assert_eq!(back[0], ("a.txt".to_string(), b"alpha alpha alpha".to_vec()));
        assert_eq!(back[1].1, b"");
    }

    #[test]
    fn stream_output_uses_descriptors() {
        let mut sink = StreamSink::new(Vec::new());
        let mut entries = vec![entry("a.txt", &b"streamed ".repeat(100))];
        write_all(&mut sink, &mut entries, Zip64Option::AsNecessary);
        let bytes = sink.into_inner();

        let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
        assert_ne!(header.flags & FLAG_DATA_DESCRIPTOR, 0);
        assert_eq!(header.crc32, 0);
        assert_eq!(read_back(bytes)[0].1, b"streamed ".repeat(100));
    }

    #[test]
    fn always_policy_writes_zip64_records() {
        let mut sink = SeekableSink::new(Cursor::new(Vec::new())).unwrap();
        let mut entries = vec![entry("z.txt", b"zip64 everywhere")];
        write_all(&mut sink, &mut entries, Zip64Option::Always);
        let bytes = sink.into_inner().into_inner();

        let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(header.uncompressed_size, ZIP64_SENTINEL);
        let source = MemoryReader::new(bytes.clone());
        let parser = ZipParser::new(&source);
        let (_, eocd_offset) = parser.find_eocd().unwrap();
        assert!(parser.read_zip64_eocd(eocd_offset).unwrap().is_some());
        assert_eq!(read_back(bytes)[0].1, b"zip64 everywhere");
    }

    #[test]
    fn never_policy_rejects_oversized_hint() {
        let e = entry("big", b"");
        let plan = WritePlan::new(&e, None, false).unwrap();
        let mut sink = StreamSink::new(Vec::new());
        let err = start_entry(&mut sink, &plan, Some(0x1_0000_0000), Zip64Option::Never).unwrap_err();
        assert!(matches!(err, ZipError::Zip64Required(_)));

        // Exactly 0xFFFFFFFF bytes already needs Zip64.
        let pending =
            start_entry(&mut sink, &plan, Some(0xFFFF_FFFF), Zip64Option::AsNecessary).unwrap();
        assert!(pending.local_zip64);
    }

    #[test]
    fn entry_count_limit_without_zip64() {
        assert!(check_entry_count(0xFFFE, Zip64Option::Never).is_ok());
        assert!(matches!(
            check_entry_count(0xFFFF, Zip64Option::Never),
            Err(ZipError::Zip64Required(_))
        ));
        assert!(check_entry_count(0xFFFF, Zip64Option::AsNecessary).is_ok());
    }

    #[test]
    fn encryption_without_password_is_rejected() {
        let mut e = entry("s.txt", b"secret");
        e.encryption = EncryptionMethod::WinZipAes256;
        e.password = None;
        assert!(matches!(WritePlan::new(&e, None, false), Err(ZipError::Argument(_))));
    }

    #[test]
    fn pkzip_entries_round_trip_with_each_check() {
        for check in [PasswordCheck::Auto, PasswordCheck::Crc, PasswordCheck::DosTime] {
            let mut e = entry("p.txt", b"weak but classic");
            e.encryption = EncryptionMethod::PkzipWeak;
            e.password = Some("pw".into());
            e.password_check = check;
            let mut sink = SeekableSink::new(Cursor::new(Vec::new())).unwrap();
            let record = write_entry(&mut sink, &mut e, None, Zip64Option::AsNecessary, &mut |_, _| Ok(()))
                .unwrap();
            write_central_directory(&mut sink, &[record], b"", Zip64Option::AsNecessary).unwrap();
            let bytes = sink.into_inner().into_inner();

            let source = MemoryReader::new(bytes);
            let settings = ZipSettings {
                password: Some("pw".into()),
                password_check: check,
                ..Default::default()
            };
            let mut dir = ZipParser::new(&source)
                .read_directory(&settings, &mut Progress::default(), None)
                .unwrap();
            let mut out = Vec::new();
            dir.entries[0]
                .open_archive_reader(&source, None)
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
            assert_eq!(out, b"weak but classic");
        }
    }
}

//! Central directory reader.
//!
//! This module locates the end records of an archive and turns its central
//! directory into [`ZipEntry`] stubs, reading from any source that implements
//! the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If a Zip64 locator sits right before it, read the Zip64 EOCD
//! 3. Read the Central Directory to get metadata for all entries
//! 4. Local headers are only read when an entry's content is needed
//!
//! Archives with data prepended (self-extractors) are detected by comparing
//! where the central directory actually ends with where the EOCD says it
//! starts; every recorded offset is then shifted by the difference.

use std::io::Cursor;

use crate::error::{ZipError, ZipResult};
use crate::io::ReadAt;
use crate::zip::compression::{AES_METHOD, CompressionLevel, CompressionMethod};
use crate::zip::crypto::{AesStrength, EncryptionMethod};
use crate::zip::datetime;
use crate::zip::encoding::{self, TextEncoding};
use crate::zip::entry::{ArchiveData, EntrySource, HeaderState, ZipEntry, ATTRIBUTE_DIRECTORY};
use crate::zip::extra::{
    self, AesExtraField, ExtendedTimestamp, NtfsTimes, UnicodePath, Zip64ExtendedInfo, Zip64Needs,
};
use crate::zip::options::ZipSettings;
use crate::zip::progress::{Progress, ProgressEvent, ProgressKind};
use crate::zip::structures::*;

/// What the end records and central directory of an archive hold.
pub struct ArchiveDirectory {
    pub entries: Vec<ZipEntry>,
    pub comment: String,
    /// Whether the archive carries a Zip64 end record.
    pub zip64: bool,
    /// Bytes found before the first local header (self-extractor stub).
    pub prefix_len: u64,
}

/// Low-level ZIP file parser.
///
/// Reads the end records and the central directory of an archive. Content
/// is never touched here; see [`ZipEntry`] for on-demand reads.
pub struct ZipParser<'a> {
    /// The underlying data source
    reader: &'a dyn ReadAt,
    /// Total size of the archive in bytes
    size: u64,
}

impl<'a> ZipParser<'a> {
    pub fn new(reader: &'a dyn ReadAt) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8], what: &str) -> ZipResult<()> {
        self.reader.read_exact_at(offset, buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ZipError::truncated(what)
            } else {
                ZipError::Io(e)
            }
        })
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record with its comment, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// [`ZipError::BadRead`] if the source is empty or no valid EOCD can be
    /// found, indicating the data is not a ZIP archive.
    pub fn find_eocd(&self) -> ZipResult<(EndOfCentralDirectory, u64)> {
        let record = EndOfCentralDirectory::SIZE as u64;
        if self.size == 0 {
            return Err(ZipError::BadRead("archive is empty".into()));
        }
        if self.size < record {
            return Err(ZipError::BadRead("not a zip archive: too short".into()));
        }

        // First try the common case of an archive without a comment.
        let offset = self.size - record;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.read_exact_at(offset, &mut buf, "end of central directory")?;
        if read_u32_le(&buf)? == END_OF_CENTRAL_DIRECTORY_SIGNATURE && buf[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            tracing::debug!(offset, "found end of central directory");
            return Ok((eocd, offset));
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + record).min(self.size);
        let search_start = self.size - search_size;
        let mut buf = vec![0u8; search_size as usize];
        self.read_exact_at(search_start, &mut buf, "archive tail")?;

        let mut end = buf.len();
        while let Some(i) = rfind_signature(&buf[..end], END_OF_CENTRAL_DIRECTORY_SIGNATURE) {
            end = i + 3;
            if buf.len() - i < EndOfCentralDirectory::SIZE {
                continue;
            }
            // The comment length field should match the remaining bytes.
            let comment_len = read_u16_le(&buf[i + 20..])? as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let mut eocd = EndOfCentralDirectory::from_bytes(&buf[i..])?;
                eocd.comment = buf[i + EndOfCentralDirectory::SIZE..].to_vec();
                let offset = search_start + i as u64;
                tracing::debug!(offset, comment_len, "found end of central directory");
                return Ok((eocd, offset));
            }
        }

        Err(ZipError::BadRead(
            "not a zip archive: end of central directory not found".into(),
        ))
    }

    /// Read the Zip64 End of Central Directory record, if the archive has one.
    ///
    /// The Zip64 locator sits immediately before the regular EOCD. Its offset
    /// to the Zip64 EOCD is not adjusted for prepended data, so when nothing
    /// valid is found there the record right before the locator is tried.
    ///
    /// # Returns
    ///
    /// The Zip64 EOCD and the offset it was actually found at, or `None`
    /// when no locator precedes the EOCD.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> ZipResult<Option<(Zip64EOCD, u64)>> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            return Ok(None);
        };
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_exact_at(locator_offset, &mut locator_buf, "Zip64 locator")?;
        if read_u32_le(&locator_buf)? != ZIP64_LOCATOR_SIGNATURE {
            return Ok(None);
        }
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut candidates = vec![locator.eocd64_offset];
        if let Some(adjacent) = locator_offset.checked_sub(Zip64EOCD::MIN_SIZE as u64) {
            candidates.push(adjacent);
        }
        for offset in candidates {
            if offset.saturating_add(Zip64EOCD::MIN_SIZE as u64) > locator_offset {
                continue;
            }
            let mut buf = vec![0u8; Zip64EOCD::MIN_SIZE];
            self.read_exact_at(offset, &mut buf, "Zip64 end of central directory")?;
            if read_u32_le(&buf)? == ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
                tracing::debug!(offset, "found Zip64 end of central directory");
                return Ok(Some((Zip64EOCD::from_bytes(&buf)?, offset)));
            }
        }
        Err(ZipError::BadRead(
            "Zip64 locator points to no Zip64 end of central directory".into(),
        ))
    }

    /// Read the whole central directory into entry stubs.
    pub(crate) fn read_directory(
        &self,
        settings: &ZipSettings,
        progress: &mut Progress,
        archive_name: Option<&str>,
    ) -> ZipResult<ArchiveDirectory> {
        progress.report(ProgressEvent::new(ProgressKind::ReadingStarted).archive(archive_name))?;

        let (eocd, eocd_offset) = self.find_eocd()?;
        let zip64 = self.read_zip64_eocd(eocd_offset)?;
        if zip64.is_none() && eocd.is_zip64() {
            tracing::warn!("end record holds Zip64 sentinels but no Zip64 locator was found");
        }

        // Get Central Directory info, using ZIP64 if present
        let (cd_offset, cd_size, total_entries, cd_end) = match &zip64 {
            Some((record, offset)) => (record.cd_offset, record.cd_size, record.total_entries, *offset),
            None => (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
            ),
        };

        let declared_end = cd_offset
            .checked_add(cd_size)
            .ok_or_else(|| ZipError::BadRead("central directory offset overflows".into()))?;
        if declared_end > cd_end {
            return Err(ZipError::BadRead(format!(
                "central directory ({cd_size} bytes at {cd_offset}) runs past its end record at {cd_end}"
            )));
        }
        let prefix_len = cd_end - declared_end;
        if prefix_len > 0 {
            tracing::debug!(prefix_len, "archive has data prepended, shifting offsets");
        }

        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; cd_size as usize];
        self.read_exact_at(cd_offset + prefix_len, &mut cd_data, "central directory")?;

        let mut entries = Vec::with_capacity(total_entries.min(u16::MAX as u64) as usize);
        let mut cursor = Cursor::new(&cd_data[..]);
        while (entries.len() as u64) < total_entries {
            progress.report(
                ProgressEvent::new(ProgressKind::ReadingBeforeEntry)
                    .archive(archive_name)
                    .counts(entries.len(), total_entries as usize),
            )?;
            // A foreign signature ends the directory early; that is not an error.
            let Some(header) = CentralDirectoryHeader::read(&mut cursor)? else {
                tracing::warn!(
                    parsed = entries.len(),
                    declared = total_entries,
                    "central directory ended before its declared entry count"
                );
                break;
            };
            let entry = entry_from_central(&header, prefix_len, settings)?;
            progress.report(
                ProgressEvent::new(ProgressKind::ReadingAfterEntry)
                    .archive(archive_name)
                    .entry(&entry.name)
                    .counts(entries.len() + 1, total_entries as usize),
            )?;
            entries.push(entry);
        }

        progress.report(
            ProgressEvent::new(ProgressKind::ReadingCompleted)
                .archive(archive_name)
                .counts(entries.len(), entries.len()),
        )?;
        tracing::debug!(entries = entries.len(), zip64 = zip64.is_some(), "read central directory");

        Ok(ArchiveDirectory {
            entries,
            comment: decode_archive_comment(&eocd.comment, settings.text_encoding),
            zip64: zip64.is_some(),
            prefix_len,
        })
    }
}

/// The archive comment has no UTF-8 flag; valid non-ASCII UTF-8 is taken
/// as UTF-8, anything else goes through the configured code page.
fn decode_archive_comment(bytes: &[u8], fallback: TextEncoding) -> String {
    let utf8 = !bytes.is_ascii() && std::str::from_utf8(bytes).is_ok();
    encoding::decode(bytes, utf8, fallback)
}

/// Build an entry stub from one central directory record.
pub(crate) fn entry_from_central(
    header: &CentralDirectoryHeader,
    prefix_len: u64,
    settings: &ZipSettings,
) -> ZipResult<ZipEntry> {
    let utf8 = header.flags & FLAG_UTF8 != 0;
    let mut records = extra::parse_extra(&header.extra_field)?;

    let mut name = encoding::decode(&header.file_name, utf8, settings.text_encoding);
    if !utf8 {
        if let Some(path) = extra::find_record(&records, extra::TAG_UNICODE_PATH)
            .and_then(|r| UnicodePath::parse(&r.data))
        {
            if let Some(unicode) = path.resolve(&header.file_name) {
                name = unicode.to_owned();
            }
        }
    }
    if name.is_empty() {
        return Err(ZipError::BadRead("central directory entry has an empty name".into()));
    }

    let mut uncompressed_size = header.uncompressed_size as u64;
    let mut compressed_size = header.compressed_size as u64;
    let mut local_header_offset = header.local_header_offset as u64;
    if let Some(record) = extra::find_record(&records, extra::TAG_ZIP64) {
        let needs = Zip64Needs {
            uncompressed: header.uncompressed_size == ZIP64_SENTINEL,
            compressed: header.compressed_size == ZIP64_SENTINEL,
            offset: header.local_header_offset == ZIP64_SENTINEL,
            disk: header.disk_number_start == ZIP64_COUNT_SENTINEL,
        };
        let info = Zip64ExtendedInfo::parse(&record.data, needs)?;
        uncompressed_size = info.uncompressed_size.unwrap_or(uncompressed_size);
        compressed_size = info.compressed_size.unwrap_or(compressed_size);
        local_header_offset = info.local_header_offset.unwrap_or(local_header_offset);
    }

    let encrypted = header.flags & FLAG_ENCRYPTED != 0;
    let mut method = CompressionMethod::from_u16(header.compression_method);
    let mut encryption = if encrypted {
        EncryptionMethod::PkzipWeak
    } else {
        EncryptionMethod::None
    };
    let mut aes_version = 0;
    if header.compression_method == AES_METHOD {
        if let Some(record) = extra::find_record(&records, extra::TAG_AES) {
            let aes = AesExtraField::parse(&record.data)?;
            let strength = AesStrength::from_byte(aes.strength).ok_or_else(|| {
                ZipError::BadRead(format!("{name}: unknown AES strength {}", aes.strength))
            })?;
            method = CompressionMethod::from_u16(aes.method);
            encryption = EncryptionMethod::from_aes_strength(strength);
            aes_version = aes.version;
        }
    }

    let dos_datetime = header.dos_datetime();
    let mut last_modified = datetime::dos_to_datetime(dos_datetime);
    let mut accessed = None;
    let mut created = None;
    if let Some(ntfs) = extra::find_record(&records, extra::TAG_NTFS).and_then(|r| NtfsTimes::parse(&r.data)) {
        last_modified = datetime::filetime_to_datetime(ntfs.modified).unwrap_or(last_modified);
        accessed = datetime::filetime_to_datetime(ntfs.accessed);
        created = datetime::filetime_to_datetime(ntfs.created);
    } else if let Some(ts) = extra::find_record(&records, extra::TAG_EXTENDED_TIMESTAMP)
        .and_then(|r| ExtendedTimestamp::parse(&r.data))
    {
        if let Some(t) = ts.modified.and_then(|t| datetime::unix_to_datetime(t as i64)) {
            last_modified = t;
        }
        accessed = ts.accessed.and_then(|t| datetime::unix_to_datetime(t as i64));
        created = ts.created.and_then(|t| datetime::unix_to_datetime(t as i64));
    }

    // Some tools mark directories by attribute only.
    if !name.ends_with('/')
        && header.external_attributes & ATTRIBUTE_DIRECTORY != 0
        && uncompressed_size == 0
    {
        name.push('/');
    }

    let time_extra = extra::time_records(&records);
    extra::retain_foreign(&mut records);
    let comment = encoding::decode(&header.file_comment, utf8, settings.text_encoding);
    let compression_level = match method {
        CompressionMethod::Stored => CompressionLevel::None,
        _ => settings.compression_level,
    };

    Ok(ZipEntry {
        name,
        comment,
        uncompressed_size,
        compressed_size,
        crc32: header.crc32,
        last_modified,
        accessed,
        created,
        external_attributes: header.external_attributes,
        internal_attributes: header.internal_attributes,
        version_made_by: header.version_made_by,
        compression_method: method,
        compression_level,
        encryption,
        password: settings.password.clone(),
        password_check: settings.password_check,
        text_encoding: settings.text_encoding,
        use_unicode: utf8,
        emit_ntfs_times: settings.emit_ntfs_times,
        emit_unix_times: settings.emit_unix_times,
        extra: records,
        source: EntrySource::Archive(ArchiveData {
            local_header_offset: local_header_offset + prefix_len,
            compressed_size,
            method,
            encryption,
            flags: header.flags,
            crc32: header.crc32,
            dos_datetime,
            last_modified,
            time_extra,
            aes_version,
            header: HeaderState::Stub,
        }),
        restream: false,
        materialized: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::entry::EntryState;
    use crate::zip::extra::ExtraRecord;

    fn central(name: &str) -> CentralDirectoryHeader {
        CentralDirectoryHeader {
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_DEFAULT,
            file_name: name.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    fn archive_with(headers: &[CentralDirectoryHeader], comment: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for h in headers {
            h.write(&mut out).unwrap();
        }
        let eocd = EndOfCentralDirectory {
            disk_entries: headers.len() as u16,
            total_entries: headers.len() as u16,
            cd_size: out.len() as u32,
            cd_offset: 0,
            comment: comment.to_vec(),
            ..Default::default()
        };
        eocd.write(&mut out).unwrap();
        out
    }

    #[test]
    fn empty_source_is_bad_read() {
        let source = MemoryReader::new(Vec::new());
        assert!(matches!(ZipParser::new(&source).find_eocd(), Err(ZipError::BadRead(_))));
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let source = MemoryReader::new(vec![0x42; 500]);
        assert!(matches!(ZipParser::new(&source).find_eocd(), Err(ZipError::BadRead(_))));
    }

    #[test]
    fn finds_eocd_behind_comment() {
        let data = archive_with(&[central("a.txt")], b"a comment with PK\x05\x06 inside");
        let source = MemoryReader::new(data);
        let mut progress = Progress::default();
        let dir = ZipParser::new(&source)
            .read_directory(&ZipSettings::default(), &mut progress, None)
            .unwrap();
        assert_eq!(dir.comment, "a comment with PK\x05\x06 inside");
        assert_eq!(dir.entries.len(), 1);
        assert_eq!(dir.entries[0].state(), EntryState::Stub);
        assert!(!dir.zip64);
    }

    #[test]
    fn prepended_data_shifts_offsets() {
        let mut header = central("b.bin");
        header.local_header_offset = 0;
        let mut data = b"#!/bin/sh stub\n".to_vec();
        let prefix = data.len() as u64;
        // The EOCD records offsets as if the stub were absent.
        data.extend(archive_with(&[header], b""));
        let source = MemoryReader::new(data);
        let dir = ZipParser::new(&source)
            .read_directory(&ZipSettings::default(), &mut Progress::default(), None)
            .unwrap();
        assert_eq!(dir.prefix_len, prefix);
        assert_eq!(dir.entries[0].local_header_offset(), Some(prefix));
    }

    #[test]
    fn zip64_extra_overrides_sentinels() {
        let mut header = central("big.bin");
        header.uncompressed_size = ZIP64_SENTINEL;
        header.compressed_size = 1234;
        header.local_header_offset = ZIP64_SENTINEL;
        let info = Zip64ExtendedInfo {
            uncompressed_size: Some(0x1_0000_0000),
            local_header_offset: Some(0x2_0000_0000),
            ..Default::default()
        };
        header.extra_field = extra::emit_extra(&[info.to_record()]).unwrap();
        let entry = entry_from_central(&header, 0, &ZipSettings::default()).unwrap();
        assert_eq!(entry.uncompressed_size(), 0x1_0000_0000);
        assert_eq!(entry.compressed_size(), 1234);
        assert_eq!(entry.local_header_offset(), Some(0x2_0000_0000));
    }

    #[test]
    fn aes_record_reveals_real_method() {
        let mut header = central("secret.txt");
        header.flags = FLAG_ENCRYPTED;
        header.compression_method = AES_METHOD;
        let aes = AesExtraField {
            version: 2,
            strength: 3,
            method: 8,
        };
        header.extra_field = extra::emit_extra(&[aes.to_record()]).unwrap();
        let entry = entry_from_central(&header, 0, &ZipSettings::default()).unwrap();
        assert_eq!(entry.compression_method(), CompressionMethod::Deflate);
        assert_eq!(entry.encryption(), EncryptionMethod::WinZipAes256);
        assert!(entry.extra.is_empty());
    }

    #[test]
    fn unicode_path_replaces_legacy_name() {
        let mut header = central("caf_.txt");
        let mut payload = vec![1];
        write_u32_le(&mut payload, crc32fast::hash(b"caf_.txt"));
        payload.extend_from_slice("café.txt".as_bytes());
        header.extra_field = extra::emit_extra(&[
            ExtraRecord::new(extra::TAG_UNICODE_PATH, payload),
            ExtraRecord::new(0x4242, vec![9, 9]),
        ])
        .unwrap();
        let entry = entry_from_central(&header, 0, &ZipSettings::default()).unwrap();
        assert_eq!(entry.name(), "café.txt");
        assert_eq!(entry.extra, vec![ExtraRecord::new(0x4242, vec![9, 9])]);
    }

    #[test]
    fn attribute_only_directory_gets_slash() {
        let mut header = central("folder");
        header.external_attributes = ATTRIBUTE_DIRECTORY;
        let entry = entry_from_central(&header, 0, &ZipSettings::default()).unwrap();
        assert_eq!(entry.name(), "folder/");
        assert!(entry.is_directory());
    }

    #[test]
    fn slash_name_with_content_is_not_a_directory() {
        let mut header = central("data/");
        header.external_attributes = ATTRIBUTE_DIRECTORY;
        header.uncompressed_size = 5;
        header.compressed_size = 5;
        let entry = entry_from_central(&header, 0, &ZipSettings::default()).unwrap();
        assert!(!entry.is_directory());
    }

    #[test]
    fn directory_needs_a_directory_attribute() {
        let mut header = central("plain/");
        header.external_attributes = 0o100644 << 16;
        let entry = entry_from_central(&header, 0, &ZipSettings::default()).unwrap();
        assert!(!entry.is_directory());

        // No attributes recorded at all, as some tools write.
        let entry = entry_from_central(&central("bare/"), 0, &ZipSettings::default()).unwrap();
        assert!(entry.is_directory());

        let mut header = central("unix/");
        header.external_attributes = 0o040755 << 16;
        let entry = entry_from_central(&header, 0, &ZipSettings::default()).unwrap();
        assert!(entry.is_directory());
    }
}

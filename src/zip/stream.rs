//! Sequential archive reading and writing.
//!
//! [`ZipOutputStream`] writes an archive to any [`Write`], one entry at a
//! time, with sizes carried in data descriptors. [`ZipInputStream`] reads
//! entries from any [`Read`] by walking local headers, without the central
//! directory.

use std::collections::HashSet;
use std::io::{self, BufRead, Read, Write};
use std::mem;

use flate2::bufread::DeflateDecoder;

use crate::error::{ZipError, ZipResult};
use crate::io::{ArchiveSink, StreamSink};
use crate::zip::compression::{CompressionMethod, Decompressor};
use crate::zip::crypto::Decryptor;
use crate::zip::encoding;
use crate::zip::entry::{normalize_name, open_decryptor, EntrySource, ZipEntry};
use crate::zip::extra::{self, TAG_ZIP64};
use crate::zip::options::{EntryOptions, ZipSettings};
use crate::zip::parser::entry_from_central;
use crate::zip::structures::*;
use crate::zip::writer::{self, CentralRecord, ContentWriter, PendingEntry, WritePlan};

enum OutputState<W: Write> {
    Idle(StreamSink<W>),
    Writing {
        content: ContentWriter<StreamSink<W>>,
        plan: WritePlan,
        pending: PendingEntry,
    },
    Finished,
    /// A failed write left the output unusable.
    Broken,
}

/// Forward-only archive writer.
///
/// ```no_run
/// use std::io::Write;
/// use zipkit::ZipOutputStream;
///
/// let mut zip = ZipOutputStream::new(std::io::stdout());
/// zip.put_next_entry("hello.txt")?;
/// zip.write_all(b"hello")?;
/// zip.finish()?;
/// # Ok::<(), zipkit::ZipError>(())
/// ```
pub struct ZipOutputStream<W: Write> {
    state: OutputState<W>,
    settings: ZipSettings,
    records: Vec<CentralRecord>,
    names: HashSet<String>,
    comment: String,
}

impl<W: Write> ZipOutputStream<W> {
    pub fn new(inner: W) -> Self {
        Self::with_settings(inner, ZipSettings::default())
    }

    pub fn with_settings(inner: W, settings: ZipSettings) -> Self {
        Self {
            state: OutputState::Idle(StreamSink::new(inner)),
            settings,
            records: Vec::new(),
            names: HashSet::new(),
            comment: String::new(),
        }
    }

    pub fn settings_mut(&mut self) -> &mut ZipSettings {
        &mut self.settings
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Start a new entry with the stream's settings, closing the previous one.
    pub fn put_next_entry(&mut self, name: &str) -> ZipResult<()> {
        self.put_next_entry_with(name, EntryOptions::default())
    }

    pub fn put_next_entry_with(&mut self, name: &str, options: EntryOptions) -> ZipResult<()> {
        self.close_entry()?;
        let name = normalize_name(name)?;
        let key = if self.settings.case_sensitive { name.clone() } else { name.to_lowercase() };
        if self.names.contains(&key) {
            return Err(ZipError::DuplicateEntry(name));
        }

        let mut entry = ZipEntry::new(&name, EntrySource::Bytes(Vec::new()), &self.settings)?;
        if let Some(method) = options.compression_method {
            entry.set_compression_method(method)?;
        }
        if let Some(level) = options.compression_level {
            entry.set_compression_level(level);
        }
        if let Some(encryption) = options.encryption {
            entry.set_encryption(encryption);
        }
        if let Some(password) = options.password {
            entry.set_password(Some(password));
        }
        if let Some(time) = options.last_modified {
            entry.set_last_modified(time);
        }
        if let Some(comment) = options.comment {
            entry.set_comment(comment);
        }
        if let Some(attributes) = options.external_attributes {
            entry.set_external_attributes(attributes);
        }
        entry.set_is_text(options.is_text);
        if entry.has_directory_name() {
            entry.mark_as_directory();
        }

        let plan = WritePlan::new(&entry, None, entry.is_directory())?;
        let OutputState::Idle(mut sink) = mem::replace(&mut self.state, OutputState::Broken) else {
            return Err(ZipError::BadState("the stream has been finished".into()));
        };
        let pending = writer::start_entry(&mut sink, &plan, None, self.settings.zip64)?;
        let content = ContentWriter::new(sink, &plan, pending.flags)?;
        tracing::debug!(entry = %name, "started stream entry");
        self.names.insert(key);
        self.state = OutputState::Writing {
            content,
            plan,
            pending,
        };
        Ok(())
    }

    fn close_entry(&mut self) -> ZipResult<()> {
        match mem::replace(&mut self.state, OutputState::Broken) {
            OutputState::Writing {
                content,
                plan,
                pending,
            } => {
                let (mut sink, crc32, size) = content.finish()?;
                let record = writer::finish_entry(&mut sink, plan, pending, crc32, size)?;
                self.records.push(record);
                self.state = OutputState::Idle(sink);
                Ok(())
            }
            OutputState::Broken => Err(ZipError::BadState("a previous write failed".into())),
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// Close the last entry, write the central directory and return the writer.
    pub fn finish(mut self) -> ZipResult<W> {
        self.close_entry()?;
        let OutputState::Idle(mut sink) = mem::replace(&mut self.state, OutputState::Finished) else {
            return Err(ZipError::BadState("the stream has been finished".into()));
        };
        let (comment, _) =
            encoding::encode(&self.comment, self.settings.text_encoding, self.settings.use_unicode);
        writer::write_central_directory(&mut sink, &self.records, &comment, self.settings.zip64)?;
        tracing::debug!(entries = self.records.len(), bytes = sink.position(), "finished stream");
        Ok(sink.into_inner())
    }
}

impl<W: Write> Write for ZipOutputStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            OutputState::Writing { content, .. } => content.write(buf),
            OutputState::Idle(_) => {
                Err(ZipError::BadState("write before put_next_entry".into()).into())
            }
            OutputState::Finished | OutputState::Broken => {
                Err(ZipError::BadState("the stream is closed".into()).into())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            OutputState::Writing { content, .. } => content.flush(),
            OutputState::Idle(sink) => sink.flush(),
            _ => Ok(()),
        }
    }
}

impl<W: Write> Drop for ZipOutputStream<W> {
    fn drop(&mut self) {
        if matches!(self.state, OutputState::Finished | OutputState::Broken) {
            return;
        }
        if let Err(e) = self.close_entry().and_then(|()| {
            let OutputState::Idle(sink) = &mut self.state else {
                return Ok(());
            };
            let (comment, _) =
                encoding::encode(&self.comment, self.settings.text_encoding, self.settings.use_unicode);
            writer::write_central_directory(sink, &self.records, &comment, self.settings.zip64)
        }) {
            tracing::warn!(error = %e, "could not finish zip stream on drop");
        }
    }
}

/// Buffered look-ahead over the input; tracks the absolute position.
struct SourceBuffer<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    position: u64,
}

impl<R: Read> SourceBuffer<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            position: 0,
        }
    }

    /// Buffer at least `n` bytes unless the input ends first.
    fn fill_to(&mut self, n: usize) -> io::Result<&[u8]> {
        let mut chunk = [0u8; 8192];
        while self.buf.len() - self.pos < n && !self.eof {
            if self.pos > 0 {
                self.buf.drain(..self.pos);
                self.pos = 0;
            }
            match self.inner.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(k) => self.buf.extend_from_slice(&chunk[..k]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(&self.buf[self.pos..])
    }
}

impl<R: Read> Read for SourceBuffer<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for SourceBuffer<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.fill_to(1)
    }

    fn consume(&mut self, amt: usize) {
        let amt = amt.min(self.buf.len() - self.pos);
        self.pos += amt;
        self.position += amt as u64;
    }
}

enum RawMode {
    /// Compressed size known from the local header.
    Bounded { remaining: u64 },
    /// Data ends at a signed data descriptor whose compressed size matches
    /// the bytes read so far.
    Scan { zip64: bool, ended: bool },
}

/// Stored bytes of the current entry.
struct RawEntry<R> {
    source: SourceBuffer<R>,
    mode: RawMode,
    consumed: u64,
}

fn descriptor_at(window: &[u8], at: usize, consumed: u64, zip64: bool) -> bool {
    let candidate = &window[at..];
    if candidate[..4] != DATA_DESCRIPTOR_SIGNATURE.to_le_bytes() {
        return false;
    }
    let compressed = if zip64 {
        read_u64_le(&candidate[8..]).ok()
    } else {
        read_u32_le(&candidate[8..]).ok().map(u64::from)
    };
    compressed == Some(consumed)
}

impl<R: Read> Read for RawEntry<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match &mut self.mode {
            RawMode::Bounded { remaining } => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let want = (buf.len() as u64).min(*remaining) as usize;
                let n = self.source.read(&mut buf[..want])?;
                if n == 0 {
                    return Err(ZipError::truncated("entry data").into());
                }
                *remaining -= n as u64;
                self.consumed += n as u64;
                Ok(n)
            }
            RawMode::Scan { zip64, ended } => {
                if *ended {
                    return Ok(0);
                }
                let needed = DataDescriptor::encoded_len(*zip64);
                let window = self.source.fill_to(needed)?;
                if window.len() < needed {
                    return Err(ZipError::truncated("data descriptor").into());
                }
                let limit = window.len() - needed + 1;
                let consumed = self.consumed;
                let found = (0..limit).find(|&at| descriptor_at(window, at, consumed + at as u64, *zip64));
                let n = match found {
                    Some(0) => {
                        *ended = true;
                        return Ok(0);
                    }
                    Some(at) => at,
                    None => limit,
                }
                .min(buf.len());
                buf[..n].copy_from_slice(&window[..n]);
                self.source.consume(n);
                self.consumed += n as u64;
                Ok(n)
            }
        }
    }
}

enum Content<R: Read> {
    Raw(Decompressor<Decryptor<RawEntry<R>>>),
    /// Unencrypted deflate of unknown length; the decoder stops at the end
    /// of the deflate stream.
    Inflate(DeflateDecoder<SourceBuffer<R>>),
}

struct CurrentEntry<R: Read> {
    content: Content<R>,
    name: String,
    /// `Some(zip64)` when sizes follow in a data descriptor.
    descriptor: Option<bool>,
    expected_crc: Option<u32>,
    expected_size: u64,
    expected_compressed: u64,
    check_crc: bool,
    hasher: crc32fast::Hasher,
    read: u64,
}

impl<R: Read> CurrentEntry<R> {
    /// Consume what is left of the entry and verify it. Returns the input
    /// positioned at the next record.
    fn complete(self) -> ZipResult<SourceBuffer<R>> {
        let (mut source, consumed) = match self.content {
            Content::Raw(mut chain) => {
                // Reaching the end of the decryptor checks an AES MAC.
                io::copy(chain.get_mut(), &mut io::sink())?;
                let raw = chain.into_inner().into_inner();
                (raw.source, raw.consumed)
            }
            Content::Inflate(decoder) => {
                let consumed = decoder.total_in();
                (decoder.into_inner(), consumed)
            }
        };

        let (crc32, compressed, size) = match self.descriptor {
            Some(zip64) => {
                let d = DataDescriptor::read(&mut source, zip64)?;
                (d.crc32, d.compressed_size, d.uncompressed_size)
            }
            None => (
                self.expected_crc.unwrap_or(0),
                self.expected_compressed,
                self.expected_size,
            ),
        };
        if compressed != consumed {
            return Err(ZipError::BadRead(format!(
                "{}: {consumed} stored bytes, {compressed} declared",
                self.name
            )));
        }
        if size != self.read {
            return Err(ZipError::BadRead(format!(
                "{}: expected {size} bytes, got {}",
                self.name, self.read
            )));
        }
        let actual = self.hasher.finalize();
        if self.check_crc && actual != crc32 {
            return Err(ZipError::CrcMismatch {
                entry: self.name,
                expected: crc32,
                actual,
            });
        }
        Ok(source)
    }
}

enum InputState<R: Read> {
    Start(SourceBuffer<R>),
    Between(SourceBuffer<R>),
    Entry(Box<CurrentEntry<R>>),
    Done,
    /// An error left the input at an unknown position.
    Broken,
}

/// Forward-only archive reader.
///
/// Entries come back from [`get_next_entry`](Self::get_next_entry) in
/// stored order; their content is then read through [`Read`]. Sizes and CRC
/// of entries that use data descriptors are only known, and checked, once
/// the content has been read to the end. A wrong password leaves the stream
/// unusable.
pub struct ZipInputStream<R: Read> {
    state: InputState<R>,
    settings: ZipSettings,
}

impl<R: Read> ZipInputStream<R> {
    pub fn new(inner: R) -> Self {
        Self::with_settings(inner, ZipSettings::default())
    }

    /// `settings.password` decrypts encrypted entries.
    pub fn with_settings(inner: R, settings: ZipSettings) -> Self {
        Self {
            state: InputState::Start(SourceBuffer::new(inner)),
            settings,
        }
    }

    pub fn set_password(&mut self, password: Option<String>) {
        self.settings.password = password;
    }

    /// Advance to the next entry, skipping whatever is unread of the current
    /// one. `None` once the central directory or the end of input is reached.
    pub fn get_next_entry(&mut self) -> ZipResult<Option<ZipEntry>> {
        if matches!(self.state, InputState::Entry(_)) {
            io::copy(self, &mut io::sink())?;
        }
        let (mut source, first) = match mem::replace(&mut self.state, InputState::Broken) {
            InputState::Start(source) => (source, true),
            InputState::Between(source) => (source, false),
            InputState::Done => {
                self.state = InputState::Done;
                return Ok(None);
            }
            InputState::Entry(_) | InputState::Broken => {
                return Err(ZipError::BadState("the stream is unusable after an earlier error".into()));
            }
        };

        if !seek_local_header(&mut source, first)? {
            self.state = InputState::Done;
            return Ok(None);
        }
        let offset = source.position;
        let header = LocalFileHeader::read(&mut source)?;
        let (entry, current) = self.open_entry(source, &header, offset)?;
        tracing::debug!(entry = %entry.name(), offset, "stream entry");
        self.state = InputState::Entry(Box::new(current));
        Ok(Some(entry))
    }

    fn open_entry(
        &self,
        source: SourceBuffer<R>,
        header: &LocalFileHeader,
        offset: u64,
    ) -> ZipResult<(ZipEntry, CurrentEntry<R>)> {
        let central = CentralDirectoryHeader {
            version_made_by: 0,
            version_needed: header.version_needed,
            flags: header.flags,
            compression_method: header.compression_method,
            last_mod_time: header.last_mod_time,
            last_mod_date: header.last_mod_date,
            crc32: header.crc32,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            file_name: header.file_name.clone(),
            extra_field: header.extra_field.clone(),
            ..Default::default()
        };
        // The stream offset rides in as the prefix; the record itself says 0.
        let entry = entry_from_central(&central, offset, &self.settings)?;
        let data = entry
            .archive_data()
            .cloned()
            .ok_or_else(|| ZipError::BadState(format!("{} has no stored data", entry.name())))?;
        let name = entry.name().to_string();

        let zip64 = extra::parse_extra(&header.extra_field)?
            .iter()
            .any(|r| r.tag == TAG_ZIP64);
        let has_descriptor = header.flags & FLAG_DATA_DESCRIPTOR != 0;
        let password = entry.password.as_deref();

        let content = if has_descriptor
            && !data.encryption.is_encrypted()
            && data.method == CompressionMethod::Deflate
        {
            Content::Inflate(DeflateDecoder::new(source))
        } else {
            data.method.ensure_supported()?;
            let (mode, data_len) = if has_descriptor {
                (RawMode::Scan { zip64, ended: false }, None)
            } else {
                (
                    RawMode::Bounded {
                        remaining: data.compressed_size,
                    },
                    Some(data.compressed_size),
                )
            };
            let raw = RawEntry {
                source,
                mode,
                consumed: 0,
            };
            let decryptor =
                open_decryptor(raw, &name, &data, data_len, password, entry.password_check)?;
            Content::Raw(Decompressor::new(decryptor, data.method)?)
        };

        let current = CurrentEntry {
            content,
            name,
            descriptor: has_descriptor.then_some(zip64),
            expected_crc: Some(data.crc32),
            expected_size: entry.uncompressed_size(),
            expected_compressed: data.compressed_size,
            check_crc: data.aes_version != 2,
            hasher: crc32fast::Hasher::new(),
            read: 0,
        };
        Ok((entry, current))
    }
}

/// Position `source` at the next local header. The first call also skips
/// leading data such as a self-extractor stub.
fn seek_local_header<R: Read>(source: &mut SourceBuffer<R>, first: bool) -> ZipResult<bool> {
    let lfh = LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes();
    loop {
        let window = source.fill_to(4)?;
        if window.len() < 4 {
            return Ok(false);
        }
        if window[..4] == lfh {
            return Ok(true);
        }
        let signature = read_u32_le(window)?;
        if matches!(
            signature,
            CENTRAL_DIRECTORY_SIGNATURE
                | END_OF_CENTRAL_DIRECTORY_SIGNATURE
                | ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE
        ) {
            return Ok(false);
        }
        if !first {
            return Err(ZipError::BadRead(format!(
                "unexpected signature {signature:#010x} at offset {}",
                source.position
            )));
        }
        let skip = window
            .windows(4)
            .position(|w| w == lfh || w == END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())
            .unwrap_or(window.len() - 3);
        source.consume(skip.max(1));
    }
}

impl<R: Read> Read for ZipInputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let InputState::Entry(current) = &mut self.state else {
            return Ok(0);
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let n = match &mut current.content {
            Content::Raw(chain) => chain.read(buf),
            Content::Inflate(decoder) => decoder.read(buf),
        };
        let n = match n {
            Ok(n) => n,
            Err(e) => {
                self.state = InputState::Broken;
                return Err(e);
            }
        };
        if n > 0 {
            current.hasher.update(&buf[..n]);
            current.read += n as u64;
            return Ok(n);
        }

        let InputState::Entry(current) = mem::replace(&mut self.state, InputState::Broken) else {
            return Ok(0);
        };
        let source = current.complete()?;
        self.state = InputState::Between(source);
        Ok(0)
    }
}

//! Progress reporting and cooperative cancellation.
//!
//! Handlers run synchronously on the thread performing the operation. A
//! handler cancels by calling [`ProgressEvent::cancel`]; the operation stops
//! with [`ZipError::Cancelled`] at its next checkpoint (between entries and
//! between 64 KiB chunks of entry data). Cancellation is sticky for the
//! rest of the operation.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::{ZipError, ZipResult};

/// Size of the chunks entry data is copied in; progress is reported per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    ReadingStarted,
    ReadingBeforeEntry,
    ReadingAfterEntry,
    ReadingCompleted,
    SavingStarted,
    SavingBeforeEntry,
    SavingAfterEntry,
    SavingEntryBytes,
    SavingAfterTempArchive,
    SavingBeforeRename,
    SavingAfterRename,
    SavingCompleted,
    ExtractingBeforeAll,
    ExtractingBeforeEntry,
    ExtractingEntryBytes,
    /// The target file exists; answer with [`ProgressEvent::set_overwrite`].
    ExtractingExistingFile,
    ExtractingAfterEntry,
    ExtractingAfterAll,
}

#[derive(Debug)]
pub struct ProgressEvent<'a> {
    pub kind: ProgressKind,
    pub archive_name: Option<&'a str>,
    pub entry_name: Option<&'a str>,
    pub entries_total: usize,
    pub entries_done: usize,
    /// Bytes of the current entry processed so far.
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub extract_location: Option<&'a Path>,
    cancel: bool,
    overwrite: Option<bool>,
}

impl<'a> ProgressEvent<'a> {
    pub fn new(kind: ProgressKind) -> Self {
        Self {
            kind,
            archive_name: None,
            entry_name: None,
            entries_total: 0,
            entries_done: 0,
            bytes_transferred: 0,
            total_bytes: 0,
            extract_location: None,
            cancel: false,
            overwrite: None,
        }
    }

    pub fn archive(mut self, name: Option<&'a str>) -> Self {
        self.archive_name = name;
        self
    }

    pub fn entry(mut self, name: &'a str) -> Self {
        self.entry_name = Some(name);
        self
    }

    pub fn counts(mut self, done: usize, total: usize) -> Self {
        self.entries_done = done;
        self.entries_total = total;
        self
    }

    pub fn bytes(mut self, transferred: u64, total: u64) -> Self {
        self.bytes_transferred = transferred;
        self.total_bytes = total;
        self
    }

    pub fn location(mut self, path: &'a Path) -> Self {
        self.extract_location = Some(path);
        self
    }

    /// Ask the running operation to stop at its next checkpoint.
    pub fn cancel(&mut self) {
        self.cancel = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
    }

    /// Answer an [`ProgressKind::ExtractingExistingFile`] event.
    pub fn set_overwrite(&mut self, overwrite: bool) {
        self.overwrite = Some(overwrite);
    }
}

pub type ProgressHandler = Box<dyn FnMut(&mut ProgressEvent<'_>)>;

/// Handler slot owned by an archive, with the sticky cancel flag.
#[derive(Default)]
pub(crate) struct Progress {
    handler: Option<ProgressHandler>,
    cancelled: bool,
}

impl Progress {
    pub fn set_handler(&mut self, handler: Option<ProgressHandler>) {
        self.handler = handler;
    }

    /// Clear the cancel flag at the start of a new operation.
    pub fn begin(&mut self) {
        self.cancelled = false;
    }

    fn dispatch(&mut self, event: &mut ProgressEvent<'_>) -> ZipResult<()> {
        if self.cancelled {
            return Err(ZipError::Cancelled);
        }
        if let Some(handler) = self.handler.as_mut() {
            handler(event);
            if event.cancel {
                self.cancelled = true;
                return Err(ZipError::Cancelled);
            }
        }
        Ok(())
    }

    /// Deliver an event; `Err(Cancelled)` once the handler has cancelled.
    pub fn report(&mut self, mut event: ProgressEvent<'_>) -> ZipResult<()> {
        self.dispatch(&mut event)
    }

    /// Deliver an existing-file event and return the handler's answer.
    /// Without an answer the file is left alone.
    pub fn ask_overwrite(&mut self, mut event: ProgressEvent<'_>) -> ZipResult<bool> {
        self.dispatch(&mut event)?;
        Ok(event.overwrite.unwrap_or(false))
    }
}

/// Copy `reader` into `writer` in [`CHUNK_SIZE`] chunks, calling `on_chunk`
/// with the running total after each one.
pub(crate) fn copy_chunked<R, W, F>(reader: &mut R, writer: &mut W, mut on_chunk: F) -> ZipResult<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
    F: FnMut(u64) -> ZipResult<()>,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
        on_chunk(total)?;
    }
    Ok(total)
}

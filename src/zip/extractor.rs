use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{ZipError, ZipResult};
use crate::io::ReadAt;
use crate::zip::datetime;
use crate::zip::entry::ZipEntry;
use crate::zip::options::ExtractExistingFileAction;
use crate::zip::progress::{copy_chunked, Progress, ProgressEvent, ProgressKind};

/// What happened to one entry during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// A file was written.
    Written,
    /// A directory entry; the directory exists afterwards.
    Directory,
    /// The target existed and was left alone.
    Skipped,
}

/// Per-call extraction options.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Overrides the archive's [`ExtractExistingFileAction`].
    pub existing: Option<ExtractExistingFileAction>,
    /// Overrides the entry and archive passwords.
    pub password: Option<String>,
    /// Drop directory components of entry names; directory entries are skipped.
    pub flatten: bool,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn existing(mut self, action: ExtractExistingFileAction) -> Self {
        self.existing = Some(action);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }
}

/// Resolve where an entry lands under `base`.
///
/// Names that are absolute or climb out of `base` are rejected.
pub fn target_path(base: &Path, name: &str, flatten: bool) -> ZipResult<PathBuf> {
    let escapes = || ZipError::Argument(format!("entry name {name:?} escapes the extraction directory"));
    if name.starts_with(['/', '\\']) {
        return Err(escapes());
    }
    let mut parts = Vec::new();
    for (i, part) in name.split(['/', '\\']).enumerate() {
        match part {
            "" | "." => {}
            ".." => return Err(escapes()),
            drive if i == 0 && drive.len() == 2 && drive.ends_with(':') => return Err(escapes()),
            part => parts.push(part),
        }
    }
    let Some(last) = parts.last() else {
        return Err(ZipError::Argument(format!("entry name {name:?} has no path components")));
    };
    if flatten {
        return Ok(base.join(last));
    }
    let mut path = base.to_path_buf();
    path.extend(parts);
    Ok(path)
}

/// Extraction of stored entries from an open archive.
pub(crate) struct ZipExtractor<'a> {
    source: &'a dyn ReadAt,
    archive_name: Option<&'a str>,
    progress: &'a mut Progress,
    done: usize,
    total: usize,
}

impl<'a> ZipExtractor<'a> {
    pub fn new(source: &'a dyn ReadAt, archive_name: Option<&'a str>, progress: &'a mut Progress) -> Self {
        Self {
            source,
            archive_name,
            progress,
            done: 0,
            total: 1,
        }
    }

    /// Entry counts carried by the events of the next extraction.
    pub fn set_counts(&mut self, done: usize, total: usize) {
        self.done = done;
        self.total = total;
    }

    fn report(&mut self, kind: ProgressKind, entry: &str, location: Option<&Path>) -> ZipResult<()> {
        let mut event = ProgressEvent::new(kind)
            .archive(self.archive_name)
            .entry(entry)
            .counts(self.done, self.total);
        event.extract_location = location;
        self.progress.report(event)
    }

    /// Decompress content into `out`, reporting bytes per chunk.
    fn copy_content(
        &mut self,
        entry: &mut ZipEntry,
        password: Option<&str>,
        out: &mut dyn Write,
    ) -> ZipResult<u64> {
        let mut reader = entry.open_archive_reader(self.source, password)?;
        let total = entry.uncompressed_size;
        let (archive_name, name) = (self.archive_name, entry.name.as_str());
        let progress = &mut *self.progress;
        let written = copy_chunked(&mut reader, out, |n| {
            progress.report(
                ProgressEvent::new(ProgressKind::ExtractingEntryBytes)
                    .archive(archive_name)
                    .entry(name)
                    .bytes(n, total),
            )
        })?;
        entry.materialized = true;
        Ok(written)
    }

    /// Extract file content to a writer
    pub fn extract_to_writer(
        &mut self,
        entry: &mut ZipEntry,
        password: Option<&str>,
        out: &mut dyn Write,
    ) -> ZipResult<u64> {
        self.report(ProgressKind::ExtractingBeforeEntry, &entry.name, None)?;
        let written = self.copy_content(entry, password, out)?;
        self.report(ProgressKind::ExtractingAfterEntry, &entry.name, None)?;
        Ok(written)
    }

    /// Extract file data to memory
    pub fn extract_to_memory(&mut self, entry: &mut ZipEntry, password: Option<&str>) -> ZipResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(entry.uncompressed_size.min(64 << 20) as usize);
        self.copy_content(entry, password, &mut buf)?;
        Ok(buf)
    }

    /// Extract an entry below `base`, honouring the overwrite policy.
    pub fn extract_to_file(
        &mut self,
        entry: &mut ZipEntry,
        base: &Path,
        action: ExtractExistingFileAction,
        password: Option<&str>,
        flatten: bool,
    ) -> ZipResult<ExtractOutcome> {
        let path = target_path(base, &entry.name, flatten)?;
        self.report(ProgressKind::ExtractingBeforeEntry, &entry.name, Some(&path))?;

        let outcome = if entry.has_directory_name() {
            if !entry.is_directory() && entry.uncompressed_size > 0 {
                return Err(ZipError::BadRead(format!(
                    "{} is named as a directory but holds {} bytes",
                    entry.name, entry.uncompressed_size
                )));
            }
            if !flatten {
                fs::create_dir_all(&path)?;
            }
            ExtractOutcome::Directory
        } else if path.exists() && !self.may_overwrite(entry, &path, action)? {
            tracing::info!(entry = %entry.name, path = %path.display(), "keeping existing file");
            ExtractOutcome::Skipped
        } else {
            self.write_file(entry, &path, password)?;
            ExtractOutcome::Written
        };

        self.report(ProgressKind::ExtractingAfterEntry, &entry.name, Some(&path))?;
        Ok(outcome)
    }

    fn may_overwrite(
        &mut self,
        entry: &ZipEntry,
        path: &Path,
        action: ExtractExistingFileAction,
    ) -> ZipResult<bool> {
        match action {
            ExtractExistingFileAction::Throw => Err(ZipError::AlreadyExists(path.to_path_buf())),
            ExtractExistingFileAction::OverwriteSilently => Ok(true),
            ExtractExistingFileAction::DoNotOverwrite => Ok(false),
            ExtractExistingFileAction::InvokeExtractProgressEvent => self.progress.ask_overwrite(
                ProgressEvent::new(ProgressKind::ExtractingExistingFile)
                    .archive(self.archive_name)
                    .entry(&entry.name)
                    .counts(self.done, self.total)
                    .location(path),
            ),
        }
    }

    /// Write through a temporary file next to the target, so a failed or
    /// cancelled extraction leaves nothing behind.
    fn write_file(&mut self, entry: &mut ZipEntry, path: &Path, password: Option<&str>) -> ZipResult<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let written = self.copy_content(entry, password, temp.as_file_mut())?;
        temp.as_file().set_modified(datetime::datetime_to_system_time(&entry.last_modified))?;
        apply_attributes(entry, temp.as_file())?;
        temp.persist(path).map_err(|e| ZipError::Io(e.error))?;

        tracing::debug!(entry = %entry.name, path = %path.display(), bytes = written, "extracted");
        Ok(())
    }
}

#[cfg(unix)]
fn apply_attributes(entry: &ZipEntry, file: &fs::File) -> ZipResult<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = entry.unix_mode() {
        file.set_permissions(fs::Permissions::from_mode(mode & 0o7777))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_attributes(entry: &ZipEntry, file: &fs::File) -> ZipResult<()> {
    use crate::zip::entry::ATTRIBUTE_READONLY;
    if entry.external_attributes & ATTRIBUTE_READONLY != 0 {
        let mut permissions = file.metadata()?.permissions();
        permissions.set_readonly(true);
        file.set_permissions(permissions)?;
    }
    Ok(())
}

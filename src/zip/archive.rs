//! The archive object: an ordered, editable set of entries bound to an
//! optional backing file or reader.
//!
//! Edits happen in memory. [`ZipFile::save`] writes every entry to a
//! temporary file next to the target and swaps it in once complete;
//! unchanged entries are copied byte for byte from the original archive,
//! which stays open until the swap.

use std::fmt;
use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{ZipError, ZipResult};
use crate::io::{ArchiveSink, LocalFileReader, MemoryReader, RangeReader, ReadAt, SeekableSink, StreamSink};
use crate::zip::encoding;
use crate::zip::entry::{EntryReader, EntrySource, EntryState, OpenDelegate, ZipEntry};
use crate::zip::extractor::{ExtractOptions, ExtractOutcome, ZipExtractor};
use crate::zip::options::ZipSettings;
use crate::zip::parser::ZipParser;
use crate::zip::progress::{Progress, ProgressEvent, ProgressHandler, ProgressKind};
use crate::zip::writer::{self, CentralRecord};

/// Counts from [`ZipFile::update_directory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

pub struct ZipFile {
    name: Option<PathBuf>,
    source: Option<Box<dyn ReadAt>>,
    entries: Vec<ZipEntry>,
    comment: String,
    settings: ZipSettings,
    progress: Progress,
}

impl fmt::Debug for ZipFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipFile")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("comment", &self.comment)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for ZipFile {
    fn default() -> Self {
        Self::new()
    }
}

fn names_match(stored: &str, wanted: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        stored == wanted
    } else {
        stored.eq_ignore_ascii_case(wanted) || stored.to_lowercase() == wanted.to_lowercase()
    }
}

/// Name inside the archive for `path`, optionally below `dir`.
fn name_in_archive(path: &Path, dir: Option<&str>) -> ZipResult<String> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ZipError::Argument(format!("{} has no file name", path.display())))?
        .to_string_lossy();
    Ok(join_name(dir, &file_name))
}

fn join_name(dir: Option<&str>, rest: &str) -> String {
    match dir.map(|d| d.trim_end_matches(['/', '\\'])) {
        Some(dir) if !dir.is_empty() => format!("{dir}/{rest}"),
        _ => rest.to_string(),
    }
}

fn bound(source: &Option<Box<dyn ReadAt>>) -> ZipResult<&dyn ReadAt> {
    source
        .as_deref()
        .ok_or_else(|| ZipError::BadState("the archive has not been saved or read yet".into()))
}

fn not_a(kind: &str, path: &Path) -> ZipError {
    ZipError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} is not a {kind}", path.display()),
    ))
}

impl ZipFile {
    /// An empty archive with no backing file.
    pub fn new() -> Self {
        Self::with_settings(ZipSettings::default())
    }

    pub fn with_settings(settings: ZipSettings) -> Self {
        Self {
            name: None,
            source: None,
            entries: Vec::new(),
            comment: String::new(),
            settings,
            progress: Progress::default(),
        }
    }

    /// An empty archive that [`save`](Self::save) will write to `path`.
    /// Nothing touches the disk until then.
    pub fn create(path: impl AsRef<Path>) -> Self {
        let mut zip = Self::new();
        zip.name = Some(path.as_ref().to_path_buf());
        zip
    }

    /// Read an existing archive; [`save`](Self::save) later rewrites it in place.
    pub fn open(path: impl AsRef<Path>) -> ZipResult<Self> {
        Self::open_with(path, ZipSettings::default())
    }

    pub fn open_with(path: impl AsRef<Path>, settings: ZipSettings) -> ZipResult<Self> {
        Self::open_with_progress(path, settings, None)
    }

    /// Like [`open_with`](Self::open_with), with a handler that also sees the
    /// reading events.
    pub fn open_with_progress(
        path: impl AsRef<Path>,
        settings: ZipSettings,
        handler: Option<ProgressHandler>,
    ) -> ZipResult<Self> {
        let path = path.as_ref();
        let reader = LocalFileReader::new(path)?;
        let mut zip = Self::with_settings(settings);
        zip.name = Some(path.to_path_buf());
        zip.progress.set_handler(handler);
        zip.read_from(Box::new(reader))?;
        Ok(zip)
    }

    /// Read an archive from any random-access source. The archive has no
    /// file name, so saving needs [`save_as`](Self::save_as) or a writer.
    pub fn from_reader(source: impl ReadAt + 'static, settings: ZipSettings) -> ZipResult<Self> {
        let mut zip = Self::with_settings(settings);
        zip.read_from(Box::new(source))?;
        Ok(zip)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> ZipResult<Self> {
        Self::from_reader(MemoryReader::new(bytes), ZipSettings::default())
    }

    fn read_from(&mut self, source: Box<dyn ReadAt>) -> ZipResult<()> {
        self.progress.begin();
        let archive_name = self.name.as_deref().and_then(Path::to_str);
        let directory = ZipParser::new(source.as_ref()).read_directory(
            &self.settings,
            &mut self.progress,
            archive_name,
        )?;
        tracing::info!(
            archive = archive_name.unwrap_or("<stream>"),
            entries = directory.entries.len(),
            zip64 = directory.zip64,
            "opened archive"
        );
        self.entries = directory.entries;
        self.comment = directory.comment;
        self.source = Some(source);
        Ok(())
    }

    pub fn name(&self) -> Option<&Path> {
        self.name.as_deref()
    }

    pub fn settings(&self) -> &ZipSettings {
        &self.settings
    }

    /// Settings for entries added from now on; existing entries keep theirs.
    pub fn settings_mut(&mut self) -> &mut ZipSettings {
        &mut self.settings
    }

    pub fn set_progress_handler(&mut self, handler: impl FnMut(&mut ProgressEvent<'_>) + 'static) {
        self.progress.set_handler(Some(Box::new(handler)));
    }

    pub fn clear_progress_handler(&mut self) {
        self.progress.set_handler(None);
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ZipEntry> {
        self.entries.iter()
    }

    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    /// Position of an entry. Backslashes match forward slashes, and a
    /// directory can be named without its trailing slash. Case is ignored
    /// unless [`ZipSettings::case_sensitive`] is set; the first match wins.
    fn position(&self, name: &str) -> Option<usize> {
        let wanted = name.replace('\\', "/");
        let case_sensitive = self.settings.case_sensitive;
        let find = |wanted: &str| {
            self.entries
                .iter()
                .position(|e| names_match(&e.name, wanted, case_sensitive))
        };
        find(&wanted).or_else(|| {
            if wanted.ends_with('/') {
                None
            } else {
                find(&format!("{wanted}/"))
            }
        })
    }

    fn index_of(&self, name: &str) -> ZipResult<usize> {
        self.position(name)
            .ok_or_else(|| ZipError::Argument(format!("no entry named {name}")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        self.position(name).map(|i| &self.entries[i])
    }

    pub fn entry_mut(&mut self, name: &str) -> Option<&mut ZipEntry> {
        self.position(name).map(|i| &mut self.entries[i])
    }

    fn insert(&mut self, entry: ZipEntry) -> ZipResult<&mut ZipEntry> {
        if self.position(&entry.name).is_some() {
            return Err(ZipError::DuplicateEntry(entry.name));
        }
        tracing::debug!(entry = %entry.name, "added entry");
        self.entries.push(entry);
        let last = self.entries.len() - 1;
        Ok(&mut self.entries[last])
    }

    /// Insert, or replace an entry of the same name in place.
    fn upsert(&mut self, entry: ZipEntry) -> &mut ZipEntry {
        match self.position(&entry.name) {
            Some(i) => {
                tracing::debug!(entry = %entry.name, "replaced entry");
                self.entries[i] = entry;
                &mut self.entries[i]
            }
            None => {
                self.entries.push(entry);
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        }
    }

    fn file_entry(&self, path: &Path, dir: Option<&str>) -> ZipResult<ZipEntry> {
        if fs::metadata(path)?.is_dir() {
            return Err(not_a("file", path));
        }
        ZipEntry::from_path(&name_in_archive(path, dir)?, path, &self.settings)
    }

    /// Add a file, named by its file name below `dir` (or at the root).
    pub fn add_file(&mut self, path: impl AsRef<Path>, dir: Option<&str>) -> ZipResult<&mut ZipEntry> {
        let entry = self.file_entry(path.as_ref(), dir)?;
        self.insert(entry)
    }

    /// Add several files; nothing is added if any of them fails.
    pub fn add_files<I, P>(&mut self, paths: I, dir: Option<&str>) -> ZipResult<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let entries = paths
            .into_iter()
            .map(|p| self.file_entry(p.as_ref(), dir))
            .collect::<ZipResult<Vec<_>>>()?;
        self.insert_all(entries)
    }

    fn insert_all(&mut self, entries: Vec<ZipEntry>) -> ZipResult<usize> {
        for (i, entry) in entries.iter().enumerate() {
            let clash = self.position(&entry.name).is_some()
                || entries[..i]
                    .iter()
                    .any(|e| names_match(&e.name, &entry.name, self.settings.case_sensitive));
            if clash {
                return Err(ZipError::DuplicateEntry(entry.name.clone()));
            }
        }
        let count = entries.len();
        self.entries.extend(entries);
        Ok(count)
    }

    /// Entries for everything below directory `path`, named relative to it
    /// and placed below `dir`.
    fn directory_entries(&self, path: &Path, dir: Option<&str>) -> ZipResult<Vec<ZipEntry>> {
        if !fs::metadata(path)?.is_dir() {
            return Err(not_a("directory", path));
        }
        let mut entries = Vec::new();
        if let Some(dir) = dir.filter(|d| !d.trim_matches(['/', '\\']).is_empty()) {
            let mut entry = ZipEntry::from_path(dir, path, &self.settings)?;
            entry.mark_as_directory();
            entries.push(entry);
        }
        for item in WalkDir::new(path).min_depth(1).sort_by_file_name() {
            let item = item?;
            let relative = item
                .path()
                .strip_prefix(path)
                .map_err(|_| ZipError::BadState(format!("{} left its root", item.path().display())))?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(ZipEntry::from_path(&join_name(dir, &relative), item.path(), &self.settings)?);
        }
        Ok(entries)
    }

    /// Add a directory tree recursively. Returns the number of entries added.
    pub fn add_directory(&mut self, path: impl AsRef<Path>, dir: Option<&str>) -> ZipResult<usize> {
        let entries = self.directory_entries(path.as_ref(), dir)?;
        self.insert_all(entries)
    }

    /// Add an empty directory entry.
    pub fn add_directory_by_name(&mut self, name: &str) -> ZipResult<&mut ZipEntry> {
        let mut entry = ZipEntry::new(name, EntrySource::Bytes(Vec::new()), &self.settings)?;
        entry.mark_as_directory();
        self.insert(entry)
    }

    /// Add a file or a directory tree, whichever `path` is.
    pub fn add_item(&mut self, path: impl AsRef<Path>, dir: Option<&str>) -> ZipResult<usize> {
        let path = path.as_ref();
        if fs::metadata(path)?.is_dir() {
            self.add_directory(path, dir)
        } else {
            self.add_file(path, dir).map(|_| 1)
        }
    }

    pub fn add_entry_bytes(&mut self, name: &str, bytes: impl Into<Vec<u8>>) -> ZipResult<&mut ZipEntry> {
        let entry = ZipEntry::from_bytes(name, bytes.into(), &self.settings)?;
        self.insert(entry)
    }

    /// Add text content, stored as UTF-8 and flagged as text.
    pub fn add_entry_str(&mut self, name: &str, text: &str) -> ZipResult<&mut ZipEntry> {
        let entry = self.add_entry_bytes(name, text.as_bytes())?;
        entry.set_is_text(true);
        Ok(entry)
    }

    /// Add an entry whose content is produced by `open` when the archive is
    /// saved. The returned reader is dropped once the entry is written.
    pub fn add_entry_with<F>(&mut self, name: &str, open: F) -> ZipResult<&mut ZipEntry>
    where
        F: FnMut(&str) -> io::Result<Box<dyn Read>> + 'static,
    {
        let open: OpenDelegate = Box::new(open);
        let entry = ZipEntry::from_delegate(name, open, &self.settings)?;
        self.insert(entry)
    }

    /// Add a file, replacing an entry of the same name.
    pub fn update_file(&mut self, path: impl AsRef<Path>, dir: Option<&str>) -> ZipResult<&mut ZipEntry> {
        let entry = self.file_entry(path.as_ref(), dir)?;
        Ok(self.upsert(entry))
    }

    pub fn update_entry_bytes(&mut self, name: &str, bytes: impl Into<Vec<u8>>) -> ZipResult<&mut ZipEntry> {
        let entry = ZipEntry::from_bytes(name, bytes.into(), &self.settings)?;
        Ok(self.upsert(entry))
    }

    /// Update from a file or a directory tree, whichever `path` is.
    pub fn update_item(&mut self, path: impl AsRef<Path>, dir: Option<&str>) -> ZipResult<UpdateSummary> {
        let path = path.as_ref();
        if fs::metadata(path)?.is_dir() {
            return self.update_directory(path, dir, false);
        }
        let existed = self.contains(&name_in_archive(path, dir)?);
        self.update_file(path, dir)?;
        Ok(UpdateSummary {
            added: usize::from(!existed),
            updated: usize::from(existed),
            removed: 0,
        })
    }

    /// Bring the entries below `dir` in line with directory `path`: new
    /// items are added, existing ones replaced, and with `remove_missing`
    /// entries that no longer exist on disk are removed.
    pub fn update_directory(
        &mut self,
        path: impl AsRef<Path>,
        dir: Option<&str>,
        remove_missing: bool,
    ) -> ZipResult<UpdateSummary> {
        let fresh = self.directory_entries(path.as_ref(), dir)?;
        let mut summary = UpdateSummary::default();

        if remove_missing {
            let prefix = dir
                .map(|d| d.trim_matches(['/', '\\']))
                .filter(|d| !d.is_empty())
                .map(|d| format!("{d}/"));
            let case_sensitive = self.settings.case_sensitive;
            let before = self.entries.len();
            self.entries.retain(|e| {
                let below = prefix.as_deref().is_none_or(|p| {
                    e.name.len() > p.len()
                        && e.name.get(..p.len()).is_some_and(|head| names_match(head, p, case_sensitive))
                });
                let keep = !below || fresh.iter().any(|f| names_match(&f.name, &e.name, case_sensitive));
                if !keep {
                    tracing::debug!(entry = %e.name, "removed entry missing on disk");
                }
                keep
            });
            summary.removed = before - self.entries.len();
        }

        for entry in fresh {
            if self.position(&entry.name).is_some() {
                summary.updated += 1;
            } else {
                summary.added += 1;
            }
            self.upsert(entry);
        }
        Ok(summary)
    }

    pub fn remove_entry(&mut self, name: &str) -> ZipResult<ZipEntry> {
        let i = self.index_of(name)?;
        Ok(self.entries.remove(i))
    }

    /// Write the archive back to its file name.
    pub fn save(&mut self) -> ZipResult<()> {
        let Some(target) = self.name.clone() else {
            return Err(ZipError::BadState(
                "the archive has no file name; use save_as or save_to".into(),
            ));
        };
        self.save_file(&target)
    }

    /// Write the archive to `path` and make that its file name.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> ZipResult<()> {
        self.save_file(path.as_ref())
    }

    fn save_file(&mut self, target: &Path) -> ZipResult<()> {
        writer::check_entry_count(self.entries.len(), self.settings.zip64)?;
        let dir = match (&self.settings.temp_dir, target.parent()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        self.progress.begin();
        let mut temp = NamedTempFile::new_in(&dir)?;
        tracing::debug!(temp = %temp.path().display(), target = %target.display(), "writing temporary archive");
        let records = {
            let mut sink = SeekableSink::new(temp.as_file_mut())?;
            self.write_archive(&mut sink)?
        };
        temp.as_file().sync_all()?;
        self.report_saving(ProgressKind::SavingAfterTempArchive)?;
        self.report_saving(ProgressKind::SavingBeforeRename)?;

        // The original stays open until the temporary file is complete.
        let previous = self.source.take();
        if let Err(e) = temp.persist(target) {
            self.source = previous;
            return Err(ZipError::Io(e.error));
        }
        drop(previous);

        // The new archive is on disk; bind to it before any handler can cancel.
        let reopened: Box<dyn ReadAt> = Box::new(LocalFileReader::new(target)?);
        self.source = Some(reopened);
        self.commit(records, true);
        self.name = Some(target.to_path_buf());
        tracing::info!(archive = %target.display(), entries = self.entries.len(), "saved archive");
        self.report_saving(ProgressKind::SavingAfterRename)?;
        self.report_saving(ProgressKind::SavingCompleted)
    }

    /// Write the archive to a seekable writer. The archive stays bound to
    /// its current source.
    pub fn save_to<W: Write + Seek>(&mut self, out: W) -> ZipResult<W> {
        writer::check_entry_count(self.entries.len(), self.settings.zip64)?;
        self.progress.begin();
        let mut sink = SeekableSink::new(out)?;
        let records = self.write_archive(&mut sink)?;
        self.commit(records, false);
        self.report_saving(ProgressKind::SavingCompleted)?;
        Ok(sink.into_inner())
    }

    /// Write the archive to a forward-only writer; every entry gets a data
    /// descriptor.
    pub fn save_to_stream<W: Write>(&mut self, out: W) -> ZipResult<W> {
        writer::check_entry_count(self.entries.len(), self.settings.zip64)?;
        self.progress.begin();
        let mut sink = StreamSink::new(out);
        let records = self.write_archive(&mut sink)?;
        self.commit(records, false);
        self.report_saving(ProgressKind::SavingCompleted)?;
        Ok(sink.into_inner())
    }

    fn report_saving(&mut self, kind: ProgressKind) -> ZipResult<()> {
        let archive_name = self.name.as_deref().and_then(Path::to_str);
        let total = self.entries.len();
        self.progress
            .report(ProgressEvent::new(kind).archive(archive_name).counts(total, total))
    }

    fn write_archive<S: ArchiveSink>(&mut self, sink: &mut S) -> ZipResult<Vec<CentralRecord>> {
        let archive_name = self.name.as_deref().and_then(Path::to_str);
        let source = self.source.as_deref();
        let policy = self.settings.zip64;
        let progress = &mut self.progress;
        let total = self.entries.len();

        progress.report(ProgressEvent::new(ProgressKind::SavingStarted).archive(archive_name).counts(0, total))?;
        let mut records = Vec::with_capacity(total);
        for (i, entry) in self.entries.iter_mut().enumerate() {
            let name = entry.name.clone();
            progress.report(
                ProgressEvent::new(ProgressKind::SavingBeforeEntry)
                    .archive(archive_name)
                    .entry(&name)
                    .counts(i, total),
            )?;
            let record = writer::write_entry(sink, entry, source, policy, &mut |n, bytes_total| {
                progress.report(
                    ProgressEvent::new(ProgressKind::SavingEntryBytes)
                        .archive(archive_name)
                        .entry(&name)
                        .counts(i, total)
                        .bytes(n, bytes_total),
                )
            })?;
            progress.report(
                ProgressEvent::new(ProgressKind::SavingAfterEntry)
                    .archive(archive_name)
                    .entry(&name)
                    .counts(i + 1, total),
            )?;
            records.push(record);
        }

        let (comment, _) =
            encoding::encode(&self.comment, self.settings.text_encoding, self.settings.use_unicode);
        writer::write_central_directory(sink, &records, &comment, policy)?;
        Ok(records)
    }

    /// Record what a successful save wrote. With `rebind` the entries now
    /// read from the newly written archive.
    fn commit(&mut self, records: Vec<CentralRecord>, rebind: bool) {
        for (entry, record) in self.entries.iter_mut().zip(records) {
            entry.crc32 = record.crc32;
            entry.compressed_size = record.compressed_size;
            entry.uncompressed_size = record.uncompressed_size;
            if rebind {
                let was_dirty = entry.state() == EntryState::Dirty;
                entry.source = EntrySource::Archive(record.archive_data());
                entry.compression_method = record.plan.method;
                entry.encryption = record.plan.encryption;
                entry.restream = false;
                entry.materialized = was_dirty;
            }
        }
    }

    fn password_for(&self, i: usize, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_owned)
            .or_else(|| self.entries[i].password.clone())
            .or_else(|| self.settings.password.clone())
    }

    /// Extract one entry below `base` using the archive's overwrite policy.
    pub fn extract(&mut self, name: &str, base: impl AsRef<Path>) -> ZipResult<ExtractOutcome> {
        self.extract_with(name, base, &ExtractOptions::default())
    }

    pub fn extract_with_password(
        &mut self,
        name: &str,
        base: impl AsRef<Path>,
        password: &str,
    ) -> ZipResult<ExtractOutcome> {
        self.extract_with(name, base, &ExtractOptions::new().password(password))
    }

    pub fn extract_with(
        &mut self,
        name: &str,
        base: impl AsRef<Path>,
        options: &ExtractOptions,
    ) -> ZipResult<ExtractOutcome> {
        let i = self.index_of(name)?;
        self.progress.begin();
        self.extract_index(i, base.as_ref(), options, (0, 1))
    }

    fn extract_index(
        &mut self,
        i: usize,
        base: &Path,
        options: &ExtractOptions,
        counts: (usize, usize),
    ) -> ZipResult<ExtractOutcome> {
        let password = self.password_for(i, options.password.as_deref());
        let action = options.existing.unwrap_or(self.settings.extract_existing);
        let source = bound(&self.source)?;
        let archive_name = self.name.as_deref().and_then(Path::to_str);
        let mut extractor = ZipExtractor::new(source, archive_name, &mut self.progress);
        extractor.set_counts(counts.0, counts.1);
        extractor.extract_to_file(&mut self.entries[i], base, action, password.as_deref(), options.flatten)
    }

    /// Extract every entry below `base`, in archive order. Returns the number
    /// of files written; directories and skipped files are not counted.
    pub fn extract_all(&mut self, base: impl AsRef<Path>) -> ZipResult<usize> {
        self.extract_all_with(base, &ExtractOptions::default())
    }

    pub fn extract_all_with(&mut self, base: impl AsRef<Path>, options: &ExtractOptions) -> ZipResult<usize> {
        self.extract_matching(base, options, |_| true)
    }

    /// Extract the entries whose names satisfy `filter`.
    pub fn extract_matching<F>(
        &mut self,
        base: impl AsRef<Path>,
        options: &ExtractOptions,
        mut filter: F,
    ) -> ZipResult<usize>
    where
        F: FnMut(&ZipEntry) -> bool,
    {
        let base = base.as_ref();
        let selected: Vec<usize> = (0..self.entries.len()).filter(|&i| filter(&self.entries[i])).collect();
        let total = selected.len();
        self.progress.begin();
        let archive_name = self.name.clone();
        let archive_name = archive_name.as_deref().and_then(Path::to_str);
        self.progress.report(
            ProgressEvent::new(ProgressKind::ExtractingBeforeAll)
                .archive(archive_name)
                .counts(0, total)
                .location(base),
        )?;

        let mut written = 0;
        for (done, &i) in selected.iter().enumerate() {
            if self.extract_index(i, base, options, (done, total))? == ExtractOutcome::Written {
                written += 1;
            }
        }

        self.progress.report(
            ProgressEvent::new(ProgressKind::ExtractingAfterAll)
                .archive(archive_name)
                .counts(total, total)
                .location(base),
        )?;
        Ok(written)
    }

    /// Decompress one entry into `out`. Returns the bytes written.
    pub fn extract_to_writer(&mut self, name: &str, out: &mut dyn Write) -> ZipResult<u64> {
        let i = self.index_of(name)?;
        let password = self.password_for(i, None);
        self.progress.begin();
        let source = bound(&self.source)?;
        let archive_name = self.name.as_deref().and_then(Path::to_str);
        ZipExtractor::new(source, archive_name, &mut self.progress).extract_to_writer(
            &mut self.entries[i],
            password.as_deref(),
            out,
        )
    }

    /// Content stream of an entry. Reading it to the end verifies size and CRC.
    pub fn open_entry(&mut self, name: &str) -> ZipResult<EntryReader<RangeReader<'_>>> {
        let i = self.index_of(name)?;
        let password = self.password_for(i, None);
        let source = bound(&self.source)?;
        self.entries[i].open_archive_reader(source, password.as_deref())
    }

    /// Whole content of an entry, verified.
    pub fn read_entry(&mut self, name: &str) -> ZipResult<Vec<u8>> {
        let i = self.index_of(name)?;
        let password = self.password_for(i, None);
        let source = bound(&self.source)?;
        ZipExtractor::new(source, None, &mut self.progress).extract_to_memory(&mut self.entries[i], password.as_deref())
    }

    /// Stored bytes of an entry: compressed, and encrypted if the entry is.
    pub fn read_raw(&mut self, name: &str) -> ZipResult<Vec<u8>> {
        let i = self.index_of(name)?;
        let source = bound(&self.source)?;
        let mut raw = Vec::new();
        self.entries[i].raw_reader(source)?.read_to_end(&mut raw)?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> ZipFile {
        let mut zip = ZipFile::new();
        zip.add_entry_str("Docs/Readme.txt", "read me").unwrap();
        zip.add_directory_by_name("empty").unwrap();
        zip
    }

    #[test]
    fn lookup_ignores_case_and_slashes() {
        let zip = sample();
        assert!(zip.contains("docs\\readme.TXT"));
        assert!(zip.contains("EMPTY"));
        assert_eq!(zip.entry("empty").map(ZipEntry::name), Some("empty/"));
    }

    #[test]
    fn case_sensitive_lookup() {
        let mut zip = ZipFile::new();
        zip.settings_mut().case_sensitive = true;
        zip.add_entry_bytes("A.txt", b"1".to_vec()).unwrap();
        zip.add_entry_bytes("a.txt", b"2".to_vec()).unwrap();
        assert_eq!(zip.len(), 2);
        assert!(!zip.contains("A.TXT"));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut zip = sample();
        let err = zip.add_entry_bytes("docs/readme.txt", b"x".to_vec()).unwrap_err();
        assert!(matches!(err, ZipError::DuplicateEntry(_)));
        assert_eq!(zip.len(), 2);
    }

    #[test]
    fn save_without_name_is_a_state_error() {
        let mut zip = sample();
        assert!(matches!(zip.save(), Err(ZipError::BadState(_))));
    }

    #[test]
    fn extracting_unsaved_entries_is_a_state_error() {
        let mut zip = sample();
        assert!(matches!(zip.read_entry("docs/readme.txt"), Err(ZipError::BadState(_))));
    }

    #[test]
    fn save_to_memory_and_read_back() {
        let mut zip = sample();
        zip.set_comment("hello");
        let bytes = zip.save_to(Cursor::new(Vec::new())).unwrap().into_inner();
        assert_eq!(zip.entry("docs/readme.txt").unwrap().crc32(), crc32fast::hash(b"read me"));

        let mut back = ZipFile::from_bytes(bytes).unwrap();
        assert_eq!(back.comment(), "hello");
        assert_eq!(back.entry_names(), vec!["Docs/Readme.txt", "empty/"]);
        assert_eq!(back.read_entry("docs/readme.txt").unwrap(), b"read me");
        assert!(back.entry("docs/readme.txt").unwrap().is_text());
        assert!(back.entry("empty").unwrap().is_directory());
    }

    #[test]
    fn remove_entry_by_name() {
        let mut zip = sample();
        let removed = zip.remove_entry("EMPTY/").unwrap();
        assert_eq!(removed.name(), "empty/");
        assert!(matches!(zip.remove_entry("missing"), Err(ZipError::Argument(_))));
    }

    #[test]
    fn delegate_content_is_pulled_at_save() {
        let mut zip = ZipFile::new();
        zip.add_entry_with("gen.txt", |name| {
            Ok(Box::new(Cursor::new(format!("generated for {name}").into_bytes())) as Box<dyn Read>)
        })
        .unwrap();
        let bytes = zip.save_to_stream(Vec::new()).unwrap();
        let mut back = ZipFile::from_bytes(bytes).unwrap();
        assert_eq!(back.read_entry("gen.txt").unwrap(), b"generated for gen.txt");
    }
}

//! Archive-wide policy knobs and per-entry overrides.

use chrono::NaiveDateTime;
use std::path::PathBuf;

use crate::zip::compression::{CompressionLevel, CompressionMethod};
use crate::zip::crypto::{EncryptionMethod, PasswordCheck};
use crate::zip::encoding::TextEncoding;

/// When to use Zip64 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Option {
    /// Plain 32-bit records only; saving fails if a value overflows.
    Never,
    /// Zip64 records only for entries and totals that overflow.
    #[default]
    AsNecessary,
    /// Zip64 records for every entry and the end of the archive.
    Always,
}

/// What to do when an extraction target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractExistingFileAction {
    /// Fail with [`ZipError::AlreadyExists`](crate::ZipError::AlreadyExists).
    #[default]
    Throw,
    OverwriteSilently,
    DoNotOverwrite,
    /// Raise [`ProgressKind::ExtractingExistingFile`](crate::ProgressKind::ExtractingExistingFile)
    /// and let the handler decide; no answer means skip.
    InvokeExtractProgressEvent,
}

/// Archive settings. Copied into each entry when it is added, so changing
/// them later affects only entries added afterwards.
#[derive(Debug, Clone)]
pub struct ZipSettings {
    pub compression_method: CompressionMethod,
    pub compression_level: CompressionLevel,
    /// Store every new entry regardless of method and level.
    pub force_no_compression: bool,
    pub encryption: EncryptionMethod,
    pub password: Option<String>,
    pub zip64: Zip64Option,
    pub case_sensitive: bool,
    pub text_encoding: TextEncoding,
    /// Write every non-ASCII name as UTF-8 with the language encoding flag.
    pub use_unicode: bool,
    pub password_check: PasswordCheck,
    pub emit_ntfs_times: bool,
    pub emit_unix_times: bool,
    pub extract_existing: ExtractExistingFileAction,
    /// Directory for the temporary archive written by `save`; defaults to
    /// the directory of the target file.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ZipSettings {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflate,
            compression_level: CompressionLevel::Default,
            force_no_compression: false,
            encryption: EncryptionMethod::None,
            password: None,
            zip64: Zip64Option::AsNecessary,
            case_sensitive: false,
            text_encoding: TextEncoding::Cp437,
            use_unicode: false,
            password_check: PasswordCheck::Auto,
            emit_ntfs_times: true,
            emit_unix_times: false,
            extract_existing: ExtractExistingFileAction::Throw,
            temp_dir: None,
        }
    }
}

impl ZipSettings {
    /// Method and level new entries get, after `force_no_compression`.
    pub fn effective_compression(&self) -> (CompressionMethod, CompressionLevel) {
        if self.force_no_compression || self.compression_level.is_none() {
            (CompressionMethod::Stored, CompressionLevel::None)
        } else {
            (self.compression_method, self.compression_level)
        }
    }
}

/// Overrides for a single entry written through
/// [`ZipOutputStream::put_next_entry_with`](crate::ZipOutputStream::put_next_entry_with).
/// `None` fields fall back to the stream's settings.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub compression_method: Option<CompressionMethod>,
    pub compression_level: Option<CompressionLevel>,
    pub encryption: Option<EncryptionMethod>,
    pub password: Option<String>,
    pub last_modified: Option<NaiveDateTime>,
    pub comment: Option<String>,
    pub external_attributes: Option<u32>,
    pub is_text: bool,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.compression_method = Some(method);
        self
    }

    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = Some(level);
        self
    }

    pub fn encryption(mut self, encryption: EncryptionMethod, password: impl Into<String>) -> Self {
        self.encryption = Some(encryption);
        self.password = Some(password.into());
        self
    }

    pub fn last_modified(mut self, time: NaiveDateTime) -> Self {
        self.last_modified = Some(time);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn external_attributes(mut self, attributes: u32) -> Self {
        self.external_attributes = Some(attributes);
        self
    }

    pub fn text(mut self) -> Self {
        self.is_text = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_no_compression_overrides_method() {
        let settings = ZipSettings {
            force_no_compression: true,
            ..Default::default()
        };
        assert_eq!(
            settings.effective_compression(),
            (CompressionMethod::Stored, CompressionLevel::None)
        );
        assert_eq!(
            ZipSettings::default().effective_compression().0,
            CompressionMethod::Deflate
        );
    }
}

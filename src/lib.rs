//! # zipkit
//!
//! Read, create and update ZIP archives.
//!
//! [`ZipFile`] opens an archive through its central directory, lets entries
//! be added, replaced and removed, and saves the result to a file or any
//! writer. Unchanged entries are copied without recompression.
//! [`ZipInputStream`] and [`ZipOutputStream`] handle archives as
//! forward-only streams.
//!
//! ## Features
//!
//! - Zip64 for archives and entries past 4 GiB or 65534 entries
//! - STORED and DEFLATE compression
//! - Traditional PKWARE and WinZip AES encryption
//! - Progress events with cancellation
//! - Non-seekable output through data descriptors
//!
//! ## Example
//!
//! ```no_run
//! use zipkit::{EncryptionMethod, ZipFile};
//!
//! fn main() -> Result<(), zipkit::ZipError> {
//!     let mut zip = ZipFile::create("backup.zip");
//!     zip.settings_mut().encryption = EncryptionMethod::WinZipAes256;
//!     zip.settings_mut().password = Some("secret".into());
//!     zip.add_directory("docs", Some("docs"))?;
//!     zip.add_entry_str("README.txt", "hello")?;
//!     zip.save()?;
//!
//!     let mut zip = ZipFile::open("backup.zip")?;
//!     for entry in zip.entries() {
//!         println!("{} {}", entry.name(), entry.uncompressed_size());
//!     }
//!     zip.extract_all_with(
//!         "out",
//!         &zipkit::ExtractOptions::new().password("secret"),
//!     )?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{ErrorKind, ZipError, ZipResult};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use zip::{
    AesStrength, CompressionLevel, CompressionMethod, EncryptionMethod, EntryOptions, EntryReader,
    EntryState, ExtractExistingFileAction, ExtractOptions, ExtractOutcome, PasswordCheck,
    ProgressEvent, ProgressHandler, ProgressKind, TextEncoding, UpdateSummary, Zip64Option,
    ZipEntry, ZipFile, ZipInputStream, ZipOutputStream, ZipParser, ZipSettings,
};

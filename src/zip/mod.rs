//! ZIP archive reading, writing and updating.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk records (local and central headers, end records, descriptors)
//! - `parser`: locates the end records and reads the central directory
//! - `entry`: the in-memory model of one entry and its content reader
//! - `writer`: local headers, data and the central directory of a new archive
//! - `archive`: [`ZipFile`], the open-modify-save API
//! - `stream`: forward-only [`ZipInputStream`] and [`ZipOutputStream`]
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end, preceded by the
//!    Zip64 end record and locator when a count, size or offset overflows
//!
//! Random-access reading starts from the EOCD, so listing never touches
//! entry data. Streaming reading walks the local headers front to back.
//!
//! ## Supported Features
//!
//! - Zip64 sizes, offsets and entry counts, under an `AsNecessary`, `Always`
//!   or `Never` policy
//! - STORED and DEFLATE
//! - Traditional PKWARE encryption and WinZip AES (128, 192 and 256 bit)
//! - Data descriptors for forward-only output
//! - CP437 or UTF-8 names and comments, NTFS and Unix timestamps
//!
//! ## Limitations
//!
//! - No multi-disk archives
//! - No BZIP2, LZMA or other compression methods

mod archive;
mod compression;
mod crypto;
mod datetime;
mod encoding;
mod entry;
mod extra;
mod extractor;
mod options;
mod parser;
mod progress;
mod stream;
pub mod structures;
mod writer;

pub use archive::{UpdateSummary, ZipFile};
pub use compression::{CompressionLevel, CompressionMethod};
pub use crypto::{AesStrength, EncryptionMethod, PasswordCheck};
pub use encoding::TextEncoding;
pub use entry::{EntryReader, EntryState, ZipEntry, normalize_name};
pub use extractor::{ExtractOptions, ExtractOutcome, target_path};
pub use options::{EntryOptions, ExtractExistingFileAction, Zip64Option, ZipSettings};
pub use parser::ZipParser;
pub use progress::{ProgressEvent, ProgressHandler, ProgressKind};
pub use stream::{ZipInputStream, ZipOutputStream};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by archive reading, writing and extraction.
#[derive(Error, Debug)]
pub enum ZipError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Malformed or truncated archive data.
    #[error("bad read: {0}")]
    BadRead(String),

    #[error("CRC32 mismatch in {entry}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        entry: String,
        expected: u32,
        actual: u32,
    },

    /// An operation was invoked before the archive was ready for it.
    #[error("bad state: {0}")]
    BadState(String),

    #[error("bad password for entry {0}")]
    BadPassword(String),

    /// The WinZip AES authentication code did not match the ciphertext.
    #[error("authentication code mismatch for entry {0}")]
    AuthenticationFailed(String),

    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("an entry named {0} already exists in the archive")]
    DuplicateEntry(String),

    #[error("unsupported compression method: {0}")]
    UnsupportedMethod(u16),

    #[error("{0} exceeds 32-bit limits and Zip64 is not enabled")]
    Zip64Required(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Coarse classification of [`ZipError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    State,
    Password,
    Filesystem,
    Argument,
    Unsupported,
    Cancelled,
}

pub type ZipResult<T> = std::result::Result<T, ZipError>;

impl ZipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZipError::BadRead(_) | ZipError::CrcMismatch { .. } => ErrorKind::Format,
            ZipError::BadState(_) => ErrorKind::State,
            ZipError::BadPassword(_) | ZipError::AuthenticationFailed(_) => ErrorKind::Password,
            ZipError::Io(_) | ZipError::AlreadyExists(_) => ErrorKind::Filesystem,
            ZipError::Argument(_) | ZipError::DuplicateEntry(_) => ErrorKind::Argument,
            ZipError::UnsupportedMethod(_) | ZipError::Zip64Required(_) => ErrorKind::Unsupported,
            ZipError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for the conditions a caller may retry with another password.
    pub fn is_password_error(&self) -> bool {
        self.kind() == ErrorKind::Password
    }

    pub(crate) fn truncated(what: &str) -> Self {
        ZipError::BadRead(format!("unexpected end of data while reading {what}"))
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            return ZipError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(zip)) => *zip,
            _ => ZipError::Io(io::Error::from(kind)),
        }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(inner) => inner,
            other => io::Error::other(other),
        }
    }
}

impl From<walkdir::Error> for ZipError {
    fn from(err: walkdir::Error) -> Self {
        ZipError::Io(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_survive_io_round_trip() {
        let io_err: io::Error = ZipError::BadPassword("a.txt".into()).into();
        let back = ZipError::from(io_err);
        assert!(matches!(back, ZipError::BadPassword(ref name) if name == "a.txt"));
        assert!(back.is_password_error());
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let err = ZipError::from(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.kind(), ErrorKind::Filesystem);
    }
}

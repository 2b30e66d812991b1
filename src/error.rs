//! Error types for basalt
//!
//! Defines a unified error type covering log parsing, storage-engine I/O,
//! and serialization failures. A refused page write is *not* an error at
//! the recovery-driver level: `redo` reports it as `false` and `undo`
//! returns early, so the pass can be redriven on the next restart. The
//! `StorageUnavailable` variant exists for engine implementations that
//! need to surface a hard failure themselves.

use std::fmt;
use std::io;

/// Unified error type for basalt operations
#[derive(Debug)]
pub enum Error {
    /// A log line could not be decoded into any record variant.
    /// Fatal during recovery.
    MalformedRecord(String),
    /// The storage engine refused an operation outright.
    StorageUnavailable,
    /// I/O error from a file-backed storage engine
    Io(io::Error),
    /// Record or snapshot serialization failed
    Serde(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedRecord(line) => write!(f, "malformed log record: {}", line),
            Error::StorageUnavailable => write!(f, "storage engine unavailable"),
            Error::Io(e) => write!(f, "{}", e),
            Error::Serde(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}

/// Result type alias for basalt operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_malformed_record() {
        let err = Error::MalformedRecord("not json".to_string());
        assert!(err.to_string().contains("not json"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_serde_error_conversion() {
        let serde_err = serde_json::from_str::<i64>("{").unwrap_err();
        let err: Error = serde_err.into();
        assert!(matches!(err, Error::Serde(_)));
    }
}

//! Error types shared by the firmware core

use thiserror::Error;

/// Failures reported by a flash filesystem backend
#[derive(Debug, Error)]
pub enum FsError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Injected or device-level failure without an underlying io error
    #[error("flash fault on {path}: {reason}")]
    Fault { path: String, reason: String },
}

/// Failures while loading or persisting profiles
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile id {id} out of range 1..={max}")]
    OutOfRange { id: i64, max: u8 },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize default profile: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("short write to {path}: {written} of {expected} bytes")]
    ShortWrite {
        path: String,
        expected: usize,
        written: usize,
    },
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Console command errors, printed back over serial
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("unknown command '{0}', type 'help'")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("profile must be 1..={max}, got '{given}'")]
    BadProfile { given: String, max: u8 },
}

/// Upload framing errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("missing filename after BEGIN marker")]
    MissingFilename,
    #[error("rejected filename '{0}'")]
    BadFilename(String),
    #[error("END marker without BEGIN")]
    StrayEnd,
    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

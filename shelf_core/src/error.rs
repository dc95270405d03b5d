//! Error types for shelf_core.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using shelf_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in channel and store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during blob or directory operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A channel database operation failed.
    #[error("Database error: {source}")]
    Database { source: rusqlite::Error },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// The caller passed a value of the wrong kind.
    #[error("Wrong kind of value: expected {expected}, got {got}")]
    TypeKind { expected: String, got: String },

    /// An edge or row write was rejected.
    #[error("Constraint violation: {reason}")]
    ConstraintViolation { reason: String },

    /// Content node not present in the channel.
    #[error("Content not found: {content_id}")]
    ContentNotFound { content_id: String },

    /// Channel not attached or its database is missing.
    #[error("Channel not found: {channel_id}")]
    ChannelNotFound { channel_id: String },

    /// File row not present in the channel.
    #[error("File not found: {id}")]
    FileNotFound { id: i64 },

    /// Blob not present in the store.
    #[error("Blob not found: {name}")]
    BlobNotFound { name: String },

    /// Invalid digest format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },

    /// Store is invalid or not initialized.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Configuration file could not be used.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Unknown content kind.
    #[error("Invalid content kind: {kind}")]
    InvalidKind { kind: String },

    /// Channel id is empty or not usable as a file name.
    #[error("Invalid channel id: {reason}")]
    InvalidChannelId { reason: String },

    /// Channel manifest is inconsistent.
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    /// A journal line that is not `time|operation|blob|metadata`.
    #[error("Invalid journal entry: {line:?}")]
    InvalidJournalEntry { line: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// A connection lock was poisoned by a panicking thread.
    #[error("Channel connection lock poisoned")]
    LockPoisoned,
}

/// Coarse classification of [`Error`] for callers that map errors onto
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TypeKind,
    ConstraintViolation,
    NotFound,
    StoreIo,
    Invalid,
    Database,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TypeKind => "type_kind",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StoreIo => "store_io",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Database => "database",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TypeKind { .. } => ErrorKind::TypeKind,
            Error::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Error::ContentNotFound { .. }
            | Error::ChannelNotFound { .. }
            | Error::FileNotFound { .. }
            | Error::BlobNotFound { .. } => ErrorKind::NotFound,
            Error::Io { .. } => ErrorKind::StoreIo,
            Error::Database { .. } | Error::LockPoisoned => ErrorKind::Database,
            Error::Serialization { .. }
            | Error::InvalidHash { .. }
            | Error::InvalidStore { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidKind { .. }
            | Error::InvalidChannelId { .. }
            | Error::InvalidManifest { .. }
            | Error::InvalidJournalEntry { .. }
            | Error::UnsupportedAlgorithm { .. } => ErrorKind::Invalid,
        }
    }

    /// Create a TypeKind error.
    pub fn type_kind(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::TypeKind {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a ConstraintViolation error.
    pub fn constraint(reason: impl Into<String>) -> Self {
        Error::ConstraintViolation {
            reason: reason.into(),
        }
    }

    /// Create a ContentNotFound error.
    pub fn content_not_found(content_id: impl Into<String>) -> Self {
        Error::ContentNotFound {
            content_id: content_id.into(),
        }
    }

    /// Create a ChannelNotFound error.
    pub fn channel_not_found(channel_id: impl Into<String>) -> Self {
        Error::ChannelNotFound {
            channel_id: channel_id.into(),
        }
    }

    /// Create a FileNotFound error.
    pub fn file_not_found(id: i64) -> Self {
        Error::FileNotFound { id }
    }

    /// Create a BlobNotFound error.
    pub fn blob_not_found(name: impl Into<String>) -> Self {
        Error::BlobNotFound { name: name.into() }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an InvalidKind error.
    pub fn invalid_kind(kind: impl Into<String>) -> Self {
        Error::InvalidKind { kind: kind.into() }
    }

    /// Create an InvalidChannelId error.
    pub fn invalid_channel_id(reason: impl Into<String>) -> Self {
        Error::InvalidChannelId {
            reason: reason.into(),
        }
    }

    /// Create an InvalidManifest error.
    pub fn invalid_manifest(reason: impl Into<String>) -> Self {
        Error::InvalidManifest {
            reason: reason.into(),
        }
    }

    pub fn invalid_journal_entry(line: impl Into<String>) -> Self {
        Error::InvalidJournalEntry { line: line.into() }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }
}

// Additional From implementations for external error types

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        // UNIQUE/CHECK/FOREIGN KEY failures surface as rejected writes
        match err {
            rusqlite::Error::SqliteFailure(ref code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::ConstraintViolation {
                    reason: msg.clone().unwrap_or_else(|| code.to_string()),
                }
            }
            other => Error::Database { source: other },
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::InvalidConfig {
            reason: err.to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned
    }
}

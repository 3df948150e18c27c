//! Error taxonomy shared by the blackbox crates

use thiserror::Error;

/// Result type for blackbox operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the document store
///
/// Recovery treats `CorruptJournal`, `CorruptSnapshot`, and `SchemaMismatch`
/// as fall-back signals; everything else propagates to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path failed to parse, or a directive could not be applied to the
    /// document (wrong container kind, out-of-range index, non-numeric add)
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Write would exceed the stream's fixed capacity; nothing was written
    #[error("write of {requested} bytes exceeds {remaining} bytes remaining in stream")]
    BufferOverflow { requested: usize, remaining: usize },

    /// Mutation attempted on a closed document
    #[error("document is closed")]
    Closed,

    /// Filesystem or mapping failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Journal bytes could not be decoded into commands
    #[error("corrupt journal: {0}")]
    CorruptJournal(String),

    /// Snapshot bytes could not be decoded into a document
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Journal header names a different document type or version
    #[error(
        "journal header mismatch: expected {expected_tag:?} v{expected_version}, \
         found {found_tag:?} v{found_version}"
    )]
    SchemaMismatch {
        expected_tag: String,
        expected_version: u32,
        found_tag: String,
        found_version: u32,
    },

    /// Unrecoverable failure (rename failed, command larger than the
    /// journal, unserializable value); escalate to the process owner
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Create an invalid-path error.
    #[inline]
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt-journal error.
    #[inline]
    pub fn corrupt_journal(reason: impl Into<String>) -> Self {
        StoreError::CorruptJournal(reason.into())
    }

    /// Create a corrupt-snapshot error.
    #[inline]
    pub fn corrupt_snapshot(reason: impl Into<String>) -> Self {
        StoreError::CorruptSnapshot(reason.into())
    }

    /// Create a fatal error.
    #[inline]
    pub fn fatal(reason: impl Into<String>) -> Self {
        StoreError::Fatal(reason.into())
    }

    /// True for `BufferOverflow` (the one error `add_command` recovers from).
    #[inline]
    pub fn is_overflow(&self) -> bool {
        matches!(self, StoreError::BufferOverflow { .. })
    }
}

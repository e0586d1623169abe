//! Error types for sync-fs

use std::path::PathBuf;

/// Result type for sync-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sync-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OS refused access to the path.
    #[error("Permission denied at {path}: {source}")]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An ancestor of the path exists but is not a real directory.
    #[error("Parent of {path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("Content of {path} does not match: expected {expected}, got {actual}")]
    ContentMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Symlinks are not supported on this platform (at {path})")]
    SymlinkUnsupported { path: PathBuf },

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },
}

impl Error {
    /// Classify an OS error for `path`, keeping permission denial distinct.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Access { path, source }
        } else {
            Self::Io { path, source }
        }
    }

    /// Whether the failure is a permission problem.
    pub fn is_access(&self) -> bool {
        matches!(self, Self::Access { .. })
    }
}

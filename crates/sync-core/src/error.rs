//! Error types for sync-core
//!
//! Reconciliation failures are path-scoped so a folder round can collect them
//! per path instead of aborting.

use std::path::PathBuf;

use sync_fs::RelPath;

/// Result type for sync-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sync-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Permission denied while probing or changing a path. Not retried
    /// automatically.
    #[error("Access denied for {path}: {source}")]
    Access {
        path: RelPath,
        #[source]
        source: sync_fs::Error,
    },

    /// Transient OS failure, retried on the next round.
    #[error("I/O error for {path}: {source}")]
    Io {
        path: RelPath,
        #[source]
        source: sync_fs::Error,
    },

    /// The retention step failed; the original object was left in place.
    #[error("Versioning failed for {path}: {message}")]
    Versioning { path: RelPath, message: String },

    /// An operation failed after the old object was retired. The path is
    /// left in a probeable state.
    #[error("Reconcile failed for {path}: {cause}")]
    Reconcile {
        path: RelPath,
        #[source]
        cause: sync_fs::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Folder index at {path} is unreadable: {message}")]
    IndexCorrupt { path: PathBuf, message: String },

    /// The folder was stopped before the request could run.
    #[error("Folder is stopped")]
    Stopped,

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from sync-fs
    #[error(transparent)]
    Fs(#[from] sync_fs::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
}

impl Error {
    /// A failure observing `path`; permission problems stay distinct.
    pub fn probe(path: &RelPath, source: sync_fs::Error) -> Self {
        if source.is_access() {
            Self::Access {
                path: path.clone(),
                source,
            }
        } else {
            Self::Io {
                path: path.clone(),
                source,
            }
        }
    }

    /// A failure applying a change to `path`.
    pub fn reconcile(path: &RelPath, cause: sync_fs::Error) -> Self {
        if cause.is_access() {
            Self::Access {
                path: path.clone(),
                source: cause,
            }
        } else {
            Self::Reconcile {
                path: path.clone(),
                cause,
            }
        }
    }

    pub fn versioning(path: &RelPath, message: impl Into<String>) -> Self {
        Self::Versioning {
            path: path.clone(),
            message: message.into(),
        }
    }

    /// Whether the next round should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Versioning { .. } | Self::Reconcile { .. }
        )
    }

    /// The path this error is scoped to, if any.
    pub fn path(&self) -> Option<&RelPath> {
        match self {
            Self::Access { path, .. }
            | Self::Io { path, .. }
            | Self::Versioning { path, .. }
            | Self::Reconcile { path, .. } => Some(path),
            _ => None,
        }
    }
}

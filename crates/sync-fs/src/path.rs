//! Tree-relative path handling
//!
//! Entries are keyed by a relative, slash-separated path. The path is kept
//! in that form internally and converted to a native path only at the I/O
//! boundary, joined onto the folder root.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A normalized path relative to a folder root.
///
/// Never empty, never absolute, never contains `.` or `..` components and
/// always uses forward slashes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath {
    inner: String,
}

impl RelPath {
    /// Parse and normalize a relative path.
    ///
    /// Backslashes become forward slashes, empty and `.` components are
    /// dropped. Absolute paths and `..` components are rejected so an entry
    /// can never address anything outside the folder root.
    pub fn new(path: impl AsRef<str>) -> Result<Self> {
        let raw = path.as_ref();
        let unified = raw.replace('\\', "/");

        if unified.starts_with('/') || has_drive_prefix(&unified) {
            return Err(invalid(raw, "path must be relative"));
        }

        let mut parts = Vec::new();
        for component in unified.split('/') {
            match component {
                "" | "." => continue,
                ".." => return Err(invalid(raw, "path must not contain '..'")),
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            return Err(invalid(raw, "path is empty"));
        }

        Ok(Self {
            inner: parts.join("/"),
        })
    }

    /// Build from a native path relative to `root`.
    pub fn from_native(root: &Path, full: &Path) -> Result<Self> {
        let relative = full.strip_prefix(root).map_err(|_| {
            invalid(
                &full.to_string_lossy(),
                &format!("not inside {}", root.display()),
            )
        })?;
        Self::new(relative.to_string_lossy())
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Native path of this entry under `root`.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for component in self.components() {
            out.push(component);
        }
        out
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/')
    }

    /// Number of components, `a` is 1 and `a/b` is 2.
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// The last component.
    pub fn file_name(&self) -> &str {
        self.inner.rsplit('/').next().unwrap_or(&self.inner)
    }

    /// The parent path, `None` for top-level entries.
    pub fn parent(&self) -> Option<Self> {
        self.inner.rfind('/').map(|idx| Self {
            inner: self.inner[..idx].to_string(),
        })
    }

    /// All proper ancestors, outermost first.
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            out.push(p);
        }
        out.reverse();
        out
    }

    /// Append a single component or a relative sub-path.
    pub fn join(&self, segment: &str) -> Result<Self> {
        Self::new(format!("{}/{}", self.inner, segment))
    }

    /// Whether `self` lies strictly below `other`.
    pub fn is_inside(&self, other: &RelPath) -> bool {
        self.inner.len() > other.inner.len()
            && self.inner.starts_with(&other.inner)
            && self.inner.as_bytes()[other.inner.len()] == b'/'
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

fn invalid(path: &str, reason: &str) -> Error {
    Error::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl TryFrom<String> for RelPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RelPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RelPath> for String {
    fn from(value: RelPath) -> Self {
        value.inner
    }
}

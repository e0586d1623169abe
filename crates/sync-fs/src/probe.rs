//! Filesystem probe
//!
//! Classifies a tree path without following it. A symlink is always reported
//! as a symlink, whether or not its target exists, and the probe never looks
//! through a symlinked ancestor.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::symlink::FLAG_TARGET_IS_DIR;
use crate::{Error, RelPath, Result};

/// What currently occupies a path on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Missing,
    File { size: u64, modified: i64 },
    Directory,
    Symlink { target: String, flags: u32 },
}

/// Discriminant of [`Probe`], handy for matching transition pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Missing,
    File,
    Directory,
    Symlink,
}

impl Probe {
    pub fn kind(&self) -> ProbeKind {
        match self {
            Probe::Missing => ProbeKind::Missing,
            Probe::File { .. } => ProbeKind::File,
            Probe::Directory => ProbeKind::Directory,
            Probe::Symlink { .. } => ProbeKind::Symlink,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Probe::Missing)
    }
}

/// Probe `path` under `root`.
///
/// # Errors
///
/// Returns [`Error::Access`] on permission denial and [`Error::Io`] for any
/// other OS failure. Neither is ever folded into [`Probe::Missing`].
pub fn probe(root: &Path, path: &RelPath) -> Result<Probe> {
    for ancestor in path.ancestors() {
        let native = ancestor.to_native(root);
        match fs::symlink_metadata(&native) {
            Ok(meta) if meta.file_type().is_dir() => {}
            // A file or a link in the parent chain means the path cannot
            // exist inside the tree.
            Ok(_) => return Ok(Probe::Missing),
            Err(e) if is_absent(&e) => return Ok(Probe::Missing),
            Err(e) => return Err(Error::io(native, e)),
        }
    }

    probe_native(&path.to_native(root))
}

/// Probe an absolute native path, without the ancestor check.
pub fn probe_native(native: &Path) -> Result<Probe> {
    let meta = match fs::symlink_metadata(native) {
        Ok(meta) => meta,
        Err(e) if is_absent(&e) => return Ok(Probe::Missing),
        Err(e) => return Err(Error::io(native, e)),
    };

    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let target = fs::read_link(native).map_err(|e| Error::io(native, e))?;
        // Following is fine here: it only feeds the directory hint.
        let flags = match fs::metadata(native) {
            Ok(resolved) if resolved.is_dir() => FLAG_TARGET_IS_DIR,
            _ => 0,
        };
        Ok(Probe::Symlink {
            target: target.to_string_lossy().into_owned(),
            flags,
        })
    } else if file_type.is_dir() {
        Ok(Probe::Directory)
    } else if file_type.is_file() {
        Ok(Probe::File {
            size: meta.len(),
            modified: meta.modified().map(unix_seconds).unwrap_or(0),
        })
    } else {
        Err(Error::io(
            native,
            std::io::Error::new(ErrorKind::Unsupported, "unsupported file type"),
        ))
    }
}

/// Seconds since the Unix epoch, negative before it.
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

fn is_absent(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

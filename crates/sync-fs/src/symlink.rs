//! Symlink capability
//!
//! Creating and removing links is kept behind [`SymlinkOps`] so platforms
//! without native symlinks can plug in a different backend without touching
//! reconciliation.

use std::fmt::Debug;
use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// Flag bit hinting that the link target is a directory.
///
/// Only consulted where the platform distinguishes file and directory links.
pub const FLAG_TARGET_IS_DIR: u32 = 1;

/// Create and remove symlink objects.
pub trait SymlinkOps: Send + Sync + Debug {
    /// Whether this backend can represent symlinks at all.
    fn supported(&self) -> bool;

    /// Create a link at `path` pointing at `target`. The target is opaque.
    fn create(&self, path: &Path, target: &str, flags: u32) -> Result<()>;

    /// Remove the link object at `path`, never its target.
    fn remove(&self, path: &Path) -> Result<()>;
}

/// The operating system's own symlinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSymlinks;

impl SymlinkOps for NativeSymlinks {
    fn supported(&self) -> bool {
        cfg!(any(unix, windows))
    }

    fn create(&self, path: &Path, target: &str, flags: u32) -> Result<()> {
        create_native(path, target, flags)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| Error::io(path, e))?;
        if !meta.file_type().is_symlink() {
            return Err(Error::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a symlink"),
            ));
        }
        remove_link(path)
    }
}

#[cfg(unix)]
fn create_native(path: &Path, target: &str, _flags: u32) -> Result<()> {
    std::os::unix::fs::symlink(target, path).map_err(|e| Error::io(path, e))
}

#[cfg(windows)]
fn create_native(path: &Path, target: &str, flags: u32) -> Result<()> {
    let result = if flags & FLAG_TARGET_IS_DIR != 0 {
        std::os::windows::fs::symlink_dir(target, path)
    } else {
        std::os::windows::fs::symlink_file(target, path)
    };
    result.map_err(|e| Error::io(path, e))
}

#[cfg(not(any(unix, windows)))]
fn create_native(path: &Path, _target: &str, _flags: u32) -> Result<()> {
    Err(Error::SymlinkUnsupported {
        path: path.to_path_buf(),
    })
}

#[cfg(windows)]
fn remove_link(path: &Path) -> Result<()> {
    // Directory links on Windows are removed like directories.
    fs::remove_file(path)
        .or_else(|_| fs::remove_dir(path))
        .map_err(|e| Error::io(path, e))
}

#[cfg(not(windows))]
fn remove_link(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| Error::io(path, e))
}

/// Backend for platforms that cannot create links.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedSymlinks;

impl SymlinkOps for UnsupportedSymlinks {
    fn supported(&self) -> bool {
        false
    }

    fn create(&self, path: &Path, _target: &str, _flags: u32) -> Result<()> {
        Err(Error::SymlinkUnsupported {
            path: path.to_path_buf(),
        })
    }

    fn remove(&self, path: &Path) -> Result<()> {
        Err(Error::SymlinkUnsupported {
            path: path.to_path_buf(),
        })
    }
}

/// Check whether links can actually be created inside `scratch_dir`.
///
/// Some filesystems and unprivileged Windows accounts refuse symlinks even
/// where the platform supports them.
pub fn probe_support(scratch_dir: &Path) -> bool {
    let link = crate::io::temp_path_for(&scratch_dir.join("symlink-check"));
    match create_native(&link, "tmp", 0) {
        Ok(()) => {
            let _ = remove_link(&link);
            true
        }
        Err(_) => false,
    }
}

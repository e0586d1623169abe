//! Staged I/O
//!
//! New objects are staged under a hidden temporary name next to their
//! destination and renamed into place, so a destination path is never
//! observed half-written. Transient OS failures are retried with backoff.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use fs2::FileExt;

use crate::symlink::SymlinkOps;
use crate::{Error, RelPath, Result};

const TEMP_SUFFIX: &str = ".sync-tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Retry tuning for transient I/O failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobustnessConfig {
    /// First retry delay.
    pub initial_interval: Duration,
    /// Give up once this much time has passed.
    pub max_elapsed: Duration,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(10),
            max_elapsed: Duration::from_secs(2),
        }
    }
}

impl RobustnessConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }
}

/// Run `op`, retrying while it fails with a transient OS error.
fn with_retry<T>(
    config: RobustnessConfig,
    path: &Path,
    mut op: impl FnMut() -> std::io::Result<T>,
) -> Result<T> {
    let result = backoff::retry(config.backoff(), || {
        op().map_err(|e| {
            if is_transient(&e) {
                tracing::debug!(path = %path.display(), error = %e, "Transient I/O failure, retrying");
                backoff::Error::transient(e)
            } else {
                backoff::Error::permanent(e)
            }
        })
    });

    result.map_err(|e| match e {
        backoff::Error::Permanent(err) => Error::io(path, err),
        backoff::Error::Transient { err, .. } => Error::io(path, err),
    })
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::ResourceBusy
    )
}

/// Whether a file name is one of our staging artifacts.
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// A fresh staging path in the same directory as `dest`.
///
/// Same directory means same filesystem, so the final rename is atomic.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    dest.with_file_name(format!(
        ".{}.{}.{}{}",
        name,
        std::process::id(),
        seq,
        TEMP_SUFFIX
    ))
}

/// Write `content` atomically to `path` under an exclusive advisory lock.
pub fn write_atomic(path: &Path, content: &[u8], config: RobustnessConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_path = temp_path_for(path);
    let written = write_locked(&temp_path, content, None, config);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    commit(&temp_path, path)
}

fn write_locked(
    temp_path: &Path,
    content: &[u8],
    modified: Option<i64>,
    config: RobustnessConfig,
) -> Result<()> {
    let mut file = with_retry(config, temp_path, || {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
    })?;

    file.lock_exclusive().map_err(|_| Error::LockFailed {
        path: temp_path.to_path_buf(),
    })?;

    with_retry(config, temp_path, || file.write_all(content))?;
    with_retry(config, temp_path, || file.sync_all())?;

    if let Some(secs) = modified {
        set_modified(&file, secs).map_err(|e| Error::io(temp_path, e))?;
    }

    // Released on drop as well; explicit so errors surface.
    FileExt::unlock(&file).map_err(|_| Error::LockFailed {
        path: temp_path.to_path_buf(),
    })?;
    Ok(())
}

fn set_modified(file: &File, secs: i64) -> std::io::Result<()> {
    let time = if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    };
    file.set_modified(time)
}

/// Read a whole file.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::io(path, e))
}

/// Stage a regular file for `dest`, stamped with `modified` when given.
pub fn stage_file(
    dest: &Path,
    content: &[u8],
    modified: Option<i64>,
    config: RobustnessConfig,
) -> Result<PathBuf> {
    let temp_path = temp_path_for(dest);
    if let Err(e) = write_locked(&temp_path, content, modified, config) {
        discard(&temp_path);
        return Err(e);
    }
    Ok(temp_path)
}

/// Stage an empty directory for `dest`.
pub fn stage_dir(dest: &Path) -> Result<PathBuf> {
    let temp_path = temp_path_for(dest);
    fs::create_dir(&temp_path).map_err(|e| Error::io(&temp_path, e))?;
    Ok(temp_path)
}

/// Stage a symlink for `dest` through the given backend.
pub fn stage_symlink(
    ops: &dyn SymlinkOps,
    dest: &Path,
    target: &str,
    flags: u32,
) -> Result<PathBuf> {
    let temp_path = temp_path_for(dest);
    ops.create(&temp_path, target, flags)?;
    Ok(temp_path)
}

/// Rename a staged object into its final place.
pub fn commit(staged: &Path, dest: &Path) -> Result<()> {
    fs::rename(staged, dest).map_err(|e| Error::io(dest, e))
}

/// Best-effort removal of a staged object.
pub fn discard(staged: &Path) {
    if let Err(e) = remove_object(staged) {
        tracing::warn!(path = %staged.display(), error = %e, "Failed to discard staged object");
    }
}

/// Remove whatever is at `path` without following links.
///
/// A symlink is unlinked, a directory is removed with its contents (links
/// inside it are unlinked, not followed), a missing path is not an error.
pub fn remove_object(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(path, e)),
    };

    let file_type = meta.file_type();
    let result = if file_type.is_dir() {
        fs::remove_dir_all(path)
    } else if file_type.is_symlink() && cfg!(windows) {
        fs::remove_file(path).or_else(|_| fs::remove_dir(path))
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| Error::io(path, e))
}

/// Make sure every ancestor of `path` is a real directory, creating the
/// missing ones.
///
/// # Errors
///
/// Returns [`Error::NotADirectory`] when an ancestor is a file or a symlink,
/// so nothing is ever created through a linked parent.
pub fn ensure_parent_dirs(root: &Path, path: &RelPath) -> Result<()> {
    for ancestor in path.ancestors() {
        let native = ancestor.to_native(root);
        match fs::symlink_metadata(&native) {
            Ok(meta) if meta.file_type().is_dir() => {}
            Ok(_) => return Err(Error::NotADirectory { path: native }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir(&native).map_err(|e| Error::io(&native, e))?;
            }
            Err(e) => return Err(Error::io(native, e)),
        }
    }
    Ok(())
}

/// Current time in Unix seconds.
pub fn now_unix() -> i64 {
    crate::probe::unix_seconds(SystemTime::now())
}

//! Versioning policies
//!
//! Before reconciliation overwrites or deletes a local object, the object is
//! handed to the folder's [`VersioningPolicy`]. Policies either discard it or
//! move it aside into a retention area. Retiring a symlink always retires
//! the link itself; its target is never touched.
//!
//! Retention moves are renames, so a failed retention step leaves the
//! original object exactly where it was.

mod none;
mod simple;
mod staggered;

pub use none::Discard;
pub use simple::Simple;
pub use staggered::{Interval, Staggered};

use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use sync_fs::{RelPath, io};

use crate::config::VersioningConfig;
use crate::{Error, Result};

/// Default retention area, relative to the folder root.
pub const DEFAULT_VERSIONS_DIR: &str = ".stversions";

/// Strategy for objects superseded by reconciliation.
pub trait VersioningPolicy: Send + Sync + Debug {
    /// Short policy name for logs.
    fn name(&self) -> &'static str;

    /// Vacate `path` under `root`, keeping or discarding what was there.
    ///
    /// Directories are retired child by child. A missing path is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Versioning`] when the object cannot be retired; the
    /// object that could not be retired is left untouched.
    fn archive(&self, root: &Path, path: &RelPath) -> Result<()>;

    /// Directory holding retained versions, excluded from scanning.
    fn retention_dir(&self) -> Option<&Path> {
        None
    }
}

/// Build the policy selected by a folder's configuration.
///
/// # Errors
///
/// Returns [`Error::Config`] for an unknown type or a malformed parameter.
pub fn from_config(root: &Path, config: &VersioningConfig) -> Result<Arc<dyn VersioningPolicy>> {
    let versions_dir = || -> PathBuf {
        match config.params.get("versionsPath") {
            Some(p) if Path::new(p).is_absolute() => PathBuf::from(p),
            Some(p) => root.join(p),
            None => root.join(DEFAULT_VERSIONS_DIR),
        }
    };

    match config.kind.as_str() {
        "" | "none" => Ok(Arc::new(Discard)),
        "simple" => {
            let keep = match config.params.get("keep") {
                Some(raw) => parse_param::<usize>("keep", raw)?,
                None => simple::DEFAULT_KEEP,
            };
            if keep == 0 {
                return Err(Error::Config {
                    message: "simple versioning needs keep >= 1".to_string(),
                });
            }
            Ok(Arc::new(Simple::new(versions_dir(), keep)))
        }
        "staggered" => {
            let max_age = match config.params.get("maxAge") {
                Some(raw) => parse_param::<i64>("maxAge", raw)?,
                None => staggered::DEFAULT_MAX_AGE,
            };
            let intervals = match config.params.get("intervals") {
                Some(raw) => Interval::parse_list(raw)?,
                None => Interval::default_schedule(max_age),
            };
            Ok(Arc::new(Staggered::new(versions_dir(), max_age, intervals)))
        }
        other => Err(Error::Config {
            message: format!("unknown versioning type {other:?}"),
        }),
    }
}

fn parse_param<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| Error::Config {
        message: format!("versioning parameter {name} has invalid value {raw:?}"),
    })
}

/// Retire `path` object by object.
///
/// Files and links are passed to `archive_one`, which returns where each one
/// was kept. A directory is walked first and every retention directory its
/// children need is created under `versions_dir` before anything moves; the
/// emptied directories are removed deepest first once all children are
/// archived. If any step fails, the children already moved are put back.
///
/// Returns the archived paths.
pub(crate) fn retire_tree(
    root: &Path,
    path: &RelPath,
    versions_dir: &Path,
    archive_one: &mut dyn FnMut(&RelPath, &Path) -> Result<PathBuf>,
) -> Result<Vec<RelPath>> {
    let native = path.to_native(root);
    let meta = match fs::symlink_metadata(&native) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::versioning(path, e.to_string())),
    };

    if !meta.file_type().is_dir() {
        archive_one(path, &native)?;
        return Ok(vec![path.clone()]);
    }

    let mut tree = Walked::default();
    walk(root, path, &mut tree)?;
    for leaf in &tree.leaves {
        ensure_retention_dir(leaf, &retention_parent(versions_dir, leaf))?;
    }
    for temp in &tree.temps {
        io::remove_object(temp).map_err(|e| Error::versioning(path, e.to_string()))?;
    }

    let mut moved = Vec::with_capacity(tree.leaves.len());
    if let Err(e) = empty_tree(root, &tree, archive_one, &mut moved) {
        put_back(&moved);
        return Err(e);
    }
    Ok(tree.leaves)
}

fn empty_tree(
    root: &Path,
    tree: &Walked,
    archive_one: &mut dyn FnMut(&RelPath, &Path) -> Result<PathBuf>,
    moved: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<()> {
    for leaf in &tree.leaves {
        let source = leaf.to_native(root);
        let dest = archive_one(leaf, &source)?;
        moved.push((source, dest));
    }
    for dir in &tree.dirs {
        fs::remove_dir(dir.to_native(root)).map_err(|e| Error::versioning(dir, e.to_string()))?;
    }
    Ok(())
}

/// A directory tree listed without following links.
#[derive(Default)]
struct Walked {
    leaves: Vec<RelPath>,
    /// Post-order, so children come before their parent.
    dirs: Vec<RelPath>,
    temps: Vec<PathBuf>,
}

fn walk(root: &Path, dir: &RelPath, out: &mut Walked) -> Result<()> {
    let children = fs::read_dir(dir.to_native(root)).map_err(|e| Error::versioning(dir, e.to_string()))?;
    for child in children {
        let child = child.map_err(|e| Error::versioning(dir, e.to_string()))?;
        let name = child.file_name().to_string_lossy().into_owned();
        if io::is_temp_name(&name) {
            out.temps.push(child.path());
            continue;
        }
        let child_path = dir.join(&name).map_err(|e| Error::versioning(dir, e.to_string()))?;
        let file_type = child
            .file_type()
            .map_err(|e| Error::versioning(&child_path, e.to_string()))?;
        if file_type.is_dir() {
            walk(root, &child_path, out)?;
        } else {
            out.leaves.push(child_path);
        }
    }
    out.dirs.push(dir.clone());
    Ok(())
}

fn ensure_retention_dir(path: &RelPath, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::versioning(
            path,
            format!("cannot create retention directory {}: {e}", dir.display()),
        )
    })
}

/// Undo archive moves, newest first.
fn put_back(moved: &[(PathBuf, PathBuf)]) {
    for (source, dest) in moved.iter().rev() {
        let restored = source
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::rename(dest, source));
        if let Err(e) = restored {
            tracing::error!(
                path = %source.display(),
                version = %dest.display(),
                error = %e,
                "Failed to restore archived object"
            );
        }
    }
}

/// Move a single object into `dest`, creating its directory first.
///
/// An occupied `dest` is an error; retained versions are never overwritten.
pub(crate) fn move_into(path: &RelPath, source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        ensure_retention_dir(path, parent)?;
    }
    if fs::symlink_metadata(dest).is_ok() {
        return Err(Error::versioning(
            path,
            format!("retention slot {} is already taken", dest.display()),
        ));
    }
    fs::rename(source, dest).map_err(|e| {
        Error::versioning(
            path,
            format!("cannot move into retention area {}: {e}", dest.display()),
        )
    })
}

/// Insert `~tag` before the extension: `notes.txt` becomes `notes~tag.txt`.
pub(crate) fn tagged_name(name: &str, tag: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{}~{}{}", &name[..idx], tag, &name[idx..]),
        _ => format!("{name}~{tag}"),
    }
}

/// `<name>~NNNNNN[.ext]`, written by [`Simple`]; wider once past six digits.
pub(crate) static GENERATION_TAG: LazyLock<Regex> = LazyLock::new(|| tag_regex(r"\d{6,}"));

/// `<name>~YYYYMMDD-HHMMSS[-N][.ext]`, written by [`Staggered`]. The
/// sequence suffix separates archives made within the same second.
pub(crate) static TIMESTAMP_TAG: LazyLock<Regex> =
    LazyLock::new(|| tag_regex(r"\d{8}-\d{6}(?:-\d+)?"));

/// Regex recognizing names produced by [`tagged_name`] with tags matching
/// `tag_pattern`.
fn tag_regex(tag_pattern: &str) -> Regex {
    Regex::new(&format!(r"^(.+)~({tag_pattern})(\.[^.~]*)?$")).unwrap()
}

/// Split a tagged name into (original name, tag).
pub(crate) fn untag(re: &Regex, name: &str) -> Option<(String, String)> {
    let caps = re.captures(name)?;
    let stem = caps.get(1)?.as_str();
    let tag = caps.get(2)?.as_str();
    let ext = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    Some((format!("{stem}{ext}"), tag.to_string()))
}

/// Versions of `name` stored in `dir`, as (tag, full path).
pub(crate) fn list_versions(re: &Regex, dir: &Path, name: &str) -> Vec<(String, PathBuf)> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<(String, PathBuf)> = read
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let file_name = e.file_name().to_string_lossy().into_owned();
            let (base, tag) = untag(re, &file_name)?;
            (base == name).then(|| (tag, e.path()))
        })
        .collect();
    out.sort();
    out
}

/// Retention directory for `path`'s parent inside `versions_dir`.
pub(crate) fn retention_parent(versions_dir: &Path, path: &RelPath) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.to_native(versions_dir),
        None => versions_dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn tagged_name_keeps_extension() {
        assert_eq!(tagged_name("notes.txt", "000001"), "notes~000001.txt");
        assert_eq!(tagged_name("file", "000001"), "file~000001");
        assert_eq!(tagged_name(".bashrc", "x"), ".bashrc~x");
        assert_eq!(tagged_name("a.tar.gz", "x"), "a.tar~x.gz");
    }

    #[test]
    fn untag_reverses_tagged_name() {
        let re = tag_regex(r"\d{6}");
        for name in ["notes.txt", "file", ".bashrc", "a.tar.gz", "fileLink"] {
            let tagged = tagged_name(name, "000042");
            assert_eq!(
                untag(&re, &tagged),
                Some((name.to_string(), "000042".to_string())),
                "{tagged}"
            );
        }
        assert_eq!(untag(&re, "plain.txt"), None);
    }

    #[test]
    fn from_config_selects_policy() {
        let root = Path::new("/tmp/folder");
        let mut cfg = VersioningConfig::default();
        assert_eq!(from_config(root, &cfg).unwrap().name(), "none");

        cfg.kind = "simple".into();
        cfg.params = HashMap::from([("keep".to_string(), "5".to_string())]);
        let policy = from_config(root, &cfg).unwrap();
        assert_eq!(policy.name(), "simple");
        assert_eq!(
            policy.retention_dir(),
            Some(root.join(DEFAULT_VERSIONS_DIR).as_path())
        );

        cfg.kind = "staggered".into();
        cfg.params.clear();
        assert_eq!(from_config(root, &cfg).unwrap().name(), "staggered");
    }

    #[test]
    fn from_config_rejects_bad_params() {
        let root = Path::new("/tmp/folder");
        let cfg = VersioningConfig {
            kind: "simple".into(),
            params: HashMap::from([("keep".to_string(), "lots".to_string())]),
        };
        assert!(matches!(from_config(root, &cfg), Err(Error::Config { .. })));

        let cfg = VersioningConfig {
            kind: "external".into(),
            params: HashMap::new(),
        };
        assert!(matches!(from_config(root, &cfg), Err(Error::Config { .. })));
    }

    #[test]
    fn failed_child_puts_earlier_children_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let versions = root.join(".stversions");
        fs::create_dir_all(root.join("d/sub")).unwrap();
        fs::write(root.join("d/one"), "1").unwrap();
        fs::write(root.join("d/sub/two"), "2").unwrap();
        fs::write(root.join("d/three"), "3").unwrap();

        let mut archived = 0;
        let result = retire_tree(root, &RelPath::new("d").unwrap(), &versions, &mut |p, source| {
            if archived == 2 {
                return Err(Error::versioning(p, "retention area full"));
            }
            archived += 1;
            let dest = retention_parent(&versions, p).join(p.file_name());
            move_into(p, source, &dest)?;
            Ok(dest)
        });

        assert!(matches!(result, Err(Error::Versioning { .. })));
        for (name, content) in [("d/one", "1"), ("d/sub/two", "2"), ("d/three", "3")] {
            assert_eq!(fs::read_to_string(root.join(name)).unwrap(), content, "{name}");
        }
    }

    #[test]
    fn occupied_retention_slot_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("kept/f~000001");
        fs::create_dir_all(dir.path().join("kept")).unwrap();
        fs::write(&dest, "retained").unwrap();
        fs::write(dir.path().join("f"), "incoming").unwrap();

        let err = move_into(&RelPath::new("f").unwrap(), &dir.path().join("f"), &dest).unwrap_err();

        assert!(matches!(err, Error::Versioning { .. }));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "retained");
        assert_eq!(fs::read_to_string(dir.path().join("f")).unwrap(), "incoming");
    }

    #[test]
    fn generation_tag_accepts_wide_numbers() {
        assert_eq!(
            untag(&GENERATION_TAG, "f~1000000.txt"),
            Some(("f.txt".to_string(), "1000000".to_string()))
        );
        assert_eq!(
            untag(&TIMESTAMP_TAG, "f~20261019-120000-2"),
            Some(("f".to_string(), "20261019-120000-2".to_string()))
        );
    }
}

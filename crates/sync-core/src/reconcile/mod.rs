//! Reconciler
//!
//! Converges one local path to a target [`Entry`]. The operation is chosen
//! by [`plan`] from the probed local kind and the target kind, then applied
//! in three steps:
//!
//! 1. the new object is staged under a hidden temporary name next to the
//!    destination;
//! 2. the old object is retired through the folder's versioning policy;
//! 3. the staged object is renamed into place.
//!
//! A failure in steps 1 or 2 discards the staged object and leaves the
//! original untouched. Nothing is ever written through a symlinked parent.

mod plan;

pub use plan::{Plan, plan};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sync_fs::{ContentId, Probe, ProbeKind, RelPath, RobustnessConfig, SymlinkOps, io, probe};

use crate::entry::{Entry, EntryKind, Kind};
use crate::versioning::VersioningPolicy;
use crate::{Error, Result};

/// Supplies file content for entries being applied.
pub trait ContentSource: Send + Sync + fmt::Debug {
    /// Bytes for `entry`, which is always a file entry.
    fn read(&self, entry: &Entry) -> sync_fs::Result<Vec<u8>>;
}

/// Reads content from one or more local trees holding the same folder.
///
/// Each root is tried in turn; the first copy whose hash matches the entry
/// wins.
#[derive(Debug, Clone)]
pub struct TreeSource {
    roots: Vec<PathBuf>,
}

impl TreeSource {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }
}

impl ContentSource for TreeSource {
    fn read(&self, entry: &Entry) -> sync_fs::Result<Vec<u8>> {
        let mut last_err = None;
        for root in &self.roots {
            let native = entry.path.to_native(root);
            match io::read_bytes(&native) {
                Ok(bytes) => match entry.content_id() {
                    Some(expected) if ContentId::of_bytes(&bytes) != *expected => {
                        last_err = Some(sync_fs::Error::ContentMismatch {
                            path: native,
                            expected: expected.to_string(),
                            actual: ContentId::of_bytes(&bytes).to_string(),
                        });
                    }
                    _ => return Ok(bytes),
                },
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| sync_fs::Error::Io {
            path: entry.path.as_str().into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no content source configured"),
        }))
    }
}

/// What reconciliation did to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedOp {
    NoOp,
    Created { kind: Kind },
    Replaced { from: ProbeKind, to: Kind },
    Removed { from: ProbeKind },
}

impl AppliedOp {
    pub fn is_noop(&self) -> bool {
        matches!(self, AppliedOp::NoOp)
    }
}

impl fmt::Display for AppliedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppliedOp::NoOp => write!(f, "no-op"),
            AppliedOp::Created { kind } => write!(f, "created {kind}"),
            AppliedOp::Replaced { from, to } => write!(f, "replaced {from:?} with {to}"),
            AppliedOp::Removed { from } => write!(f, "removed {from:?}"),
        }
    }
}

/// Applies target entries to one folder root.
#[derive(Debug, Clone)]
pub struct Reconciler {
    root: PathBuf,
    policy: Arc<dyn VersioningPolicy>,
    symlinks: Arc<dyn SymlinkOps>,
    content: Arc<dyn ContentSource>,
    robustness: RobustnessConfig,
}

impl Reconciler {
    pub fn new(
        root: impl Into<PathBuf>,
        policy: Arc<dyn VersioningPolicy>,
        symlinks: Arc<dyn SymlinkOps>,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            root: root.into(),
            policy,
            symlinks,
            content,
            robustness: RobustnessConfig::default(),
        }
    }

    pub fn with_robustness(mut self, robustness: RobustnessConfig) -> Self {
        self.robustness = robustness;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &Arc<dyn VersioningPolicy> {
        &self.policy
    }

    pub fn symlinks(&self) -> &Arc<dyn SymlinkOps> {
        &self.symlinks
    }

    /// Converge `target.path` to `target`.
    ///
    /// Running the same target twice performs no filesystem operation the
    /// second time.
    ///
    /// # Errors
    ///
    /// - [`Error::Access`] on permission denial
    /// - [`Error::Io`] when the path cannot be probed
    /// - [`Error::Versioning`] when the old object could not be retired
    /// - [`Error::Reconcile`] for any other failure while applying
    pub fn reconcile(&self, target: &Entry) -> Result<AppliedOp> {
        let path = &target.path;
        let local = probe(&self.root, path).map_err(|e| Error::probe(path, e))?;
        let native = path.to_native(&self.root);

        let mut op = plan(&local, &target.state);
        if op == Plan::Replace && self.same_file_content(path, &local, &native, &target.state)? {
            op = Plan::NoOp;
        }

        match op {
            Plan::NoOp => Ok(AppliedOp::NoOp),
            Plan::Remove => {
                self.policy.archive(&self.root, path)?;
                tracing::debug!(path = %path, from = ?local.kind(), policy = self.policy.name(), "Removed");
                Ok(AppliedOp::Removed { from: local.kind() })
            }
            Plan::Create | Plan::Replace | Plan::Retarget => {
                io::ensure_parent_dirs(&self.root, path).map_err(|e| Error::reconcile(path, e))?;

                let staged = self.stage(target, &native)?;
                if let Err(e) = self.retire(op, path, &native) {
                    io::discard(&staged);
                    return Err(e);
                }
                if let Err(e) = io::commit(&staged, &native) {
                    io::discard(&staged);
                    return Err(Error::reconcile(path, e));
                }

                let applied = if op == Plan::Create {
                    AppliedOp::Created { kind: target.kind() }
                } else {
                    AppliedOp::Replaced {
                        from: local.kind(),
                        to: target.kind(),
                    }
                };
                tracing::debug!(path = %path, op = %applied, "Applied");
                Ok(applied)
            }
        }
    }

    /// Plan for `target` without touching anything.
    pub fn plan_for(&self, target: &Entry) -> Result<Plan> {
        let path = &target.path;
        let local = probe(&self.root, path).map_err(|e| Error::probe(path, e))?;
        let op = plan(&local, &target.state);
        if op == Plan::Replace
            && self.same_file_content(path, &local, &path.to_native(&self.root), &target.state)?
        {
            return Ok(Plan::NoOp);
        }
        Ok(op)
    }

    fn same_file_content(
        &self,
        path: &RelPath,
        local: &Probe,
        native: &Path,
        target: &EntryKind,
    ) -> Result<bool> {
        let (Probe::File { size, .. }, EntryKind::File { content, size: want }) = (local, target) else {
            return Ok(false);
        };
        if size != want {
            return Ok(false);
        }
        let actual = ContentId::of_file(native).map_err(|e| Error::probe(path, e))?;
        Ok(&actual == content)
    }

    fn stage(&self, target: &Entry, native: &Path) -> Result<PathBuf> {
        let path = &target.path;
        let staged = match &target.state {
            EntryKind::File { content, .. } => {
                let bytes = self.content.read(target).map_err(|e| Error::reconcile(path, e))?;
                let actual = ContentId::of_bytes(&bytes);
                if actual != *content {
                    return Err(Error::reconcile(
                        path,
                        sync_fs::Error::ContentMismatch {
                            path: native.to_path_buf(),
                            expected: content.to_string(),
                            actual: actual.to_string(),
                        },
                    ));
                }
                let modified = (target.modified != 0).then_some(target.modified);
                io::stage_file(native, &bytes, modified, self.robustness)
            }
            EntryKind::Directory => io::stage_dir(native),
            EntryKind::Symlink { target: link, flags } => {
                io::stage_symlink(self.symlinks.as_ref(), native, link, *flags)
            }
            EntryKind::Deleted => Err(sync_fs::Error::Io {
                path: native.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "a tombstone has no object to stage",
                ),
            }),
        };
        staged.map_err(|e| Error::reconcile(path, e))
    }

    fn retire(&self, op: Plan, path: &RelPath, native: &Path) -> Result<()> {
        match op {
            Plan::Replace => self.policy.archive(&self.root, path),
            // Elsewhere the commit rename replaces the old link atomically.
            Plan::Retarget if cfg!(windows) => self
                .symlinks
                .remove(native)
                .map_err(|e| Error::reconcile(path, e)),
            _ => Ok(()),
        }
    }
}

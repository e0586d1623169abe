//! Simple versioning: keep the last N generations of each path.

use std::path::{Path, PathBuf};

use sync_fs::{RelPath, io};

use super::{
    GENERATION_TAG, VersioningPolicy, list_versions, move_into, retention_parent, retire_tree, tagged_name,
};
use crate::{Error, Result};

pub(crate) const DEFAULT_KEEP: usize = 5;

/// Moves superseded objects aside as `<name>~<generation>` and keeps at most
/// `keep` generations per path.
#[derive(Debug, Clone)]
pub struct Simple {
    versions_dir: PathBuf,
    keep: usize,
}

impl Simple {
    pub fn new(versions_dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            versions_dir: versions_dir.into(),
            keep,
        }
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Retained generations of `path`, oldest first.
    pub fn versions_of(&self, path: &RelPath) -> Vec<PathBuf> {
        self.generations(path).into_iter().map(|(_, p)| p).collect()
    }

    fn generations(&self, path: &RelPath) -> Vec<(u64, PathBuf)> {
        let dir = retention_parent(&self.versions_dir, path);
        let mut out: Vec<(u64, PathBuf)> = list_versions(&GENERATION_TAG, &dir, path.file_name())
            .into_iter()
            .filter_map(|(tag, p)| tag.parse().ok().map(|g| (g, p)))
            .collect();
        out.sort();
        out
    }

    fn archive_one(&self, path: &RelPath, source: &Path) -> Result<PathBuf> {
        let next = self.generations(path).last().map_or(1, |(g, _)| g + 1);
        let dir = retention_parent(&self.versions_dir, path);
        let dest = dir.join(tagged_name(path.file_name(), &format!("{next:06}")));
        move_into(path, source, &dest)?;
        tracing::debug!(path = %path, generation = next, "Archived superseded object");
        Ok(dest)
    }

    fn prune(&self, path: &RelPath) -> Result<()> {
        let generations = self.generations(path);
        let excess = generations.len().saturating_sub(self.keep);
        for (generation, old) in generations.iter().take(excess) {
            io::remove_object(old).map_err(|e| Error::versioning(path, e.to_string()))?;
            tracing::debug!(path = %path, generation, "Dropped old generation");
        }
        Ok(())
    }
}

impl VersioningPolicy for Simple {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn archive(&self, root: &Path, path: &RelPath) -> Result<()> {
        let archived = retire_tree(root, path, &self.versions_dir, &mut |p, native| {
            self.archive_one(p, native)
        })?;
        for p in &archived {
            self.prune(p)?;
        }
        Ok(())
    }

    fn retention_dir(&self) -> Option<&Path> {
        Some(&self.versions_dir)
    }
}

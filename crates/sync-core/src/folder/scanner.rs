//! Local tree scanning
//!
//! Walks a folder root without following symlinks and compares what it
//! finds with the local side of the index. Scanning never modifies the
//! filesystem.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use sync_fs::{ContentId, Probe, RelPath, io, probe::probe_native};

use crate::entry::{Entry, EntryKind, PeerId};
use crate::folder::FolderIndex;
use crate::{Error, Result};

/// Result of one scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// New local versions: created, modified or deleted objects.
    pub changed: Vec<Entry>,
    /// Same state, new modification time. Recorded but not announced.
    pub refreshed: Vec<Entry>,
    pub failures: Vec<Error>,
}

#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    peer: PeerId,
    ignored: Vec<PathBuf>,
    symlinks: bool,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, peer: PeerId) -> Self {
        Self {
            root: root.into(),
            peer,
            ignored: Vec::new(),
            symlinks: true,
        }
    }

    /// Skip `path` (and everything below it) while walking.
    pub fn ignore(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignored.push(path.into());
        self
    }

    /// Whether symlink objects are reported.
    pub fn with_symlinks(mut self, enabled: bool) -> Self {
        self.symlinks = enabled;
        self
    }

    /// Compare the tree with `index` and report what changed.
    pub fn scan(&self, index: &FolderIndex) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let mut seen = HashSet::new();
        let mut unreadable = Vec::new();

        if !self.walk(&self.root, index, &mut seen, &mut unreadable, &mut outcome) {
            // Nothing can be judged vanished if the root itself is unreadable.
            return outcome;
        }

        for local in index.local_entries() {
            if local.is_deleted() || seen.contains(&local.path) {
                continue;
            }
            if unreadable.iter().any(|dir: &RelPath| local.path.is_inside(dir) || &local.path == dir) {
                continue;
            }
            tracing::debug!(path = %local.path, "Vanished, recording tombstone");
            outcome.changed.push(local.tombstone(self.peer));
        }

        outcome
    }

    fn walk(
        &self,
        dir: &Path,
        index: &FolderIndex,
        seen: &mut HashSet<RelPath>,
        unreadable: &mut Vec<RelPath>,
        outcome: &mut ScanOutcome,
    ) -> bool {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Cannot read directory");
                match self.relative(dir) {
                    Ok(rel) => {
                        outcome.failures.push(Error::probe(&rel, sync_fs::Error::io(dir, e)));
                        unreadable.push(rel);
                    }
                    Err(_) => outcome.failures.push(sync_fs::Error::io(dir, e).into()),
                }
                return false;
            }
        };

        for dir_entry in entries.flatten() {
            let native = dir_entry.path();
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if io::is_temp_name(&name) || self.ignored.iter().any(|p| native.starts_with(p)) {
                continue;
            }

            let path = match self.relative(&native) {
                Ok(path) => path,
                Err(e) => {
                    outcome.failures.push(e);
                    continue;
                }
            };

            match self.observe(&path, &native, index) {
                Ok(Some(Observed::Directory)) => {
                    seen.insert(path.clone());
                    self.record(&path, EntryKind::Directory, 0, index, outcome);
                    let _ = self.walk(&native, index, seen, unreadable, outcome);
                }
                Ok(Some(Observed::Unchanged)) => {
                    seen.insert(path);
                }
                Ok(Some(Observed::State(state, modified))) => {
                    seen.insert(path.clone());
                    self.record(&path, state, modified, index, outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    // Keep the old entry; a failed probe is not a deletion.
                    seen.insert(path);
                    outcome.failures.push(e);
                }
            }
        }
        true
    }

    fn relative(&self, native: &Path) -> Result<RelPath> {
        Ok(RelPath::from_native(&self.root, native)?)
    }

    fn observe(&self, path: &RelPath, native: &Path, index: &FolderIndex) -> Result<Option<Observed>> {
        let probed = probe_native(native).map_err(|e| Error::probe(path, e))?;
        let observed = match probed {
            Probe::Missing => None,
            Probe::Directory => Some(Observed::Directory),
            Probe::Symlink { target, flags } => {
                if !self.symlinks {
                    return Ok(None);
                }
                Some(Observed::State(EntryKind::Symlink { target, flags }, 0))
            }
            Probe::File { size, modified } => {
                if let Some(local) = index.local(path)
                    && let EntryKind::File { size: known, .. } = &local.state
                    && *known == size
                    && local.modified == modified
                {
                    return Ok(Some(Observed::Unchanged));
                }
                let content = ContentId::of_file(native).map_err(|e| Error::probe(path, e))?;
                Some(Observed::State(EntryKind::File { content, size }, modified))
            }
        };
        Ok(observed)
    }

    fn record(&self, path: &RelPath, state: EntryKind, modified: i64, index: &FolderIndex, outcome: &mut ScanOutcome) {
        match index.local(path) {
            Some(local) if !local.is_deleted() && local.state.same_state(&state) => {
                if local.modified != modified {
                    let mut refreshed = local.clone();
                    refreshed.modified = modified;
                    if let EntryKind::File { .. } = &state {
                        refreshed.state = state;
                    }
                    outcome.refreshed.push(refreshed);
                }
            }
            _ => {
                // Start from everything known about the path so a new local
                // object supersedes tombstones and older announcements.
                let version = index.merged_version(path).bumped(self.peer);
                let entry = Entry::new(path.clone(), state, self.peer)
                    .with_version(version)
                    .with_modified(modified);
                tracing::debug!(path = %path, kind = %entry.kind(), "Local change");
                outcome.changed.push(entry);
            }
        }
    }
}

enum Observed {
    Directory,
    Unchanged,
    State(EntryKind, i64),
}

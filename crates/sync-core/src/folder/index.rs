//! Folder index
//!
//! Holds the entries this node has on disk (`local`) and the entries each
//! peer has announced (`remote`). The global winner of a path is the entry
//! with the highest [`Entry::precedence`] among all of them.
//!
//! The local side only changes after a scan observed the disk or after an
//! operation fully succeeded, so readers never see a half-applied path.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sync_fs::{RelPath, RobustnessConfig, io};

use crate::entry::{Entry, PeerId, VersionVector};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderIndex {
    #[serde(default)]
    local: BTreeMap<RelPath, Entry>,
    #[serde(default)]
    remote: BTreeMap<PeerId, BTreeMap<RelPath, Entry>>,
}

impl FolderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self, path: &RelPath) -> Option<&Entry> {
        self.local.get(path)
    }

    pub fn local_entries(&self) -> impl Iterator<Item = &Entry> {
        self.local.values()
    }

    /// Entries announced by `peer`.
    pub fn remote_entries(&self, peer: &PeerId) -> impl Iterator<Item = &Entry> {
        self.remote.get(peer).into_iter().flat_map(|m| m.values())
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.remote.keys()
    }

    /// Record what is now on disk for `entry.path`.
    pub fn record_local(&mut self, entry: Entry) {
        self.local.insert(entry.path.clone(), entry);
    }

    /// Merge a peer announcement. Entries that do not supersede what the
    /// peer already announced for the same path are ignored, so duplicates
    /// and out-of-order delivery are harmless.
    ///
    /// Returns the paths whose announced entry changed.
    pub fn merge_remote(&mut self, peer: PeerId, entries: impl IntoIterator<Item = Entry>) -> Vec<RelPath> {
        let known = self.remote.entry(peer).or_default();
        let mut changed = Vec::new();
        for entry in entries {
            let replace = match known.get(&entry.path) {
                Some(existing) => entry.wins_over(existing),
                None => true,
            };
            if replace {
                changed.push(entry.path.clone());
                known.insert(entry.path.clone(), entry);
            }
        }
        changed
    }

    /// Every path known locally or from any peer.
    pub fn paths(&self) -> BTreeSet<&RelPath> {
        self.local
            .keys()
            .chain(self.remote.values().flat_map(|m| m.keys()))
            .collect()
    }

    /// The winning entry for `path` across local and announced entries.
    pub fn global<'a>(&'a self, path: &'a RelPath) -> Option<&'a Entry> {
        self.candidates(path)
            .reduce(|best, e| if e.wins_over(best) { e } else { best })
    }

    /// Pointwise merge of every known version of `path`.
    pub fn merged_version(&self, path: &RelPath) -> VersionVector {
        self.candidates(path)
            .fold(VersionVector::new(), |acc, e| acc.merged(&e.version))
    }

    fn candidates<'a>(&'a self, path: &'a RelPath) -> impl Iterator<Item = &'a Entry> {
        self.local
            .get(path)
            .into_iter()
            .chain(self.remote.values().filter_map(move |m| m.get(path)))
    }

    /// Global winners that this node has not yet applied.
    ///
    /// A tombstone for a path this node never had is not needed.
    pub fn needed(&self) -> Vec<Entry> {
        self.paths()
            .into_iter()
            .filter_map(|path| {
                let winner = self.global(path)?;
                let needed = match self.local.get(path) {
                    Some(local) => winner.wins_over(local),
                    None => !winner.is_deleted(),
                };
                needed.then(|| winner.clone())
            })
            .collect()
    }

    /// Whether the local state of `path` matches `target`.
    pub fn local_matches(&self, target: &Entry) -> bool {
        match self.local.get(&target.path) {
            Some(local) => local.state.same_state(&target.state),
            None => target.is_deleted(),
        }
    }

    /// Load an index written by [`FolderIndex::save`]. A missing file
    /// yields an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexCorrupt`] when the file cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(sync_fs::Error::io(path, e).into()),
        };
        FileExt::lock_shared(&file).map_err(|_| sync_fs::Error::LockFailed {
            path: path.to_path_buf(),
        })?;

        // Read through the locked handle
        let mut content = String::new();
        (&file)
            .read_to_string(&mut content)
            .map_err(|e| sync_fs::Error::io(path, e))?;

        serde_json::from_str(&content).map_err(|e| Error::IndexCorrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Persist the index atomically while holding an exclusive lock on the
    /// index file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| sync_fs::Error::io(parent, e))?;
        }
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| sync_fs::Error::io(path, e))?;
        FileExt::lock_exclusive(&lock_file).map_err(|_| sync_fs::Error::LockFailed {
            path: path.to_path_buf(),
        })?;

        io::write_atomic(path, &content, RobustnessConfig::default())?;
        Ok(())
    }
}

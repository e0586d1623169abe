//! Entry model
//!
//! An [`Entry`] is the canonical, versioned description of the desired state
//! of one path in a folder. The kind and its payload form a single enum, so
//! a symlink can never carry a content id and a file can never carry a link
//! target.

mod version;

pub use version::{CausalOrder, PeerId, VersionVector};

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use sync_fs::{ContentId, RelPath};

/// Kind of an entry, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Deleted,
    Directory,
    File,
    Symlink,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Deleted => "deleted",
            Kind::Directory => "directory",
            Kind::File => "file",
            Kind::Symlink => "symlink",
        };
        f.write_str(s)
    }
}

/// Kind plus kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    File { content: ContentId, size: u64 },
    Directory,
    Symlink {
        target: String,
        /// Opaque symlink metadata, see [`sync_fs::FLAG_TARGET_IS_DIR`].
        #[serde(default)]
        flags: u32,
    },
    Deleted,
}

impl EntryKind {
    pub fn kind(&self) -> Kind {
        match self {
            EntryKind::File { .. } => Kind::File,
            EntryKind::Directory => Kind::Directory,
            EntryKind::Symlink { .. } => Kind::Symlink,
            EntryKind::Deleted => Kind::Deleted,
        }
    }

    /// Whether two states describe the same object on disk.
    ///
    /// Symlink flags are a hint only and do not make two links differ.
    pub fn same_state(&self, other: &EntryKind) -> bool {
        match (self, other) {
            (EntryKind::File { content: a, .. }, EntryKind::File { content: b, .. }) => a == b,
            (EntryKind::Directory, EntryKind::Directory) => true,
            (EntryKind::Symlink { target: a, .. }, EntryKind::Symlink { target: b, .. }) => a == b,
            (EntryKind::Deleted, EntryKind::Deleted) => true,
            _ => false,
        }
    }

    fn payload_key(&self) -> &str {
        match self {
            EntryKind::File { content, .. } => content.as_str(),
            EntryKind::Symlink { target, .. } => target,
            EntryKind::Directory | EntryKind::Deleted => "",
        }
    }
}

/// One path's desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: RelPath,
    #[serde(flatten)]
    pub state: EntryKind,
    /// Modification time of the originating object, Unix seconds.
    #[serde(default)]
    pub modified: i64,
    pub version: VersionVector,
    /// The peer that produced `version`.
    pub modified_by: PeerId,
}

impl Entry {
    pub fn new(path: RelPath, state: EntryKind, modified_by: PeerId) -> Self {
        Self {
            path,
            state,
            modified: 0,
            version: VersionVector::new(),
            modified_by,
        }
    }

    pub fn file(path: RelPath, content: ContentId, size: u64, modified_by: PeerId) -> Self {
        Self::new(path, EntryKind::File { content, size }, modified_by)
    }

    pub fn directory(path: RelPath, modified_by: PeerId) -> Self {
        Self::new(path, EntryKind::Directory, modified_by)
    }

    pub fn symlink(path: RelPath, target: impl Into<String>, modified_by: PeerId) -> Self {
        Self::new(
            path,
            EntryKind::Symlink {
                target: target.into(),
                flags: 0,
            },
            modified_by,
        )
    }

    pub fn with_version(mut self, version: VersionVector) -> Self {
        self.version = version;
        self
    }

    pub fn with_modified(mut self, modified: i64) -> Self {
        self.modified = modified;
        self
    }

    /// A tombstone for this entry produced by `by`, superseding `self`.
    pub fn tombstone(&self, by: PeerId) -> Self {
        Self {
            path: self.path.clone(),
            state: EntryKind::Deleted,
            modified: self.modified,
            version: self.version.bumped(by),
            modified_by: by,
        }
    }

    pub fn kind(&self) -> Kind {
        self.state.kind()
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.state, EntryKind::Deleted)
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.state {
            EntryKind::Symlink { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn content_id(&self) -> Option<&ContentId> {
        match &self.state {
            EntryKind::File { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Total order used to pick the winning entry for a path.
    ///
    /// A causally newer version always wins. Concurrent versions (and equal
    /// versions that disagree) fall back to the greater `modified_by` peer
    /// id, then the kind rank, then the payload and finally the counters
    /// themselves, so every peer picks the same winner.
    pub fn precedence(&self, other: &Entry) -> Ordering {
        if let Some(order) = self.version.partial_order(&other.version)
            && order != Ordering::Equal
        {
            return order;
        }
        self.modified_by
            .cmp(&other.modified_by)
            .then_with(|| self.kind().cmp(&other.kind()))
            .then_with(|| self.state.payload_key().cmp(other.state.payload_key()))
            .then_with(|| self.version.peers().cmp(other.version.peers()))
    }

    /// Whether `self` should replace `other`.
    pub fn wins_over(&self, other: &Entry) -> bool {
        self.precedence(other) == Ordering::Greater
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            EntryKind::Symlink { target, .. } => {
                write!(f, "{} (symlink -> {:?}) {}", self.path, target, self.version)
            }
            other => write!(f, "{} ({}) {}", self.path, other.kind(), self.version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    fn p(n: u128) -> PeerId {
        PeerId::from_u128(n)
    }

    #[test]
    fn payload_accessors_follow_kind() {
        let link = Entry::symlink(rel("l"), "file", p(1));
        assert_eq!(link.symlink_target(), Some("file"));
        assert!(link.content_id().is_none());

        let file = Entry::file(rel("f"), ContentId::of_bytes(b"x"), 1, p(1));
        assert!(file.symlink_target().is_none());
        assert!(file.content_id().is_some());
    }

    #[test]
    fn newer_version_wins_regardless_of_peer() {
        let old = Entry::file(rel("f"), ContentId::of_bytes(b"a"), 1, p(9))
            .with_version(VersionVector::new().bumped(p(9)));
        let new = old.tombstone(p(1));
        assert!(new.wins_over(&old));
        assert!(!old.wins_over(&new));
    }

    #[test]
    fn concurrent_versions_break_ties_by_peer_id() {
        let base = VersionVector::new().bumped(p(1));
        let by_low = Entry::directory(rel("x"), p(1)).with_version(base.bumped(p(1)));
        let by_high = Entry::symlink(rel("x"), "t", p(2)).with_version(base.bumped(p(2)));

        assert!(by_high.wins_over(&by_low));
        assert!(!by_low.wins_over(&by_high));
    }

    #[test]
    fn equal_versions_same_peer_order_by_kind() {
        let v = VersionVector::new().bumped(p(1));
        let dir = Entry::directory(rel("x"), p(1)).with_version(v.clone());
        let link = Entry::symlink(rel("x"), "t", p(1)).with_version(v);
        assert!(link.wins_over(&dir));
    }

    #[test]
    fn symlink_flags_do_not_change_state() {
        let a = EntryKind::Symlink {
            target: "dir".into(),
            flags: 0,
        };
        let b = EntryKind::Symlink {
            target: "dir".into(),
            flags: sync_fs::FLAG_TARGET_IS_DIR,
        };
        assert!(a.same_state(&b));
    }

    #[test]
    fn entry_serializes_with_kind_tag() {
        let e = Entry::symlink(rel("a/fileLink"), "file", p(1));
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "symlink");
        assert_eq!(json["target"], "file");
        let back: Entry = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }
}

//! Transition planning
//!
//! Pure mapping from (what is on disk, what the entry wants) to the
//! operation that converges the two. No I/O happens here.

use sync_fs::Probe;

use crate::entry::EntryKind;

/// Operation needed to bring one path to its target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Already in the target state.
    NoOp,
    /// Nothing on disk; create the target object.
    Create,
    /// Retire the local object through the versioning policy, then create
    /// the target object.
    Replace,
    /// Remove the old link and create the new one in its place.
    Retarget,
    /// Retire the local object; the target is a tombstone.
    Remove,
}

impl Plan {
    pub fn is_noop(self) -> bool {
        matches!(self, Plan::NoOp)
    }

    /// Whether the plan writes a new object.
    pub fn creates(self) -> bool {
        matches!(self, Plan::Create | Plan::Replace | Plan::Retarget)
    }
}

/// Decide the operation for a probed path and its target state.
pub fn plan(local: &Probe, target: &EntryKind) -> Plan {
    match (local, target) {
        (Probe::Missing, EntryKind::Deleted) => Plan::NoOp,
        (Probe::Missing, _) => Plan::Create,
        (_, EntryKind::Deleted) => Plan::Remove,

        (Probe::Directory, EntryKind::Directory) => Plan::NoOp,
        (Probe::File { .. }, EntryKind::File { .. }) => {
            // Content identity cannot be judged from a probe alone; the
            // reconciler hashes the file before deciding.
            Plan::Replace
        }
        (Probe::Symlink { target: current, .. }, EntryKind::Symlink { target: wanted, .. }) => {
            if current == wanted {
                Plan::NoOp
            } else {
                Plan::Retarget
            }
        }

        // Every remaining pair is a kind change.
        _ => Plan::Replace,
    }
}

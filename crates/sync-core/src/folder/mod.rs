//! Folder synchronization
//!
//! A folder pairs a local root with an index of local and peer-announced
//! entries. The runner repeatedly scans the root, diffs the index and
//! reconciles whatever the peers have that this node does not.

mod index;
mod locks;
mod runner;
mod scanner;

pub use index::FolderIndex;
pub use locks::{PathGuard, PathLocks};
pub use runner::{
    Announcement, FolderHandle, FolderRunner, FolderState, PathFailure, PeerFeed, RoundReport, forward,
};
pub use scanner::{ScanOutcome, Scanner};

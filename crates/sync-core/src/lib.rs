//! Core of the folder synchronizer
//!
//! This crate sits on top of `sync-fs` and implements:
//!
//! - **Entry model**: versioned per-path state with a deterministic winner
//! - **Versioning policies**: what happens to objects that get replaced
//! - **Reconciler**: converging one path to its target, symlinks included
//! - **Convergence**: per-peer completion in percent
//! - **Folders and nodes**: the scan, diff and apply loop per folder
//! - **Polling**: waiting until a peer reports 100
//!
//! # Architecture
//!
//! ```text
//!            Node / FolderHandle
//!                    |
//!   +--------+-------+-------+------------+
//!   |        |               |            |
//! Scanner  FolderIndex   Reconciler   convergence
//!                            |
//!                  +---------+---------+
//!                  |                   |
//!           VersioningPolicy       sync-fs
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sync_core::{FolderConfig, FolderRunner, PeerId, TreeSource};
//! use sync_fs::NativeSymlinks;
//!
//! async fn example() -> sync_core::Result<()> {
//!     let config = FolderConfig::new("default", "/srv/sync/default");
//!     let source = Arc::new(TreeSource::new(["/mnt/peer/default".into()]));
//!     let folder = FolderRunner::start(&config, PeerId::new(), source, Arc::new(NativeSymlinks))?;
//!     folder.rescan().await?;
//!     folder.stop().await
//! }
//! ```

pub mod config;
pub mod convergence;
pub mod entry;
pub mod error;
pub mod folder;
pub mod logging;
pub mod node;
pub mod poll;
pub mod reconcile;
pub mod versioning;

pub use config::{FolderConfig, NodeConfig, VersioningConfig};
pub use convergence::{Completion, aggregate, completion};
pub use entry::{CausalOrder, Entry, EntryKind, Kind, PeerId, VersionVector};
pub use error::{Error, Result};
pub use folder::{
    Announcement, FolderHandle, FolderIndex, FolderRunner, FolderState, PathFailure, PathLocks, PeerFeed,
    RoundReport, Scanner, forward,
};
pub use node::Node;
pub use poll::{CompletionQuery, PollPolicy, QueryError, WaitError, wait_for_completion};
pub use reconcile::{AppliedOp, ContentSource, Plan, Reconciler, TreeSource, plan};
pub use versioning::{Discard, Interval, Simple, Staggered, VersioningPolicy};

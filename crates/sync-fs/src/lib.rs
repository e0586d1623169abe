//! Filesystem layer for the folder synchronizer
//!
//! Provides tree-relative path handling, a non-following filesystem probe,
//! the symlink capability, staged (temp-then-rename) I/O and content hashing.

pub mod checksum;
pub mod error;
pub mod io;
pub mod path;
pub mod probe;
pub mod symlink;

pub use checksum::ContentId;
pub use error::{Error, Result};
pub use io::RobustnessConfig;
pub use path::RelPath;
pub use probe::{Probe, ProbeKind, probe};
pub use symlink::{NativeSymlinks, SymlinkOps, UnsupportedSymlinks, FLAG_TARGET_IS_DIR};

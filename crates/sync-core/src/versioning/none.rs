//! No versioning: superseded objects are deleted.

use std::fs;
use std::path::Path;

use sync_fs::{RelPath, io};

use super::VersioningPolicy;
use crate::{Error, Result};

/// Deletes the superseded object immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl VersioningPolicy for Discard {
    fn name(&self) -> &'static str {
        "none"
    }

    fn archive(&self, root: &Path, path: &RelPath) -> Result<()> {
        let native = path.to_native(root);
        let is_dir = fs::symlink_metadata(&native).is_ok_and(|m| m.is_dir());
        if is_dir {
            // Out of the tree in one step; the rest is cleanup.
            let staged = io::temp_path_for(&native);
            fs::rename(&native, &staged).map_err(|e| Error::versioning(path, e.to_string()))?;
            io::discard(&staged);
        } else {
            io::remove_object(&native).map_err(|e| Error::versioning(path, e.to_string()))?;
        }
        tracing::debug!(path = %path, "Discarded superseded object");
        Ok(())
    }
}

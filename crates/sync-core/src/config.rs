//! Node and folder configuration parsed from TOML
//!
//! ```toml
//! peer_id = "6f1c2a9e-0d6e-4f55-9d1b-7a0c2d3e4f51"
//!
//! [[folders]]
//! id = "default"
//! path = "/srv/sync/default"
//! rescan_interval_secs = 10
//!
//! [folders.versioning]
//! type = "simple"
//! params = { keep = "5" }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entry::PeerId;
use crate::{Error, Result};

fn default_rescan_interval() -> u64 {
    60
}

/// Versioning selection for a folder: a policy name and its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// "none", "simple" or "staggered". Empty means "none".
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Policy parameters, all as strings (`keep`, `maxAge`, `versionsPath`,
    /// `intervals`).
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl VersioningConfig {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn simple(keep: usize) -> Self {
        Self {
            kind: "simple".to_string(),
            params: HashMap::from([("keep".to_string(), keep.to_string())]),
        }
    }

    pub fn staggered(max_age_secs: i64) -> Self {
        Self {
            kind: "staggered".to_string(),
            params: HashMap::from([("maxAge".to_string(), max_age_secs.to_string())]),
        }
    }
}

/// One synchronized folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderConfig {
    pub id: String,

    /// Folder root on this node.
    pub path: PathBuf,

    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_secs: u64,

    /// Where the folder index is persisted. Defaults to a hidden file next
    /// to the folder root.
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    #[serde(default)]
    pub versioning: VersioningConfig,
}

impl FolderConfig {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            rescan_interval_secs: default_rescan_interval(),
            index_path: None,
            versioning: VersioningConfig::default(),
        }
    }

    pub fn with_versioning(mut self, versioning: VersioningConfig) -> Self {
        self.versioning = versioning;
        self
    }

    pub fn with_rescan_interval(mut self, secs: u64) -> Self {
        self.rescan_interval_secs = secs;
        self
    }

    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs.max(1))
    }

    /// Resolved index location.
    pub fn index_file(&self) -> PathBuf {
        if let Some(path) = &self.index_path {
            return path.clone();
        }
        let name = format!(".{}.sync-index.json", self.id);
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
            _ => self.path.join(name),
        }
    }
}

/// Configuration of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub peer_id: PeerId,

    #[serde(default)]
    pub folders: Vec<FolderConfig>,
}

impl NodeConfig {
    /// Parse a node configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TomlDe`] for malformed TOML and [`Error::Config`]
    /// for duplicate folder ids.
    pub fn parse(content: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for folder in &self.folders {
            if folder.id.is_empty() {
                return Err(Error::Config {
                    message: "folder id must not be empty".to_string(),
                });
            }
            if !seen.insert(folder.id.as_str()) {
                return Err(Error::Config {
                    message: format!("duplicate folder id {:?}", folder.id),
                });
            }
        }
        Ok(())
    }

    pub fn folder(&self, id: &str) -> Option<&FolderConfig> {
        self.folders.iter().find(|f| f.id == id)
    }
}

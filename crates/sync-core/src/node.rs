//! A node: every configured folder of one peer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sync_fs::SymlinkOps;

use crate::config::{FolderConfig, NodeConfig};
use crate::convergence::{self, Completion};
use crate::entry::PeerId;
use crate::folder::{FolderHandle, FolderRunner};
use crate::poll::{CompletionQuery, QueryError};
use crate::reconcile::ContentSource;
use crate::Result;

/// Running folders of one node.
#[derive(Debug)]
pub struct Node {
    peer: PeerId,
    folders: Vec<FolderHandle>,
}

impl Node {
    /// Start every folder in `config`. `content` supplies the content
    /// source for each folder.
    ///
    /// # Errors
    ///
    /// Fails on the first folder that cannot start; folders started before
    /// it are stopped again.
    pub async fn start(
        config: &NodeConfig,
        content: impl Fn(&FolderConfig) -> Arc<dyn ContentSource>,
        symlinks: Arc<dyn SymlinkOps>,
    ) -> Result<Self> {
        let mut folders = Vec::with_capacity(config.folders.len());
        for folder in &config.folders {
            match FolderRunner::start(folder, config.peer_id, content(folder), Arc::clone(&symlinks)) {
                Ok(handle) => folders.push(handle),
                Err(e) => {
                    tracing::error!(folder = %folder.id, error = %e, "Folder failed to start");
                    for started in &folders {
                        let _ = started.stop().await;
                    }
                    return Err(e);
                }
            }
        }
        tracing::info!(peer = %config.peer_id.short(), folders = folders.len(), "Node started");
        Ok(Self {
            peer: config.peer_id,
            folders,
        })
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn folder(&self, id: &str) -> Option<&FolderHandle> {
        self.folders.iter().find(|f| f.id() == id)
    }

    pub fn folders(&self) -> &[FolderHandle] {
        &self.folders
    }

    /// Completion towards `peer` across all folders.
    pub async fn completion(&self, peer: &PeerId) -> Completion {
        let mut parts = Vec::with_capacity(self.folders.len());
        for folder in &self.folders {
            parts.push(folder.completion(peer).await);
        }
        convergence::aggregate(&parts)
    }

    /// Stop every folder, returning the first error.
    pub async fn stop(&self) -> Result<()> {
        let mut first_err = None;
        for folder in &self.folders {
            if let Err(e) = folder.stop().await {
                tracing::warn!(folder = %folder.id(), error = %e, "Folder did not stop cleanly");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl CompletionQuery for Node {
    async fn peer_completion(&self) -> std::result::Result<HashMap<PeerId, f64>, QueryError> {
        let mut per_peer: HashMap<PeerId, Vec<Completion>> = HashMap::new();
        for folder in &self.folders {
            for (peer, completion) in folder.peer_completions().await {
                per_peer.entry(peer).or_default().push(completion);
            }
        }
        Ok(per_peer
            .into_iter()
            .map(|(peer, parts)| (peer, convergence::aggregate(&parts).percent))
            .collect())
    }
}

#[async_trait]
impl CompletionQuery for FolderHandle {
    async fn peer_completion(&self) -> std::result::Result<HashMap<PeerId, f64>, QueryError> {
        Ok(self
            .peer_completions()
            .await
            .into_iter()
            .map(|(peer, c)| (peer, c.percent))
            .collect())
    }
}

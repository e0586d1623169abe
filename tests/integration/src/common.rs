//! Shared setup for end-to-end tests: nodes built from TOML, wired to each
//! other in-process.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sync_core::{
    CompletionQuery, ContentSource, Entry, Node, NodeConfig, PeerId, PollPolicy, QueryError, TreeSource,
    forward, wait_for_completion,
};
use sync_fs::NativeSymlinks;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const FOLDER: &str = "default";

/// One node's folder root and private state directory.
pub struct Home {
    pub peer: PeerId,
    pub root: TempDir,
    pub state: TempDir,
}

impl Home {
    pub fn new(n: u128) -> Self {
        Self {
            peer: PeerId::from_u128(n),
            root: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    /// Node configuration with one folder and the given versioning table.
    pub fn config(&self, versioning: &str) -> NodeConfig {
        let content = format!(
            r#"
peer_id = "{peer}"

[[folders]]
id = "{FOLDER}"
path = '{root}'
index_path = '{index}'
rescan_interval_secs = 3600

[folders.versioning]
{versioning}
"#,
            peer = self.peer,
            root = self.root().display(),
            index = self.state.path().join("index.json").display(),
        );
        NodeConfig::parse(&content).unwrap()
    }

    /// Start a node whose content comes from `other`'s root.
    pub async fn start(&self, other: &Home, versioning: &str) -> Node {
        let source_root = other.root().to_path_buf();
        Node::start(
            &self.config(versioning),
            move |_| Arc::new(TreeSource::new([source_root.clone()])) as Arc<dyn ContentSource>,
            Arc::new(NativeSymlinks),
        )
        .await
        .unwrap()
    }
}

/// Forward every folder's announcements from `a` to `b` and back.
pub fn link(a: &Node, b: &Node) -> Vec<JoinHandle<()>> {
    let mut links = Vec::new();
    for folder in a.folders() {
        if let Some(peer_folder) = b.folder(folder.id()) {
            links.push(forward(folder, peer_folder.feed()));
            links.push(forward(peer_folder, folder.feed()));
        }
    }
    links
}

pub async fn stop(nodes: [&Node; 2], links: Vec<JoinHandle<()>>) {
    for node in nodes {
        node.stop().await.unwrap();
    }
    for link in links {
        link.await.unwrap();
    }
}

fn fingerprint<'e>(entries: impl Iterator<Item = &'e Entry>) -> BTreeSet<String> {
    entries
        .map(|e| format!("{}|{:?}|{:?}", e.path, e.state, e.version))
        .collect()
}

/// The receiver's completion towards the sender, as a remote API would
/// report it: every few calls the query times out, and the reading is held
/// below 100 until the receiver has heard the sender's latest state.
pub struct ReceiverCompletion<'a> {
    pub sender: &'a Node,
    pub receiver: &'a Node,
    pub calls: AtomicUsize,
}

impl<'a> ReceiverCompletion<'a> {
    pub fn new(sender: &'a Node, receiver: &'a Node) -> Self {
        Self {
            sender,
            receiver,
            calls: AtomicUsize::new(0),
        }
    }

    async fn caught_up(&self) -> Result<bool, QueryError> {
        let mut caught_up = true;
        for folder in self.sender.folders() {
            let Some(peer_folder) = self.receiver.folder(folder.id()) else {
                return Err(QueryError::Fatal(format!("receiver has no folder {}", folder.id())));
            };
            for side in [folder, peer_folder] {
                side.rescan().await.map_err(|e| QueryError::Fatal(e.to_string()))?;
            }
            let held = fingerprint(folder.snapshot().await.local_entries());
            let seen = fingerprint(peer_folder.snapshot().await.remote_entries(&self.sender.peer()));
            caught_up &= held == seen;
        }
        Ok(caught_up)
    }
}

#[async_trait]
impl CompletionQuery for ReceiverCompletion<'_> {
    async fn peer_completion(&self) -> Result<HashMap<PeerId, f64>, QueryError> {
        if self.calls.fetch_add(1, Ordering::Relaxed) % 3 == 1 {
            return Err(QueryError::Timeout);
        }
        let caught_up = self.caught_up().await?;
        let mut readings = self.receiver.peer_completion().await?;
        if !caught_up {
            for percent in readings.values_mut() {
                *percent = percent.min(99.0);
            }
            readings.entry(self.sender.peer()).or_insert(0.0);
        }
        Ok(readings)
    }
}

/// Poll until the receiver reads 100 towards the sender.
pub async fn sync(sender: &Node, receiver: &Node) {
    let policy = PollPolicy {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(200),
        max_elapsed: Duration::from_secs(30),
        query_timeout: Duration::from_secs(10),
    };
    let query = ReceiverCompletion::new(sender, receiver);
    wait_for_completion(&query, sender.peer(), &policy, None)
        .await
        .unwrap();
}

//! Folder runner
//!
//! Each folder is driven by its own task cycling through
//! `Idle -> Scanning -> Diffing -> Applying -> Idle` until stopped. The
//! [`FolderHandle`] is the only way in: peer announcements, rescan requests,
//! completion queries and stop all go through it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sync_fs::{RelPath, SymlinkOps};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::FolderConfig;
use crate::convergence::{self, Completion};
use crate::entry::{Entry, Kind, PeerId};
use crate::folder::{FolderIndex, PathLocks, Scanner};
use crate::reconcile::{AppliedOp, ContentSource, Reconciler};
use crate::versioning;
use crate::{Error, Result};

const COMMAND_BUFFER: usize = 256;
const ANNOUNCE_BUFFER: usize = 1024;

/// Where a folder is in its round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderState {
    Idle,
    Scanning,
    Diffing,
    Applying,
    Stopped,
}

impl fmt::Display for FolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FolderState::Idle => "idle",
            FolderState::Scanning => "scanning",
            FolderState::Diffing => "diffing",
            FolderState::Applying => "applying",
            FolderState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Entries one peer holds for a folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub folder: String,
    pub peer: PeerId,
    pub entries: Vec<Entry>,
}

/// Why a path is not in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFailure {
    pub message: String,
    pub retryable: bool,
    /// Round in which the failure was last seen.
    pub round: u64,
}

/// Outcome of one round.
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    pub round: u64,
    /// Local changes found by the scan.
    pub changed: usize,
    pub applied: Vec<(RelPath, AppliedOp)>,
    /// Failures of this round; `None` for failures not tied to a path.
    pub failures: Vec<(Option<RelPath>, PathFailure)>,
    /// Entries left alone because the platform cannot represent them.
    pub skipped: usize,
}

impl RoundReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Operations that actually touched the filesystem.
    pub fn operations(&self) -> usize {
        self.applied.iter().filter(|(_, op)| !op.is_noop()).count()
    }
}

enum Command {
    Announce(Announcement),
    Rescan(oneshot::Sender<RoundReport>),
}

struct Shared {
    id: String,
    peer: PeerId,
    root: PathBuf,
    index: RwLock<FolderIndex>,
    failures: Mutex<BTreeMap<RelPath, PathFailure>>,
    state: watch::Sender<FolderState>,
    outgoing: broadcast::Sender<Announcement>,
}

impl Shared {
    async fn local_announcement(&self) -> Announcement {
        let index = self.index.read().await;
        Announcement {
            folder: self.id.clone(),
            peer: self.peer,
            entries: index.local_entries().cloned().collect(),
        }
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, BTreeMap<RelPath, PathFailure>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Sending side of a folder's announcement feed.
#[derive(Debug, Clone)]
pub struct PeerFeed {
    commands: mpsc::Sender<Command>,
}

impl PeerFeed {
    /// Deliver an announcement. Fails once the folder has stopped.
    pub async fn announce(&self, announcement: Announcement) -> Result<()> {
        self.commands
            .send(Command::Announce(announcement))
            .await
            .map_err(|_| Error::Stopped)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Announce(a) => write!(f, "Announce({} from {})", a.entries.len(), a.peer),
            Command::Rescan(_) => write!(f, "Rescan"),
        }
    }
}

/// Control handle of a running folder.
pub struct FolderHandle {
    shared: Arc<Shared>,
    feed: PeerFeed,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl fmt::Debug for FolderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderHandle")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .field("state", &self.state())
            .finish()
    }
}

impl FolderHandle {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn peer(&self) -> PeerId {
        self.shared.peer
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    /// Deliver a peer announcement.
    pub async fn announce(&self, announcement: Announcement) -> Result<()> {
        self.feed.announce(announcement).await
    }

    /// A cloneable sender for announcements to this folder.
    pub fn feed(&self) -> PeerFeed {
        self.feed.clone()
    }

    /// Announcements of local changes, as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<Announcement> {
        self.shared.outgoing.subscribe()
    }

    /// Everything this node currently holds for the folder.
    pub async fn local_announcement(&self) -> Announcement {
        self.shared.local_announcement().await
    }

    /// Run a round now and wait for its report.
    pub async fn rescan(&self) -> Result<RoundReport> {
        let (tx, rx) = oneshot::channel();
        self.feed
            .commands
            .send(Command::Rescan(tx))
            .await
            .map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)
    }

    pub fn state(&self) -> FolderState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<FolderState> {
        self.shared.state.subscribe()
    }

    /// Completion towards what `peer` announced.
    pub async fn completion(&self, peer: &PeerId) -> Completion {
        let index = self.shared.index.read().await;
        convergence::completion(&index, peer)
    }

    /// Completion towards every peer that announced anything.
    pub async fn peer_completions(&self) -> HashMap<PeerId, Completion> {
        let index = self.shared.index.read().await;
        index
            .peers()
            .map(|peer| (*peer, convergence::completion(&index, peer)))
            .collect()
    }

    /// Paths currently failing, with the last failure reason.
    pub fn failures(&self) -> BTreeMap<RelPath, PathFailure> {
        self.shared.failures().clone()
    }

    /// A copy of the folder index.
    pub async fn snapshot(&self) -> FolderIndex {
        self.shared.index.read().await.clone()
    }

    /// Stop the folder. An operation in flight finishes first, then the
    /// index is persisted.
    pub async fn stop(&self) -> Result<()> {
        self.stop.send_replace(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        match task {
            Some(task) => task.await.map_err(|e| {
                tracing::error!(folder = %self.shared.id, error = %e, "Folder task failed");
                Error::Stopped
            })?,
            None => Ok(()),
        }
    }
}

/// Forward `from`'s announcements into `to`, starting with a full snapshot.
///
/// The returned task ends when either folder stops.
pub fn forward(from: &FolderHandle, to: PeerFeed) -> JoinHandle<()> {
    let mut updates = from.subscribe();
    let mut state = from.watch_state();
    let shared = Arc::clone(&from.shared);

    tokio::spawn(async move {
        let initial = shared.local_announcement().await;
        let folder = shared.id.clone();
        if to.announce(initial).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(announcement) => {
                        if to.announce(announcement).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(folder = %folder, missed, "Peer feed lagged, resending full state");
                        if to.announce(shared.local_announcement().await).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = async {
                    let _ = state.wait_for(|s| *s == FolderState::Stopped).await;
                } => break,
            }
        }
    })
}

/// Drives one folder.
pub struct FolderRunner {
    shared: Arc<Shared>,
    index_path: PathBuf,
    rescan_interval: std::time::Duration,
    reconciler: Reconciler,
    scanner: Scanner,
    symlinks_supported: bool,
    locks: PathLocks,
    commands: mpsc::Receiver<Command>,
    stop: watch::Receiver<bool>,
    round: u64,
    waiting: Vec<oneshot::Sender<RoundReport>>,
}

impl FolderRunner {
    /// Load the folder's index and start its task on the current runtime.
    ///
    /// # Errors
    ///
    /// Fails when the root does not exist, the versioning configuration is
    /// invalid or the persisted index cannot be read.
    pub fn start(
        config: &FolderConfig,
        peer: PeerId,
        content: Arc<dyn ContentSource>,
        symlinks: Arc<dyn SymlinkOps>,
    ) -> Result<FolderHandle> {
        let root = dunce::canonicalize(&config.path).map_err(|e| sync_fs::Error::io(&config.path, e))?;
        let policy = versioning::from_config(&root, &config.versioning)?;
        let index_path = config.index_file();
        let index = FolderIndex::load(&index_path)?;

        let symlinks_supported = symlinks.supported() && sync_fs::symlink::probe_support(&root);
        if !symlinks_supported {
            tracing::warn!(folder = %config.id, root = %root.display(), "Symlinks cannot be created here");
        }
        let mut scanner = Scanner::new(&root, peer)
            .with_symlinks(symlinks_supported)
            .ignore(&index_path);
        if let Some(dir) = policy.retention_dir() {
            scanner = scanner.ignore(dir);
        }
        let reconciler = Reconciler::new(&root, policy, symlinks, content);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (outgoing, _) = broadcast::channel(ANNOUNCE_BUFFER);
        let (state, _) = watch::channel(FolderState::Idle);

        let shared = Arc::new(Shared {
            id: config.id.clone(),
            peer,
            root,
            index: RwLock::new(index),
            failures: Mutex::new(BTreeMap::new()),
            state,
            outgoing,
        });

        let runner = FolderRunner {
            shared: Arc::clone(&shared),
            index_path,
            rescan_interval: config.rescan_interval(),
            reconciler,
            scanner,
            symlinks_supported,
            locks: PathLocks::new(),
            commands: command_rx,
            stop: stop_rx,
            round: 0,
            waiting: Vec::new(),
        };
        let task = tokio::spawn(runner.run());

        Ok(FolderHandle {
            shared,
            feed: PeerFeed { commands: command_tx },
            stop: stop_tx,
            task: Mutex::new(Some(task)),
        })
    }

    async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.rescan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        tracing::info!(
            folder = %self.shared.id,
            root = %self.shared.root.display(),
            policy = self.reconciler.policy().name(),
            "Folder started"
        );

        while !self.stopping() {
            let report = self.round().await;
            self.finish_round(report);
            if !self.wait_for_trigger(&mut ticker).await {
                break;
            }
        }

        let persisted = self.persist().await;
        self.shared.state.send_replace(FolderState::Stopped);
        tracing::info!(folder = %self.shared.id, "Folder stopped");
        persisted
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }

    fn set_state(&self, state: FolderState) {
        self.shared.state.send_replace(state);
    }

    /// Wait until a round is due. Returns false when the folder must stop.
    async fn wait_for_trigger(&mut self, ticker: &mut Interval) -> bool {
        loop {
            let due = tokio::select! {
                _ = ticker.tick() => true,
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        return false;
                    }
                    false
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.absorb(command).await,
                    None => return false,
                },
            };

            if due {
                // Batch whatever else is already queued into this round.
                while let Ok(command) = self.commands.try_recv() {
                    self.absorb(command).await;
                }
                return true;
            }
        }
    }

    /// Handle one command; true when it warrants a round.
    async fn absorb(&mut self, command: Command) -> bool {
        match command {
            Command::Rescan(reply) => {
                self.waiting.push(reply);
                true
            }
            Command::Announce(announcement) => self.merge(announcement).await,
        }
    }

    async fn merge(&self, announcement: Announcement) -> bool {
        if announcement.folder != self.shared.id {
            tracing::warn!(
                folder = %self.shared.id,
                other = %announcement.folder,
                "Ignoring announcement for another folder"
            );
            return false;
        }
        if announcement.peer == self.shared.peer {
            return false;
        }

        let changed = self
            .shared
            .index
            .write()
            .await
            .merge_remote(announcement.peer, announcement.entries);
        if !changed.is_empty() {
            tracing::debug!(
                folder = %self.shared.id,
                peer = %announcement.peer.short(),
                entries = changed.len(),
                "Merged announcement"
            );
        }
        !changed.is_empty()
    }

    async fn round(&mut self) -> RoundReport {
        self.round += 1;
        let mut report = RoundReport {
            round: self.round,
            ..Default::default()
        };

        self.set_state(FolderState::Scanning);
        self.scan(&mut report).await;

        self.set_state(FolderState::Diffing);
        let needed = self.diff(&mut report).await;

        self.set_state(FolderState::Applying);
        let mut applied = Vec::new();
        for target in needed {
            if self.stopping() {
                tracing::debug!(folder = %self.shared.id, "Stop requested, leaving remaining paths");
                break;
            }
            if self.apply(&target, &mut report).await {
                applied.push(target);
            }
        }
        self.publish(applied);

        self.set_state(FolderState::Idle);
        report
    }

    async fn scan(&mut self, report: &mut RoundReport) {
        let snapshot = self.shared.index.read().await.clone();
        let scanner = self.scanner.clone();
        let outcome = match tokio::task::spawn_blocking(move || scanner.scan(&snapshot)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(folder = %self.shared.id, error = %e, "Scan task failed");
                return;
            }
        };

        report.changed = outcome.changed.len();
        for failure in &outcome.failures {
            self.note_failure(report, failure.path().cloned(), failure);
        }

        {
            let mut index = self.shared.index.write().await;
            for entry in outcome.changed.iter().chain(&outcome.refreshed) {
                index.record_local(entry.clone());
            }
        }
        self.publish(outcome.changed);
    }

    async fn diff(&self, report: &mut RoundReport) -> Vec<Entry> {
        let mut needed = self.shared.index.read().await.needed();
        if !self.symlinks_supported {
            needed.retain(|entry| {
                let keep = entry.kind() != Kind::Symlink;
                if !keep {
                    tracing::warn!(
                        folder = %self.shared.id,
                        path = %entry.path,
                        "Symlinks are not supported here, ignoring entry"
                    );
                    report.skipped += 1;
                }
                keep
            });
        }
        order_for_apply(&mut needed);
        needed
    }

    /// Reconcile one path under its lock. True when it succeeded.
    async fn apply(&mut self, target: &Entry, report: &mut RoundReport) -> bool {
        let path = target.path.clone();
        let _guard = self.locks.lock(&path).await;

        let reconciler = self.reconciler.clone();
        let job = target.clone();
        let result = tokio::task::spawn_blocking(move || reconciler.reconcile(&job)).await;

        match result {
            Ok(Ok(op)) => {
                self.shared.index.write().await.record_local(target.clone());
                self.shared.failures().remove(&path);
                report.applied.push((path, op));
                true
            }
            Ok(Err(e)) => {
                self.note_failure(report, Some(path), &e);
                false
            }
            Err(e) => {
                tracing::error!(folder = %self.shared.id, path = %path, error = %e, "Reconcile task failed");
                let failure = PathFailure {
                    message: e.to_string(),
                    retryable: true,
                    round: self.round,
                };
                self.shared.failures().insert(path.clone(), failure.clone());
                report.failures.push((Some(path), failure));
                false
            }
        }
    }

    fn note_failure(&self, report: &mut RoundReport, path: Option<RelPath>, error: &Error) {
        let failure = PathFailure {
            message: error.to_string(),
            retryable: error.is_retryable(),
            round: self.round,
        };
        match &path {
            Some(p) => {
                tracing::warn!(folder = %self.shared.id, path = %p, error = %error, "Path failed");
                self.shared.failures().insert(p.clone(), failure.clone());
            }
            None => tracing::warn!(folder = %self.shared.id, error = %error, "Round failure"),
        }
        report.failures.push((path, failure));
    }

    fn publish(&self, entries: Vec<Entry>) {
        if entries.is_empty() {
            return;
        }
        // No subscribers is fine.
        let _ = self.shared.outgoing.send(Announcement {
            folder: self.shared.id.clone(),
            peer: self.shared.peer,
            entries,
        });
    }

    fn finish_round(&mut self, report: RoundReport) {
        if report.changed > 0 || !report.applied.is_empty() || !report.failures.is_empty() {
            tracing::info!(
                folder = %self.shared.id,
                round = report.round,
                changed = report.changed,
                applied = report.operations(),
                failed = report.failures.len(),
                "Round finished"
            );
        } else {
            tracing::debug!(folder = %self.shared.id, round = report.round, "Round finished, nothing to do");
        }

        for waiter in self.waiting.drain(..) {
            let _ = waiter.send(report.clone());
        }
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.shared.index.read().await.clone();
        let path = self.index_path.clone();
        let saved = tokio::task::spawn_blocking(move || snapshot.save(&path))
            .await
            .map_err(|e| {
                tracing::error!(folder = %self.shared.id, error = %e, "Index save task failed");
                Error::Stopped
            })?;
        if let Err(e) = &saved {
            tracing::warn!(folder = %self.shared.id, error = %e, "Failed to persist index");
        }
        saved
    }
}

/// Deletions deepest first, then everything else shallowest first.
pub(crate) fn order_for_apply(entries: &mut [Entry]) {
    use std::cmp::Ordering;

    entries.sort_by(|a, b| match (a.is_deleted(), b.is_deleted()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => b
            .path
            .depth()
            .cmp(&a.path.depth())
            .then_with(|| a.path.cmp(&b.path)),
        (false, false) => a
            .path
            .depth()
            .cmp(&b.path.depth())
            .then_with(|| a.path.cmp(&b.path)),
    });
}

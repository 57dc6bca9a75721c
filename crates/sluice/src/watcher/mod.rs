//! Drop-folder watching.
//!
//! Each monitored root runs its own loop fed by two sources: filesystem
//! notifications bridged into a bounded channel, and a periodic full scan
//! that catches whatever the notifications missed (network shares). Every
//! accepted path is claimed in the shared [`InFlightRegistry`] and handled in
//! its own task after a settle delay.

mod inflight;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use notify::{EventKind, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::{Disposition, MonitoredRoot, Pipeline};
use crate::transfer::{is_processed_marker, CleanupRegistry};

pub use inflight::{InFlightGuard, InFlightRegistry};

/// Extensions picked up from source directories.
pub const CANDIDATE_EXTENSIONS: [&str; 2] = ["csv", "txt"];

/// Processes one claimed file.
#[async_trait]
pub trait FileHandler: Send + Sync + 'static {
    async fn handle(&self, path: &Path, root: &MonitoredRoot) -> Disposition;
}

#[async_trait]
impl FileHandler for Pipeline {
    async fn handle(&self, path: &Path, root: &MonitoredRoot) -> Disposition {
        self.run(path, root).await.disposition
    }
}

/// Timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Full re-scan period of every root
    pub poll_interval: Duration,
    /// Wait between detection and reading
    pub settle_delay: Duration,
    /// Capacity of the notification channel; excess events are dropped
    pub channel_capacity: usize,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileSignature {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileSignature {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Watches every configured root and dispatches files to a handler.
#[derive(Clone)]
pub struct Watcher {
    roots: Vec<Arc<MonitoredRoot>>,
    handler: Arc<dyn FileHandler>,
    options: WatcherOptions,
    inflight: InFlightRegistry,
    cleanup: CleanupRegistry,
    rejected: Arc<Mutex<RejectedFiles>>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("roots", &self.roots)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(
        roots: Vec<MonitoredRoot>,
        handler: Arc<dyn FileHandler>,
        options: WatcherOptions,
        cleanup: CleanupRegistry,
    ) -> Self {
        Self {
            roots: roots.into_iter().map(Arc::new).collect(),
            handler,
            options,
            inflight: InFlightRegistry::new(),
            cleanup,
            rejected: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn inflight(&self) -> &InFlightRegistry {
        &self.inflight
    }

    pub fn roots(&self) -> &[Arc<MonitoredRoot>] {
        &self.roots
    }

    /// Create missing source, archive and error directories.
    pub fn prepare_directories(&self) -> io::Result<()> {
        for root in &self.roots {
            for dir in [&root.source, &root.archive, &root.error] {
                if !dir.exists() {
                    std::fs::create_dir_all(dir)?;
                    info!(dir = %dir.display(), "Created directory");
                }
            }
        }
        Ok(())
    }

    /// Run until `cancel` fires, then wait for in-flight jobs.
    pub async fn run(&self, cancel: CancellationToken) -> io::Result<()> {
        self.prepare_directories()?;
        let mut loops = JoinSet::new();
        for root in &self.roots {
            let watcher = self.clone();
            let root = Arc::clone(root);
            let cancel = cancel.clone();
            loops.spawn(async move { watcher.watch_root(root, cancel).await });
        }
        while let Some(result) = loops.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "Watcher loop panicked");
            }
        }
        info!("Watcher stopped");
        Ok(())
    }

    async fn watch_root(&self, root: Arc<MonitoredRoot>, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(self.options.channel_capacity.max(1));
        let fs_watcher = match start_notifications(&root.source, tx) {
            Ok(w) => Some(w),
            Err(err) => {
                warn!(
                    dir = %root.source.display(),
                    error = %err,
                    "Filesystem notifications unavailable, relying on polling"
                );
                None
            }
        };
        info!(
            dir = %root.source.display(),
            poll_secs = self.options.poll_interval.as_secs(),
            notifications = fs_watcher.is_some(),
            "Watching"
        );

        let mut workers = JoinSet::new();
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.scan(&root, &mut workers);
                }
                Some(path) = rx.recv() => {
                    self.submit(path, &root, &mut workers);
                }
                Some(result) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(err) = result {
                        error!(error = %err, "File task panicked");
                    }
                }
            }
        }

        drop(fs_watcher);
        let pending = workers.len();
        if pending > 0 {
            info!(dir = %root.source.display(), pending, "Waiting for in-flight files");
        }
        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "File task panicked");
            }
        }
    }

    /// Submit every candidate currently in the root's source directory.
    pub fn scan(&self, root: &Arc<MonitoredRoot>, workers: &mut JoinSet<()>) -> usize {
        self.prune_rejected();
        let entries = match std::fs::read_dir(&root.source) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %root.source.display(), error = %err, "Scan failed");
                return 0;
            }
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();
        paths
            .into_iter()
            .filter(|path| self.submit(path.clone(), root, workers))
            .count()
    }

    /// Claim `path` and spawn its job. `false` when the path is not a
    /// candidate or is already in flight.
    pub fn submit(&self, path: PathBuf, root: &Arc<MonitoredRoot>, workers: &mut JoinSet<()>) -> bool {
        let path = std::fs::canonicalize(&path).unwrap_or(path);
        if !self.is_candidate(&path) {
            return false;
        }
        let Some(guard) = self.inflight.try_claim(&path) else {
            debug!(path = %path.display(), "Already in flight");
            return false;
        };

        let handler = Arc::clone(&self.handler);
        let rejected = Arc::clone(&self.rejected);
        let root = Arc::clone(root);
        let settle = self.options.settle_delay;
        workers.spawn(async move {
            tokio::time::sleep(settle).await;
            let path = guard.path().to_path_buf();
            if !path.is_file() {
                debug!(path = %path.display(), "File gone before processing");
                return;
            }
            let disposition = handler.handle(&path, &root).await;
            {
                let mut rejected = lock_rejected(&rejected);
                match disposition {
                    Disposition::Rejected => {
                        if let Some(signature) = FileSignature::of(&path) {
                            rejected.insert(path.clone(), signature);
                        }
                    }
                    Disposition::Done | Disposition::Retry => {
                        rejected.remove(&path);
                    }
                }
            }
            drop(guard);
        });
        true
    }

    /// Whether `path` should be processed now.
    pub fn is_candidate(&self, path: &Path) -> bool {
        if !path.is_file() || is_processed_marker(path) || !has_candidate_extension(path) {
            return false;
        }
        if self.cleanup.contains(path) {
            return false;
        }
        let mut rejected = lock_rejected(&self.rejected);
        let known = rejected.get(path).copied();
        match known {
            Some(signature) if Some(signature) == FileSignature::of(path) => false,
            Some(_) => {
                info!(path = %path.display(), "Rejected file changed; retrying");
                rejected.remove(path);
                true
            }
            None => true,
        }
    }

    /// Forget rejected files that were removed from disk. Returns how many.
    pub fn prune_rejected(&self) -> usize {
        let mut rejected = lock_rejected(&self.rejected);
        let before = rejected.len();
        rejected.retain(|path, _| path.exists());
        let pruned = before - rejected.len();
        if pruned > 0 {
            debug!(pruned, "Forgot rejected files no longer on disk");
        }
        pruned
    }
}

type RejectedFiles = HashMap<PathBuf, FileSignature>;

fn lock_rejected(rejected: &Mutex<RejectedFiles>) -> MutexGuard<'_, RejectedFiles> {
    rejected.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        warn!("Rejected-file lock was poisoned; recovering");
        poisoned.into_inner()
    })
}

pub fn has_candidate_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CANDIDATE_EXTENSIONS.iter().any(|c| e.eq_ignore_ascii_case(c)))
        .unwrap_or(false)
}

/// Forward create/modify events for `dir` into `tx`. Events are dropped when
/// the channel is full; the periodic scan picks those files up.
fn start_notifications(dir: &Path, tx: mpsc::Sender<PathBuf>) -> notify::Result<notify::RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                for path in event.paths {
                    if tx.try_send(path).is_err() {
                        debug!("Notification channel full, event dropped");
                    }
                }
            }
        }
        Err(err) => warn!(error = %err, "Filesystem notification error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

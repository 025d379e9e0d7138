// watcher/mod.rs
// Debounced file watching and VCS-driven reconciliation

mod git_sync;

pub use git_sync::{ChangedFiles, Git2Diff, VcsDiff};

use crate::indexer::{FileOutcome, IndexOptions, Indexer};
use crate::parser::Parser;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc, watch};

/// Coalesced change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Add,
    Change,
    Unlink,
}

/// One debounced filesystem event.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchKind,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub indexed: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Watches a project root and reconciles changes into the indexer.
///
/// Events coalesce per path with a trailing-edge debounce; the newest event
/// kind wins. When `auto_reindex` is on, ready batches dispatch into the
/// indexer's single-file ingest (adds/changes) and path deletes (unlinks).
/// The `is_reindexing` guard prevents overlapping passes; events arriving
/// during a pass accumulate for the next one.
pub struct ProjectWatcher {
    indexer: Arc<Indexer>,
    parser: Arc<dyn Parser>,
    project_root: PathBuf,
    index_opts: IndexOptions,
    debounce: Duration,
    auto_reindex: bool,
    pending: Arc<RwLock<HashMap<PathBuf, (WatchKind, Instant)>>>,
    is_reindexing: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl ProjectWatcher {
    pub fn new(
        indexer: Arc<Indexer>,
        parser: Arc<dyn Parser>,
        project_root: PathBuf,
        index_opts: IndexOptions,
        debounce_ms: u64,
        auto_reindex: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            indexer,
            parser,
            project_root,
            index_opts,
            debounce: Duration::from_millis(debounce_ms),
            auto_reindex,
            pending: Arc::new(RwLock::new(HashMap::new())),
            is_reindexing: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    /// Run the watch loop until shutdown.
    pub async fn run(mut self) {
        tracing::info!(root = %self.project_root.display(), "file watcher started");

        let (tx, mut rx) = mpsc::channel::<WatchEvent>(1000);
        let tx_clone = tx.clone();
        let parser = self.parser.clone();

        let mut watcher: RecommendedWatcher = match Watcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let kind = match event.kind {
                        EventKind::Create(_) => Some(WatchKind::Add),
                        EventKind::Modify(_) => Some(WatchKind::Change),
                        EventKind::Remove(_) => Some(WatchKind::Unlink),
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        for path in event.paths {
                            if should_process_path(&path, parser.as_ref()) {
                                // try_send keeps the notify callback thread
                                // from blocking when the channel is full
                                if let Err(e) = tx_clone.try_send(WatchEvent {
                                    path,
                                    kind,
                                }) {
                                    tracing::debug!("watch event dropped: {}", e);
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("file watcher notify error: {}", e);
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        ) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!("failed to create file watcher: {}", e);
                return;
            }
        };

        if let Err(e) = watcher.watch(&self.project_root, RecursiveMode::Recursive) {
            tracing::error!("failed to watch {:?}: {}", self.project_root, e);
            return;
        }

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    self.queue_event(event).await;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    self.process_pending().await;
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("file watcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Coalesce an event into the pending map. Unlink beats earlier kinds;
    /// a later add over an unlink becomes a change.
    async fn queue_event(&self, event: WatchEvent) {
        let mut pending = self.pending.write().await;
        let kind = match (pending.get(&event.path).map(|(k, _)| *k), event.kind) {
            (Some(WatchKind::Unlink), WatchKind::Add) => WatchKind::Change,
            (Some(WatchKind::Add), WatchKind::Change) => WatchKind::Add,
            (_, kind) => kind,
        };
        pending.insert(event.path, (kind, Instant::now()));
    }

    /// Dispatch events whose debounce window has elapsed.
    async fn process_pending(&self) {
        if !self.auto_reindex {
            return;
        }
        let now = Instant::now();
        let ready: Vec<WatchEvent> = {
            let pending = self.pending.read().await;
            pending
                .iter()
                .filter(|(_, (_, stamped))| now.duration_since(*stamped) >= self.debounce)
                .map(|(path, (kind, _))| WatchEvent {
                    path: path.clone(),
                    kind: *kind,
                })
                .collect()
        };
        if ready.is_empty() {
            return;
        }

        // Overlap guard: one reindex pass at a time, later events accumulate.
        if self
            .is_reindexing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        {
            let mut pending = self.pending.write().await;
            for event in &ready {
                pending.remove(&event.path);
            }
        }

        let report = self.dispatch(&ready).await;
        if !report.failed.is_empty() {
            tracing::warn!(failures = report.failed.len(), "watcher reindex had failures");
        }

        self.is_reindexing.store(false, Ordering::SeqCst);
    }

    /// Apply a batch of events through the indexer.
    pub async fn dispatch(&self, events: &[WatchEvent]) -> SyncReport {
        let mut report = SyncReport::default();
        for event in events {
            let Some(rel) = self.relative(&event.path) else {
                continue;
            };
            match event.kind {
                WatchKind::Unlink => match self.indexer.remove_file(&rel).await {
                    Ok(removed) if !removed.is_empty() => report.removed.push(rel),
                    Ok(_) => {}
                    Err(e) => report.failed.push((rel, e.to_string())),
                },
                WatchKind::Add | WatchKind::Change => {
                    match self.indexer.index_file(&rel, &self.index_opts).await {
                        FileOutcome::Added(_) | FileOutcome::Modified(_) => {
                            report.indexed.push(rel)
                        }
                        FileOutcome::Unchanged(_) | FileOutcome::Skipped(_) => {}
                        FileOutcome::Failed(e) => report.failed.push((rel, e)),
                    }
                }
            }
        }
        report
    }

    fn relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.project_root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }
}

/// Spawn a watcher onto the runtime.
pub fn spawn(watcher: ProjectWatcher) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { watcher.run().await })
}

fn should_process_path(path: &Path, parser: &dyn Parser) -> bool {
    for component in path.components() {
        if let std::path::Component::Normal(name) = component {
            if crate::config::ignore::should_skip_dir(&name.to_string_lossy()) {
                return false;
            }
        }
    }
    parser.supports(&path.to_string_lossy())
}

/// Reconcile VCS-reported changes into the indexer, exactly like a watcher
/// batch: adds/changes ingest, deletes remove by path.
pub async fn sync_changed_files(
    indexer: &Indexer,
    changed: &ChangedFiles,
    index_opts: &IndexOptions,
) -> SyncReport {
    let mut report = SyncReport::default();

    for path in changed.added.iter().chain(changed.modified.iter()) {
        match indexer.index_file(path, index_opts).await {
            FileOutcome::Added(_) | FileOutcome::Modified(_) => report.indexed.push(path.clone()),
            FileOutcome::Unchanged(_) | FileOutcome::Skipped(_) => {}
            FileOutcome::Failed(e) => report.failed.push((path.clone(), e)),
        }
    }
    for path in &changed.deleted {
        match indexer.remove_file(path).await {
            Ok(removed) if !removed.is_empty() => report.removed.push(path.clone()),
            Ok(_) => {}
            Err(e) => report.failed.push((path.clone(), e.to_string())),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreCapabilities;
    use crate::db::test_support::setup_test_pool_with_project;
    use crate::parser::TreeSitterParser;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (ProjectWatcher, Arc<Indexer>, watch::Sender<bool>) {
        let (pool, project) = setup_test_pool_with_project().await;
        let indexer = Arc::new(Indexer::new(
            pool,
            project.tables(),
            StoreCapabilities::all(),
            Arc::new(TreeSitterParser),
            project.id,
            dir.path().to_path_buf(),
        ));
        let (tx, rx) = watch::channel(false);
        let watcher = ProjectWatcher::new(
            indexer.clone(),
            Arc::new(TreeSitterParser),
            dir.path().to_path_buf(),
            IndexOptions::default(),
            300,
            true,
            rx,
        );
        (watcher, indexer, tx)
    }

    #[tokio::test]
    async fn test_dispatch_add_and_unlink() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export function a(){}").unwrap();
        let (watcher, indexer, _tx) = setup(&dir).await;

        let report = watcher
            .dispatch(&[WatchEvent {
                path: dir.path().join("a.ts"),
                kind: WatchKind::Add,
            }])
            .await;
        assert_eq!(report.indexed, vec!["a.ts"]);

        // Unlink removes the entities
        let report = watcher
            .dispatch(&[WatchEvent {
                path: dir.path().join("a.ts"),
                kind: WatchKind::Unlink,
            }])
            .await;
        assert_eq!(report.removed, vec!["a.ts"]);

        let outcome = indexer.remove_file("a.ts").await.unwrap();
        assert!(outcome.is_empty(), "already removed");
    }

    #[tokio::test]
    async fn test_queue_event_coalesces() {
        let dir = TempDir::new().unwrap();
        let (watcher, _indexer, _tx) = setup(&dir).await;
        let path = dir.path().join("x.ts");

        watcher
            .queue_event(WatchEvent {
                path: path.clone(),
                kind: WatchKind::Add,
            })
            .await;
        watcher
            .queue_event(WatchEvent {
                path: path.clone(),
                kind: WatchKind::Change,
            })
            .await;

        let pending = watcher.pending.read().await;
        assert_eq!(pending.len(), 1);
        // add + change collapses to add (file is still new to the index)
        assert_eq!(pending.get(&path).unwrap().0, WatchKind::Add);
    }

    #[tokio::test]
    async fn test_unlink_then_add_becomes_change() {
        let dir = TempDir::new().unwrap();
        let (watcher, _indexer, _tx) = setup(&dir).await;
        let path = dir.path().join("y.ts");

        watcher
            .queue_event(WatchEvent {
                path: path.clone(),
                kind: WatchKind::Unlink,
            })
            .await;
        watcher
            .queue_event(WatchEvent {
                path: path.clone(),
                kind: WatchKind::Add,
            })
            .await;

        let pending = watcher.pending.read().await;
        assert_eq!(pending.get(&path).unwrap().0, WatchKind::Change);
    }

    #[test]
    fn test_should_process_path() {
        let parser = TreeSitterParser;
        assert!(should_process_path(Path::new("/p/src/main.rs"), &parser));
        assert!(!should_process_path(Path::new("/p/README.md"), &parser));
        assert!(!should_process_path(
            Path::new("/p/node_modules/x/index.ts"),
            &parser
        ));
        assert!(!should_process_path(Path::new("/p/.git/config"), &parser));
    }

    #[tokio::test]
    async fn test_sync_changed_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export function a(){}").unwrap();
        std::fs::write(dir.path().join("b.ts"), "export function b(){}").unwrap();
        let (_, indexer, _tx) = setup(&dir).await;

        // Seed b.ts so the delete has something to remove
        indexer.index_file("b.ts", &IndexOptions::default()).await;

        let changed = ChangedFiles {
            added: vec!["a.ts".to_string()],
            modified: vec![],
            deleted: vec!["b.ts".to_string()],
        };
        let report = sync_changed_files(&indexer, &changed, &IndexOptions::default()).await;

        assert_eq!(report.indexed, vec!["a.ts"]);
        assert_eq!(report.removed, vec!["b.ts"]);
        assert!(report.failed.is_empty());
    }
}

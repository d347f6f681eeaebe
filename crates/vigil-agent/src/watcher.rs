//! Filesystem event routing for the integrity agent.
//!
//! The watcher keeps the audit manifest current by:
//! - folding raw notify events into tagged create/modify/delete file events,
//! - applying per-path admission (mutual exclusion + modification debounce),
//! - driving admitted events through the pipeline: stability wait, retried
//!   hashing, manifest append.
//!
//! Deletions skip the gate and the hasher entirely — there is no content
//! left to hash — and unconditionally append a sentinel record. Directory
//! events are ignored; this agent only audits files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind as NotifyEventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use vigil_core::{
    DigestOutcome, EventKind, FileHasher, ManifestWriter, RetryPolicy, StabilityGate, VigilError,
    VigilResult, DEFAULT_BASE_DELAY, MISSING_DIGEST,
};

use crate::config::AgentConfig;
use crate::coordinator::{PathCoordinator, ProcessingPermit};

const WATCH_SUBSYSTEM: &str = "vigil.watch";
/// How long the worker blocks on the event channel before re-checking the
/// stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One normalized filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: EventKind,
}

impl FileEvent {
    #[must_use]
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: EventKind::Created,
        }
    }

    #[must_use]
    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: EventKind::Modified,
        }
    }

    #[must_use]
    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: EventKind::Deleted,
        }
    }
}

/// Public router statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentStats {
    /// File events that reached the router.
    pub events_received: u64,
    /// Events dropped by admission (debounced or already in flight).
    pub events_discarded: u64,
    /// Passes that appended a manifest record.
    pub passes_completed: u64,
    /// Passes abandoned early (unstable, vanished, digest unavailable).
    pub passes_abandoned: u64,
    /// Watch-backend and other subsystem errors.
    pub errors: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    events_received: AtomicU64,
    events_discarded: AtomicU64,
    passes_completed: AtomicU64,
    passes_abandoned: AtomicU64,
    errors: AtomicU64,
}

impl StatsInner {
    fn mark_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_discarded(&self) {
        self.events_discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_completed(&self) {
        self.passes_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_abandoned(&self) {
        self.passes_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AgentStats {
        AgentStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_abandoned: self.passes_abandoned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Drives one notification through admission, stability, hashing, and the
/// manifest.
pub struct EventRouter {
    coordinator: Arc<PathCoordinator>,
    gate: StabilityGate,
    hasher: FileHasher,
    retry: RetryPolicy,
    manifest: ManifestWriter,
    stats: Arc<StatsInner>,
}

impl EventRouter {
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            coordinator: Arc::new(PathCoordinator::new()),
            gate: StabilityGate::new(config.stability_checks, config.stability_interval()),
            hasher: FileHasher::new(config.hash_chunk_size),
            retry: RetryPolicy::new(config.max_hash_retries, DEFAULT_BASE_DELAY),
            manifest: ManifestWriter::new(&config.manifest_path),
            stats: Arc::new(StatsInner::default()),
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<PathCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub fn stats(&self) -> AgentStats {
        self.stats.snapshot()
    }

    /// Route one event to completion on the calling thread.
    ///
    /// The background worker uses this for deletions and runs admitted
    /// create/modify passes on their own threads; tests drive it directly
    /// for deterministic pipelines.
    pub fn route(&self, event: &FileEvent) {
        self.stats.mark_received();
        match event.kind {
            EventKind::Deleted => self.append_deleted(&event.path),
            EventKind::Created | EventKind::Modified => {
                let Some(permit) = self.coordinator.admit(&event.path, event.kind) else {
                    self.stats.mark_discarded();
                    return;
                };
                self.execute_pass(&permit, event.kind);
            }
            EventKind::Downloaded => {
                let _ = self.record_download(&event.path);
            }
        }
    }

    /// Hash an externally downloaded file and record it.
    ///
    /// The transfer itself happens elsewhere; this is the seam the download
    /// helper calls once the bytes are on disk. Returns the digest when one
    /// was produced.
    pub fn record_download(&self, path: &Path) -> Option<String> {
        let outcome = self.retry.digest_with_retry(&self.hasher, path);
        match outcome.digest {
            Some(digest) => {
                self.manifest.append(path, &digest, EventKind::Downloaded);
                info!(sha256 = %digest, "download recorded");
                self.stats.mark_completed();
                Some(digest)
            }
            None => {
                self.stats.mark_abandoned();
                None
            }
        }
    }

    fn append_deleted(&self, path: &Path) {
        warn!(path = %path.display(), "file deleted");
        self.manifest.append(path, MISSING_DIGEST, EventKind::Deleted);
        self.stats.mark_completed();
    }

    /// Run one admitted processing pass. The permit is held for the whole
    /// pass and released by the caller's scope, so the slot frees no matter
    /// where the pass exits.
    fn execute_pass(&self, permit: &ProcessingPermit, kind: EventKind) {
        let path = permit.path();
        info!(path = %path.display(), kind = %kind, "processing");

        let verdict = self.gate.wait_for(path);
        if !verdict.is_stable() {
            warn!(path = %path.display(), ?verdict, "skipped: file unstable or gone");
            self.stats.mark_abandoned();
            return;
        }

        let DigestOutcome {
            digest, attempts, ..
        } = self.retry.digest_with_retry(&self.hasher, path);
        match digest {
            Some(digest) => {
                self.manifest.append(path, &digest, kind);
                info!(sha256 = %digest, attempts, "digest recorded");
                self.stats.mark_completed();
            }
            None => {
                warn!(path = %path.display(), attempts, "digest unavailable, pass abandoned");
                self.stats.mark_abandoned();
            }
        }
    }

    /// Dispatch from the worker: deletions append inline (no blocking
    /// work), admitted create/modify passes run on their own named thread
    /// so distinct paths hash in parallel while the coordinator serializes
    /// same-path work.
    fn dispatch(self: &Arc<Self>, event: FileEvent) {
        if event.kind == EventKind::Deleted {
            self.route(&event);
            return;
        }

        self.stats.mark_received();
        let Some(permit) = self.coordinator.admit(&event.path, event.kind) else {
            self.stats.mark_discarded();
            return;
        };

        let router = Arc::clone(self);
        let kind = event.kind;
        let spawn_result = thread::Builder::new()
            .name("vigil-pass".to_owned())
            .spawn(move || {
                router.execute_pass(&permit, kind);
                drop(permit);
            });
        if let Err(error) = spawn_result {
            self.stats.mark_error();
            warn!(%error, "failed to spawn processing pass");
        }
    }
}

#[derive(Default)]
struct AgentControl {
    stop_flag: Option<Arc<AtomicBool>>,
    worker: Option<thread::JoinHandle<()>>,
}

/// Background watch service: notify backend → worker thread → router.
pub struct IntegrityAgent {
    roots: Vec<PathBuf>,
    router: Arc<EventRouter>,
    control: Mutex<AgentControl>,
}

impl IntegrityAgent {
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            roots: vec![config.watch_dir.clone(), config.download_dir.clone()],
            router: Arc::new(EventRouter::from_config(config)),
            control: Mutex::new(AgentControl::default()),
        }
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    #[must_use]
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    #[must_use]
    pub fn stats(&self) -> AgentStats {
        self.router.stats()
    }

    /// Start background watching.
    ///
    /// # Errors
    ///
    /// Returns an error when the watch backend cannot be created or no root
    /// can be registered — the only failure the process treats as fatal.
    pub fn start(&self) -> VigilResult<()> {
        let mut control = lock_or_recover(&self.control);
        if control.worker.is_some() {
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();
        let mut backend = build_notify_watcher(event_tx)?;

        let mut watched = 0_usize;
        for root in &self.roots {
            if !root.exists() {
                continue;
            }
            backend
                .watch(root, RecursiveMode::Recursive)
                .map_err(watch_error)?;
            watched = watched.saturating_add(1);
        }
        if watched == 0 {
            return Err(VigilError::Subsystem {
                subsystem: WATCH_SUBSYSTEM,
                source: "no watchable root directory exists".into(),
            });
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop_flag);
        let router = Arc::clone(&self.router);

        let worker = thread::Builder::new()
            .name("vigil-watcher".to_owned())
            .spawn(move || {
                // The backend must outlive the loop or the watches drop.
                let _backend = backend;
                run_worker_loop(&router, &event_rx, &worker_stop);
            })
            .map_err(|error| VigilError::Subsystem {
                subsystem: WATCH_SUBSYSTEM,
                source: Box::new(error),
            })?;

        control.stop_flag = Some(stop_flag);
        control.worker = Some(worker);
        info!(roots = watched, "watching for filesystem events");
        Ok(())
    }

    /// Stop background watching. In-flight hash passes finish on their own
    /// threads; manifest appends stay line-atomic either way.
    pub fn stop(&self) {
        let (stop_flag, worker) = {
            let mut control = lock_or_recover(&self.control);
            (control.stop_flag.take(), control.worker.take())
        };

        if let Some(flag) = stop_flag {
            flag.store(true, Ordering::Release);
        }
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("watcher worker panicked during shutdown");
            }
        }
    }
}

fn run_worker_loop(
    router: &Arc<EventRouter>,
    events: &mpsc::Receiver<notify::Result<Event>>,
    stop_flag: &AtomicBool,
) {
    while !stop_flag.load(Ordering::Acquire) {
        match events.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(result) => handle_notify_result(router, result),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn handle_notify_result(router: &Arc<EventRouter>, result: notify::Result<Event>) {
    match result {
        Ok(event) => {
            for file_event in map_notify_event(event) {
                router.dispatch(file_event);
            }
        }
        Err(error) => {
            router.stats.mark_error();
            warn!(%error, "watch backend emitted error");
        }
    }
}

/// Fold a raw notify event into tagged file events. Renames become a delete
/// of the source and a create of the destination.
fn map_notify_event(event: Event) -> Vec<FileEvent> {
    let Event { kind, paths, .. } = event;
    if let NotifyEventKind::Modify(ModifyKind::Name(mode)) = kind {
        return map_rename_event(paths, mode);
    }

    let Some(kind) = map_notify_kind(kind) else {
        return Vec::new();
    };

    paths
        .into_iter()
        .filter_map(|path| build_file_event(path, kind))
        .collect()
}

const fn map_notify_kind(kind: NotifyEventKind) -> Option<EventKind> {
    match kind {
        NotifyEventKind::Create(CreateKind::Folder) => None,
        NotifyEventKind::Create(_) => Some(EventKind::Created),
        NotifyEventKind::Modify(_) => Some(EventKind::Modified),
        NotifyEventKind::Remove(RemoveKind::Folder) => None,
        NotifyEventKind::Remove(_) => Some(EventKind::Deleted),
        _ => None,
    }
}

fn map_rename_event(paths: Vec<PathBuf>, mode: RenameMode) -> Vec<FileEvent> {
    match mode {
        RenameMode::Both => {
            let mut events = Vec::with_capacity(2);
            if let Some(from) = paths.first() {
                events.push(FileEvent::deleted(from.clone()));
            }
            // get(1) rather than last() so extra entries on the event do not
            // change which path counts as the destination.
            if let Some(to) = paths.get(1) {
                if let Some(event) = build_file_event(to.clone(), EventKind::Created) {
                    events.push(event);
                }
            }
            events
        }
        RenameMode::From => paths.into_iter().map(FileEvent::deleted).collect(),
        RenameMode::To => paths
            .into_iter()
            .filter_map(|path| build_file_event(path, EventKind::Created))
            .collect(),
        RenameMode::Any | RenameMode::Other => paths
            .into_iter()
            .filter_map(|path| {
                if fs::symlink_metadata(&path).is_ok() {
                    build_file_event(path, EventKind::Created)
                } else {
                    Some(FileEvent::deleted(path))
                }
            })
            .collect(),
    }
}

/// `None` for directories. Deleted paths cannot be stat'ed, so deletions
/// rely on the remove-kind hint upstream and pass through here.
fn build_file_event(path: PathBuf, kind: EventKind) -> Option<FileEvent> {
    if kind == EventKind::Deleted {
        return Some(FileEvent { path, kind });
    }
    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.is_dir() => None,
        // A path that vanished already: let the pass discover it and bail.
        Ok(_) | Err(_) => Some(FileEvent { path, kind }),
    }
}

fn build_notify_watcher(
    event_tx: mpsc::Sender<notify::Result<Event>>,
) -> VigilResult<RecommendedWatcher> {
    notify::recommended_watcher(move |event| {
        if event_tx.send(event).is_err() {
            debug!("watch event dropped because worker channel is closed");
        }
    })
    .map_err(watch_error)
}

fn watch_error(error: notify::Error) -> VigilError {
    VigilError::Subsystem {
        subsystem: WATCH_SUBSYSTEM,
        source: Box::new(error),
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

//! Folder watching and push loop (automation sender).
//!
//! A [`FolderWatcher`] polls a set of folders, archives every new or
//! modified file on its own, and pushes it on a fixed code, retrying until
//! a receiver picks it up. Files go out one at a time so the code is only
//! ever offering a single file.
//!
//! Change detection is mtime based. Each [`WatchedFolder`] keeps a
//! [`FileTracker`] that is only updated after a confirmed send, which gives
//! at-least-once delivery per modification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::code::TransferCode;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventSink};
use crate::session::{run_tool, SessionOutcome};
use crate::tools::{classify_line, Archiver, LineKind, TransferRequest, TransferTool};

/// Prefix of the watcher's temporary archive directory.
pub const WATCH_PREFIX: &str = "packrelay_watch_";

/// Last confirmed-sent modification time per file.
#[derive(Debug, Clone, Default)]
pub struct FileTracker {
    sent: HashMap<PathBuf, SystemTime>,
}

impl FileTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A file is eligible if it was never sent or changed since it was.
    #[must_use]
    pub fn is_eligible(&self, path: &Path, mtime: SystemTime) -> bool {
        self.sent.get(path).is_none_or(|recorded| mtime > *recorded)
    }

    /// Record a confirmed send. The stored time never moves backwards.
    pub fn record(&mut self, path: PathBuf, mtime: SystemTime) {
        self.sent
            .entry(path)
            .and_modify(|recorded| {
                if mtime > *recorded {
                    *recorded = mtime;
                }
            })
            .or_insert(mtime);
    }

    /// Recorded time for `path`, if it was ever sent.
    #[must_use]
    pub fn recorded(&self, path: &Path) -> Option<SystemTime> {
        self.sent.get(path).copied()
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.len()
    }

    /// Whether nothing has been sent yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

/// A watched folder and its tracker.
#[derive(Debug, Clone)]
pub struct WatchedFolder {
    path: PathBuf,
    tracker: FileTracker,
}

impl WatchedFolder {
    /// Watch `path` with an empty tracker.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tracker: FileTracker::new(),
        }
    }

    /// The folder.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The folder's tracker.
    #[must_use]
    pub fn tracker(&self) -> &FileTracker {
        &self.tracker
    }

    /// Files below the folder that are due for sending, sorted.
    ///
    /// A missing folder yields nothing; files that vanish or cannot be
    /// stat'ed are skipped.
    #[must_use]
    pub fn scan(&self) -> Vec<PathBuf> {
        if !self.path.exists() {
            return Vec::new();
        }

        let mut due: Vec<PathBuf> = WalkDir::new(&self.path)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let mtime = entry.metadata().ok()?.modified().ok()?;
                let path = entry.into_path();
                self.tracker.is_eligible(&path, mtime).then_some(path)
            })
            .collect();
        due.sort();
        due
    }
}

/// What happened to one detected file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Delivered and recorded
    Sent,
    /// Vanished or could not be archived; picked up again on a later scan
    Skipped,
    /// The watcher was stopped before delivery
    Stopped,
    /// The transfer tool is not installed
    ToolMissing,
}

/// Pushes changed files from watched folders on a fixed code.
#[derive(Debug)]
pub struct FolderWatcher {
    folders: Vec<WatchedFolder>,
    code: TransferCode,
    archiver: Arc<dyn Archiver>,
    tool: Arc<dyn TransferTool>,
    delete_originals: bool,
    interval: Duration,
    retry_backoff: Duration,
    temp_dir: TempDir,
}

impl FolderWatcher {
    /// Create a watcher over `folders` pushing on `code`.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary archive directory cannot be created.
    pub fn new(
        folders: impl IntoIterator<Item = PathBuf>,
        code: TransferCode,
        archiver: Arc<dyn Archiver>,
        tool: Arc<dyn TransferTool>,
    ) -> Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix(WATCH_PREFIX).tempdir()?;

        Ok(Self {
            folders: folders.into_iter().map(WatchedFolder::new).collect(),
            code,
            archiver,
            tool,
            delete_originals: false,
            interval: Duration::from_secs(crate::DEFAULT_WATCH_INTERVAL_SECS),
            retry_backoff: Duration::from_secs(crate::DEFAULT_RETRY_BACKOFF_SECS),
            temp_dir,
        })
    }

    /// Delete each original after its send is confirmed.
    #[must_use]
    pub fn delete_originals(mut self, enabled: bool) -> Self {
        self.delete_originals = enabled;
        self
    }

    /// Idle time between scans.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wait between send attempts the receiver did not pick up.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The watched folders.
    #[must_use]
    pub fn folders(&self) -> &[WatchedFolder] {
        &self.folders
    }

    /// Directory archives are staged in.
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Run the watch loop on a new task.
    pub fn start(self, events: EventSink) -> WatcherHandle {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let task = tokio::spawn(self.run(events, token));
        WatcherHandle { stop, task }
    }

    /// Scan, push and idle until `stop` is cancelled.
    ///
    /// Emits [`CoreEvent::WatcherStopped`] on exit and removes the
    /// temporary directory.
    pub async fn run(mut self, events: EventSink, stop: CancellationToken) {
        events.info(format!(
            "[Watcher] Monitoring {} folders for changes...",
            self.folders.len()
        ));
        if self.delete_originals {
            events.info("[Watcher] Auto-delete is enabled. Originals will be deleted after sending.");
        }

        while !stop.is_cancelled() {
            if self.cycle(&events, &stop).await.contains(&PushOutcome::ToolMissing) {
                break;
            }

            tokio::select! {
                () = stop.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        let temp = self.temp_dir.path().to_path_buf();
        if let Err(e) = self.temp_dir.close() {
            tracing::warn!("Failed to remove {}: {e}", temp.display());
        }

        events.info("[Watcher] Stopped.");
        events.emit(CoreEvent::WatcherStopped);
    }

    /// One scan over every folder followed by a push of each due file.
    ///
    /// Returns the outcome per pushed file, in order. Stops early when the
    /// watcher is stopped or the transfer tool is missing.
    pub async fn cycle(&mut self, events: &EventSink, stop: &CancellationToken) -> Vec<PushOutcome> {
        let due: Vec<(usize, PathBuf)> = self
            .folders
            .iter()
            .enumerate()
            .flat_map(|(idx, folder)| folder.scan().into_iter().map(move |p| (idx, p)))
            .collect();

        if due.is_empty() {
            return Vec::new();
        }

        events.info(format!("[Watcher] Detected {} new/modified items.", due.len()));

        let mut outcomes = Vec::with_capacity(due.len());
        for (idx, path) in due {
            if stop.is_cancelled() {
                break;
            }
            let outcome = self.push(idx, &path, events, stop).await;
            outcomes.push(outcome);
            if matches!(outcome, PushOutcome::Stopped | PushOutcome::ToolMissing) {
                break;
            }
        }
        outcomes
    }

    async fn push(
        &mut self,
        folder: usize,
        path: &Path,
        events: &EventSink,
        stop: &CancellationToken,
    ) -> PushOutcome {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Content is read at archive time, so this is the version being sent.
        let Ok(archived_mtime) = modified(path) else {
            tracing::debug!("{} vanished before archiving", path.display());
            return PushOutcome::Skipped;
        };

        let archive = self.archiver.archive_path(self.temp_dir.path(), path);
        events.info(format!("[Watcher]   -> Archiving: {name}"));

        if let Err(e) = self.compress(path, &archive).await {
            events.warn(format!("[Watcher] Could not archive {name}: {e}"));
            return PushOutcome::Skipped;
        }

        let outcome = self.send_with_retry(&archive, &name, events, stop).await;
        if outcome != PushOutcome::Sent {
            return outcome;
        }

        self.folders[folder]
            .tracker
            .record(path.to_path_buf(), archived_mtime);

        if let Err(e) = std::fs::remove_file(&archive) {
            tracing::debug!("Could not remove {}: {e}", archive.display());
        }

        if self.delete_originals {
            self.remove_original(path, &name, archived_mtime, events);
        }

        events.emit(CoreEvent::FilePushed {
            path: path.to_path_buf(),
        });
        PushOutcome::Sent
    }

    async fn compress(&self, source: &Path, archive: &Path) -> Result<()> {
        let archiver = Arc::clone(&self.archiver);
        let source = source.to_path_buf();
        let archive = archive.to_path_buf();

        tokio::task::spawn_blocking(move || {
            if archive.exists() {
                std::fs::remove_file(&archive)?;
            }
            archiver.compress(&source, &archive)
        })
        .await
        .map_err(|e| Error::Internal(format!("archive task failed: {e}")))?
    }

    async fn send_with_retry(
        &self,
        archive: &Path,
        name: &str,
        events: &EventSink,
        stop: &CancellationToken,
    ) -> PushOutcome {
        let request = TransferRequest::Send {
            code: self.code.clone(),
            path: archive.to_path_buf(),
        };

        events.info(format!(
            "[Watcher] Hosting '{name}' on code '{}'. Waiting for receiver...",
            self.code
        ));

        loop {
            let outcome = run_tool(self.tool.as_ref(), &request, stop, |line| {
                if classify_line(line) == LineKind::Error {
                    events.warn(format!("[Watcher] Transfer warning: {line}"));
                } else {
                    tracing::debug!(target: "packrelay_core::tool_output", "{line}");
                }
            })
            .await;

            match outcome {
                SessionOutcome::Succeeded => {
                    events.info(format!("[Watcher] Sent: {name}"));
                    return PushOutcome::Sent;
                }
                SessionOutcome::Stopped => return PushOutcome::Stopped,
                SessionOutcome::ToolMissing { tool } => {
                    events.error(format!("[Watcher] '{tool}' command not found. Stopping."));
                    events.emit(CoreEvent::ToolMissing { tool });
                    return PushOutcome::ToolMissing;
                }
                SessionOutcome::Failed { .. } => {
                    events.info(format!(
                        "[Watcher] Receiver busy/offline. Retrying '{name}' in {}s...",
                        self.retry_backoff.as_secs_f32()
                    ));
                    tokio::select! {
                        () = stop.cancelled() => return PushOutcome::Stopped,
                        () = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }

    fn remove_original(&self, path: &Path, name: &str, archived_mtime: SystemTime, events: &EventSink) {
        match modified(path) {
            Ok(current) if current == archived_mtime => match std::fs::remove_file(path) {
                Ok(()) => events.info(format!("[Watcher] Removed original: {name}")),
                Err(e) => events.warn(format!("[Watcher] Could not remove original {name}: {e}")),
            },
            Ok(_) => events.info(format!(
                "[Watcher] Kept original {name}: it changed while sending and will be sent again"
            )),
            Err(e) => tracing::debug!("Original {} already gone: {e}", path.display()),
        }
    }
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

/// Handle to a running [`FolderWatcher`].
#[derive(Debug)]
pub struct WatcherHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Ask the watcher to stop. An in-flight send is abandoned.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the watcher loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::error!("Watcher task failed: {e}");
        }
    }
}

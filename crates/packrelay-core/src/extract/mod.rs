//! Live extraction of arriving archives.
//!
//! Received content lands as archives. [`LiveExtractor`] polls a destination
//! tree and, for each archive that is complete, tests it, extracts it next
//! to itself and deletes it, so the user only ever sees plain files.
//!
//! Nothing here is fatal: an archive that is still arriving, corrupt or
//! locked is left where it is and retried on the next pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::events::{CoreEvent, EventSink};
use crate::tools::{strip_archive_extension, Archiver};

/// Whether the transfer tool has finished writing `path`.
///
/// On Windows an open-for-append fails while another process still holds the
/// file; elsewhere there is no such signal and every file counts as ready.
#[cfg(windows)]
fn is_ready(path: &Path) -> bool {
    std::fs::OpenOptions::new().append(true).open(path).is_ok()
}

#[cfg(not(windows))]
fn is_ready(_path: &Path) -> bool {
    true
}

fn find_archives(root: &Path, archiver: &dyn Archiver) -> Vec<PathBuf> {
    let mut archives: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| archiver.is_archive(path))
        .collect();
    archives.sort();
    archives
}

/// Run one extraction pass over `root`.
///
/// For every archive below `root`: optionally check readiness, test it,
/// extract it into its own directory, delete it and emit
/// [`CoreEvent::Extracted`]. Returns the number of archives extracted.
/// Blocks while the archiver runs.
pub fn extract_pass(root: &Path, archiver: &dyn Archiver, events: &EventSink, check_ready: bool) -> usize {
    let mut extracted = 0;

    for archive in find_archives(root, archiver) {
        if check_ready && !is_ready(&archive) {
            tracing::debug!("{} is still being written", archive.display());
            continue;
        }

        if let Err(e) = archiver.test(&archive) {
            if e.is_tool_missing() {
                events.error(format!("Cannot extract: {e}"));
                break;
            }
            tracing::debug!("{} not complete yet: {e}", archive.display());
            continue;
        }

        let dest = archive
            .parent()
            .map_or_else(|| root.to_path_buf(), Path::to_path_buf);

        if let Err(e) = archiver.extract(&archive, &dest) {
            events.warn(format!("Failed to extract {}: {e}", archive.display()));
            continue;
        }

        if let Err(e) = std::fs::remove_file(&archive) {
            events.warn(format!("Extracted {} but could not delete it: {e}", archive.display()));
            continue;
        }

        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = strip_archive_extension(&file_name, archiver.extension()).to_string();

        events.info(format!("Extracted & ready: {name}"));
        events.emit(CoreEvent::Extracted { name, path: dest });
        extracted += 1;
    }

    extracted
}

/// [`extract_pass`] on the blocking thread pool.
pub(crate) async fn extract_pass_blocking(
    root: PathBuf,
    archiver: Arc<dyn Archiver>,
    events: EventSink,
    check_ready: bool,
) -> usize {
    tokio::task::spawn_blocking(move || extract_pass(&root, archiver.as_ref(), &events, check_ready))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Extraction pass panicked: {e}");
            0
        })
}

/// Polls a destination tree and unpacks archives as they complete.
#[derive(Debug, Clone)]
pub struct LiveExtractor {
    root: PathBuf,
    archiver: Arc<dyn Archiver>,
    poll_interval: Duration,
}

impl LiveExtractor {
    /// Create an extractor for `root` with the default poll interval.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, archiver: Arc<dyn Archiver>) -> Self {
        Self {
            root: root.into(),
            archiver,
            poll_interval: Duration::from_millis(crate::DEFAULT_EXTRACT_POLL_MS),
        }
    }

    /// Set the interval between passes.
    #[must_use]
    pub fn with_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Destination tree being polled.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start polling on a new task.
    ///
    /// After a stop is requested the task runs one final pass, so archives
    /// that arrived just before shutdown are still unpacked.
    pub fn start(self, events: EventSink) -> ExtractorHandle {
        let stop = CancellationToken::new();
        let token = stop.clone();

        let task = tokio::spawn(async move {
            tracing::debug!("Live extractor watching {}", self.root.display());

            loop {
                self.pass(&events).await;

                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }

            self.pass(&events).await;
            tracing::debug!("Live extractor for {} stopped", self.root.display());
        });

        ExtractorHandle { stop, task }
    }

    async fn pass(&self, events: &EventSink) -> usize {
        extract_pass_blocking(
            self.root.clone(),
            Arc::clone(&self.archiver),
            events.clone(),
            true,
        )
        .await
    }
}

/// Handle to a running [`LiveExtractor`].
#[derive(Debug)]
pub struct ExtractorHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ExtractorHandle {
    /// Ask the extractor to finish after one final pass.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the extractor task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the final pass to complete.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::error!("Live extractor task failed: {e}");
        }
    }
}

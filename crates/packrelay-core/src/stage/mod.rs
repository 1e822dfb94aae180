//! Staging of send requests.
//!
//! A send request is turned into a [`StagingUnit`] before the transfer tool
//! ever runs: a temporary directory holding archives of the source. The unit
//! outlives individual transfer attempts so that a paused send resumes
//! against the very same archives.
//!
//! ## Layout
//!
//! ```text
//! packrelay_send_XXXX/            <- temp root
//! ├── photos/                      <- payload, for a directory source
//! │   ├── a.jpg.7z
//! │   └── trip.7z                  (one archive per immediate entry)
//! └── notes.txt.7z                 <- payload, for a file source
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventSink};
use crate::tools::Archiver;

/// Prefix of staging directories inside the system temp directory.
pub const STAGING_PREFIX: &str = "packrelay_send_";

/// Archives produced for one send request.
///
/// Owns its temporary directory: [`cleanup`](Self::cleanup) removes it
/// explicitly, and dropping the unit removes it as well.
#[derive(Debug)]
pub struct StagingUnit {
    temp_root: TempDir,
    payload: PathBuf,
    archives: Vec<PathBuf>,
}

impl StagingUnit {
    /// Root of the temporary directory.
    #[must_use]
    pub fn temp_root(&self) -> &Path {
        self.temp_root.path()
    }

    /// Path handed to the transfer tool: the staged folder or the single archive.
    #[must_use]
    pub fn payload(&self) -> &Path {
        &self.payload
    }

    /// Every archive produced.
    #[must_use]
    pub fn archive_paths(&self) -> &[PathBuf] {
        &self.archives
    }

    /// Delete the temporary directory. Failures are logged, not returned.
    pub fn cleanup(self) {
        let root = self.temp_root.path().to_path_buf();
        if let Err(e) = self.temp_root.close() {
            tracing::warn!("Failed to remove staging directory {}: {e}", root.display());
        } else {
            tracing::debug!("Removed staging directory {}", root.display());
        }
    }
}

/// Produces [`StagingUnit`]s using an [`Archiver`].
#[derive(Debug, Clone)]
pub struct ArchiveStager {
    archiver: Arc<dyn Archiver>,
}

impl ArchiveStager {
    /// Create a stager using `archiver`.
    #[must_use]
    pub fn new(archiver: Arc<dyn Archiver>) -> Self {
        Self { archiver }
    }

    /// Stage `source` (file or directory).
    ///
    /// A directory is staged as a folder of the same name holding one
    /// archive per immediate entry; a file becomes a single archive. Blocks
    /// until the archiver has finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if `source` does not exist, and
    /// [`Error::StagingFailed`] (or [`Error::ToolMissing`]) if any archiver
    /// invocation fails. On error the temporary directory is already gone.
    pub fn stage(&self, source: &Path, events: &EventSink) -> Result<StagingUnit> {
        let meta = std::fs::metadata(source)
            .map_err(|_| Error::FileNotFound(source.display().to_string()))?;

        events.info("Preparing files for transfer (archiving)...");

        let temp_root = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir()
            .map_err(|e| Error::StagingFailed(format!("cannot create staging directory: {e}")))?;

        let name = source_name(source);
        let mut archives = Vec::new();

        let payload = if meta.is_dir() {
            let staged = temp_root.path().join(&name);
            std::fs::create_dir(&staged)?;

            let mut entries: Vec<PathBuf> = std::fs::read_dir(source)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .collect();
            entries.sort();

            for entry in entries {
                let archive = self.archiver.archive_path(&staged, &entry);
                events.info(format!("  -> Archiving: {}", source_name(&entry)));
                self.compress(&entry, &archive)?;
                archives.push(archive);
            }
            staged
        } else {
            let archive = self.archiver.archive_path(temp_root.path(), source);
            events.info("  -> Archiving file...");
            self.compress(source, &archive)?;
            archives.push(archive.clone());
            archive
        };

        events.info("Archiving complete.");
        events.emit(CoreEvent::SendStaged {
            payload: payload.clone(),
        });

        Ok(StagingUnit {
            temp_root,
            payload,
            archives,
        })
    }

    /// [`stage`](Self::stage) on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`stage`](Self::stage).
    pub async fn stage_async(&self, source: PathBuf, events: EventSink) -> Result<StagingUnit> {
        let stager = self.clone();
        tokio::task::spawn_blocking(move || stager.stage(&source, &events))
            .await
            .map_err(|e| Error::Internal(format!("staging task failed: {e}")))?
    }

    fn compress(&self, source: &Path, archive: &Path) -> Result<()> {
        if archive.exists() {
            std::fs::remove_file(archive)?;
        }

        self.archiver.compress(source, archive).map_err(|e| match e {
            Error::ToolMissing { .. } => e,
            other => Error::StagingFailed(format!("{}: {other}", source.display())),
        })
    }
}

/// Final component of `path`, resolving `.` and trailing separators.
fn source_name(path: &Path) -> String {
    path.file_name()
        .map(ToOwned::to_owned)
        .or_else(|| {
            std::fs::canonicalize(path)
                .ok()
                .and_then(|p| p.file_name().map(ToOwned::to_owned))
        })
        .map_or_else(|| "archive".to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes the source name into the archive; fails for names containing "bad".
    #[derive(Debug, Default)]
    struct NameArchiver {
        calls: AtomicUsize,
    }

    impl Archiver for NameArchiver {
        fn compress(&self, source: &Path, archive: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = source_name(source);
            if name.contains("bad") {
                return Err(Error::ToolFailure {
                    tool: "7z".to_string(),
                    operation: "compress".to_string(),
                    exit_code: Some(2),
                });
            }
            std::fs::write(archive, name)?;
            Ok(())
        }

        fn test(&self, _archive: &Path) -> Result<()> {
            Ok(())
        }

        fn extract(&self, _archive: &Path, _dest: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stage_directory_per_entry() {
        let src = TempDir::new().unwrap();
        let dir = src.path().join("docs");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), "a").unwrap();
        std::fs::write(dir.join("b.txt"), "b").unwrap();

        let (events, mut rx) = EventSink::channel();
        let stager = ArchiveStager::new(Arc::new(NameArchiver::default()));
        let unit = stager.stage(&dir, &events).unwrap();

        assert_eq!(unit.payload(), unit.temp_root().join("docs"));
        assert!(unit
            .temp_root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(STAGING_PREFIX));

        let names: Vec<_> = unit
            .archive_paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt.7z", "b.txt.7z"]);
        assert!(unit.archive_paths().iter().all(|p| p.exists()));

        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, CoreEvent::SendStaged { payload } if payload == unit.payload())));

        let root = unit.temp_root().to_path_buf();
        unit.cleanup();
        assert!(!root.exists());
    }

    #[test]
    fn test_stage_single_file() {
        let src = TempDir::new().unwrap();
        let file = src.path().join("notes.txt");
        std::fs::write(&file, "hello").unwrap();

        let (events, _rx) = EventSink::channel();
        let unit = ArchiveStager::new(Arc::new(NameArchiver::default()))
            .stage(&file, &events)
            .unwrap();

        assert_eq!(unit.payload(), unit.temp_root().join("notes.txt.7z"));
        assert_eq!(unit.archive_paths(), &[unit.payload().to_path_buf()]);
    }

    #[test]
    fn test_stage_failure_leaves_nothing() {
        let src = TempDir::new().unwrap();
        let dir = src.path().join("docs");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("bad.txt"), "x").unwrap();

        let (events, mut rx) = EventSink::channel();
        let err = ArchiveStager::new(Arc::new(NameArchiver::default()))
            .stage(&dir, &events)
            .unwrap_err();

        assert!(matches!(err, Error::StagingFailed(_)));
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, CoreEvent::SendStaged { .. })));
    }

    #[test]
    fn test_stage_missing_source() {
        let (events, _rx) = EventSink::channel();
        let err = ArchiveStager::new(Arc::new(NameArchiver::default()))
            .stage(Path::new("/nonexistent/packrelay/source"), &events)
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn test_drop_removes_temp_root() {
        let src = TempDir::new().unwrap();
        let file = src.path().join("x.bin");
        std::fs::write(&file, [0u8; 4]).unwrap();

        let (events, _rx) = EventSink::channel();
        let unit = ArchiveStager::new(Arc::new(NameArchiver::default()))
            .stage(&file, &events)
            .unwrap();
        let root = unit.temp_root().to_path_buf();
        drop(unit);
        assert!(!root.exists());
    }
}

//! Adapters for the external collaborators.
//!
//! PackRelay does not implement a transport or a compression format. It
//! drives two black-box programs:
//!
//! - an [`Archiver`] (7-Zip) that compresses, tests and extracts archives,
//! - a [`TransferTool`] (croc) that performs one rendezvous transfer per run.
//!
//! Both are traits so the orchestration code can be exercised without the
//! real binaries installed.

use std::path::{Path, PathBuf};

use crate::code::TransferCode;
use crate::error::Result;

pub mod archiver;
pub mod croc;

pub use archiver::SevenZip;
pub use croc::Croc;

/// Compresses, tests and extracts single archives.
///
/// Implementations block until the operation has finished; async callers
/// should run them on the blocking pool.
pub trait Archiver: Send + Sync + std::fmt::Debug {
    /// File extension (without the dot) of archives this archiver produces.
    fn extension(&self) -> &str {
        crate::ARCHIVE_EXTENSION
    }

    /// Archive `source` (a file or a directory) into `archive`.
    fn compress(&self, source: &Path, archive: &Path) -> Result<()>;

    /// Verify that `archive` is complete and readable.
    fn test(&self, archive: &Path) -> Result<()>;

    /// Extract `archive` into `dest`, overwriting existing entries.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;

    /// Archive path for `source` inside `dir`: `<dir>/<name>.<ext>`.
    fn archive_path(&self, dir: &Path, source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map_or_else(|| "archive".into(), |n| n.to_string_lossy().into_owned());
        dir.join(format!("{name}.{}", self.extension()))
    }

    /// Whether `path` names an archive produced by this archiver.
    fn is_archive(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(self.extension()))
            .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
    }
}

/// What a single transfer tool run should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    /// Offer `path` under `code` and wait for a receiver
    Send {
        /// Pairing code
        code: TransferCode,
        /// File or directory to send
        path: PathBuf,
    },
    /// Receive whatever is offered under `code` into `out_dir`
    Receive {
        /// Pairing code
        code: TransferCode,
        /// Destination directory
        out_dir: PathBuf,
    },
}

impl TransferRequest {
    /// The pairing code of this request.
    #[must_use]
    pub fn code(&self) -> &TransferCode {
        match self {
            Self::Send { code, .. } | Self::Receive { code, .. } => code,
        }
    }

    /// Short name of the role, for log lines.
    #[must_use]
    pub fn role(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Receive { .. } => "receive",
        }
    }
}

/// Builds the process invocation for one transfer.
pub trait TransferTool: Send + Sync + std::fmt::Debug {
    /// Name used in log lines and error messages.
    fn name(&self) -> &str;

    /// Command that performs `request`. Exit code 0 means success.
    fn command(&self, request: &TransferRequest) -> tokio::process::Command;
}

/// Rough classification of a free-form output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Transfer progress worth showing
    Progress,
    /// Looks like the tool is complaining
    Error,
    /// Anything else
    Other,
}

const PROGRESS_KEYWORDS: &[&str] = &["%", "receiving", "download", "mb", "kb", "speed"];
const ERROR_KEYWORDS: &[&str] = &["error", "failed", "flag", "command not found"];

/// Classify a line of tool output by keyword.
///
/// This is a heuristic over human-readable text, not a protocol. Error
/// keywords win over progress keywords.
pub fn classify_line(line: &str) -> LineKind {
    let lower = line.to_lowercase();
    if ERROR_KEYWORDS.iter().any(|k| lower.contains(k)) {
        LineKind::Error
    } else if PROGRESS_KEYWORDS.iter().any(|k| lower.contains(k)) {
        LineKind::Progress
    } else {
        LineKind::Other
    }
}

/// Strip the archive extension from a file name, if present.
pub fn strip_archive_extension<'a>(name: &'a str, extension: &str) -> &'a str {
    name.strip_suffix(extension)
        .and_then(|s| s.strip_suffix('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullArchiver;

    impl Archiver for NullArchiver {
        fn compress(&self, _source: &Path, _archive: &Path) -> Result<()> {
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
    fn test_classify_line() {
        assert_eq!(classify_line("a.txt.7z 45% |████ | (1.2 MB/s)"), LineKind::Progress);
        assert_eq!(classify_line("Receiving (<-127.0.0.1)"), LineKind::Progress);
        assert_eq!(classify_line("Error: room not ready"), LineKind::Error);
        assert_eq!(classify_line("bash: croc: command not found"), LineKind::Error);
        assert_eq!(classify_line("Incorrect Usage: flag provided but not defined"), LineKind::Error);
        assert_eq!(classify_line("Code is: red-77zz1"), LineKind::Other);
    }

    #[test]
    fn test_error_wins_over_progress() {
        assert_eq!(classify_line("download failed at 50%"), LineKind::Error);
    }

    #[test]
    fn test_archive_helpers() {
        let archiver = NullArchiver;
        assert_eq!(
            archiver.archive_path(Path::new("/tmp/stage"), Path::new("/data/a.txt")),
            PathBuf::from("/tmp/stage/a.txt.7z")
        );
        assert!(archiver.is_archive(Path::new("/x/a.txt.7z")));
        assert!(!archiver.is_archive(Path::new("/x/a.txt")));
        assert!(!archiver.is_archive(Path::new("/x/.7z")));
        assert!(!archiver.is_archive(Path::new("/x/photo7z")));
    }

    #[test]
    fn test_strip_archive_extension() {
        assert_eq!(strip_archive_extension("img.7z", "7z"), "img");
        assert_eq!(strip_archive_extension("a.txt.7z", "7z"), "a.txt");
        assert_eq!(strip_archive_extension("notes", "7z"), "notes");
        assert_eq!(strip_archive_extension(".7z", "7z"), ".7z");
    }

    #[test]
    fn test_request_accessors() {
        let code = TransferCode::parse("red-77zz1").unwrap();
        let request = TransferRequest::Receive {
            code: code.clone(),
            out_dir: PathBuf::from("Photos"),
        };
        assert_eq!(request.code(), &code);
        assert_eq!(request.role(), "receive");
    }
}

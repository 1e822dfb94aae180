//! 7-Zip detection and execution.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use super::Archiver;
use crate::error::{Error, Result};

/// Keeps console windows from flashing up on Windows.
#[cfg(windows)]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Standard install locations checked before falling back to `PATH`.
#[cfg(windows)]
const WINDOWS_INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\7-Zip\7z.exe",
    r"C:\Program Files (x86)\7-Zip\7z.exe",
];

/// Executable names tried on `PATH`, in order.
const PATH_CANDIDATES: &[&str] = &["7z", "7zz", "7za"];

/// The 7-Zip command line archiver.
#[derive(Debug, Clone)]
pub struct SevenZip {
    binary: PathBuf,
    level: u8,
}

impl SevenZip {
    /// Use the 7-Zip executable at `binary`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            level: crate::DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Set the compression level (`-mx`), clamped to 0..=9.
    #[must_use]
    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level.min(9);
        self
    }

    /// Find an installed 7-Zip.
    ///
    /// Checks the standard Windows install directories first, then the
    /// executable names 7-Zip ships under on `PATH`.
    #[must_use]
    pub fn locate() -> Option<Self> {
        #[cfg(windows)]
        for candidate in WINDOWS_INSTALL_PATHS {
            if Path::new(candidate).exists() {
                return Some(Self::new(candidate));
            }
        }

        PATH_CANDIDATES
            .iter()
            .map(|name| Self::new(*name))
            .find(Self::is_available)
    }

    /// Check whether the configured binary can be started.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.base_command().status().is_ok()
    }

    /// Path of the executable.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Compression level passed as `-mx`.
    #[must_use]
    pub fn level(&self) -> u8 {
        self.level
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd
    }

    fn run(&self, operation: &str, args: &[OsString]) -> Result<()> {
        tracing::debug!(
            "Running {} {}",
            self.binary.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let status = self.base_command().args(args).status().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolMissing {
                    tool: self.binary.display().to_string(),
                }
            } else {
                Error::Io(e)
            }
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::ToolFailure {
                tool: "7z".to_string(),
                operation: operation.to_string(),
                exit_code: status.code(),
            })
        }
    }

    /// Arguments for `compress`.
    #[must_use]
    pub fn compress_args(&self, source: &Path, archive: &Path) -> Vec<OsString> {
        vec![
            "a".into(),
            format!("-mx={}", self.level).into(),
            archive.into(),
            source.into(),
        ]
    }

    /// Arguments for `test`.
    #[must_use]
    pub fn test_args(archive: &Path) -> Vec<OsString> {
        vec!["t".into(), archive.into()]
    }

    /// Arguments for `extract`.
    #[must_use]
    pub fn extract_args(archive: &Path, dest: &Path) -> Vec<OsString> {
        let mut out = OsString::from("-o");
        out.push(dest);
        vec!["x".into(), "-y".into(), archive.into(), out]
    }
}

impl Archiver for SevenZip {
    fn compress(&self, source: &Path, archive: &Path) -> Result<()> {
        self.run("compress", &self.compress_args(source, archive))
    }

    fn test(&self, archive: &Path) -> Result<()> {
        self.run("test", &Self::test_args(archive))
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        self.run("extract", &Self::extract_args(archive, dest))
    }
}

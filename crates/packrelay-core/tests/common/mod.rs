//! Common test utilities for `PackRelay` integration tests.
//!
//! The real archiver and transfer tool are replaced by doubles: an
//! in-process archiver that copies bytes, and `sh` scripts standing in for
//! croc. Scripts see the request through environment variables:
//!
//! - `PACKRELAY_CODE`: the pairing code
//! - `PACKRELAY_PATH`: the payload of a send
//! - `PACKRELAY_OUT`: the output directory of a receive

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use packrelay_core::code::TransferCode;
use packrelay_core::events::CoreEvent;
use packrelay_core::tools::{strip_archive_extension, Archiver, TransferRequest, TransferTool};
use packrelay_core::{Error, Result};

/// Archiver double: an "archive" is a byte copy of a single file.
///
/// Archives whose content is `partial` fail the integrity test.
#[derive(Debug, Default)]
pub struct CopyArchiver {
    compressions: AtomicUsize,
}

impl CopyArchiver {
    /// Shared instance, so tests can keep a handle for counting.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `compress` calls so far.
    pub fn compressions(&self) -> usize {
        self.compressions.load(Ordering::SeqCst)
    }
}

impl Archiver for CopyArchiver {
    fn compress(&self, source: &Path, archive: &Path) -> Result<()> {
        self.compressions.fetch_add(1, Ordering::SeqCst);
        std::fs::copy(source, archive)?;
        Ok(())
    }

    fn test(&self, archive: &Path) -> Result<()> {
        if std::fs::read(archive)? == b"partial" {
            return Err(Error::ToolFailure {
                tool: "copy".to_string(),
                operation: "test".to_string(),
                exit_code: Some(2),
            });
        }
        Ok(())
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let name = archive
            .file_name()
            .expect("archive has a file name")
            .to_string_lossy()
            .into_owned();
        std::fs::copy(archive, dest.join(strip_archive_extension(&name, self.extension())))?;
        Ok(())
    }
}

/// Transfer tool double running an `sh` script.
#[derive(Debug, Clone)]
pub struct ScriptTool {
    script: String,
    env: Vec<(String, PathBuf)>,
}

impl ScriptTool {
    /// Run `script` for every request.
    pub fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            env: Vec::new(),
        }
    }

    /// Expose `path` to the script as `$key`.
    pub fn env(mut self, key: &str, path: &Path) -> Self {
        self.env.push((key.to_string(), path.to_path_buf()));
        self
    }

    /// Shared trait object.
    pub fn shared(self) -> Arc<dyn TransferTool> {
        Arc::new(self)
    }
}

impl TransferTool for ScriptTool {
    fn name(&self) -> &str {
        "script"
    }

    fn command(&self, request: &TransferRequest) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&self.script);
        cmd.env("PACKRELAY_CODE", request.code().as_str());

        match request {
            TransferRequest::Send { path, .. } => {
                cmd.env("PACKRELAY_PATH", path);
            }
            TransferRequest::Receive { out_dir, .. } => {
                cmd.env("PACKRELAY_OUT", out_dir);
            }
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Shell prelude that increments the counter in `$COUNTER` and leaves the
/// new value in `$n`.
pub const COUNT_ATTEMPT: &str =
    r#"n=$(cat "$COUNTER" 2>/dev/null || echo 0); n=$((n + 1)); echo "$n" > "$COUNTER"; "#;

/// Read the attempt counter written by [`COUNT_ATTEMPT`].
pub fn attempts(counter: &Path) -> usize {
    std::fs::read_to_string(counter)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Parse a code, panicking on invalid input.
pub fn code(s: &str) -> TransferCode {
    TransferCode::parse(s).expect("valid test code")
}

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Set a file's modification time to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: u64) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .expect("open for set_modified")
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .expect("set_modified");
}

/// `SystemTime` `secs` after the epoch.
pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// Poll `condition` every 20ms until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Names from every `Extracted` event.
pub fn extracted_names(events: &[CoreEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CoreEvent::Extracted { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// Messages of every log event.
pub fn log_messages(events: &[CoreEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CoreEvent::Log { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

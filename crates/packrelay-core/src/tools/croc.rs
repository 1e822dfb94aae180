//! croc invocation.
//!
//! croc performs one relay-mediated transfer per run and exits 0 on success.
//! On Linux and macOS current croc releases refuse a receive code on the
//! command line (it would be visible to other users in the process list), so
//! the code travels in `CROC_SECRET` there.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use super::{TransferRequest, TransferTool};

/// The croc relay transfer tool.
#[derive(Debug, Clone)]
pub struct Croc {
    binary: PathBuf,
}

impl Croc {
    /// Use the croc executable at `binary`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Path of the executable.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Check whether the configured binary can be started.
    #[must_use]
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .is_ok()
    }

    /// Arguments for `request`, excluding anything passed via the environment.
    #[must_use]
    pub fn args(request: &TransferRequest) -> Vec<String> {
        match request {
            TransferRequest::Send { code, path } => vec![
                "send".to_string(),
                "--code".to_string(),
                code.to_string(),
                path.display().to_string(),
            ],
            TransferRequest::Receive { code, out_dir } => {
                let mut args = vec![
                    "--yes".to_string(),
                    "--overwrite".to_string(),
                    "--out".to_string(),
                    out_dir.display().to_string(),
                ];
                if !secret_via_env() {
                    args.push(code.to_string());
                }
                args
            }
        }
    }
}

impl Default for Croc {
    fn default() -> Self {
        Self::new("croc")
    }
}

const fn secret_via_env() -> bool {
    cfg!(any(target_os = "linux", target_os = "macos"))
}

impl TransferTool for Croc {
    fn name(&self) -> &str {
        "croc"
    }

    fn command(&self, request: &TransferRequest) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(Self::args(request));

        if let TransferRequest::Receive { code, .. } = request {
            if secret_via_env() {
                cmd.env("CROC_SECRET", code.as_str());
            }
        }

        #[cfg(windows)]
        cmd.creation_flags(super::archiver::CREATE_NO_WINDOW);

        cmd
    }
}

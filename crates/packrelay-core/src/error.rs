//! Error types for PackRelay.
//!
//! This module provides a unified error type for all PackRelay operations,
//! with specific error variants for different failure modes.
//!
//! Not every failure is an error here. A dropped connection or an operator
//! pausing a transfer is a [`SessionOutcome`](crate::session::SessionOutcome),
//! and transient filesystem problems inside the polling loops are logged and
//! retried on the next pass instead of being returned.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for PackRelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for PackRelay.
#[derive(Error, Debug)]
pub enum Error {
    /// External tool binary could not be found (E001)
    #[error("'{tool}' was not found; install it or set its path in the configuration")]
    ToolMissing {
        /// Name or path of the missing tool
        tool: String,
    },

    /// External tool exited with a non-zero code (E002)
    #[error("{tool} {operation} failed (exit code {})", display_exit_code(.exit_code))]
    ToolFailure {
        /// Name of the tool
        tool: String,
        /// Operation that was attempted
        operation: String,
        /// Exit code, if the process exited normally
        exit_code: Option<i32>,
    },

    /// Archiving a send request failed (E003)
    #[error("staging failed: {0}")]
    StagingFailed(String),

    /// The requested action is not valid in the current transfer state (E004)
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// Current state
        state: String,
        /// Requested action
        action: String,
    },

    /// Invalid transfer code
    #[error("invalid transfer code: {0}")]
    InvalidCode(String),

    /// Invalid listener definition
    #[error("invalid listener: {0}")]
    InvalidListener(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

#[allow(clippy::ref_option)]
fn display_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::ToolMissing { .. } => Some("E001"),
            Self::ToolFailure { .. } => Some("E002"),
            Self::StagingFailed(_) => Some("E003"),
            Self::InvalidTransition { .. } => Some("E004"),
            _ => None,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ToolFailure { .. } | Self::Io(_))
    }

    /// Returns whether this error means an external tool is not installed.
    #[must_use]
    pub const fn is_tool_missing(&self) -> bool {
        matches!(self, Self::ToolMissing { .. })
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ToolMissing { tool } if tool.contains("croc") => Some(
                "Install croc from https://github.com/schollz/croc\n\
                 Or set tools.croc_path in the configuration file",
            ),
            Self::ToolMissing { tool } if tool.contains("7z") => Some(
                "Install 7-Zip from https://www.7-zip.org (p7zip-full on Linux)\n\
                 Or set tools.archiver_path in the configuration file",
            ),
            Self::InvalidCode(_) => Some(
                "Codes look like 'fast-9q2xk'. Run 'packrelay code' to generate one.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let missing = Error::ToolMissing {
            tool: "croc".to_string(),
        };
        assert_eq!(missing.code(), Some("E001"));
        assert!(missing.is_tool_missing());
        assert!(!missing.is_recoverable());

        let failure = Error::ToolFailure {
            tool: "7z".to_string(),
            operation: "test".to_string(),
            exit_code: Some(2),
        };
        assert_eq!(failure.code(), Some("E002"));
        assert!(failure.is_recoverable());
        assert_eq!(failure.to_string(), "7z test failed (exit code 2)");
    }

    #[test]
    fn test_tool_failure_without_exit_code() {
        let failure = Error::ToolFailure {
            tool: "croc".to_string(),
            operation: "send".to_string(),
            exit_code: None,
        };
        assert_eq!(failure.to_string(), "croc send failed (exit code unknown)");
    }

    #[test]
    fn test_suggestions() {
        let croc = Error::ToolMissing {
            tool: "croc".to_string(),
        };
        assert!(croc.suggestion().unwrap().contains("schollz/croc"));

        let sevenzip = Error::ToolMissing {
            tool: "7z".to_string(),
        };
        assert!(sevenzip.suggestion().unwrap().contains("7-zip.org"));

        assert!(Error::Internal("x".to_string()).suggestion().is_none());
    }
}

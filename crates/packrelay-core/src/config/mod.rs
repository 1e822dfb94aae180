//! Configuration management for PackRelay.
//!
//! This module handles loading, saving, and validating PackRelay
//! configuration. The core reads it once when a session, watcher or
//! listener starts; changes take effect on the next start.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/packrelay/config.toml` |
//! | macOS | `~/Library/Application Support/com.packrelay.PackRelay/config.toml` |
//! | Windows | `%APPDATA%\packrelay\PackRelay\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use packrelay_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Code length: {}", config.general.code_length);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::code::{TransferCode, SUFFIX_LENGTH_RANGE};
use crate::error::{Error, Result};
use crate::tools::{Croc, SevenZip};

/// Main configuration struct for PackRelay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// External tool settings
    pub tools: ToolsConfig,
    /// Folder watcher settings
    pub watcher: WatcherSettings,
    /// Listener settings
    pub listeners: ListenersConfig,
    /// Live extractor settings
    pub extractor: ExtractorConfig,
}

/// General configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Length of the random part of generated transfer codes
    pub code_length: usize,
    /// Directory received files and listener folders land in
    pub download_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            code_length: crate::DEFAULT_CODE_LENGTH,
            download_dir: None,
        }
    }
}

/// External tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// croc executable
    pub croc_path: PathBuf,
    /// 7-Zip executable; detected automatically when unset
    pub archiver_path: Option<PathBuf>,
    /// Compression level passed to 7-Zip (0-9)
    pub compression_level: u8,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            croc_path: PathBuf::from("croc"),
            archiver_path: None,
            compression_level: crate::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl ToolsConfig {
    /// The configured transfer tool.
    #[must_use]
    pub fn transfer_tool(&self) -> Croc {
        Croc::new(&self.croc_path)
    }

    /// The configured archiver, detecting 7-Zip when no path is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolMissing`] if no path is configured and 7-Zip
    /// cannot be found.
    pub fn archiver(&self) -> Result<SevenZip> {
        let archiver = match &self.archiver_path {
            Some(path) => SevenZip::new(path),
            None => SevenZip::locate().ok_or_else(|| Error::ToolMissing {
                tool: "7z".to_string(),
            })?,
        };
        Ok(archiver.with_level(self.compression_level))
    }
}

/// Folder watcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Folders to watch
    pub folders: Vec<PathBuf>,
    /// Code the watcher pushes on
    pub code: Option<TransferCode>,
    /// Delete originals after a confirmed send
    pub delete_after_send: bool,
    /// Idle time between scans
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Wait before retrying a send the receiver did not pick up
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            code: None,
            delete_after_send: false,
            check_interval: Duration::from_secs(crate::DEFAULT_WATCH_INTERVAL_SECS),
            retry_backoff: Duration::from_secs(crate::DEFAULT_RETRY_BACKOFF_SECS),
        }
    }
}

/// A persisted listener definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerEntry {
    /// Display name; also names the destination subfolder
    pub name: String,
    /// Code the listener receives on
    pub code: TransferCode,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenersConfig {
    /// Configured listeners
    pub entries: Vec<ListenerEntry>,
    /// Pause between receive attempts that got nothing
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Log a heartbeat after this many empty attempts
    pub heartbeat_every: u32,
}

impl Default for ListenersConfig {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            retry_delay: Duration::from_secs(crate::DEFAULT_LISTEN_RETRY_SECS),
            heartbeat_every: crate::DEFAULT_HEARTBEAT_EVERY,
        }
    }
}

impl ListenersConfig {
    /// Add a listener definition. Returns `false` for an exact duplicate.
    pub fn add(&mut self, entry: ListenerEntry) -> bool {
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Remove every definition with the given name. Returns `false` if none matched.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }
}

/// Live extractor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Interval between extraction passes
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(crate::DEFAULT_EXTRACT_POLL_MS),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        std::fs::write(path, self.to_toml()?)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Render the configuration as it would be saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Check value ranges that the type system does not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, reason: impl Into<String>) -> Error {
            Error::InvalidConfig {
                key: key.to_string(),
                reason: reason.into(),
            }
        }

        if !SUFFIX_LENGTH_RANGE.contains(&self.general.code_length) {
            return Err(invalid(
                "general.code_length",
                format!(
                    "must be between {} and {}",
                    SUFFIX_LENGTH_RANGE.start(),
                    SUFFIX_LENGTH_RANGE.end()
                ),
            ));
        }

        if self.tools.compression_level > 9 {
            return Err(invalid("tools.compression_level", "must be between 0 and 9"));
        }

        let intervals = [
            ("watcher.check_interval", self.watcher.check_interval),
            ("watcher.retry_backoff", self.watcher.retry_backoff),
            ("listeners.retry_delay", self.listeners.retry_delay),
            ("extractor.poll_interval", self.extractor.poll_interval),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(invalid(key, "must be greater than zero"));
        }

        if self.listeners.heartbeat_every == 0 {
            return Err(invalid("listeners.heartbeat_every", "must be at least 1"));
        }

        Ok(())
    }

    /// Directory received content lands in.
    ///
    /// The configured `download_dir`, else the user's download folder, else
    /// the current directory.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.general
            .download_dir
            .clone()
            .or_else(|| {
                directories::UserDirs::new()
                    .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
            })
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "packrelay", "PackRelay")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration '{s}' (use e.g. 1500ms, 3s, 2m)")))
    }
}

/// Parse a human-readable duration: `1500ms`, `3s`, `2m` or `1h`.
#[must_use]
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit())?);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(n)),
        "s" => Some(Duration::from_secs(n)),
        "m" => n.checked_mul(60).map(Duration::from_secs),
        "h" => n.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

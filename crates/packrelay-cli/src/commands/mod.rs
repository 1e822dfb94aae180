//! CLI command definitions and handlers.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Load configuration with graceful fallback to defaults.
///
/// This function should be used by all commands to load the user's configuration.
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> packrelay_core::config::Config {
    packrelay_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Using default configuration: {e}");
        packrelay_core::config::Config::default()
    })
}

/// Token that is cancelled once Ctrl+C is pressed.
///
/// A single task waits for the signal for the rest of the run, so command
/// loops select on [`CancellationToken::cancelled`] instead of registering a
/// new signal future on every iteration.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => trigger.cancel(),
            Err(e) => tracing::warn!("Cannot listen for Ctrl+C: {e}"),
        }
    });
    token
}

pub mod code;
pub mod completions;
pub mod config;
pub mod doctor;
pub mod drive;
pub mod listen;
pub mod listener;
pub mod receive;
pub mod send;
pub mod watch;

/// PackRelay - Packaged, code-paired file transfers over a relay
#[derive(Parser)]
#[command(name = "packrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Send a file or folder under a transfer code
    Send(SendArgs),

    /// Receive files sent under a transfer code
    Receive(ReceiveArgs),

    /// Push new and changed files from folders automatically
    Watch(WatchArgs),

    /// Receive forever on every configured listener
    Listen(ListenArgs),

    /// Manage configured listeners
    Listener(ListenerArgs),

    /// Generate a transfer code
    Code(CodeArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Check that croc and 7-Zip are installed
    Doctor(DoctorArgs),
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// File or folder to send
    pub path: PathBuf,

    /// Transfer code to use (generated when omitted)
    #[arg(short, long)]
    pub code: Option<String>,

    /// Output events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Do not read pause/cancel commands from stdin
    #[arg(long)]
    pub batch: bool,
}

/// Arguments for the receive command
#[derive(Parser)]
pub struct ReceiveArgs {
    /// Transfer code shared by the sender
    pub code: String,

    /// Output directory (defaults to the configured download folder)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Do not read pause/cancel commands from stdin
    #[arg(long)]
    pub batch: bool,
}

/// Arguments for the watch command
#[derive(Parser)]
pub struct WatchArgs {
    /// Folders to watch (defaults to the configured folders)
    pub folders: Vec<PathBuf>,

    /// Transfer code to push to (defaults to the configured code)
    #[arg(short, long)]
    pub code: Option<String>,

    /// Delete originals after a confirmed send
    #[arg(long)]
    pub delete: bool,

    /// Time between scans (e.g., 3s, 500ms, 1m)
    #[arg(short, long)]
    pub interval: Option<String>,

    /// Output events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the listen command
#[derive(Parser)]
pub struct ListenArgs {
    /// Base folder for listener subfolders (defaults to the download folder)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the listener command
#[derive(Parser)]
pub struct ListenerArgs {
    /// Listener subcommand
    #[command(subcommand)]
    pub action: ListenerAction,
}

/// Listener subcommands
#[derive(Subcommand)]
pub enum ListenerAction {
    /// Add a listener
    Add {
        /// Display name (also the destination subfolder)
        name: String,

        /// Transfer code to receive on
        code: String,
    },

    /// Remove every listener with this name
    Remove {
        /// Display name
        name: String,
    },

    /// List configured listeners
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Arguments for the code command
#[derive(Parser)]
pub struct CodeArgs {
    /// Length of the random part (defaults to the configured length)
    #[arg(short, long)]
    pub length: Option<usize>,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file location
    Path,

    /// Set the length of generated codes
    SetCodeLength {
        /// New length
        length: usize,
    },

    /// Reset configuration to defaults
    Reset,
}

/// Arguments for the completions command
#[derive(Parser)]
pub struct CompletionsArgs {
    /// Completions subcommand
    #[command(subcommand)]
    pub action: CompletionsAction,
}

/// Completions subcommands
#[derive(Subcommand, Clone, Copy)]
pub enum CompletionsAction {
    /// Install shell completions (auto-detects shell)
    Install {
        /// Override shell detection
        #[arg(long, value_enum)]
        shell: Option<ShellType>,
    },

    /// Generate completions and print to stdout
    Generate {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: ShellType,
    },
}

/// Supported shell types for completions
#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum ShellType {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    #[value(name = "powershell")]
    PowerShell,
}

/// Arguments for the doctor command
#[derive(Parser)]
pub struct DoctorArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

//! # PackRelay Core Library
//!
//! `packrelay-core` is the transfer orchestration core of PackRelay: it moves
//! files between two parties through a relay-mediated, code-paired transfer
//! tool while packaging content on the way out and unpacking it on the way
//! in, so that both sides only ever see plain folders.
//!
//! ## Features
//!
//! - **Code-paired transfers**: a shared, human-typeable code pairs sender and receiver
//! - **Transparent packaging**: content is archived before sending and extracted on arrival
//! - **Pause / resume / cancel**: manual transfers survive remote disconnects
//! - **Automation**: folder watchers push changes, listeners receive forever
//!
//! ## Modules
//!
//! - [`code`] - Transfer code generation and validation
//! - [`config`] - Configuration management
//! - [`events`] - Core-to-UI events and the log sink
//! - [`extract`] - Live extraction of arriving archives
//! - [`listener`] - Perpetual receive loops (automation receiver)
//! - [`session`] - One run of the external transfer tool
//! - [`stage`] - Staging of send requests into archives
//! - [`state`] - Manual transfer state machine and controller
//! - [`tools`] - External archiver and transfer tool adapters
//! - [`watcher`] - Folder watching and push loop (automation sender)
//!
//! ## Example
//!
//! ```rust,ignore
//! use packrelay_core::code::TransferCode;
//! use packrelay_core::state::TransferController;
//!
//! let (mut controller, mut events) = TransferController::from_config(&config)?;
//! let code = TransferCode::generate(6)?;
//! controller.start_send("./photos".into(), code)?;
//!
//! while let Some(state) = controller.next_completion().await {
//!     println!("now {state}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

pub mod code;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod listener;
pub mod session;
pub mod stage;
pub mod state;
pub mod tools;
pub mod watcher;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File extension of archives produced and recognized by PackRelay
pub const ARCHIVE_EXTENSION: &str = "7z";

/// Default length of the random part of a generated transfer code
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Default compression level passed to the archiver
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 3;

/// Default interval between live extraction passes in milliseconds
pub const DEFAULT_EXTRACT_POLL_MS: u64 = 1500;

/// Default interval between folder watcher scans in seconds
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 3;

/// Default backoff before retrying a busy send in seconds
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 3;

/// Default pause between listener receive attempts in seconds
pub const DEFAULT_LISTEN_RETRY_SECS: u64 = 3;

/// Number of empty listener cycles between heartbeat log lines
pub const DEFAULT_HEARTBEAT_EVERY: u32 = 10;

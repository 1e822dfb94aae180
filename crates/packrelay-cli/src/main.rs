//! PackRelay CLI - Packaged, code-paired file transfers over a relay
//!
//! PackRelay archives what you send, hands it to croc under a shared code,
//! and unpacks it on the other side so both ends only ever see plain folders.
//!
//! ## Quick Start
//!
//! ```bash
//! # Send a folder (a code is generated and printed)
//! packrelay send ./photos
//!
//! # Receive it on another machine
//! packrelay receive fast-9q2xk
//!
//! # Keep pushing everything dropped into a folder
//! packrelay watch ./outbox --code fast-9q2xk
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]
#![allow(clippy::struct_excessive_bools)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Send(args) => commands::send::run(args).await,
        Command::Receive(args) => commands::receive::run(args).await,
        Command::Watch(args) => commands::watch::run(args).await,
        Command::Listen(args) => commands::listen::run(args).await,
        Command::Listener(args) => commands::listener::run(args),
        Command::Code(args) => commands::code::run(&args),
        Command::Config(args) => commands::config::run(args),
        Command::Completions(args) => commands::completions::run(args.action),
        Command::Doctor(args) => commands::doctor::run(&args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,packrelay=info,packrelay_core=off"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

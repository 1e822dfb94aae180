//! Watch command implementation.

use anyhow::{bail, Context, Result};

use packrelay_core::code::TransferCode;
use packrelay_core::config::parse_duration;
use packrelay_core::events::CoreEvent;
use packrelay_core::state::TransferController;

use super::WatchArgs;
use crate::ui;

/// Run the watch command until Ctrl+C or until the watcher gives up.
pub async fn run(args: WatchArgs) -> Result<()> {
    let config = super::load_config();

    let folders = if args.folders.is_empty() {
        config.watcher.folders.clone()
    } else {
        args.folders
    };
    if folders.is_empty() {
        bail!("No folders to watch. Pass folders or set watcher.folders in the configuration.");
    }

    let code = match (args.code.as_deref(), &config.watcher.code) {
        (Some(code), _) => TransferCode::parse(code)?,
        (None, Some(code)) => code.clone(),
        (None, None) => bail!("No transfer code. Pass --code or set watcher.code in the configuration."),
    };

    let interval = match args.interval.as_deref() {
        Some(s) => parse_duration(s)
            .filter(|d| !d.is_zero())
            .with_context(|| format!("Invalid interval '{s}' (use e.g. 3s, 500ms, 1m)"))?,
        None => config.watcher.check_interval,
    };
    let delete = args.delete || config.watcher.delete_after_send;

    let (mut controller, mut events) = TransferController::from_config(&config)?;

    if !args.json {
        ui::header();
        println!("  Pushing to code {}", code.as_str());
        for folder in &folders {
            println!("  Watching {}", folder.display());
        }
        if delete {
            println!("  Originals are deleted after a confirmed send.");
        }
        println!();
        println!("  Press Ctrl+C to stop.");
        println!();
    }

    controller.start_watcher(folders, code, delete, interval)?;

    let interrupt = super::interrupt_token();
    loop {
        tokio::select! {
            () = interrupt.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                ui::render_event(&event, args.json);
                if event == CoreEvent::WatcherStopped {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    for event in packrelay_core::events::drain(&mut events) {
        ui::render_event(&event, args.json);
    }
    Ok(())
}

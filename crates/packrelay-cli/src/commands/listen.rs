//! Listen command implementation.

use anyhow::{bail, Result};

use packrelay_core::events::{drain, CoreEvent};
use packrelay_core::state::TransferController;

use super::ListenArgs;
use crate::ui;

/// Run every configured listener until Ctrl+C.
pub async fn run(args: ListenArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(output) = args.output {
        config.general.download_dir = Some(output);
    }

    let (mut controller, mut events) = TransferController::from_config(&config)?;
    if controller.listeners().is_empty() {
        bail!("No listeners configured. Add one with 'packrelay listener add <name> <code>'.");
    }

    if !args.json {
        ui::header();
        for listener in controller.listeners() {
            println!("  {listener}");
        }
        println!();
        println!("  Receiving into {}", config.download_dir().display());
        println!("  Press Ctrl+C to stop.");
        println!();
    }

    let started = controller.start_all_listeners()?;
    tracing::debug!("started {started} listeners");

    let interrupt = super::interrupt_token();
    loop {
        tokio::select! {
            () = interrupt.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                ui::render_event(&event, args.json);
                // Every listener shares the one transfer tool.
                if matches!(event, CoreEvent::ToolMissing { .. }) {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    for event in drain(&mut events) {
        ui::render_event(&event, args.json);
    }
    Ok(())
}

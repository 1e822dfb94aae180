//! Send command implementation.

use anyhow::{bail, Context, Result};

use packrelay_core::code::TransferCode;
use packrelay_core::state::TransferController;

use super::drive::{self, Direction};
use super::SendArgs;
use crate::ui::{self, CodeBox};

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config();

    if !args.path.exists() {
        bail!("Path not found: {}", args.path.display());
    }
    let path = args
        .path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", args.path.display()))?;

    let code = match args.code.as_deref() {
        Some(code) => TransferCode::parse(code)?,
        None => TransferCode::generate(config.general.code_length)?,
    };

    let (mut controller, mut events) = TransferController::from_config(&config)?;

    if args.json {
        let output = serde_json::json!({
            "status": "staging",
            "code": code.as_str(),
            "path": path.display().to_string(),
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        ui::header();
        CodeBox::new(code.as_str())
            .with_hint("packrelay receive <code>")
            .display();
        println!();
        println!("  Packing {}...", path.display());
        println!();
        if !args.batch {
            drive::print_controls();
        }
    }

    controller.start_send(path, code)?;
    let ending = drive::run(
        &mut controller,
        &mut events,
        Direction::Send,
        args.json,
        !args.batch,
        &super::interrupt_token(),
    ).await?;

    drive::report(ending, Direction::Send, args.json)
}

//! Receive command implementation.

use anyhow::Result;

use packrelay_core::code::TransferCode;
use packrelay_core::state::TransferController;

use super::drive::{self, Direction};
use super::ReceiveArgs;
use crate::ui;

/// Run the receive command.
pub async fn run(args: ReceiveArgs) -> Result<()> {
    let config = super::load_config();
    let code = TransferCode::parse(&args.code)?;
    let output_dir = args.output.unwrap_or_else(|| config.download_dir());

    let (mut controller, mut events) = TransferController::from_config(&config)?;

    if args.json {
        let output = serde_json::json!({
            "status": "receiving",
            "code": code.as_str(),
            "output": output_dir.display().to_string(),
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        ui::header();
        println!("  Waiting for sender on code {}...", code.as_str());
        println!("  Files land in {}", output_dir.display());
        println!();
        if !args.batch {
            drive::print_controls();
        }
    }

    controller.start_receive(code, output_dir)?;
    let ending = drive::run(
        &mut controller,
        &mut events,
        Direction::Receive,
        args.json,
        !args.batch,
        &super::interrupt_token(),
    ).await?;

    drive::report(ending, Direction::Receive, args.json)
}

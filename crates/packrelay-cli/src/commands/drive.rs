//! Interactive driver shared by `send` and `receive`.
//!
//! Renders core events as they arrive and turns stdin commands into
//! pause/resume/cancel operations until the transfer reaches `IDLE`.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use packrelay_core::events::{drain, CoreEvent};
use packrelay_core::state::{TransferController, TransferState};

use crate::ui;

/// Which half of the state machine is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A manual send
    Send,
    /// A manual receive
    Receive,
}

impl Direction {
    fn pause_or_resume(self, controller: &mut TransferController) -> packrelay_core::Result<TransferState> {
        match self {
            Self::Send => controller.pause_or_resume_send(),
            Self::Receive => controller.pause_or_resume_receive(),
        }
    }

    fn cancel(self, controller: &mut TransferController) -> packrelay_core::Result<()> {
        match self {
            Self::Send => controller.cancel_send(),
            Self::Receive => controller.cancel_receive(),
        }
    }

    fn finished(self, event: &CoreEvent) -> Option<bool> {
        match (self, event) {
            (Self::Send, CoreEvent::SendFinished { success })
            | (Self::Receive, CoreEvent::ReceiveFinished { success }) => Some(*success),
            _ => None,
        }
    }
}

/// How a driven transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// The transfer completed
    Completed,
    /// The user cancelled it (or pressed Ctrl+C)
    Cancelled,
    /// It ended without completing (for example a missing tool)
    Failed,
}

/// Print the interactive controls.
pub fn print_controls() {
    println!("  Type 'p' + Enter to pause or resume, 'c' + Enter to cancel.");
    println!();
}

/// Drive the controller until the manual transfer is over.
///
/// Without stdin commands nobody can resume, so a paused transfer ends the
/// run.
pub async fn run(
    controller: &mut TransferController,
    events: &mut UnboundedReceiver<CoreEvent>,
    direction: Direction,
    json: bool,
    interactive: bool,
    interrupt: &CancellationToken,
) -> Result<Ending> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut read_stdin = interactive;
    let mut last_success = false;

    let ending = loop {
        tokio::select! {
            biased;

            () = interrupt.cancelled() => {
                if controller.state() != TransferState::Idle {
                    direction.cancel(controller)?;
                }
                break Ending::Cancelled;
            }

            Some(event) = events.recv() => {
                if let Some(success) = direction.finished(&event) {
                    last_success = success;
                }
                ui::render_event(&event, json);
            }

            completion = controller.next_completion() => {
                match completion {
                    Some(TransferState::Idle) | None => {
                        break Ending::Failed;
                    }
                    Some(TransferState::PausedSend | TransferState::PausedRecv) => {
                        if !read_stdin {
                            direction.cancel(controller)?;
                            break Ending::Failed;
                        }
                        if !json {
                            println!("  Paused. Type 'p' + Enter to retry on the same code.");
                        }
                    }
                    Some(_) => {}
                }
            }

            line = stdin.next_line(), if read_stdin => {
                match line? {
                    Some(line) => match line.trim() {
                        "p" => match direction.pause_or_resume(controller) {
                            Ok(state) => tracing::debug!("now {state}"),
                            Err(e) => println!("  {e}"),
                        },
                        "c" => {
                            direction.cancel(controller)?;
                            break Ending::Cancelled;
                        }
                        "" => {}
                        other => println!("  Unknown command '{other}'. Use 'p' or 'c'."),
                    },
                    None => read_stdin = false,
                }
            }
        }
    };

    controller.shutdown().await;

    for event in drain(events) {
        if let Some(success) = direction.finished(&event) {
            last_success = success;
        }
        ui::render_event(&event, json);
    }

    Ok(match ending {
        Ending::Failed if last_success => Ending::Completed,
        other => other,
    })
}

/// Print how the transfer ended and exit non-zero when it failed.
pub fn report(ending: Ending, direction: Direction, json: bool) -> Result<()> {
    if json {
        let status = match ending {
            Ending::Completed => "completed",
            Ending::Cancelled => "cancelled",
            Ending::Failed => "failed",
        };
        println!("{}", serde_json::to_string(&serde_json::json!({ "status": status }))?);
    } else {
        let noun = match direction {
            Direction::Send => "Send",
            Direction::Receive => "Receive",
        };
        println!();
        match ending {
            Ending::Completed => println!("  Done."),
            Ending::Cancelled => println!("  {noun} cancelled."),
            Ending::Failed => println!("  {noun} did not complete."),
        }
        println!();
    }

    if ending == Ending::Failed {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use packrelay_core::code::TransferCode;
    use packrelay_core::events::EventSink;
    use packrelay_core::tools::{Croc, SevenZip};

    #[tokio::test]
    async fn test_interrupt_cancels_running_transfer() {
        let out = std::env::temp_dir().join(format!("packrelay-drive-{}", std::process::id()));
        std::fs::create_dir_all(&out).unwrap();

        let (sink, mut events) = EventSink::channel();
        let mut controller = TransferController::new(
            Arc::new(SevenZip::new("/nonexistent/packrelay/7z")),
            Arc::new(Croc::new("/nonexistent/packrelay/croc")),
            std::env::temp_dir(),
            sink,
        );
        controller
            .start_receive(TransferCode::parse("red-77zz1").unwrap(), out.clone())
            .unwrap();

        let interrupt = CancellationToken::new();
        interrupt.cancel();
        let ending = run(&mut controller, &mut events, Direction::Receive, true, false, &interrupt)
            .await
            .unwrap();

        assert_eq!(ending, Ending::Cancelled);
        assert_eq!(controller.state(), TransferState::Idle);
        std::fs::remove_dir_all(&out).unwrap();
    }
}

//! UI utilities for the PackRelay CLI.

use chrono::Local;
use packrelay_core::events::{CoreEvent, LogLevel};

const BOX_WIDTH: usize = 33;

/// Print the banner shown at the top of interactive commands.
pub fn header() {
    println!();
    println!("PackRelay v{}", packrelay_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
}

/// A formatted box for displaying transfer codes.
pub struct CodeBox<'a> {
    code: &'a str,
    hint: Option<&'a str>,
}

impl<'a> CodeBox<'a> {
    /// Create a new code box.
    #[must_use]
    pub const fn new(code: &'a str) -> Self {
        Self { code, hint: None }
    }

    /// Add a line of text under the code.
    #[must_use]
    pub const fn with_hint(mut self, hint: &'a str) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Display the code box to stdout.
    pub fn display(&self) {
        let code_line = format!("Code:  {}", self.code);

        println!("  ┌{}┐", "─".repeat(BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));
        println!("  │{}│", center_in_box(&code_line, BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));

        if let Some(hint) = self.hint {
            println!("  │{}│", center_in_box(hint, BOX_WIDTH));
            println!("  │{}│", " ".repeat(BOX_WIDTH));
        }

        println!("  └{}┘", "─".repeat(BOX_WIDTH));
    }
}

fn center_in_box(content: &str, width: usize) -> String {
    let content_len = content.chars().count();
    let padding = width.saturating_sub(content_len);
    let left = padding / 2;
    let right = padding - left;
    format!("{}{}{}", " ".repeat(left), content, " ".repeat(right))
}

/// Print one core event.
///
/// With `json` every event is written as a single JSON line. Otherwise log
/// lines become timestamped activity lines and the other events are shown
/// only when they carry something the log does not already say.
pub fn render_event(event: &CoreEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("Could not serialize event: {e}"),
        }
        return;
    }

    match event {
        CoreEvent::Log {
            level,
            message,
            timestamp,
        } => {
            let time = timestamp.with_timezone(&Local).format("%H:%M:%S");
            match level {
                LogLevel::Info => println!("  [{time}] {message}"),
                LogLevel::Warn => println!("  [{time}] ! {message}"),
                LogLevel::Error => eprintln!("  [{time}] x {message}"),
            }
        }
        CoreEvent::SendStaged { payload } => {
            println!("  Staged {}", payload.display());
        }
        CoreEvent::ToolMissing { tool } => {
            let error = packrelay_core::Error::ToolMissing { tool: tool.clone() };
            if let Some(suggestion) = error.suggestion() {
                eprintln!();
                for line in suggestion.lines() {
                    eprintln!("  {line}");
                }
                eprintln!();
            }
        }
        CoreEvent::SendFinished { .. }
        | CoreEvent::ReceiveFinished { .. }
        | CoreEvent::Extracted { .. }
        | CoreEvent::FilePushed { .. }
        | CoreEvent::WatcherStopped
        | CoreEvent::StateChanged { .. } => {}
    }
}

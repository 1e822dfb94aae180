//! Listener command implementation.

use anyhow::{Context, Result};

use packrelay_core::code::TransferCode;
use packrelay_core::config::{Config, ListenerEntry};
use packrelay_core::listener::{sanitize_name, Listener};

use super::{ListenerAction, ListenerArgs};

/// Run the listener command.
pub fn run(args: ListenerArgs) -> Result<()> {
    // Edits must not overwrite a config file that failed to parse.
    let mut config = Config::load().context("Failed to load configuration")?;

    match args.action {
        ListenerAction::Add { name, code } => {
            let listener = Listener::new(&name, TransferCode::parse(&code)?)?;
            if config.listeners.add(ListenerEntry::from(&listener)) {
                config.save().context("Failed to save configuration")?;
                println!("Added listener {listener}");
                println!(
                    "Files will land in {}",
                    listener.destination(&config.download_dir()).display()
                );
            } else {
                println!("Listener {listener} already exists.");
            }
        }
        ListenerAction::Remove { name } => {
            let name = sanitize_name(&name).unwrap_or(name);
            if config.listeners.remove(&name) {
                config.save().context("Failed to save configuration")?;
                println!("Removed listener '{name}'.");
            } else {
                println!("No listener named '{name}'.");
            }
        }
        ListenerAction::List { json } => list(&config.listeners.entries, json)?,
    }

    Ok(())
}

fn list(entries: &[ListenerEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No listeners configured.");
        println!("Add one with: packrelay listener add <name> <code>");
        return Ok(());
    }

    println!();
    println!("  {:<24} CODE", "NAME");
    for entry in entries {
        println!("  {:<24} {}", entry.name, entry.code);
    }
    println!();
    Ok(())
}

//! Config command implementation.

use anyhow::{Context, Result};

use packrelay_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load().context("Failed to load configuration")?;
            let rendered = config.to_toml()?;
            println!("# {}", Config::config_path().display());
            println!();
            print!("{rendered}");
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::SetCodeLength { length } => {
            let mut config = Config::load().context("Failed to load configuration")?;
            config.general.code_length = length;
            config.validate()?;
            config.save().context("Failed to save configuration")?;
            println!("Generated codes now use {length} characters.");
        }
        ConfigAction::Reset => {
            Config::default()
                .save()
                .context("Failed to save configuration")?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}

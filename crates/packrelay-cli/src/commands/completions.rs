//! Shell completions generation and installation.

use std::io;
use std::path::PathBuf;
use std::{env, fs};

use anyhow::{bail, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, Shell};

use super::{Cli, CompletionsAction, ShellType};

const BIN_NAME: &str = "packrelay";

impl From<ShellType> for Shell {
    fn from(shell: ShellType) -> Self {
        match shell {
            ShellType::Bash => Self::Bash,
            ShellType::Zsh => Self::Zsh,
            ShellType::Fish => Self::Fish,
            ShellType::PowerShell => Self::PowerShell,
        }
    }
}

/// Run the completions command.
pub fn run(action: CompletionsAction) -> Result<()> {
    match action {
        CompletionsAction::Install { shell } => install(shell),
        CompletionsAction::Generate { shell } => {
            let mut cmd = Cli::command();
            generate(Shell::from(shell), &mut cmd, BIN_NAME, &mut io::stdout());
            Ok(())
        }
    }
}

fn detect_shell() -> Result<ShellType> {
    let shell_path = env::var("SHELL").context(
        "Could not detect shell from $SHELL.\n\
         Use --shell to specify your shell manually.",
    )?;

    let name = shell_path.rsplit('/').next().unwrap_or(&shell_path);
    match name.to_lowercase().as_str() {
        "bash" => Ok(ShellType::Bash),
        "zsh" => Ok(ShellType::Zsh),
        "fish" => Ok(ShellType::Fish),
        "pwsh" | "powershell" => Ok(ShellType::PowerShell),
        other => bail!(
            "Unknown shell: {other}\n\
             Supported shells: bash, zsh, fish, powershell"
        ),
    }
}

/// Where a shell picks up completion scripts for the current user.
fn completions_path(shell: ShellType) -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let data = dirs::data_dir().unwrap_or_else(|| home.join(".local/share"));
    let config = dirs::config_dir().unwrap_or_else(|| home.join(".config"));

    Ok(match shell {
        ShellType::Bash => data.join("bash-completion/completions").join(BIN_NAME),
        ShellType::Zsh => data.join("zsh/site-functions").join(format!("_{BIN_NAME}")),
        ShellType::Fish => config.join("fish/completions").join(format!("{BIN_NAME}.fish")),
        ShellType::PowerShell => config.join("powershell").join(format!("{BIN_NAME}.ps1")),
    })
}

fn install(shell_override: Option<ShellType>) -> Result<()> {
    let shell = match shell_override {
        Some(s) => s,
        None => detect_shell()?,
    };
    let path = completions_path(shell)?;

    let mut script = Vec::new();
    generate(Shell::from(shell), &mut Cli::command(), BIN_NAME, &mut script);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, script).with_context(|| format!("Failed to write: {}", path.display()))?;

    println!("✓ Installed {shell:?} completions to: {}", path.display());
    match shell {
        ShellType::Zsh => {
            let dir = path.parent().map_or_else(String::new, |p| p.display().to_string());
            println!("  Make sure {dir} is in your fpath, then run: exec zsh");
        }
        ShellType::PowerShell => println!("  Add '. {}' to your PowerShell profile.", path.display()),
        ShellType::Bash | ShellType::Fish => println!("  Completions load in new shell sessions."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_script_mentions_commands() {
        let mut script = Vec::new();
        generate(Shell::Bash, &mut Cli::command(), BIN_NAME, &mut script);
        let script = String::from_utf8(script).unwrap();
        assert!(script.contains("receive"));
        assert!(script.contains("listener"));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}

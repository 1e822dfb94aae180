//! Doctor command implementation.
//!
//! Reports whether the external tools PackRelay drives can be started.

use anyhow::Result;

use packrelay_core::config::Config;
use packrelay_core::Error;

use super::DoctorArgs;

struct Check {
    name: &'static str,
    location: String,
    ok: bool,
    error: Option<Error>,
}

/// Run the doctor command.
pub fn run(args: &DoctorArgs) -> Result<()> {
    let config = super::load_config();
    let checks = vec![check_croc(&config), check_archiver(&config)];

    if args.json {
        let output = serde_json::json!({
            "config": Config::config_path().display().to_string(),
            "config_valid": config.validate().is_ok(),
            "tools": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "location": &c.location,
                "available": c.ok,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        println!("PackRelay Doctor");
        println!("{}", "=".repeat(37));
        println!();
        println!("  Config: {}", Config::config_path().display());
        if let Err(e) = config.validate() {
            println!("  [FAIL] {e}");
        }
        println!();

        for check in &checks {
            let mark = if check.ok { "OK" } else { "MISSING" };
            println!("  [{mark}] {} ({})", check.name, check.location);
            if let Some(suggestion) = check.error.as_ref().and_then(Error::suggestion) {
                for line in suggestion.lines() {
                    println!("         {line}");
                }
            }
        }
        println!();
    }

    if checks.iter().any(|c| !c.ok) {
        std::process::exit(1);
    }
    Ok(())
}

fn check_croc(config: &Config) -> Check {
    let croc = config.tools.transfer_tool();
    let location = croc.binary().display().to_string();
    let ok = croc.is_available();
    Check {
        name: "croc",
        error: (!ok).then(|| Error::ToolMissing {
            tool: "croc".to_string(),
        }),
        location,
        ok,
    }
}

fn check_archiver(config: &Config) -> Check {
    match config.tools.archiver() {
        Ok(archiver) => {
            let location = archiver.binary().display().to_string();
            let ok = archiver.is_available();
            Check {
                name: "7-Zip",
                error: (!ok).then(|| Error::ToolMissing { tool: "7z".to_string() }),
                location,
                ok,
            }
        }
        Err(e) => Check {
            name: "7-Zip",
            location: "not found".to_string(),
            ok: false,
            error: Some(e),
        },
    }
}

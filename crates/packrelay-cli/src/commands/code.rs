//! Code command implementation.

use anyhow::Result;

use packrelay_core::code::TransferCode;

use super::CodeArgs;

/// Print a freshly generated transfer code.
pub fn run(args: &CodeArgs) -> Result<()> {
    let length = match args.length {
        Some(length) => length,
        None => super::load_config().general.code_length,
    };

    println!("{}", TransferCode::generate(length)?);
    Ok(())
}

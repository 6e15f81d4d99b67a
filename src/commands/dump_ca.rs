use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::commands::App;

#[derive(Args, Debug)]
pub struct DumpCaArgs {
    pub serial: String,
    /// Output file, `-` for stdout.
    pub path: PathBuf,
}

/// Handle `dump_ca`: write the CA certificate as PEM.
pub fn handle_dump_ca(app: &App, args: DumpCaArgs) -> Result<()> {
    let ca = app.engine.resolve_ca(&args.serial)?;
    if args.path.as_os_str() == "-" {
        print!("{}", ca.pem);
    } else {
        fs::write(&args.path, &ca.pem)
            .with_context(|| format!("Failed to write {}", args.path.display()))?;
        println!("Wrote certificate of {} to {}", ca.name, args.path.display());
    }
    Ok(())
}

use anyhow::Result;
use clap::Args;

use crate::commands::App;

#[derive(Args, Debug)]
pub struct RevokeCertArgs {
    #[arg(long)]
    pub reason: Option<String>,
    pub serial: String,
}

/// Handle `revoke_cert`. The certificate is only marked; CRLs are generated
/// elsewhere.
pub fn handle_revoke_cert(app: &App, args: RevokeCertArgs) -> Result<()> {
    let certificate = app.engine.revoke_certificate(&args.serial, args.reason)?;
    println!(
        "Revoked certificate {} - {}",
        certificate.serial, certificate.common_name
    );
    Ok(())
}

use anyhow::Result;
use clap::Args;

use crate::commands::App;

#[derive(Args, Debug)]
pub struct ViewCertArgs {
    pub serial: String,
}

/// Handle `view_cert`.
pub fn handle_view_cert(app: &App, args: ViewCertArgs) -> Result<()> {
    let certificate = app.engine.resolve_certificate(&args.serial)?;
    let issuer = app.engine.resolve_ca(certificate.ca.as_str())?;

    println!("Common name: {}", certificate.common_name);
    println!("Serial: {}", certificate.serial);
    println!("Subject: {}", certificate.subject);
    println!("Issuer: {} ({})", issuer.name, issuer.serial);
    println!("Valid from: {}", certificate.created.format("%Y-%m-%d %H:%M"));
    println!("Expires: {}", certificate.expires.format("%Y-%m-%d %H:%M"));
    if certificate.revoked {
        let date = certificate
            .revoked_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        match &certificate.revoked_reason {
            Some(reason) => println!("Revoked: {} ({})", date, reason),
            None => println!("Revoked: {}", date),
        }
    }
    if !certificate.subject_alt_names.is_empty() {
        println!("Subject alternative names: {}", certificate.subject_alt_names.join(", "));
    }
    for url in &certificate.urls.crl_url {
        println!("CRL URL: {}", url);
    }
    if let Some(ocsp) = &certificate.urls.ocsp_url {
        println!("OCSP URL: {}", ocsp);
    }
    if let Some(issuer_url) = &certificate.urls.issuer_url {
        println!("Issuer URL: {}", issuer_url);
    }
    println!();
    print!("{}", certificate.pem);
    Ok(())
}

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use openssl::pkey::PKey;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::commands::{password_if, App};
use crate::pki_generator::ParsedCertificate;

#[derive(Args, Debug)]
pub struct ImportCaArgs {
    /// Ask for the passphrase of the key being imported. The key is stored
    /// with the same passphrase.
    #[arg(long)]
    pub password: bool,
    pub name: String,
    /// PEM certificate of the CA.
    pub cert: PathBuf,
    /// PEM private key of the CA.
    pub key: PathBuf,
}

/// Handle `import_ca`.
pub fn handle_import_ca(app: &App, args: ImportCaArgs) -> Result<()> {
    let password = password_if(args.password, "Password for the private key: ")?;
    handle_import_ca_with_password(app, args, password)
}

pub fn handle_import_ca_with_password(
    app: &App,
    args: ImportCaArgs,
    password: Option<SecretString>,
) -> Result<()> {
    let cert_pem = fs::read(&args.cert)
        .with_context(|| format!("Failed to read {}", args.cert.display()))?;
    let certificate = ParsedCertificate::from_pem(&cert_pem)?;

    let key_pem = fs::read(&args.key)
        .with_context(|| format!("Failed to read {}", args.key.display()))?;
    let private_key = match &password {
        Some(p) => PKey::private_key_from_pem_passphrase(&key_pem, p.expose_secret().as_bytes()),
        None => PKey::private_key_from_pem(&key_pem),
    }
    .map_err(|e| anyhow!("Failed to load private key {}: {}", args.key.display(), e))?;
    if !certificate.matches_key(&private_key)? {
        return Err(anyhow!(
            "Private key {} does not belong to {}",
            args.key.display(),
            args.cert.display()
        ));
    }

    let key_path = app
        .keys
        .store_key(&certificate.serial, &private_key, password.as_ref())?;
    let ca = match app.engine.import_ca(&args.name, &certificate, key_path) {
        Ok(ca) => ca,
        Err(e) => {
            if let Err(cleanup) = app.keys.delete_key(&certificate.serial) {
                warn!(serial = %certificate.serial, error = %cleanup, "failed to remove imported private key");
            }
            return Err(e.into());
        }
    };

    println!("Imported CA {} - {}", ca.serial, ca.name);
    match &ca.parent {
        Some(parent) => println!("Parent: {}", parent),
        None => println!("Parent: (root)"),
    }
    Ok(())
}

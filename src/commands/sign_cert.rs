use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use secrecy::SecretString;

use crate::commands::{password_if, App};
use crate::engine::SignRequest;
use crate::name_constraints::GeneralSubtree;
use crate::pki_generator::{csr_public_key, generate_private_key, public_key_pem, Digest};
use crate::private_key_storage::write_key_file;
use crate::subject::Subject;

#[derive(Args, Debug, Default)]
pub struct SignCertArgs {
    /// Serial (or unique prefix) of the signing CA.
    #[arg(long)]
    pub ca: String,
    /// Subject alternative name, e.g. `DNS:www.example.com`.
    #[arg(long = "alt")]
    pub alt: Vec<String>,
    /// Add the common name to the subject alternative names (default).
    #[arg(long, overrides_with = "no_cn_in_san")]
    pub cn_in_san: bool,
    /// Do not add the common name to the subject alternative names.
    #[arg(long, overrides_with = "cn_in_san")]
    pub no_cn_in_san: bool,
    #[arg(long)]
    pub days: Option<u32>,
    #[arg(long)]
    pub digest: Option<Digest>,
    /// Certificate signing request to sign.
    #[arg(long, conflicts_with = "key_out", required_unless_present = "key_out")]
    pub csr: Option<PathBuf>,
    /// Generate a new key and write it here.
    #[arg(long)]
    pub key_out: Option<PathBuf>,
    /// Write the certificate here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Override the CA's CRL URLs for this certificate.
    #[arg(long)]
    pub crl_url: Vec<String>,
    /// Override the CA's OCSP URL for this certificate.
    #[arg(long)]
    pub ocsp_url: Option<String>,
    /// Ask for the passphrase of the CA's private key.
    #[arg(long)]
    pub ca_password: bool,
    /// Subject, e.g. `/CN=www.example.com`.
    pub subject: String,
}

/// Handle `sign_cert`.
pub fn handle_sign_cert(app: &App, args: SignCertArgs) -> Result<()> {
    let password = password_if(args.ca_password, "Password for the CA's private key: ")?;
    handle_sign_cert_with_password(app, args, password)
}

pub fn handle_sign_cert_with_password(
    app: &App,
    args: SignCertArgs,
    ca_password: Option<SecretString>,
) -> Result<()> {
    let defaults = &app.config.defaults;
    let subject = Subject::parse(&args.subject)?;
    let subject_alt_names = args
        .alt
        .iter()
        .map(|alt| GeneralSubtree::parse(alt))
        .collect::<Result<Vec<_>, _>>()?;

    let (public_key, new_key) = match (&args.csr, &args.key_out) {
        (Some(csr), _) => {
            let pem = fs::read(csr).with_context(|| format!("Failed to read {}", csr.display()))?;
            (csr_public_key(&pem)?, None)
        }
        (None, Some(key_out)) => {
            if key_out.exists() {
                return Err(anyhow::anyhow!("{} already exists", key_out.display()));
            }
            let key = generate_private_key(defaults.key_type, defaults.key_size)?;
            (public_key_pem(&key)?, Some((key_out, key)))
        }
        (None, None) => return Err(anyhow::anyhow!("Either --csr or --key-out is required")),
    };

    let certificate = app.engine.sign_certificate(SignRequest {
        ca: args.ca.clone(),
        subject,
        subject_alt_names,
        cn_in_san: !args.no_cn_in_san,
        validity_days: args.days.unwrap_or(defaults.cert_validity_days),
        digest: args.digest.unwrap_or(defaults.digest_algorithm),
        public_key_pem: public_key,
        crl_url: args.crl_url.clone(),
        ocsp_url: args.ocsp_url.clone(),
        signing_password: ca_password,
    })?;

    if let Some((path, key)) = new_key {
        write_key_file(path, &key, None)?;
        println!("Wrote private key to {}", path.display());
    }
    match &args.out {
        Some(out) => {
            fs::write(out, &certificate.pem)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Signed certificate {} - {}", certificate.serial, certificate.common_name);
            println!("Wrote certificate to {}", out.display());
        }
        None => print!("{}", certificate.pem),
    }
    Ok(())
}

use anyhow::{Context, Result};
use clap::Args;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::commands::{password_if, App};
use crate::configs::validate_key_size;
use crate::engine::{Cancellation, CreateCaRequest};
use crate::models::IssuanceUrls;
use crate::name_constraints::NameConstraintSet;
use crate::pathlen::PathLenRequest;
use crate::pki_generator::{generate_private_key, public_key_pem, Digest, KeyType};
use crate::serial::Serial;
use crate::subject::Subject;

#[derive(Args, Debug, Default)]
pub struct InitCaArgs {
    /// Serial (or unique prefix) of the parent CA. Omit to create a root.
    #[arg(long)]
    pub parent: Option<String>,
    /// Maximum number of intermediate CAs below this CA.
    #[arg(long, conflicts_with = "no_pathlen")]
    pub pathlen: Option<u32>,
    /// Do not limit the number of intermediate CAs.
    #[arg(long)]
    pub no_pathlen: bool,
    /// CRL URL embedded in this CA's own certificate.
    #[arg(long = "ca-crl-url", alias = "ca-url")]
    pub ca_crl_url: Vec<String>,
    /// OCSP URL embedded in this CA's own certificate.
    #[arg(long)]
    pub ca_ocsp_url: Option<String>,
    /// Issuer URL embedded in this CA's own certificate.
    #[arg(long)]
    pub ca_issuer_url: Option<String>,
    /// CRL URL for certificates signed by this CA.
    #[arg(long)]
    pub crl_url: Vec<String>,
    /// OCSP URL for certificates signed by this CA.
    #[arg(long)]
    pub ocsp_url: Option<String>,
    /// Issuer URL for certificates signed by this CA.
    #[arg(long)]
    pub issuer_url: Option<String>,
    #[arg(long)]
    pub issuer_alt_name: Option<String>,
    /// `permitted,<kind>:<value>` or `excluded,<kind>:<value>`.
    #[arg(long = "name-constraint")]
    pub name_constraint: Vec<String>,
    #[arg(long)]
    pub key_type: Option<KeyType>,
    #[arg(long)]
    pub key_size: Option<u32>,
    #[arg(long)]
    pub digest: Option<Digest>,
    /// Validity in days.
    #[arg(long)]
    pub days: Option<u32>,
    /// Encrypt the new private key with a passphrase.
    #[arg(long)]
    pub password: bool,
    /// Ask for the passphrase of the parent's private key.
    #[arg(long)]
    pub parent_password: bool,
    pub name: String,
    /// Subject, e.g. `/C=AT/O=Example/CN=Example Root`.
    pub subject: String,
}

fn pathlen_request(args: &InitCaArgs) -> PathLenRequest {
    match (args.no_pathlen, args.pathlen) {
        (true, _) => PathLenRequest::Unconstrained,
        (false, Some(n)) => PathLenRequest::Limited(n),
        (false, None) => PathLenRequest::Default,
    }
}

/// Handle `init_ca`.
pub fn handle_init_ca(app: &App, args: InitCaArgs) -> Result<()> {
    handle_init_ca_with_passwords(app, args, None, None)
}

/// `init_ca` with passphrases supplied by the caller instead of prompted.
pub fn handle_init_ca_with_passwords(
    app: &App,
    args: InitCaArgs,
    password: Option<SecretString>,
    parent_password: Option<SecretString>,
) -> Result<()> {
    let defaults = &app.config.defaults;
    let subject = Subject::parse(&args.subject)?;
    let name_constraints = NameConstraintSet::from_cli_args(&args.name_constraint)?;
    let key_type = args.key_type.unwrap_or(defaults.key_type);
    let key_size = args.key_size.unwrap_or(defaults.key_size);
    if key_type == KeyType::Rsa {
        validate_key_size(key_size, defaults.min_key_size)?;
    }

    let password = match password {
        Some(p) => Some(p),
        None => password_if(args.password, "Password for the new private key: ")?,
    };
    let parent_password = match parent_password {
        Some(p) => Some(p),
        None => password_if(args.parent_password, "Password for the parent's private key: ")?,
    };

    let serial = Serial::random()?;
    let private_key =
        generate_private_key(key_type, key_size).context("Failed to generate CA key")?;
    let private_key_path = app
        .keys
        .store_key(&serial, &private_key, password.as_ref())?;

    // Roots are signed with their own key.
    let signing_password = if args.parent.is_some() {
        parent_password
    } else {
        password
            .as_ref()
            .map(|p| SecretString::from(p.expose_secret().to_string()))
    };

    let request = CreateCaRequest {
        serial: serial.clone(),
        name: args.name.clone(),
        subject,
        parent: args.parent.clone(),
        pathlen: pathlen_request(&args),
        name_constraints,
        ca_urls: IssuanceUrls {
            crl_url: args.ca_crl_url.clone(),
            ocsp_url: args.ca_ocsp_url.clone(),
            issuer_url: args.ca_issuer_url.clone(),
            issuer_alt_name: None,
        },
        issuance_urls: IssuanceUrls {
            crl_url: args.crl_url.clone(),
            ocsp_url: args.ocsp_url.clone(),
            issuer_url: args.issuer_url.clone(),
            issuer_alt_name: args.issuer_alt_name.clone(),
        },
        validity_days: args.days.unwrap_or(defaults.ca_validity_days),
        digest: args.digest.unwrap_or(defaults.digest_algorithm),
        public_key_pem: public_key_pem(&private_key)?,
        private_key_path,
        signing_password,
    };

    let ca = match app.engine.create_ca(request, &Cancellation::new()) {
        Ok(ca) => ca,
        Err(e) => {
            if let Err(cleanup) = app.keys.delete_key(&serial) {
                warn!(serial = %serial, error = %cleanup, "failed to remove private key of rejected CA");
            }
            return Err(e.into());
        }
    };

    println!("Created CA {} - {}", ca.serial, ca.name);
    match ca.pathlen {
        Some(pathlen) => println!("Path length: {}", pathlen),
        None => println!("Path length: unlimited"),
    }
    for line in ca.name_constraints.describe() {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pathlen_request() {
        let mut args = InitCaArgs::default();
        assert_eq!(pathlen_request(&args), PathLenRequest::Default);
        args.pathlen = Some(2);
        assert_eq!(pathlen_request(&args), PathLenRequest::Limited(2));
        args.pathlen = None;
        args.no_pathlen = true;
        assert_eq!(pathlen_request(&args), PathLenRequest::Unconstrained);
    }
}

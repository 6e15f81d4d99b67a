use anyhow::{anyhow, Result};
use clap::Args;

use crate::commands::App;
use crate::models::CaEdit;

#[derive(Args, Debug, Default)]
pub struct EditCaArgs {
    /// CRL URLs for future certificates. Pass an empty value to clear.
    #[arg(long)]
    pub crl_url: Vec<String>,
    #[arg(long)]
    pub ocsp_url: Option<String>,
    #[arg(long)]
    pub issuer_url: Option<String>,
    #[arg(long)]
    pub issuer_alt_name: Option<String>,
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,
    #[arg(long)]
    pub disable: bool,
    pub serial: String,
}

impl EditCaArgs {
    fn to_edit(&self) -> CaEdit {
        CaEdit {
            crl_url: (!self.crl_url.is_empty()).then(|| self.crl_url.clone()),
            ocsp_url: self.ocsp_url.clone(),
            issuer_url: self.issuer_url.clone(),
            issuer_alt_name: self.issuer_alt_name.clone(),
            enabled: match (self.enable, self.disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
        }
    }
}

/// Handle `edit_ca`. Only the issuance URLs and the enabled flag can change.
pub fn handle_edit_ca(app: &App, args: EditCaArgs) -> Result<()> {
    let edit = args.to_edit();
    if edit.is_empty() {
        return Err(anyhow!("Nothing to change for CA {}", args.serial));
    }
    let ca = app.engine.edit_ca(&args.serial, &edit)?;

    println!("Updated CA {} - {}", ca.serial, ca.name);
    if !ca.urls.crl_url.is_empty() {
        println!("CRL URL: {}", ca.urls.crl_url.join(", "));
    }
    if let Some(ocsp) = &ca.urls.ocsp_url {
        println!("OCSP URL: {}", ocsp);
    }
    if let Some(issuer) = &ca.urls.issuer_url {
        println!("Issuer URL: {}", issuer);
    }
    if let Some(ian) = &ca.urls.issuer_alt_name {
        println!("Issuer alternative name: {}", ian);
    }
    println!("Enabled: {}", if ca.enabled { "yes" } else { "no" });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_edit() {
        let args = EditCaArgs {
            ocsp_url: Some("http://ocsp.example.com".to_string()),
            disable: true,
            serial: "AB".to_string(),
            ..Default::default()
        };
        let edit = args.to_edit();
        assert_eq!(edit.crl_url, None);
        assert_eq!(edit.ocsp_url.as_deref(), Some("http://ocsp.example.com"));
        assert_eq!(edit.enabled, Some(false));
        assert!(EditCaArgs::default().to_edit().is_empty());
    }
}

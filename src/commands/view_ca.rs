use anyhow::Result;
use clap::Args;

use crate::commands::App;
use crate::models::{CertificateAuthority, IssuanceUrls};
use crate::pathlen::ChildAllowance;

#[derive(Args, Debug)]
pub struct ViewCaArgs {
    pub serial: String,
}

fn print_urls(urls: &IssuanceUrls) {
    if urls.crl_url.is_empty() {
        println!("    CRL URL: (none)");
    } else {
        for url in &urls.crl_url {
            println!("    CRL URL: {}", url);
        }
    }
    println!("    OCSP URL: {}", urls.ocsp_url.as_deref().unwrap_or("(none)"));
    println!("    Issuer URL: {}", urls.issuer_url.as_deref().unwrap_or("(none)"));
    println!(
        "    Issuer alternative name: {}",
        urls.issuer_alt_name.as_deref().unwrap_or("(none)")
    );
}

/// Lines describing the pathlen and what children may receive.
pub fn describe_pathlen(ca: &CertificateAuthority, allowance: ChildAllowance) -> Vec<String> {
    let pathlen = match ca.pathlen {
        Some(n) => n.to_string(),
        None => "unlimited".to_string(),
    };
    let max_child = match allowance {
        ChildAllowance::NoIntermediates => "none".to_string(),
        ChildAllowance::UpTo(n) => n.to_string(),
        ChildAllowance::Unlimited => "unlimited".to_string(),
    };
    vec![
        format!("Path length: {}", pathlen),
        format!("Max child path length: {}", max_child),
        format!(
            "Can sign intermediate CAs: {}",
            if allowance.allows_intermediate_ca() { "yes" } else { "no" }
        ),
    ]
}

/// Handle `view_ca`.
pub fn handle_view_ca(app: &App, args: ViewCaArgs) -> Result<()> {
    let ca = app.engine.resolve_ca(&args.serial)?;
    let allowance = app.engine.child_allowance(&ca)?;

    println!("{} ({})", ca.name, if ca.enabled { "enabled" } else { "disabled" });
    println!("Serial: {}", ca.serial);
    println!("Subject: {}", ca.subject);
    match &ca.parent {
        Some(parent) => println!("Parent: {}", parent),
        None => println!("Parent: (root)"),
    }
    for line in describe_pathlen(&ca, allowance) {
        println!("{}", line);
    }
    let constraints = ca.name_constraints.describe();
    if constraints.is_empty() {
        println!("Name constraints: (none)");
    } else {
        println!("Name constraints:");
        for line in constraints {
            println!("    {}", line);
        }
    }
    println!("Valid from: {}", ca.created.format("%Y-%m-%d %H:%M"));
    println!("Expires: {}", ca.expires.format("%Y-%m-%d %H:%M"));
    println!("Private key: {}", ca.private_key_path.display());
    println!("URLs for signed certificates:");
    print_urls(&ca.urls);
    println!();
    print!("{}", ca.pem);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::ca;

    #[test]
    fn test_describe_pathlen() {
        let root = ca("01", "root", None, Some(0));
        let lines = describe_pathlen(&root, ChildAllowance::NoIntermediates);
        assert_eq!(lines[0], "Path length: 0");
        assert_eq!(lines[1], "Max child path length: none");
        assert_eq!(lines[2], "Can sign intermediate CAs: no");

        let open = ca("02", "open", None, None);
        let lines = describe_pathlen(&open, ChildAllowance::Unlimited);
        assert_eq!(lines[0], "Path length: unlimited");
        assert_eq!(lines[2], "Can sign intermediate CAs: yes");
    }
}

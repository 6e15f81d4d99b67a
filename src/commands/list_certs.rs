use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;

use crate::commands::App;
use crate::models::Certificate;

#[derive(Args, Debug, Default)]
pub struct ListCertsArgs {
    /// Only list certificates signed by this CA.
    #[arg(long)]
    pub ca: Option<String>,
}

pub fn format_certificate_line(certificate: &Certificate, now: DateTime<Utc>) -> String {
    format!(
        "{} - {} ({})",
        certificate.serial,
        certificate.common_name,
        certificate.status(now)
    )
}

/// Handle `list_certs`.
pub fn handle_list_certs(app: &App, args: ListCertsArgs) -> Result<()> {
    let ca = match &args.ca {
        Some(prefix) => Some(app.engine.resolve_ca(prefix)?.serial),
        None => None,
    };
    let mut certificates = app.engine.list_certificates(ca.as_ref())?;
    certificates.sort_by(|a, b| a.created.cmp(&b.created));
    let now = Utc::now();
    for certificate in &certificates {
        println!("{}", format_certificate_line(certificate, now));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IssuanceUrls;
    use crate::serial::Serial;
    use crate::subject::Subject;
    use chrono::Duration;

    fn certificate(expires: DateTime<Utc>, revoked: bool) -> Certificate {
        Certificate {
            serial: Serial::parse("AB:CD").unwrap(),
            ca: Serial::parse("01:02").unwrap(),
            common_name: "www.example.com".to_string(),
            subject: Subject::parse("/CN=www.example.com").unwrap(),
            subject_alt_names: vec!["DNS:www.example.com".to_string()],
            urls: IssuanceUrls::default(),
            created: expires - Duration::days(30),
            expires,
            revoked,
            revoked_date: None,
            revoked_reason: None,
            pem: String::new(),
        }
    }

    #[test]
    fn test_format_certificate_line() {
        let now = Utc::now();
        let expires = now + Duration::days(10);
        assert_eq!(
            format_certificate_line(&certificate(expires, false), now),
            format!("AB:CD - www.example.com (expires: {})", expires.format("%Y-%m-%d"))
        );
        let expired = now - Duration::days(1);
        assert_eq!(
            format_certificate_line(&certificate(expired, false), now),
            format!("AB:CD - www.example.com (expired: {})", expired.format("%Y-%m-%d"))
        );
        assert_eq!(
            format_certificate_line(&certificate(expires, true), now),
            "AB:CD - www.example.com (revoked)"
        );
    }
}

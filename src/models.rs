//! Records kept by the storage collaborator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::name_constraints::NameConstraintSet;
use crate::serial::{Identified, Serial};
use crate::subject::Subject;

/// URLs a CA embeds in every certificate it signs. These are the only fields
/// of a CA that may change after creation, and they only affect future
/// signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceUrls {
    #[serde(default)]
    pub crl_url: Vec<String>,
    #[serde(default)]
    pub ocsp_url: Option<String>,
    #[serde(default)]
    pub issuer_url: Option<String>,
    #[serde(default)]
    pub issuer_alt_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateAuthority {
    pub serial: Serial,
    pub name: String,
    pub subject: Subject,
    /// Weak back-reference; the chain is walked child to root.
    pub parent: Option<Serial>,
    /// `None` means unconstrained. Immutable after creation.
    pub pathlen: Option<u32>,
    #[serde(default)]
    pub name_constraints: NameConstraintSet,
    #[serde(default)]
    pub urls: IssuanceUrls,
    pub enabled: bool,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub private_key_path: PathBuf,
    pub pem: String,
}

impl CertificateAuthority {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Human-readable identification used in error messages.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.serial)
    }
}

impl Identified for CertificateAuthority {
    fn serial(&self) -> &Serial {
        &self.serial
    }
}

/// A leaf certificate. Its embedded URLs are a snapshot of the issuing CA's
/// issuance URLs at signing time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: Serial,
    pub ca: Serial,
    pub common_name: String,
    pub subject: Subject,
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
    #[serde(default)]
    pub urls: IssuanceUrls,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub revoked_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_reason: Option<String>,
    pub pem: String,
}

impl Certificate {
    /// Status column of `list_certs`.
    pub fn status(&self, now: DateTime<Utc>) -> String {
        if self.revoked {
            "revoked".to_string()
        } else if self.expires < now {
            format!("expired: {}", self.expires.format("%Y-%m-%d"))
        } else {
            format!("expires: {}", self.expires.format("%Y-%m-%d"))
        }
    }
}

impl Identified for Certificate {
    fn serial(&self) -> &Serial {
        &self.serial
    }
}

/// Fields `edit_ca` may touch. `None` leaves a field unchanged; an empty
/// string (or empty list) clears it.
#[derive(Debug, Clone, Default)]
pub struct CaEdit {
    pub crl_url: Option<Vec<String>>,
    pub ocsp_url: Option<String>,
    pub issuer_url: Option<String>,
    pub issuer_alt_name: Option<String>,
    pub enabled: Option<bool>,
}

impl CaEdit {
    pub fn is_empty(&self) -> bool {
        self.crl_url.is_none()
            && self.ocsp_url.is_none()
            && self.issuer_url.is_none()
            && self.issuer_alt_name.is_none()
            && self.enabled.is_none()
    }

    pub fn apply(&self, ca: &mut CertificateAuthority) {
        fn non_empty(value: &str) -> Option<String> {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        }

        if let Some(crl) = &self.crl_url {
            ca.urls.crl_url = crl.iter().filter_map(|u| non_empty(u)).collect();
        }
        if let Some(ocsp) = &self.ocsp_url {
            ca.urls.ocsp_url = non_empty(ocsp);
        }
        if let Some(issuer) = &self.issuer_url {
            ca.urls.issuer_url = non_empty(issuer);
        }
        if let Some(ian) = &self.issuer_alt_name {
            ca.urls.issuer_alt_name = non_empty(ian);
        }
        if let Some(enabled) = self.enabled {
            ca.enabled = enabled;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::ca;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_label_names_serial() {
        let root = ca("AA:01", "Root", None, Some(1));
        assert_eq!(root.label(), "Root (AA:01)");
        assert!(root.is_root());
    }

    #[test]
    fn test_edit_only_touches_given_fields() {
        let mut record = ca("AA:01", "Root", None, Some(1));
        record.urls.issuer_url = Some("http://issuer.example.com".to_string());

        let edit = CaEdit {
            ocsp_url: Some("http://ocsp.example.com".to_string()),
            crl_url: Some(vec!["http://crl.example.com".to_string(), " ".to_string()]),
            ..Default::default()
        };
        edit.apply(&mut record);

        assert_eq!(record.urls.ocsp_url.as_deref(), Some("http://ocsp.example.com"));
        assert_eq!(record.urls.crl_url, vec!["http://crl.example.com"]);
        assert_eq!(record.urls.issuer_url.as_deref(), Some("http://issuer.example.com"));
        assert_eq!(record.pathlen, Some(1));
    }

    #[test]
    fn test_edit_empty_string_clears() {
        let mut record = ca("AA:01", "Root", None, None);
        record.urls.ocsp_url = Some("http://ocsp.example.com".to_string());
        CaEdit {
            ocsp_url: Some(String::new()),
            enabled: Some(false),
            ..Default::default()
        }
        .apply(&mut record);
        assert_eq!(record.urls.ocsp_url, None);
        assert!(!record.enabled);
    }

    #[test]
    fn test_certificate_status() {
        let now = Utc::now();
        let mut cert = Certificate {
            serial: Serial::parse("01").unwrap(),
            ca: Serial::parse("AA").unwrap(),
            common_name: "example.com".to_string(),
            subject: Subject::parse("/CN=example.com").unwrap(),
            subject_alt_names: vec![],
            urls: IssuanceUrls::default(),
            created: now,
            expires: now + Duration::days(3),
            revoked: false,
            revoked_date: None,
            revoked_reason: None,
            pem: String::new(),
        };
        assert!(cert.status(now).starts_with("expires: "));
        cert.expires = now - Duration::days(3);
        assert!(cert.status(now).starts_with("expired: "));
        cert.revoked = true;
        assert_eq!(cert.status(now), "revoked");
    }
}

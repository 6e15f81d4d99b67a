//! Distinguished names in the `/C=AT/ST=Vienna/O=Org/CN=name` notation.

use std::fmt;

use anyhow::{anyhow, Result};
use openssl::x509::{X509Name, X509NameRef};
use serde::{Deserialize, Serialize};

use crate::error::{CaError, CaResult};

/// Attribute keys accepted in a subject, in their canonical order.
const KNOWN_FIELDS: &[&str] = &["C", "ST", "L", "O", "OU", "CN", "emailAddress"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject {
    fields: Vec<(String, String)>,
}

impl Subject {
    /// Parse a slash separated subject. Empty values are dropped.
    pub fn parse(value: &str) -> CaResult<Self> {
        let trimmed = value.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('/') {
            return Err(CaError::InvalidSubject(value.to_string()));
        }

        let mut fields = Vec::new();
        for part in trimmed.split('/').filter(|p| !p.is_empty()) {
            let (key, val) = part
                .split_once('=')
                .ok_or_else(|| CaError::InvalidSubject(value.to_string()))?;
            let key = canonical_key(key.trim())
                .ok_or_else(|| CaError::InvalidSubject(value.to_string()))?;
            let val = val.trim();
            if !val.is_empty() {
                fields.push((key.to_string(), val.to_string()));
            }
        }
        Ok(Subject { fields })
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get("CN")
    }

    /// Set CN to `cn` if the subject does not carry one yet.
    pub fn with_default_common_name(mut self, cn: &str) -> Self {
        if self.common_name().is_none() {
            self.fields.push(("CN".to_string(), cn.to_string()));
        }
        self
    }

    /// True if `self` is an RDN-prefix of `other`, i.e. `other` lies in the
    /// directory subtree rooted at `self`.
    pub fn is_prefix_of(&self, other: &Subject) -> bool {
        self.fields.len() <= other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.eq_ignore_ascii_case(vb))
    }

    pub fn to_x509_name(&self) -> Result<X509Name> {
        let mut builder = X509Name::builder()
            .map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
        for (key, value) in &self.fields {
            builder
                .append_entry_by_text(key, value)
                .map_err(|e| anyhow!("Failed to set {}: {}", key, e))?;
        }
        Ok(builder.build())
    }

    pub fn from_x509_name(name: &X509NameRef) -> Result<Self> {
        let mut fields = Vec::new();
        for entry in name.entries() {
            let nid = entry.object().nid();
            let key = nid
                .short_name()
                .map_err(|e| anyhow!("Unsupported subject attribute: {}", e))?;
            let value = entry
                .data()
                .as_utf8()
                .map_err(|e| anyhow!("Subject attribute {} is not valid UTF-8: {}", key, e))?;
            fields.push((key.to_string(), value.to_string()));
        }
        Ok(Subject { fields })
    }
}

fn canonical_key(key: &str) -> Option<&'static str> {
    KNOWN_FIELDS
        .iter()
        .find(|k| k.eq_ignore_ascii_case(key))
        .copied()
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.fields {
            write!(f, "/{}={}", key, value)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Subject {
    type Error = CaError;

    fn try_from(value: String) -> CaResult<Self> {
        Subject::parse(&value)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_subject() {
        let subject = Subject::parse("/C=AT/ST=Vienna/L=Vienna/O=Org/OU=OrgUnit/CN=Test CA").unwrap();
        assert_eq!(subject.fields().len(), 6);
        assert_eq!(subject.common_name(), Some("Test CA"));
        assert_eq!(
            subject.to_string(),
            "/C=AT/ST=Vienna/L=Vienna/O=Org/OU=OrgUnit/CN=Test CA"
        );
    }

    #[test]
    fn test_empty_fields_are_dropped() {
        let subject = Subject::parse("/C=/ST=/L=/O=/OU=/CN=test").unwrap();
        assert_eq!(subject.to_string(), "/CN=test");
    }

    #[test]
    fn test_default_common_name() {
        let subject = Subject::parse("/C=/OU=smth").unwrap().with_default_common_name("test");
        assert_eq!(subject.to_string(), "/OU=smth/CN=test");

        let subject = Subject::parse("/CN=kept").unwrap().with_default_common_name("other");
        assert_eq!(subject.common_name(), Some("kept"));
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_syntax() {
        assert!(Subject::parse("/XX=foo").is_err());
        assert!(Subject::parse("CN=foo").is_err());
        assert!(Subject::parse("/CN").is_err());
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let subject = Subject::parse("/c=AT/cn=foo").unwrap();
        assert_eq!(subject.to_string(), "/C=AT/CN=foo");
    }

    #[test]
    fn test_prefix_relation() {
        let parent = Subject::parse("/C=AT/O=Org").unwrap();
        let child = Subject::parse("/C=AT/O=org/OU=Unit").unwrap();
        let other = Subject::parse("/C=DE/O=Org/OU=Unit").unwrap();
        assert!(parent.is_prefix_of(&child));
        assert!(!child.is_prefix_of(&parent));
        assert!(!parent.is_prefix_of(&other));
    }

    #[test]
    fn test_x509_round_trip() {
        let subject = Subject::parse("/C=AT/O=Org/CN=example").unwrap();
        let name = subject.to_x509_name().unwrap();
        assert_eq!(Subject::from_x509_name(&name).unwrap(), subject);
    }
}

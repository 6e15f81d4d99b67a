//! Extension sets for CA and leaf certificate templates.
//!
//! The builders here only decide *which* extensions a certificate carries. The
//! openssl signer turns them into `X509Extension`s, using its own builders for
//! the common ones and the DER produced by [`Extension::to_der`] for the rest.

use const_oid::db::rfc5280::{ID_AD_CA_ISSUERS, ID_AD_OCSP};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::{Ia5String, OctetString};
use der::{Decode, Encode};
use x509_cert::ext::pkix::constraints::name::GeneralSubtree as DerSubtree;
use x509_cert::ext::pkix::crl::dp::DistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AccessDescription, AuthorityInfoAccessSyntax, CrlDistributionPoints, IssuerAltName,
    NameConstraints,
};
use x509_cert::name::Name;

use crate::error::{CaError, CaResult};
use crate::models::{CertificateAuthority, IssuanceUrls};
use crate::name_constraints::{GeneralSubtree, NameConstraintSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsageBit {
    DigitalSignature,
    KeyEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKeyUsagePurpose {
    ServerAuth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    BasicConstraints { ca: bool, pathlen: Option<u32> },
    KeyUsage(Vec<KeyUsageBit>),
    ExtendedKeyUsage(Vec<ExtendedKeyUsagePurpose>),
    NameConstraints(NameConstraintSet),
    CrlDistributionPoints(Vec<String>),
    AuthorityInformationAccess {
        ocsp: Option<String>,
        ca_issuers: Option<String>,
    },
    IssuerAltName(String),
    SubjectAltName(Vec<GeneralSubtree>),
}

impl Extension {
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Extension::BasicConstraints { .. }
                | Extension::KeyUsage(_)
                | Extension::NameConstraints(_)
        )
    }

    /// OID and DER body (the extnValue contents) for extensions the openssl
    /// crate has no typed builder for. `None` for the others.
    pub fn to_der(&self) -> anyhow::Result<Option<(ObjectIdentifier, Vec<u8>)>> {
        let encoded = match self {
            Extension::NameConstraints(set) => {
                let value = NameConstraints {
                    permitted_subtrees: subtrees(&set.permitted)?,
                    excluded_subtrees: subtrees(&set.excluded)?,
                };
                (NameConstraints::OID, value.to_der()?)
            }
            Extension::CrlDistributionPoints(urls) => {
                let points = urls
                    .iter()
                    .map(|url| {
                        Ok(DistributionPoint {
                            distribution_point: Some(DistributionPointName::FullName(vec![
                                uri(url)?,
                            ])),
                            reasons: None,
                            crl_issuer: None,
                        })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                (CrlDistributionPoints::OID, CrlDistributionPoints(points).to_der()?)
            }
            Extension::AuthorityInformationAccess { ocsp, ca_issuers } => {
                let mut descriptions = Vec::new();
                if let Some(url) = ocsp {
                    descriptions.push(AccessDescription {
                        access_method: ID_AD_OCSP,
                        access_location: uri(url)?,
                    });
                }
                if let Some(url) = ca_issuers {
                    descriptions.push(AccessDescription {
                        access_method: ID_AD_CA_ISSUERS,
                        access_location: uri(url)?,
                    });
                }
                (
                    AuthorityInfoAccessSyntax::OID,
                    AuthorityInfoAccessSyntax(descriptions).to_der()?,
                )
            }
            Extension::IssuerAltName(value) => {
                (IssuerAltName::OID, IssuerAltName(vec![uri(value)?]).to_der()?)
            }
            _ => return Ok(None),
        };
        Ok(Some(encoded))
    }
}

fn uri(value: &str) -> anyhow::Result<GeneralName> {
    Ok(GeneralName::UniformResourceIdentifier(Ia5String::new(value)?))
}

fn subtrees(items: &[GeneralSubtree]) -> anyhow::Result<Option<Vec<DerSubtree>>> {
    if items.is_empty() {
        return Ok(None);
    }
    let subtrees = items
        .iter()
        .map(|item| {
            Ok(DerSubtree {
                base: general_name(item)?,
                minimum: 0,
                maximum: None,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Some(subtrees))
}

fn general_name(name: &GeneralSubtree) -> anyhow::Result<GeneralName> {
    Ok(match name {
        GeneralSubtree::Email(v) => GeneralName::Rfc822Name(Ia5String::new(v)?),
        GeneralSubtree::Dns(v) => GeneralName::DnsName(Ia5String::new(v)?),
        GeneralSubtree::DirectoryName(subject) => {
            GeneralName::DirectoryName(Name::from_der(&subject.to_x509_name()?.to_der()?)?)
        }
        GeneralSubtree::Uri(v) => uri(v)?,
        GeneralSubtree::Ip(range) => {
            GeneralName::IpAddress(OctetString::new(range.to_constraint_bytes())?)
        }
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    extensions: Vec<Extension>,
}

impl ExtensionSet {
    pub fn push(&mut self, extension: Extension) {
        self.extensions.push(extension);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.iter()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn basic_constraints(&self) -> Option<(bool, Option<u32>)> {
        self.iter().find_map(|e| match e {
            Extension::BasicConstraints { ca, pathlen } => Some((*ca, *pathlen)),
            _ => None,
        })
    }

    pub fn name_constraints(&self) -> Option<&NameConstraintSet> {
        self.iter().find_map(|e| match e {
            Extension::NameConstraints(set) => Some(set),
            _ => None,
        })
    }

    pub fn subject_alt_names(&self) -> &[GeneralSubtree] {
        self.iter()
            .find_map(|e| match e {
                Extension::SubjectAltName(names) => Some(names.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// The revocation and issuer URLs this set embeds.
    pub fn embedded_urls(&self) -> IssuanceUrls {
        let mut urls = IssuanceUrls::default();
        for extension in self.iter() {
            match extension {
                Extension::CrlDistributionPoints(crl) => urls.crl_url = crl.clone(),
                Extension::AuthorityInformationAccess { ocsp, ca_issuers } => {
                    urls.ocsp_url = ocsp.clone();
                    urls.issuer_url = ca_issuers.clone();
                }
                Extension::IssuerAltName(ian) => urls.issuer_alt_name = Some(ian.clone()),
                _ => {}
            }
        }
        urls
    }
}

/// Append CRL, AIA and IAN extensions for `urls`.
fn push_url_extensions(set: &mut ExtensionSet, urls: &IssuanceUrls) {
    if !urls.crl_url.is_empty() {
        set.push(Extension::CrlDistributionPoints(urls.crl_url.clone()));
    }
    if urls.ocsp_url.is_some() || urls.issuer_url.is_some() {
        set.push(Extension::AuthorityInformationAccess {
            ocsp: urls.ocsp_url.clone(),
            ca_issuers: urls.issuer_url.clone(),
        });
    }
    if let Some(ian) = &urls.issuer_alt_name {
        set.push(Extension::IssuerAltName(ian.clone()));
    }
}

/// Extensions for a new CA certificate.
///
/// `urls` are the URLs embedded in the CA's own certificate. Roots cannot
/// point to CRLs or OCSP responders, since nothing could revoke them.
pub fn build_ca_extensions(
    effective_pathlen: Option<u32>,
    merged_name_constraints: &NameConstraintSet,
    urls: &IssuanceUrls,
    has_parent: bool,
) -> CaResult<ExtensionSet> {
    if !has_parent {
        if !urls.crl_url.is_empty() {
            return Err(CaError::RootCaUrlNotAllowed("CRLs"));
        }
        if urls.ocsp_url.is_some() {
            return Err(CaError::RootCaUrlNotAllowed("OCSP"));
        }
    }

    let mut set = ExtensionSet::default();
    set.push(Extension::BasicConstraints {
        ca: true,
        pathlen: effective_pathlen,
    });
    set.push(Extension::KeyUsage(vec![
        KeyUsageBit::KeyCertSign,
        KeyUsageBit::CrlSign,
        KeyUsageBit::DigitalSignature,
    ]));
    if !merged_name_constraints.is_empty() {
        set.push(Extension::NameConstraints(merged_name_constraints.clone()));
    }
    push_url_extensions(&mut set, urls);
    Ok(set)
}

/// Extensions for a leaf certificate signed by `issuing_ca`.
///
/// Explicit `crl_url` / `ocsp_url` win; otherwise the issuing CA's URLs as
/// they are *now* are used, so edits to the CA only reach future
/// certificates.
pub fn build_leaf_extensions(
    crl_url: &[String],
    ocsp_url: Option<&str>,
    issuing_ca: &CertificateAuthority,
    subject_alt_names: &[GeneralSubtree],
) -> ExtensionSet {
    let mut urls = issuing_ca.urls.clone();
    if !crl_url.is_empty() {
        urls.crl_url = crl_url.to_vec();
    }
    if let Some(ocsp) = ocsp_url {
        urls.ocsp_url = Some(ocsp.to_string());
    }

    let mut set = ExtensionSet::default();
    set.push(Extension::BasicConstraints {
        ca: false,
        pathlen: None,
    });
    set.push(Extension::KeyUsage(vec![
        KeyUsageBit::DigitalSignature,
        KeyUsageBit::KeyAgreement,
        KeyUsageBit::KeyEncipherment,
    ]));
    set.push(Extension::ExtendedKeyUsage(vec![
        ExtendedKeyUsagePurpose::ServerAuth,
    ]));
    if !subject_alt_names.is_empty() {
        set.push(Extension::SubjectAltName(subject_alt_names.to_vec()));
    }
    push_url_extensions(&mut set, &urls);
    set
}

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use const_oid::AssociatedOid;
use der::Decode;
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time, Asn1TimeRef};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
    SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{X509Extension, X509Req, X509};
use serde::{Deserialize, Serialize};
use x509_cert::ext::pkix::BasicConstraints as DerBasicConstraints;

use crate::extensions::{Extension, ExtendedKeyUsagePurpose, ExtensionSet, KeyUsageBit};
use crate::name_constraints::GeneralSubtree;
use crate::private_key_storage::KeyHandle;
use crate::serial::Serial;
use crate::subject::Subject;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const EC_CURVE: Nid = Nid::X9_62_PRIME256V1;

/// Signature digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Digest {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl Digest {
    pub fn message_digest(self) -> MessageDigest {
        match self {
            Digest::Sha256 => MessageDigest::sha256(),
            Digest::Sha384 => MessageDigest::sha384(),
            Digest::Sha512 => MessageDigest::sha512(),
        }
    }
}

impl FromStr for Digest {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Digest::Sha256),
            "sha384" => Ok(Digest::Sha384),
            "sha512" => Ok(Digest::Sha512),
            _ => Err(anyhow!("Unknown hash algorithm: {}", value)),
        }
    }
}

impl TryFrom<String> for Digest {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Digest::Sha256 => "sha256",
            Digest::Sha384 => "sha384",
            Digest::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Rsa,
    Ec,
}

impl FromStr for KeyType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyType::Rsa),
            "ec" | "ecc" => Ok(KeyType::Ec),
            _ => Err(anyhow!("Unknown key type: {}", value)),
        }
    }
}

/// Generate a fresh private key. `key_size` only applies to RSA.
pub fn generate_private_key(key_type: KeyType, key_size: u32) -> Result<PKey<Private>> {
    match key_type {
        KeyType::Rsa => {
            let rsa = Rsa::generate(key_size)
                .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
            PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))
        }
        KeyType::Ec => {
            let group = EcGroup::from_curve_name(EC_CURVE)
                .map_err(|e| anyhow!("Failed to load EC curve: {}", e))?;
            let ec = EcKey::generate(&group)
                .map_err(|e| anyhow!("Failed to generate EC keypair: {}", e))?;
            PKey::from_ec_key(ec).map_err(|e| anyhow!("Failed to create private key: {}", e))
        }
    }
}

/// SubjectPublicKeyInfo PEM of a key.
pub fn public_key_pem<T>(key: &PKeyRef<T>) -> Result<Vec<u8>>
where
    T: openssl::pkey::HasPublic,
{
    key.public_key_to_pem()
        .map_err(|e| anyhow!("Failed to encode public key: {}", e))
}

/// Public key of a PEM certificate signing request, after checking its
/// self-signature.
pub fn csr_public_key(csr_pem: &[u8]) -> Result<Vec<u8>> {
    let req = X509Req::from_pem(csr_pem).context("Failed to parse CSR")?;
    let key = req.public_key().context("Failed to read CSR public key")?;
    if !req.verify(&key).context("Failed to verify CSR")? {
        return Err(anyhow!("CSR signature does not match its public key"));
    }
    public_key_pem(&key)
}

/// Everything needed to produce a certificate, except the signing key.
#[derive(Debug, Clone)]
pub struct CertificateTemplate {
    pub serial: Serial,
    pub subject: Subject,
    pub issuer: Subject,
    /// Issuer certificate; `None` for self-signed certificates.
    pub issuer_pem: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_key_pem: Vec<u8>,
    pub extensions: ExtensionSet,
    pub digest: Digest,
}

/// Turns a validated template into a signed certificate (DER).
pub trait Signer {
    fn sign(&self, template: &CertificateTemplate, key: &KeyHandle) -> Result<Vec<u8>>;
}

/// Signs with the openssl X509 builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSslSigner;

fn asn1_time(time: DateTime<Utc>) -> Result<Asn1Time> {
    Asn1Time::from_unix(time.timestamp()).map_err(|e| anyhow!("Failed to convert time: {}", e))
}

fn build_key_usage(bits: &[KeyUsageBit]) -> Result<X509Extension> {
    let mut ku = KeyUsage::new();
    ku.critical();
    for bit in bits {
        match bit {
            KeyUsageBit::DigitalSignature => ku.digital_signature(),
            KeyUsageBit::KeyEncipherment => ku.key_encipherment(),
            KeyUsageBit::KeyAgreement => ku.key_agreement(),
            KeyUsageBit::KeyCertSign => ku.key_cert_sign(),
            KeyUsageBit::CrlSign => ku.crl_sign(),
        };
    }
    ku.build().map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))
}

fn build_extended_key_usage(purposes: &[ExtendedKeyUsagePurpose]) -> Result<X509Extension> {
    let mut eku = ExtendedKeyUsage::new();
    for purpose in purposes {
        match purpose {
            ExtendedKeyUsagePurpose::ServerAuth => eku.server_auth(),
        };
    }
    eku.build()
        .map_err(|e| anyhow!("Failed to build ExtendedKeyUsage: {}", e))
}

fn build_der_extension(extension: &Extension) -> Result<Option<X509Extension>> {
    let Some((oid, der)) = extension.to_der()? else {
        return Ok(None);
    };
    let oid = oid.to_string();
    let object = Asn1Object::from_str(&oid).map_err(|e| anyhow!("Invalid OID {}: {}", oid, e))?;
    let contents = Asn1OctetString::new_from_bytes(&der)
        .map_err(|e| anyhow!("Failed to wrap extension value: {}", e))?;
    let ext = X509Extension::new_from_der(&object, extension.is_critical(), &contents)
        .map_err(|e| anyhow!("Failed to build extension {}: {}", oid, e))?;
    Ok(Some(ext))
}

impl Signer for OpenSslSigner {
    fn sign(&self, template: &CertificateTemplate, key: &KeyHandle) -> Result<Vec<u8>> {
        let signing_key = key.load()?;
        let public_key: PKey<Public> = PKey::public_key_from_pem(&template.public_key_pem)
            .map_err(|e| anyhow!("Failed to parse public key: {}", e))?;
        let issuer_cert = template
            .issuer_pem
            .as_deref()
            .map(|pem| X509::from_pem(pem.as_bytes()))
            .transpose()
            .map_err(|e| anyhow!("Failed to parse issuer certificate: {}", e))?;

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;

        let serial = BigNum::from_slice(&template.serial.to_bytes())?.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;

        let subject = template.subject.to_x509_name()?;
        builder
            .set_subject_name(&subject)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        let issuer = template.issuer.to_x509_name()?;
        builder
            .set_issuer_name(&issuer)
            .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;

        let not_before = asn1_time(template.not_before)?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
        let not_after = asn1_time(template.not_after)?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(&public_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        for extension in template.extensions.iter() {
            let built = match extension {
                Extension::BasicConstraints { ca, pathlen } => {
                    let mut bc = BasicConstraints::new();
                    bc.critical();
                    if *ca {
                        bc.ca();
                        if let Some(pathlen) = pathlen {
                            bc.pathlen(*pathlen);
                        }
                    }
                    bc.build()
                        .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?
                }
                Extension::KeyUsage(bits) => build_key_usage(bits)?,
                Extension::ExtendedKeyUsage(purposes) => build_extended_key_usage(purposes)?,
                Extension::SubjectAltName(names) => {
                    let mut san = SubjectAlternativeName::new();
                    for name in names {
                        match name {
                            GeneralSubtree::Dns(v) => san.dns(v),
                            GeneralSubtree::Email(v) => san.email(v),
                            GeneralSubtree::Uri(v) => san.uri(v),
                            GeneralSubtree::Ip(range) => san.ip(&range.addr().to_string()),
                            GeneralSubtree::DirectoryName(_) => {
                                return Err(anyhow!(
                                    "Directory names are not supported as subject alternative names"
                                ))
                            }
                        };
                    }
                    san.build(&builder.x509v3_context(issuer_cert.as_deref(), None))
                        .map_err(|e| anyhow!("Failed to build SubjectAlternativeName: {}", e))?
                }
                other => match build_der_extension(other)? {
                    Some(ext) => ext,
                    None => continue,
                },
            };
            builder
                .append_extension(built)
                .map_err(|e| anyhow!("Failed to add extension: {}", e))?;
        }

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(issuer_cert.as_deref(), None))
            .map_err(|e| anyhow!("Failed to build SubjectKeyIdentifier: {}", e))?;
        builder
            .append_extension(ski)
            .map_err(|e| anyhow!("Failed to add SubjectKeyIdentifier: {}", e))?;
        // Self-signed certificates carry no AuthorityKeyIdentifier.
        if issuer_cert.is_some() {
            let aki = AuthorityKeyIdentifier::new()
                .keyid(false)
                .build(&builder.x509v3_context(issuer_cert.as_deref(), None))
                .map_err(|e| anyhow!("Failed to build AuthorityKeyIdentifier: {}", e))?;
            builder
                .append_extension(aki)
                .map_err(|e| anyhow!("Failed to add AuthorityKeyIdentifier: {}", e))?;
        }

        builder
            .sign(&signing_key, template.digest.message_digest())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;

        builder
            .build()
            .to_der()
            .map_err(|e| anyhow!("Failed to encode certificate: {}", e))
    }
}

pub fn der_to_pem(der: &[u8]) -> Result<String> {
    let cert = X509::from_der(der).context("Signer returned an invalid certificate")?;
    let pem = cert.to_pem().context("Failed to encode certificate as PEM")?;
    String::from_utf8(pem).context("Certificate PEM is not UTF-8")
}

fn to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("Certificate time out of range"))
}

/// The BasicConstraints extension of a DER certificate, if it has one.
fn read_basic_constraints(der: &[u8]) -> Result<Option<DerBasicConstraints>> {
    let cert = x509_cert::Certificate::from_der(der).context("Failed to decode certificate")?;
    let Some(ext) = cert
        .tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|ext| ext.extn_id == DerBasicConstraints::OID)
    else {
        return Ok(None);
    };
    let bc = DerBasicConstraints::from_der(ext.extn_value.as_bytes())
        .context("Malformed BasicConstraints extension")?;
    Ok(Some(bc))
}

/// Fields read from an existing CA certificate.
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    pub serial: Serial,
    pub subject: Subject,
    pub issuer: Subject,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    /// Only meaningful when `is_ca` is set. `None` means unconstrained.
    pub pathlen: Option<u32>,
    pub pem: String,
}

impl ParsedCertificate {
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let cert = X509::from_pem(pem).context("Failed to parse certificate")?;
        let serial = Serial::from_bytes(&cert.serial_number().to_bn()?.to_vec());
        let (is_ca, pathlen) = match read_basic_constraints(&cert.to_der()?)? {
            Some(bc) if bc.ca => (true, bc.path_len_constraint.map(u32::from)),
            _ => (false, None),
        };

        Ok(Self {
            serial,
            subject: Subject::from_x509_name(cert.subject_name())?,
            issuer: Subject::from_x509_name(cert.issuer_name())?,
            not_before: to_datetime(cert.not_before())?,
            not_after: to_datetime(cert.not_after())?,
            is_ca,
            pathlen,
            pem: String::from_utf8(cert.to_pem()?).context("Certificate PEM is not UTF-8")?,
        })
    }

    /// Whether `issuer_pem`'s key produced this certificate's signature.
    pub fn is_signed_by(&self, issuer_pem: &str) -> Result<bool> {
        let cert = X509::from_pem(self.pem.as_bytes())?;
        let issuer = X509::from_pem(issuer_pem.as_bytes()).context("Failed to parse issuer")?;
        let key = issuer.public_key()?;
        Ok(cert.verify(&key)?)
    }

    pub fn is_self_signed(&self) -> Result<bool> {
        Ok(self.subject == self.issuer && self.is_signed_by(&self.pem)?)
    }

    /// Whether `private_key` belongs to this certificate.
    pub fn matches_key(&self, private_key: &PKey<Private>) -> Result<bool> {
        let cert = X509::from_pem(self.pem.as_bytes())?;
        Ok(cert.public_key()?.public_eq(private_key))
    }
}

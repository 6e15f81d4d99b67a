//! CA hierarchy engine.
//!
//! Creation of a CA runs through a fixed sequence of states:
//!
//! ```text
//! Requested -> ChainLoaded -> PathLenValidated -> NameConstraintsValidated
//!           -> ExtensionsBuilt -> SignedOrRejected
//! ```
//!
//! Every step before `SignedOrRejected` is free of side effects, so a request
//! that fails or is cancelled leaves nothing behind. The signer only ever sees
//! a fully validated template, and the record is persisted only after signing
//! succeeded.
//!
//! Children of the same parent are created one at a time: the engine holds a
//! lock on the parent's serial from before the chain is loaded until the
//! request finishes.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use secrecy::SecretString;
use tracing::{debug, info};

use crate::chain::Chain;
use crate::error::{CaError, CaResult};
use crate::extensions::{build_ca_extensions, build_leaf_extensions};
use crate::models::{CaEdit, Certificate, CertificateAuthority, IssuanceUrls};
use crate::name_constraints::{self, GeneralSubtree, IpRange, NameConstraintSet};
use crate::pathlen::{self, ChildAllowance, PathLenRequest};
use crate::pki_generator::{der_to_pem, CertificateTemplate, Digest, ParsedCertificate, Signer};
use crate::private_key_storage::KeyHandle;
use crate::serial::{resolve_owned, Serial};
use crate::storage::CaStore;
use crate::subject::Subject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationState {
    Requested,
    ChainLoaded,
    PathLenValidated,
    NameConstraintsValidated,
    ExtensionsBuilt,
    SignedOrRejected,
}

/// Shared flag to abort a running request.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct CreateCaRequest {
    /// Serial for the new certificate; the key store names the key after it.
    pub serial: Serial,
    pub name: String,
    pub subject: Subject,
    /// Serial prefix of the parent; `None` creates a root.
    pub parent: Option<String>,
    pub pathlen: PathLenRequest,
    pub name_constraints: NameConstraintSet,
    /// URLs embedded in the new CA's own certificate.
    pub ca_urls: IssuanceUrls,
    /// URLs the new CA will embed in what it signs.
    pub issuance_urls: IssuanceUrls,
    pub validity_days: u32,
    pub digest: Digest,
    pub public_key_pem: Vec<u8>,
    pub private_key_path: PathBuf,
    /// Unlocks the signing key: the parent's key, or the new key for roots.
    pub signing_password: Option<SecretString>,
}

#[derive(Debug)]
pub struct SignRequest {
    pub ca: String,
    pub subject: Subject,
    pub subject_alt_names: Vec<GeneralSubtree>,
    /// Add the common name to the subject alternative names.
    pub cn_in_san: bool,
    pub validity_days: u32,
    pub digest: Digest,
    pub public_key_pem: Vec<u8>,
    /// Override the issuing CA's CRL URLs.
    pub crl_url: Vec<String>,
    /// Override the issuing CA's OCSP URL.
    pub ocsp_url: Option<String>,
    pub signing_password: Option<SecretString>,
}

#[derive(Debug, Default)]
struct ParentLocks {
    locks: Mutex<HashMap<Serial, Arc<Mutex<()>>>>,
}

impl ParentLocks {
    fn lock_for(&self, serial: &Serial) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(serial.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

struct Transition<'a> {
    state: CreationState,
    cancel: &'a Cancellation,
}

impl Transition<'_> {
    fn check(&self) -> CaResult<()> {
        if self.cancel.is_cancelled() {
            debug!(state = ?self.state, "creation cancelled");
            return Err(CaError::Cancelled);
        }
        Ok(())
    }

    fn advance(&mut self, next: CreationState) -> CaResult<()> {
        self.check()?;
        debug!(from = ?self.state, to = ?next, "creation state transition");
        self.state = next;
        Ok(())
    }
}

fn cap_expiry(expires: DateTime<Utc>, limit: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match limit {
        Some(limit) if limit < expires => limit,
        _ => expires,
    }
}

pub struct CaHierarchyEngine<S, G> {
    store: S,
    signer: G,
    locks: ParentLocks,
}

impl<S: CaStore, G: Signer> CaHierarchyEngine<S, G> {
    pub fn new(store: S, signer: G) -> Self {
        Self {
            store,
            signer,
            locks: ParentLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolve_ca(&self, prefix: &str) -> CaResult<CertificateAuthority> {
        let candidates = self
            .store
            .load_cas_by_serial_prefix(prefix)
            .map_err(CaError::storage)?;
        resolve_owned(prefix, candidates)
    }

    pub fn resolve_certificate(&self, prefix: &str) -> CaResult<Certificate> {
        let candidates = self
            .store
            .load_certs_by_serial_prefix(prefix)
            .map_err(CaError::storage)?;
        resolve_owned(prefix, candidates)
    }

    pub fn list_cas(&self) -> CaResult<Vec<CertificateAuthority>> {
        self.store.list_cas().map_err(CaError::storage)
    }

    /// Certificates, optionally only those issued by `ca`.
    pub fn list_certificates(&self, ca: Option<&Serial>) -> CaResult<Vec<Certificate>> {
        let mut certificates = self.store.list_certificates().map_err(CaError::storage)?;
        if let Some(ca) = ca {
            certificates.retain(|c| &c.ca == ca);
        }
        Ok(certificates)
    }

    /// The chain seen by a new child of `ca`.
    pub fn chain_of(&self, ca: &CertificateAuthority) -> CaResult<Chain> {
        self.store.load_chain(&ca.serial)
    }

    /// How much delegation a new direct child of `ca` could receive.
    pub fn child_allowance(&self, ca: &CertificateAuthority) -> CaResult<ChildAllowance> {
        Ok(pathlen::child_allowance(&self.chain_of(ca)?))
    }

    /// Create a root or intermediate CA.
    pub fn create_ca(
        &self,
        request: CreateCaRequest,
        cancel: &Cancellation,
    ) -> CaResult<CertificateAuthority> {
        let mut transition = Transition {
            state: CreationState::Requested,
            cancel,
        };
        let result = self.run_creation(request, &mut transition);
        match &result {
            Ok(ca) => {
                debug!(from = ?transition.state, to = ?CreationState::SignedOrRejected, "creation state transition");
                info!(serial = %ca.serial, name = %ca.name, pathlen = ?ca.pathlen, "created CA");
            }
            Err(e) => {
                debug!(state = ?transition.state, error = %e, "creation rejected");
            }
        }
        result
    }

    fn run_creation(
        &self,
        request: CreateCaRequest,
        transition: &mut Transition<'_>,
    ) -> CaResult<CertificateAuthority> {
        transition.check()?;

        let parent = match &request.parent {
            Some(prefix) => Some(self.resolve_ca(prefix)?),
            None => None,
        };
        let lock = parent.as_ref().map(|p| self.locks.lock_for(&p.serial));
        let _guard = lock.as_ref().map(|l| l.lock());

        if self
            .store
            .load_ca(&request.serial)
            .map_err(CaError::storage)?
            .is_some()
        {
            return Err(CaError::DuplicateSerial(request.serial.to_string()));
        }

        let chain = match &parent {
            Some(parent) => self.store.load_chain(&parent.serial)?,
            None => Chain::empty(),
        };
        // reload under the lock
        let parent = chain.parent().cloned();
        if let Some(parent) = &parent {
            if !parent.enabled {
                return Err(CaError::CaDisabled(parent.label()));
            }
        }
        transition.advance(CreationState::ChainLoaded)?;

        let effective_pathlen = pathlen::validate(request.pathlen, &chain)?;
        transition.advance(CreationState::PathLenValidated)?;

        let merged = name_constraints::merge(&request.name_constraints, &chain)?;
        transition.advance(CreationState::NameConstraintsValidated)?;

        let embedded = match &parent {
            Some(parent) => {
                let own = &request.ca_urls;
                if own.crl_url.is_empty() && own.ocsp_url.is_none() && own.issuer_url.is_none() {
                    parent.urls.clone()
                } else {
                    IssuanceUrls {
                        issuer_alt_name: parent.urls.issuer_alt_name.clone(),
                        ..own.clone()
                    }
                }
            }
            None => request.ca_urls.clone(),
        };
        let extensions =
            build_ca_extensions(effective_pathlen, &merged, &embedded, parent.is_some())?;
        transition.advance(CreationState::ExtensionsBuilt)?;

        let subject = request.subject.clone().with_default_common_name(&request.name);
        let now = Utc::now();
        let expires = cap_expiry(
            now + Duration::days(i64::from(request.validity_days)),
            parent.as_ref().map(|p| p.expires),
        );
        let template = CertificateTemplate {
            serial: request.serial.clone(),
            subject: subject.clone(),
            issuer: parent
                .as_ref()
                .map(|p| p.subject.clone())
                .unwrap_or_else(|| subject.clone()),
            issuer_pem: parent.as_ref().map(|p| p.pem.clone()),
            not_before: now,
            not_after: expires,
            public_key_pem: request.public_key_pem.clone(),
            extensions,
            digest: request.digest,
        };
        let key = KeyHandle::new(
            parent
                .as_ref()
                .map(|p| p.private_key_path.clone())
                .unwrap_or_else(|| request.private_key_path.clone()),
            request.signing_password,
        );

        transition.check()?;
        let der = self.signer.sign(&template, &key).map_err(CaError::signing)?;
        let pem = der_to_pem(&der).map_err(CaError::signing)?;

        let ca = CertificateAuthority {
            serial: request.serial,
            name: request.name,
            subject,
            parent: parent.as_ref().map(|p| p.serial.clone()),
            pathlen: effective_pathlen,
            name_constraints: merged,
            urls: request.issuance_urls,
            enabled: true,
            created: now,
            expires,
            private_key_path: request.private_key_path,
            pem,
        };
        self.store.persist_new_ca(&ca).map_err(CaError::storage)?;
        Ok(ca)
    }

    /// Sign a leaf certificate with the CA identified by `request.ca`.
    pub fn sign_certificate(&self, request: SignRequest) -> CaResult<Certificate> {
        let ca = self.resolve_ca(&request.ca)?;
        if !ca.enabled {
            return Err(CaError::CaDisabled(ca.label()));
        }

        let mut names = request.subject_alt_names.clone();
        if request.cn_in_san {
            if let Some(cn) = request.subject.common_name() {
                let name = match cn.parse::<IpAddr>() {
                    Ok(ip) => GeneralSubtree::Ip(IpRange::host(ip)),
                    Err(_) => GeneralSubtree::Dns(cn.to_ascii_lowercase()),
                };
                if !names.contains(&name) {
                    names.insert(0, name);
                }
            }
        }
        if names.is_empty() {
            return Err(CaError::InvalidSubject(
                "a certificate needs at least one subject alternative name".to_string(),
            ));
        }
        for name in &names {
            if !ca.name_constraints.permits(name) {
                return Err(CaError::NameConstraintViolation {
                    pattern: name.clone(),
                    ancestor: ca.label(),
                });
            }
        }

        let extensions =
            build_leaf_extensions(&request.crl_url, request.ocsp_url.as_deref(), &ca, &names);
        let urls = extensions.embedded_urls();
        let now = Utc::now();
        let expires = cap_expiry(
            now + Duration::days(i64::from(request.validity_days)),
            Some(ca.expires),
        );
        let serial = Serial::random().map_err(CaError::signing)?;
        let template = CertificateTemplate {
            serial: serial.clone(),
            subject: request.subject.clone(),
            issuer: ca.subject.clone(),
            issuer_pem: Some(ca.pem.clone()),
            not_before: now,
            not_after: expires,
            public_key_pem: request.public_key_pem,
            extensions,
            digest: request.digest,
        };
        let key = KeyHandle::new(ca.private_key_path.clone(), request.signing_password);
        let der = self.signer.sign(&template, &key).map_err(CaError::signing)?;
        let pem = der_to_pem(&der).map_err(CaError::signing)?;

        let certificate = Certificate {
            serial,
            ca: ca.serial.clone(),
            common_name: request.subject.common_name().unwrap_or_default().to_string(),
            subject: request.subject,
            subject_alt_names: names.iter().map(|n| n.to_string()).collect(),
            urls,
            created: now,
            expires,
            revoked: false,
            revoked_date: None,
            revoked_reason: None,
            pem,
        };
        self.store
            .persist_certificate(&certificate)
            .map_err(CaError::storage)?;
        info!(serial = %certificate.serial, ca = %ca.serial, cn = %certificate.common_name, "signed certificate");
        Ok(certificate)
    }

    /// Change the issuance URLs or the enabled flag of a CA.
    pub fn edit_ca(&self, prefix: &str, edit: &CaEdit) -> CaResult<CertificateAuthority> {
        let ca = self.resolve_ca(prefix)?;
        if edit.is_empty() {
            return Ok(ca);
        }
        let updated = self
            .store
            .persist_edit(&ca.serial, edit)
            .map_err(CaError::storage)?;
        info!(serial = %updated.serial, "edited CA");
        Ok(updated)
    }

    pub fn revoke_certificate(&self, prefix: &str, reason: Option<String>) -> CaResult<Certificate> {
        let certificate = self.resolve_certificate(prefix)?;
        if certificate.revoked {
            return Err(CaError::AlreadyRevoked(certificate.serial.to_string()));
        }
        let revoked = self
            .store
            .persist_revocation(&certificate.serial, Utc::now(), reason)
            .map_err(CaError::storage)?;
        info!(serial = %revoked.serial, reason = ?revoked.revoked_reason, "revoked certificate");
        Ok(revoked)
    }

    /// Register an existing CA certificate whose key is already in the key
    /// store at `private_key_path`.
    pub fn import_ca(
        &self,
        name: &str,
        certificate: &ParsedCertificate,
        private_key_path: PathBuf,
    ) -> CaResult<CertificateAuthority> {
        if !certificate.is_ca {
            return Err(CaError::InvalidSubject(format!(
                "{} is not a CA certificate",
                certificate.subject
            )));
        }
        if self
            .store
            .load_ca(&certificate.serial)
            .map_err(CaError::storage)?
            .is_some()
        {
            return Err(CaError::DuplicateSerial(certificate.serial.to_string()));
        }

        let parent = if certificate.is_self_signed().map_err(CaError::signing)? {
            None
        } else {
            let mut found = None;
            for candidate in self.list_cas()? {
                if candidate.subject == certificate.issuer
                    && certificate
                        .is_signed_by(&candidate.pem)
                        .map_err(CaError::signing)?
                {
                    found = Some(candidate.serial);
                    break;
                }
            }
            Some(found.ok_or_else(|| {
                CaError::NotFound(format!("issuer of {} ({})", certificate.subject, certificate.issuer))
            })?)
        };

        let ca = CertificateAuthority {
            serial: certificate.serial.clone(),
            name: name.to_string(),
            subject: certificate.subject.clone(),
            parent,
            pathlen: certificate.pathlen,
            name_constraints: NameConstraintSet::default(),
            urls: IssuanceUrls::default(),
            enabled: true,
            created: certificate.not_before,
            expires: certificate.not_after,
            private_key_path,
            pem: certificate.pem.clone(),
        };
        self.store.persist_new_ca(&ca).map_err(CaError::storage)?;
        info!(serial = %ca.serial, name = %ca.name, "imported CA");
        Ok(ca)
    }
}

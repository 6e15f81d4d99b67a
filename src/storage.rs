//! Record storage for CAs and certificates.
//!
//! The engine only talks to the [`CaStore`] trait. Two stores are provided:
//! [`MemoryStore`] for tests and embedding, and [`FileStore`], which keeps
//! every record in one JSON document and replaces it atomically on each
//! write.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::chain::Chain;
use crate::error::CaResult;
use crate::models::{CaEdit, Certificate, CertificateAuthority};
use crate::serial::Serial;

pub trait CaStore: Send + Sync {
    fn load_ca(&self, serial: &Serial) -> Result<Option<CertificateAuthority>>;

    fn list_cas(&self) -> Result<Vec<CertificateAuthority>>;

    /// Store a new CA. Fails for duplicate serials and unknown parents.
    fn persist_new_ca(&self, ca: &CertificateAuthority) -> Result<()>;

    /// Apply `edit` to the stored CA and return the updated record.
    fn persist_edit(&self, serial: &Serial, edit: &CaEdit) -> Result<CertificateAuthority>;

    fn list_certificates(&self) -> Result<Vec<Certificate>>;

    fn persist_certificate(&self, certificate: &Certificate) -> Result<()>;

    fn persist_revocation(
        &self,
        serial: &Serial,
        date: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Certificate>;

    /// Ancestors of `serial`, starting with `serial` itself.
    fn load_chain(&self, serial: &Serial) -> CaResult<Chain> {
        Chain::walk(serial, |s| self.load_ca(s))
    }

    fn load_cas_by_serial_prefix(&self, prefix: &str) -> Result<Vec<CertificateAuthority>> {
        Ok(self
            .list_cas()?
            .into_iter()
            .filter(|ca| ca.serial.matches_prefix(prefix))
            .collect())
    }

    fn load_certs_by_serial_prefix(&self, prefix: &str) -> Result<Vec<Certificate>> {
        Ok(self
            .list_certificates()?
            .into_iter()
            .filter(|cert| cert.serial.matches_prefix(prefix))
            .collect())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Records {
    #[serde(default)]
    cas: BTreeMap<Serial, CertificateAuthority>,
    #[serde(default)]
    certificates: BTreeMap<Serial, Certificate>,
}

impl Records {
    fn insert_ca(&mut self, ca: &CertificateAuthority) -> Result<()> {
        if self.cas.contains_key(&ca.serial) {
            return Err(anyhow!("A CA with serial {} already exists", ca.serial));
        }
        if let Some(parent) = &ca.parent {
            if parent == &ca.serial {
                return Err(anyhow!("CA {} cannot be its own parent", ca.serial));
            }
            if !self.cas.contains_key(parent) {
                return Err(anyhow!("Parent CA {} does not exist", parent));
            }
        }
        self.cas.insert(ca.serial.clone(), ca.clone());
        Ok(())
    }

    fn edit_ca(&mut self, serial: &Serial, edit: &CaEdit) -> Result<CertificateAuthority> {
        let ca = self
            .cas
            .get_mut(serial)
            .ok_or_else(|| anyhow!("CA {} does not exist", serial))?;
        edit.apply(ca);
        Ok(ca.clone())
    }

    fn insert_certificate(&mut self, certificate: &Certificate) -> Result<()> {
        if self.certificates.contains_key(&certificate.serial) {
            return Err(anyhow!(
                "A certificate with serial {} already exists",
                certificate.serial
            ));
        }
        if !self.cas.contains_key(&certificate.ca) {
            return Err(anyhow!("Issuing CA {} does not exist", certificate.ca));
        }
        self.certificates
            .insert(certificate.serial.clone(), certificate.clone());
        Ok(())
    }

    fn revoke(
        &mut self,
        serial: &Serial,
        date: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Certificate> {
        let certificate = self
            .certificates
            .get_mut(serial)
            .ok_or_else(|| anyhow!("Certificate {} does not exist", serial))?;
        certificate.revoked = true;
        certificate.revoked_date = Some(date);
        certificate.revoked_reason = reason;
        Ok(certificate.clone())
    }
}

/// Records held in process memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaStore for MemoryStore {
    fn load_ca(&self, serial: &Serial) -> Result<Option<CertificateAuthority>> {
        Ok(self.records.read().cas.get(serial).cloned())
    }

    fn list_cas(&self) -> Result<Vec<CertificateAuthority>> {
        Ok(self.records.read().cas.values().cloned().collect())
    }

    fn persist_new_ca(&self, ca: &CertificateAuthority) -> Result<()> {
        self.records.write().insert_ca(ca)
    }

    fn persist_edit(&self, serial: &Serial, edit: &CaEdit) -> Result<CertificateAuthority> {
        self.records.write().edit_ca(serial, edit)
    }

    fn list_certificates(&self) -> Result<Vec<Certificate>> {
        Ok(self.records.read().certificates.values().cloned().collect())
    }

    fn persist_certificate(&self, certificate: &Certificate) -> Result<()> {
        self.records.write().insert_certificate(certificate)
    }

    fn persist_revocation(
        &self,
        serial: &Serial,
        date: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Certificate> {
        self.records.write().revoke(serial, date, reason)
    }
}

/// Records kept in a JSON file.
///
/// Writes go to a temporary file in the same directory which then replaces
/// the database, so readers never see a half-written file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: RwLock<Records>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let data = fs::read(&path)
                .with_context(|| format!("Failed to read database {}", path.display()))?;
            serde_json::from_slice(&data)
                .with_context(|| format!("Failed to parse database {}", path.display()))?
        } else {
            Records::default()
        };
        debug!(path = %path.display(), "opened file store");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Open `ca-hierarchy.json` inside `data_dir`, creating the directory.
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        Self::open(data_dir.join("ca-hierarchy.json"))
    }

    fn save(&self, records: &Records) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir).context("Failed to create temporary database")?;
        let data = serde_json::to_vec_pretty(records).context("Failed to serialize database")?;
        tmp.write_all(&data)
            .context("Failed to write temporary database")?;
        tmp.persist(&self.path)
            .map_err(|e| anyhow!("Failed to replace database {}: {}", self.path.display(), e))?;
        Ok(())
    }

    /// Run `change` on a copy of the records and keep it only once saved.
    fn update<T>(&self, change: impl FnOnce(&mut Records) -> Result<T>) -> Result<T> {
        let mut records = self.records.write();
        let mut updated = records.clone();
        let result = change(&mut updated)?;
        self.save(&updated)?;
        *records = updated;
        Ok(result)
    }
}

impl CaStore for FileStore {
    fn load_ca(&self, serial: &Serial) -> Result<Option<CertificateAuthority>> {
        Ok(self.records.read().cas.get(serial).cloned())
    }

    fn list_cas(&self) -> Result<Vec<CertificateAuthority>> {
        Ok(self.records.read().cas.values().cloned().collect())
    }

    fn persist_new_ca(&self, ca: &CertificateAuthority) -> Result<()> {
        self.update(|records| records.insert_ca(ca))
    }

    fn persist_edit(&self, serial: &Serial, edit: &CaEdit) -> Result<CertificateAuthority> {
        self.update(|records| records.edit_ca(serial, edit))
    }

    fn list_certificates(&self) -> Result<Vec<Certificate>> {
        Ok(self.records.read().certificates.values().cloned().collect())
    }

    fn persist_certificate(&self, certificate: &Certificate) -> Result<()> {
        self.update(|records| records.insert_certificate(certificate))
    }

    fn persist_revocation(
        &self,
        serial: &Serial,
        date: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Certificate> {
        self.update(|records| records.revoke(serial, date, reason))
    }
}

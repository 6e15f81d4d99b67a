//! Private Key Storage Module
//!
//! CA private keys live in a single directory as PKCS#8 PEM files named after
//! the CA serial without separators (`BD5BAB....pem`).
//!
//! # Encryption
//!
//! - Without a passphrase the key is written as plain PKCS#8 PEM.
//! - With a passphrase it is written as encrypted PKCS#8 (AES-256-CBC).
//!
//! Files are created with mode 0600 on Unix.
//!
//! The engine never opens keys itself. It only hands a [`KeyHandle`] to the
//! signer, which calls [`KeyHandle::load`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use secrecy::{ExposeSecret, SecretString};

use crate::serial::Serial;

/// Location of a private key plus the passphrase needed to open it.
#[derive(Debug)]
pub struct KeyHandle {
    pub path: PathBuf,
    pub password: Option<SecretString>,
}

impl KeyHandle {
    pub fn new(path: impl Into<PathBuf>, password: Option<SecretString>) -> Self {
        Self {
            path: path.into(),
            password,
        }
    }

    /// Read and decrypt the key.
    pub fn load(&self) -> Result<PKey<Private>> {
        let pem = fs::read(&self.path)
            .with_context(|| format!("Failed to read private key from {}", self.path.display()))?;
        let key = match &self.password {
            Some(password) => {
                PKey::private_key_from_pem_passphrase(&pem, password.expose_secret().as_bytes())
                    .map_err(|e| {
                        anyhow!(
                            "Failed to decrypt private key from {}: {}",
                            self.path.display(),
                            e
                        )
                    })?
            }
            None => PKey::private_key_from_pem(&pem).map_err(|e| {
                anyhow!(
                    "Failed to parse private key from {} (is it password protected?): {}",
                    self.path.display(),
                    e
                )
            })?,
        };
        Ok(key)
    }
}

/// Directory of CA private keys.
#[derive(Debug, Clone)]
pub struct KeyStore {
    directory: PathBuf,
}

impl KeyStore {
    /// Open the key store, creating the directory if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).context("Failed to create key store directory")?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn key_path(&self, serial: &Serial) -> PathBuf {
        self.directory.join(format!("{}.pem", serial.compact()))
    }

    /// Write `private_key` for the CA `serial` and return its path.
    pub fn store_key(
        &self,
        serial: &Serial,
        private_key: &PKey<Private>,
        password: Option<&SecretString>,
    ) -> Result<PathBuf> {
        let path = self.key_path(serial);
        write_key_file(&path, private_key, password)?;
        Ok(path)
    }

    pub fn handle(&self, serial: &Serial, password: Option<SecretString>) -> KeyHandle {
        KeyHandle::new(self.key_path(serial), password)
    }

    pub fn retrieve_key(&self, serial: &Serial, password: Option<SecretString>) -> Result<PKey<Private>> {
        self.handle(serial, password).load()
    }

    pub fn delete_key(&self, serial: &Serial) -> Result<()> {
        let path = self.key_path(serial);
        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete private key {}", path.display()))?;
        Ok(())
    }
}

/// Write a PKCS#8 PEM key file readable only by its owner. Existing files
/// are never overwritten.
pub fn write_key_file(
    path: &Path,
    private_key: &PKey<Private>,
    password: Option<&SecretString>,
) -> Result<()> {
    let pem = match password {
        Some(password) => private_key
            .private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                password.expose_secret().as_bytes(),
            )
            .map_err(|e| anyhow!("Failed to convert private key to encrypted PKCS#8: {}", e))?,
        None => private_key
            .private_key_to_pem_pkcs8()
            .map_err(|e| anyhow!("Failed to convert private key to PKCS#8: {}", e))?,
    };

    if path.exists() {
        return Err(anyhow!(
            "Refusing to overwrite existing private key {}",
            path.display()
        ));
    }
    fs::write(path, &pem)
        .with_context(|| format!("Failed to write private key to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Ask for a passphrase on the terminal. An empty answer means none.
pub fn prompt_password(prompt: &str) -> Result<Option<SecretString>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    if password.is_empty() {
        Ok(None)
    } else {
        Ok(Some(SecretString::from(password)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::rsa::Rsa;
    use tempfile::TempDir;

    fn key() -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
    }

    #[test]
    fn test_store_and_retrieve_plain() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path().join("keys")).unwrap();
        let serial = Serial::parse("AB:CD:01").unwrap();
        let original = key();

        let path = store.store_key(&serial, &original, None).unwrap();
        assert!(path.ends_with("ABCD01.pem"));

        let loaded = store.retrieve_key(&serial, None).unwrap();
        assert!(loaded.public_eq(&original));
    }

    #[test]
    fn test_store_and_retrieve_with_password() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path()).unwrap();
        let serial = Serial::parse("01").unwrap();
        let original = key();
        let password = SecretString::from("secret".to_string());

        store.store_key(&serial, &original, Some(&password)).unwrap();

        let pem = fs::read_to_string(store.key_path(&serial)).unwrap();
        assert!(pem.contains("ENCRYPTED PRIVATE KEY"));

        let wrong = store.retrieve_key(&serial, Some(SecretString::from("wrong".to_string())));
        assert!(wrong.is_err());

        let loaded = store
            .retrieve_key(&serial, Some(SecretString::from("secret".to_string())))
            .unwrap();
        assert!(loaded.public_eq(&original));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path()).unwrap();
        let path = store.store_key(&Serial::parse("02").unwrap(), &key(), None).unwrap();
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_refuses_overwrite_and_deletes() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path()).unwrap();
        let serial = Serial::parse("03").unwrap();
        store.store_key(&serial, &key(), None).unwrap();
        assert!(store.store_key(&serial, &key(), None).is_err());

        store.delete_key(&serial).unwrap();
        assert!(!store.key_path(&serial).exists());
        assert!(store.delete_key(&serial).is_err());
    }
}

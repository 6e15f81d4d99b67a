//! Handlers behind the `ca-hierarchy` subcommands.
//!
//! Each handler takes the opened [`App`] plus its parsed arguments and
//! prints its result to stdout.

pub mod dump_ca;
pub mod edit_ca;
pub mod import_ca;
pub mod init_ca;
pub mod list_cas;
pub mod list_certs;
pub mod revoke_cert;
pub mod sign_cert;
pub mod view_ca;
pub mod view_cert;

use anyhow::{Context, Result};
use secrecy::SecretString;

use crate::configs::AppConfig;
use crate::engine::CaHierarchyEngine;
use crate::pki_generator::OpenSslSigner;
use crate::private_key_storage::{prompt_password, KeyStore};
use crate::storage::FileStore;

pub type Engine = CaHierarchyEngine<FileStore, OpenSslSigner>;

/// Everything a command needs: configuration, engine and key store.
pub struct App {
    pub config: AppConfig,
    pub engine: Engine,
    pub keys: KeyStore,
}

impl App {
    pub fn open(config: AppConfig) -> Result<Self> {
        let store =
            FileStore::open_in(&config.storage.data_dir).context("Failed to open database")?;
        let keys = KeyStore::new(&config.storage.key_dir)?;
        Ok(Self {
            engine: CaHierarchyEngine::new(store, OpenSslSigner),
            keys,
            config,
        })
    }
}

/// Prompt for a passphrase when `ask` is set.
pub(crate) fn password_if(ask: bool, prompt: &str) -> Result<Option<SecretString>> {
    if ask {
        prompt_password(prompt)
    } else {
        Ok(None)
    }
}

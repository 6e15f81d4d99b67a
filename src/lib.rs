//! CA Hierarchy - X.509 certificate authority hierarchy manager
//!
//! Creates root and intermediate CAs, signs leaf certificates and keeps the
//! hierarchy consistent while doing so:
//!
//! - **Path length**: a CA can never hand out more delegation depth than its
//!   ancestors left it ([`pathlen`]).
//! - **Name constraints**: permitted subtrees only narrow down the chain and
//!   excluded subtrees accumulate ([`name_constraints`]).
//! - **Serial prefixes**: every command accepts a unique prefix of a serial
//!   instead of the full value ([`serial`]).
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, pathlen=2, permitted DNS:example.com)
//!   └── Intermediate CA (pathlen=1, inherits DNS:example.com)
//!       └── Issuing CA (pathlen=0)
//!           └── Leaf certificate (CA=false)
//! ```
//!
//! # Architecture
//!
//! The [`engine::CaHierarchyEngine`] runs every CA creation through a fixed
//! sequence of validation steps and only calls the signer once all of them
//! succeeded. Storage and signing are collaborators behind traits:
//!
//! - [`storage::CaStore`]: CA and certificate records ([`storage::MemoryStore`],
//!   [`storage::FileStore`])
//! - [`pki_generator::Signer`]: turns a [`pki_generator::CertificateTemplate`]
//!   into a signed certificate ([`pki_generator::OpenSslSigner`])
//!
//! Private keys are kept by [`private_key_storage::KeyStore`]; the engine only
//! ever passes a [`private_key_storage::KeyHandle`] to the signer.
//!
//! # Example
//!
//! ```no_run
//! use ca_hierarchy::engine::{CaHierarchyEngine, Cancellation, CreateCaRequest};
//! use ca_hierarchy::models::IssuanceUrls;
//! use ca_hierarchy::name_constraints::NameConstraintSet;
//! use ca_hierarchy::pathlen::PathLenRequest;
//! use ca_hierarchy::pki_generator::{generate_private_key, public_key_pem, Digest, KeyType, OpenSslSigner};
//! use ca_hierarchy::private_key_storage::KeyStore;
//! use ca_hierarchy::serial::Serial;
//! use ca_hierarchy::storage::MemoryStore;
//! use ca_hierarchy::subject::Subject;
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = CaHierarchyEngine::new(MemoryStore::new(), OpenSslSigner);
//!     let keys = KeyStore::new("keys")?;
//!
//!     let serial = Serial::random()?;
//!     let key = generate_private_key(KeyType::Ec, 0)?;
//!     let private_key_path = keys.store_key(&serial, &key, None)?;
//!
//!     let root = engine.create_ca(
//!         CreateCaRequest {
//!             serial,
//!             name: "Root".to_string(),
//!             subject: Subject::parse("/C=AT/O=Example/CN=Example Root")?,
//!             parent: None,
//!             pathlen: PathLenRequest::Limited(1),
//!             name_constraints: NameConstraintSet::from_cli_args(&["permitted,DNS:example.com"])?,
//!             ca_urls: IssuanceUrls::default(),
//!             issuance_urls: IssuanceUrls::default(),
//!             validity_days: 3650,
//!             digest: Digest::Sha256,
//!             public_key_pem: public_key_pem(&key)?,
//!             private_key_path,
//!             signing_password: None,
//!         },
//!         &Cancellation::new(),
//!     )?;
//!     println!("Created {}", root.serial);
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Validation failures are [`error::CaError`] values that name the offending
//! ancestor, pattern or value. Storage and signing failures are wrapped as
//! [`error::CaError::Storage`] / [`error::CaError::Signing`] with their
//! `anyhow` context chain.

pub mod chain;
pub mod commands;
pub mod configs;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod models;
pub mod name_constraints;
pub mod pathlen;
pub mod pki_generator;
pub mod private_key_storage;
pub mod serial;
pub mod storage;
pub mod subject;

//! CA Hierarchy - command line interface
//!
//! ```bash
//! ca-hierarchy init_ca --pathlen 1 Root /C=AT/O=Example/CN=Example Root
//! ca-hierarchy init_ca --parent BD:5B Intermediate /CN=Example Intermediate
//! ca-hierarchy sign_cert --ca 7F:0A --key-out www.key /CN=www.example.com
//! ca-hierarchy list_cas
//! ```
//!
//! Configuration is read from `ca-hierarchy.toml` (or `--config`). Logs go to
//! stderr; `RUST_LOG` or `-v` raise the level.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ca_hierarchy::commands::dump_ca::{handle_dump_ca, DumpCaArgs};
use ca_hierarchy::commands::edit_ca::{handle_edit_ca, EditCaArgs};
use ca_hierarchy::commands::import_ca::{handle_import_ca, ImportCaArgs};
use ca_hierarchy::commands::init_ca::{handle_init_ca, InitCaArgs};
use ca_hierarchy::commands::list_cas::handle_list_cas;
use ca_hierarchy::commands::list_certs::{handle_list_certs, ListCertsArgs};
use ca_hierarchy::commands::revoke_cert::{handle_revoke_cert, RevokeCertArgs};
use ca_hierarchy::commands::sign_cert::{handle_sign_cert, SignCertArgs};
use ca_hierarchy::commands::view_ca::{handle_view_ca, ViewCaArgs};
use ca_hierarchy::commands::view_cert::{handle_view_cert, ViewCertArgs};
use ca_hierarchy::commands::App;
use ca_hierarchy::configs::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "ca-hierarchy", version, about = "Manage an X.509 CA hierarchy")]
struct Cli {
    /// Configuration file (default: ca-hierarchy.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a root or intermediate CA.
    #[command(name = "init_ca")]
    InitCa(InitCaArgs),
    /// Change the URLs or the enabled flag of a CA.
    #[command(name = "edit_ca")]
    EditCa(EditCaArgs),
    /// Show details of a CA.
    #[command(name = "view_ca")]
    ViewCa(ViewCaArgs),
    /// List all CAs as a tree.
    #[command(name = "list_cas")]
    ListCas,
    /// Write a CA certificate to a file.
    #[command(name = "dump_ca")]
    DumpCa(DumpCaArgs),
    /// Import an existing CA certificate and key.
    #[command(name = "import_ca")]
    ImportCa(ImportCaArgs),
    /// Sign a leaf certificate.
    #[command(name = "sign_cert")]
    SignCert(SignCertArgs),
    /// List certificates.
    #[command(name = "list_certs")]
    ListCerts(ListCertsArgs),
    /// Show details of a certificate.
    #[command(name = "view_cert")]
    ViewCert(ViewCertArgs),
    /// Mark a certificate as revoked.
    #[command(name = "revoke_cert")]
    RevokeCert(RevokeCertArgs),
}

fn init_logging(level: &str, verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging.level, cli.verbose);

    let app = App::open(config)?;
    match cli.command {
        Command::InitCa(args) => handle_init_ca(&app, args),
        Command::EditCa(args) => handle_edit_ca(&app, args),
        Command::ViewCa(args) => handle_view_ca(&app, args),
        Command::ListCas => handle_list_cas(&app),
        Command::DumpCa(args) => handle_dump_ca(&app, args),
        Command::ImportCa(args) => handle_import_ca(&app, args),
        Command::SignCert(args) => handle_sign_cert(&app, args),
        Command::ListCerts(args) => handle_list_certs(&app, args),
        Command::ViewCert(args) => handle_view_cert(&app, args),
        Command::RevokeCert(args) => handle_revoke_cert(&app, args),
    }
}

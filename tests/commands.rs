use ca_hierarchy::commands::dump_ca::{handle_dump_ca, DumpCaArgs};
use ca_hierarchy::commands::edit_ca::{handle_edit_ca, EditCaArgs};
use ca_hierarchy::commands::init_ca::{handle_init_ca, InitCaArgs};
use ca_hierarchy::commands::list_cas::format_ca_tree;
use ca_hierarchy::commands::revoke_cert::{handle_revoke_cert, RevokeCertArgs};
use ca_hierarchy::commands::sign_cert::{handle_sign_cert_with_password, SignCertArgs};
use ca_hierarchy::commands::App;
use ca_hierarchy::configs::AppConfig;
use ca_hierarchy::pki_generator::{KeyType, ParsedCertificate};
use tempfile::TempDir;

fn open_app(dir: &TempDir) -> App {
    let mut config = AppConfig::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.key_dir = dir.path().join("keys");
    config.defaults.key_type = KeyType::Ec;
    App::open(config).unwrap()
}

fn init(app: &App, name: &str, parent: Option<&str>, pathlen: Option<u32>) -> String {
    handle_init_ca(
        app,
        InitCaArgs {
            parent: parent.map(str::to_string),
            pathlen,
            name: name.to_string(),
            subject: format!("/C=AT/O=Example/CN={}", name),
            ..InitCaArgs::default()
        },
    )
    .unwrap();
    app.engine
        .list_cas()
        .unwrap()
        .into_iter()
        .find(|ca| ca.name == name)
        .unwrap()
        .serial
        .to_string()
}

#[test]
fn hierarchy_survives_reopening() {
    let dir = TempDir::new().unwrap();
    let root = {
        let app = open_app(&dir);
        let root = init(&app, "Root", None, Some(1));
        init(&app, "Intermediate", Some(&root[..5]), None);
        root
    };

    let app = open_app(&dir);
    let cas = app.engine.list_cas().unwrap();
    assert_eq!(cas.len(), 2);
    let tree = format_ca_tree(&cas);
    assert_eq!(tree.len(), 2);
    assert!(tree[0].ends_with(" - Root"));
    assert!(tree[1].starts_with("  "));
    assert!(tree[1].ends_with(" - Intermediate"));

    // The intermediate got the default pathlen, so it cannot delegate.
    let intermediate = cas.iter().find(|ca| ca.name == "Intermediate").unwrap();
    assert_eq!(intermediate.pathlen, Some(0));
    let err = handle_init_ca(
        &app,
        InitCaArgs {
            parent: Some(intermediate.serial.to_string()),
            name: "Too deep".to_string(),
            subject: "/CN=Too deep".to_string(),
            ..InitCaArgs::default()
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("pathlen"));
    // The rejected CA's key is cleaned up.
    let keys = std::fs::read_dir(dir.path().join("keys")).unwrap().count();
    assert_eq!(keys, 2);

    let out = dir.path().join("root.pem");
    handle_dump_ca(
        &app,
        DumpCaArgs {
            serial: root.clone(),
            path: out.clone(),
        },
    )
    .unwrap();
    let parsed = ParsedCertificate::from_pem(&std::fs::read(out).unwrap()).unwrap();
    assert_eq!(parsed.serial.to_string(), root);
}

#[test]
fn sign_edit_and_revoke() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir);
    let root = init(&app, "Root", None, None);

    handle_edit_ca(
        &app,
        EditCaArgs {
            ocsp_url: Some("http://ocsp.example.com".to_string()),
            serial: root.clone(),
            ..EditCaArgs::default()
        },
    )
    .unwrap();

    let key_out = dir.path().join("www.key");
    let cert_out = dir.path().join("www.pem");
    handle_sign_cert_with_password(
        &app,
        SignCertArgs {
            ca: root.clone(),
            key_out: Some(key_out.clone()),
            out: Some(cert_out.clone()),
            subject: "/CN=www.example.com".to_string(),
            ..SignCertArgs::default()
        },
        None,
    )
    .unwrap();
    assert!(key_out.exists());

    let certs = app.engine.list_certificates(None).unwrap();
    assert_eq!(certs.len(), 1);
    let cert = &certs[0];
    assert_eq!(cert.urls.ocsp_url.as_deref(), Some("http://ocsp.example.com"));
    assert_eq!(std::fs::read_to_string(&cert_out).unwrap(), cert.pem);

    // Refuses to overwrite an existing key file.
    let again = handle_sign_cert_with_password(
        &app,
        SignCertArgs {
            ca: root.clone(),
            key_out: Some(key_out),
            subject: "/CN=www.example.com".to_string(),
            ..SignCertArgs::default()
        },
        None,
    );
    assert!(again.is_err());

    handle_revoke_cert(
        &app,
        RevokeCertArgs {
            reason: Some("superseded".to_string()),
            serial: cert.serial.to_string(),
        },
    )
    .unwrap();
    let revoked = app.engine.resolve_certificate(cert.serial.as_str()).unwrap();
    assert!(revoked.revoked);
    assert!(handle_revoke_cert(
        &app,
        RevokeCertArgs {
            reason: None,
            serial: cert.serial.to_string(),
        },
    )
    .is_err());
}

use anyhow::Result;

use crate::commands::App;
use crate::models::CertificateAuthority;
use crate::serial::Serial;

/// Render the CA tree, children indented below their parent.
pub fn format_ca_tree(cas: &[CertificateAuthority]) -> Vec<String> {
    fn walk(
        cas: &[CertificateAuthority],
        parent: Option<&Serial>,
        depth: usize,
        lines: &mut Vec<String>,
    ) {
        let mut children: Vec<&CertificateAuthority> =
            cas.iter().filter(|ca| ca.parent.as_ref() == parent).collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then(a.serial.cmp(&b.serial)));
        for ca in children {
            let suffix = if ca.enabled { "" } else { " (disabled)" };
            lines.push(format!(
                "{}{} - {}{}",
                "  ".repeat(depth),
                ca.serial,
                ca.name,
                suffix
            ));
            walk(cas, Some(&ca.serial), depth + 1, lines);
        }
    }

    let mut lines = Vec::new();
    walk(cas, None, 0, &mut lines);
    lines
}

/// Handle `list_cas`.
pub fn handle_list_cas(app: &App) -> Result<()> {
    let cas = app.engine.list_cas()?;
    if cas.is_empty() {
        println!("No CAs found.");
        return Ok(());
    }
    for line in format_ca_tree(&cas) {
        println!("{}", line);
    }
    Ok(())
}

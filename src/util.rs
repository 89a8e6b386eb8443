//! Small shared helpers.

use std::io::Write;
use std::path::Path;

/// Write a string to a file atomically (temp file + rename).
///
/// Token files are rewritten on every refresh; a crash mid-write must not
/// leave a truncated credential behind.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Extract the display label from an identity: `kmo@betterstory.co` → `betterstory.co`.
pub fn label_from_email(email: &str) -> String {
    match email.split_once('@') {
        Some((_, domain)) => domain.to_string(),
        None => email.to_string(),
    }
}

/// Sanitize an identity into a token filename: `foo@bar.com` → `foo_bar.com.json`.
///
/// The identity comes from the Google userinfo API, but path separators are
/// stripped anyway before it touches the filesystem.
pub fn email_to_token_filename(email: &str) -> String {
    let safe = email
        .replace('@', "_")
        .replace('/', "_")
        .replace('\\', "_")
        .replace("..", "_");
    format!("{safe}.json")
}

/// Parse an address header in either `Display Name <addr@host>` or bare form.
///
/// Returns `(name, email)`; name is empty for bare addresses.
pub fn parse_address(header: &str) -> (String, String) {
    let trimmed = header.trim();
    if let (Some(lt), Some(gt)) = (trimmed.find('<'), trimmed.rfind('>')) {
        if lt < gt {
            let email = trimmed[lt + 1..gt].trim().to_string();
            let name = trimmed[..lt].trim().trim_matches('"').trim().to_string();
            return (name, email);
        }
    }
    (String::new(), trimmed.to_string())
}

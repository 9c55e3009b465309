//! Write attachments to the save folder under sanitized names.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Reduce a declared filename to a safe, flat, lowercase name.
///
/// Every character other than alphanumerics, whitespace, `_` and `-` becomes
/// `.`, the result is trimmed and lowercased, embedded `\n`, `\r` and `\t` are
/// removed, and any whitespace left inside the name is folded to `.`. The
/// output never contains a path separator or a control character.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '_' || c == '-' {
                c
            } else {
                '.'
            }
        })
        .collect();

    replaced
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .map(|c| if c.is_whitespace() { '.' } else { c })
        .collect()
}

/// Sanitized filename for the `index`-th attachment of a message (1-based).
///
/// Names that sanitize to nothing, or only to dots (`.`, `..`), would point
/// at a directory; they are replaced by `attachment_<index>`.
pub fn safe_filename(name: &str, index: usize) -> String {
    let sanitized = sanitize_filename(name);
    if sanitized.chars().all(|c| c == '.') {
        format!("attachment_{index}")
    } else {
        sanitized
    }
}

/// Write `data` to `folder/filename`, creating `folder` if needed.
///
/// An existing file at that path is truncated and overwritten. Returns the
/// path written.
pub fn save_attachment(data: &[u8], filename: &str, folder: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(folder).map_err(|e| Error::io(folder, e))?;
    let path = folder.join(filename);
    std::fs::write(&path, data).map_err(|e| Error::io(&path, e))?;
    Ok(path)
}

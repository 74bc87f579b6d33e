use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Write `bytes` to a file that must not exist yet.
///
/// Fails with [`ErrorKind::AlreadyExists`] rather than overwriting.
pub async fn write_new_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

/// Write a diagnostic page, replacing any previous file of the same name.
pub async fn write_diagnostic(dir: &Path, name: &str, markup: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    tokio::fs::write(&path, markup)
        .await
        .with_context(|| format!("Failed to write diagnostic page: {}", path.display()))?;
    debug!(path = %path.display(), "Diagnostic page saved");
    Ok(path)
}

/// Create `dir` (and parents) if missing.
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Files directly inside `dir` whose extension matches `extension`, sorted by name.
pub async fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if matches && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Pick `name`, or `stem_N.ext` for the smallest `N` not in `taken`.
#[must_use]
pub fn suffixed_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    };
    (1..)
        .map(|n| format!("{stem}_{n}{ext}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Whether an existing file holds exactly `bytes`.
pub async fn file_has_contents(path: &Path, bytes: &[u8]) -> bool {
    match tokio::fs::read(path).await {
        Ok(existing) => existing == bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            debug!(path = %path.display(), "Could not compare existing file: {e}");
            false
        }
    }
}

/// Sanitize a filename to be filesystem-safe.
///
/// Replaces separators and shell-hostile characters with underscores,
/// collapses runs of underscores, keeps the extension, and caps the length.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let (name, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => filename.split_at(pos),
        _ => (filename, ""),
    };

    let sanitized_name: String = name
        .chars()
        .map(|c| match c {
            '(' | ')' | '[' | ']' | '-' | '_' | '.' => c,
            c if c.is_alphanumeric() => c,
            _ => '_',
        })
        .collect();

    let sanitized_name = sanitized_name
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    const MAX_NAME_LENGTH: usize = 200;
    let truncated_name: String = sanitized_name.chars().take(MAX_NAME_LENGTH).collect();

    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();

    if truncated_name.is_empty() {
        format!("asset{ext}")
    } else {
        format!("{truncated_name}{ext}")
    }
}

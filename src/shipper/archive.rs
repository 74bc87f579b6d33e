//! Zip bundling of snapshot files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::shipper::ShipError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStatus {
    Created { entries: usize },
    Reused,
}

/// Archive path for one run: `<stem>_<run_stamp>.<ext>` inside `dir`.
///
/// An archive is only ever reused by the run that created it.
#[must_use]
pub fn run_archive_path(dir: &Path, archive_name: &str, run_stamp: &str) -> PathBuf {
    let (stem, ext) = match archive_name.rfind('.') {
        Some(pos) if pos > 0 => archive_name.split_at(pos),
        _ => (archive_name, ".zip"),
    };
    dir.join(format!("{stem}_{run_stamp}{ext}"))
}

/// Zip `files` into `archive_path` unless an archive is already there.
///
/// Entries are stored under their file names, which must be unique.
/// Unreadable inputs are skipped with a warning. A failed build leaves no
/// file behind.
///
/// # Errors
///
/// Returns an error if the archive cannot be written.
pub async fn build_archive(archive_path: &Path, files: &[PathBuf]) -> Result<ArchiveStatus, ShipError> {
    if tokio::fs::try_exists(archive_path).await.unwrap_or(false) {
        info!(path = %archive_path.display(), "Using existing archive");
        return Ok(ArchiveStatus::Reused);
    }

    let archive_path = archive_path.to_path_buf();
    let files = files.to_vec();

    // Spawn blocking task for ZIP creation (CPU-intensive)
    tokio::task::spawn_blocking(move || {
        let result = write_zip(&archive_path, &files);
        if result.is_err() {
            if let Err(e) = std::fs::remove_file(&archive_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %archive_path.display(), "Failed to remove partial archive: {e}");
                }
            }
        }
        result
    })
    .await
    .map_err(|e| ShipError::Archive(format!("archive task failed: {e}")))?
}

fn write_zip(archive_path: &Path, files: &[PathBuf]) -> Result<ArchiveStatus, ShipError> {
    let io_err = |context: String| move |source: std::io::Error| ShipError::Io { context, source };

    let file = File::create(archive_path)
        .map_err(io_err(format!("failed to create {}", archive_path.display())))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries = 0;
    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), "Skipping unreadable artifact: {e}");
                continue;
            }
        };
        zip.start_file(name, options)
            .map_err(|e| ShipError::Archive(e.to_string()))?;
        zip.write_all(&bytes)
            .map_err(io_err(format!("failed to add {name}")))?;
        entries += 1;
    }

    let mut writer = zip.finish().map_err(|e| ShipError::Archive(e.to_string()))?;
    writer
        .flush()
        .map_err(io_err(format!("failed to flush {}", archive_path.display())))?;

    info!(path = %archive_path.display(), entries, "Artifacts zipped");
    Ok(ArchiveStatus::Created { entries })
}

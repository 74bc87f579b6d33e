//! Timestamped, write-once page snapshots.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info, warn};

use crate::constants::files;
use crate::fs_utils::{write_diagnostic, write_new_file};
use crate::schedule::Clock;

/// Attempts to find a free name before giving up on a snapshot.
const MAX_NAME_RETRIES: u32 = 16;

/// One saved copy of the target page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub filename: String,
    pub path: PathBuf,
}

/// `application_view_YYYYMMDD_HHMMSS_ffffff.html`
#[must_use]
pub fn snapshot_filename(timestamp: DateTime<FixedOffset>) -> String {
    format!(
        "{}{}.html",
        files::SNAPSHOT_PREFIX,
        timestamp.format("%Y%m%d_%H%M%S_%6f")
    )
}

/// Writes snapshots into one directory with strictly increasing timestamps.
pub struct SnapshotStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    last_timestamp: Option<DateTime<FixedOffset>>,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
            last_timestamp: None,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Next capture timestamp, bumped past the previous one if the clock
    /// has not advanced at microsecond resolution.
    fn next_timestamp(&mut self) -> DateTime<FixedOffset> {
        let mut timestamp = self.clock.now();
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                timestamp = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Persist `markup` as a new snapshot file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the file cannot be written.
    pub async fn save_snapshot(&mut self, markup: &str) -> std::io::Result<SnapshotRecord> {
        let mut retries = 0;
        loop {
            let timestamp = self.next_timestamp();
            let filename = snapshot_filename(timestamp);
            let path = self.dir.join(&filename);

            match write_new_file(&path, markup.as_bytes()).await {
                Ok(()) => {
                    info!(file = %filename, size = markup.len(), "Snapshot saved");
                    return Ok(SnapshotRecord {
                        timestamp,
                        filename,
                        path,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && retries < MAX_NAME_RETRIES => {
                    debug!(file = %filename, "Snapshot name taken, bumping timestamp");
                    retries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort `error_page_<ts>_<reason>.html`; failures are only logged.
    pub async fn save_error_page(&mut self, markup: &str, reason: &str) -> Option<PathBuf> {
        let timestamp = self.next_timestamp();
        let name = format!(
            "{}{}_{reason}.html",
            files::ERROR_PAGE_PREFIX,
            timestamp.format("%Y%m%d_%H%M%S_%6f")
        );
        match write_diagnostic(&self.dir, &name, markup).await {
            Ok(path) => {
                info!(file = %name, "Error page saved");
                Some(path)
            }
            Err(e) => {
                warn!("Failed to save error page: {e:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::portal_offset;
    use chrono::TimeZone;

    struct FrozenClock(DateTime<FixedOffset>);

    impl Clock for FrozenClock {
        fn now(&self) -> DateTime<FixedOffset> {
            self.0
        }
    }

    fn frozen() -> Arc<dyn Clock> {
        Arc::new(FrozenClock(
            portal_offset()
                .with_ymd_and_hms(2025, 6, 2, 14, 0, 0)
                .single()
                .unwrap(),
        ))
    }

    #[test]
    fn test_snapshot_filename_format() {
        let ts = portal_offset()
            .with_ymd_and_hms(2025, 6, 2, 14, 5, 9)
            .single()
            .unwrap()
            + chrono::Duration::microseconds(42);
        assert_eq!(
            snapshot_filename(ts),
            "application_view_20250602_140509_000042.html"
        );
    }

    #[tokio::test]
    async fn test_same_instant_gives_distinct_increasing_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::new(dir.path(), frozen());

        let first = store.save_snapshot("<html>1</html>").await.unwrap();
        let second = store.save_snapshot("<html>2</html>").await.unwrap();

        assert_ne!(first.filename, second.filename);
        assert!(second.timestamp > first.timestamp);
        assert!(first.filename < second.filename);
        assert_eq!(
            tokio::fs::read_to_string(&first.path).await.unwrap(),
            "<html>1</html>"
        );
    }

    #[tokio::test]
    async fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let clock = frozen();
        let taken = snapshot_filename(clock.now());
        tokio::fs::write(dir.path().join(&taken), "older run")
            .await
            .unwrap();

        let mut store = SnapshotStore::new(dir.path(), clock);
        let record = store.save_snapshot("new").await.unwrap();

        assert_ne!(record.filename, taken);
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join(&taken))
                .await
                .unwrap(),
            "older run"
        );
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::new(dir.path().join("missing"), frozen());
        assert!(store.save_snapshot("x").await.is_err());
    }

    #[tokio::test]
    async fn test_error_page_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::new(dir.path(), frozen());
        let path = store.save_error_page("oops", "reload").await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("error_page_20250602_140000_"));
        assert!(name.ends_with("_reload.html"));
    }
}

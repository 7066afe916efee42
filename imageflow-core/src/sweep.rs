//! Periodic removal of expired images.

use crate::index::MetadataIndex;
use crate::storage::ObjectStore;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub errors: usize,
}

pub struct Sweeper {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn MetadataIndex>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper").finish()
    }
}

impl Sweeper {
    pub fn new(store: Arc<dyn ObjectStore>, index: Arc<dyn MetadataIndex>) -> Self {
        Self { store, index }
    }

    /// One pass over the expiry index. No single bad record halts the
    /// sweep; blob errors are logged and the record is still removed so
    /// the pass converges.
    pub async fn run_once(&self) -> SweepReport {
        let now = Utc::now().timestamp();
        let expired = match self.index.list_expired(now).await {
            Ok(expired) => expired,
            Err(e) => {
                error!(error = %e, "failed to query expired records");
                return SweepReport { removed: 0, errors: 1 };
            }
        };
        if expired.is_empty() {
            return SweepReport::default();
        }
        info!(count = expired.len(), "sweeping expired images");

        let mut report = SweepReport::default();
        for record in expired {
            // GIF variant paths alias the original; delete each blob once.
            let keys: HashSet<&str> = [
                record.paths.original.as_str(),
                record.paths.webp.as_str(),
                record.paths.avif.as_str(),
            ]
            .into();
            for key in keys {
                if let Err(e) = self.store.delete(key).await
                    && !e.is_not_found()
                {
                    warn!(id = %record.id, key, error = %e, "failed to delete expired blob");
                    report.errors += 1;
                }
            }
            match self.index.delete(&record.id).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "failed to delete expired record");
                    report.errors += 1;
                }
            }
        }
        info!(removed = report.removed, errors = report.errors, "sweep finished");
        report
    }

    /// Run forever: one pass immediately, then every `interval_minutes`.
    pub fn spawn_interval(self: Arc<Self>, interval_minutes: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(interval_minutes.max(1) * 60);
            let mut ticker = tokio::time::interval(period);
            loop {
                // The first tick completes immediately.
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::model::{ImageFormat, ImageRecord, ImageSizes, Orientation, paths_for};
    use crate::storage::LocalStore;
    use tempfile::TempDir;

    fn record(id: &str, expires_at: i64, format: ImageFormat) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            file_name: format!("{id}.{}", format.extension()),
            uploaded_at: 100,
            expires_at,
            format,
            orientation: Orientation::Landscape,
            tags: vec!["tagged".to_string()],
            paths: paths_for(id, Orientation::Landscape, format),
            sizes: ImageSizes::default(),
        }
    }

    #[tokio::test]
    async fn removes_expired_blobs_and_records() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).await.unwrap());
        let index = Arc::new(MemoryIndex::new("http://x"));
        let sweeper = Sweeper::new(store.clone(), index.clone());

        let past = Utc::now().timestamp() - 10;
        let future = Utc::now().timestamp() + 3_600;
        let stale = record("stale", past, ImageFormat::Jpeg);
        let fresh = record("fresh", future, ImageFormat::Jpeg);
        for rec in [&stale, &fresh] {
            store.store(&rec.paths.original, b"o").await.unwrap();
            store.store(&rec.paths.webp, b"w").await.unwrap();
            store.store(&rec.paths.avif, b"a").await.unwrap();
            index.save(rec).await.unwrap();
        }

        let report = sweeper.run_once().await;
        assert_eq!(report, SweepReport { removed: 1, errors: 0 });

        assert!(index.get("stale").await.unwrap_err().is_not_found());
        assert!(store.get(&stale.paths.original).await.unwrap_err().is_not_found());
        assert!(store.get(&stale.paths.webp).await.unwrap_err().is_not_found());
        assert!(index.get("fresh").await.is_ok());
        assert!(store.get(&fresh.paths.original).await.is_ok());
    }

    #[tokio::test]
    async fn a_second_pass_over_the_same_state_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).await.unwrap());
        let index = Arc::new(MemoryIndex::new("http://x"));
        let sweeper = Sweeper::new(store.clone(), index.clone());

        let rec = record("gone", Utc::now().timestamp() - 5, ImageFormat::Gif);
        store.store(&rec.paths.original, b"gif").await.unwrap();
        index.save(&rec).await.unwrap();

        assert_eq!(sweeper.run_once().await, SweepReport { removed: 1, errors: 0 });
        assert_eq!(sweeper.run_once().await, SweepReport::default());
    }

    #[tokio::test]
    async fn missing_blobs_do_not_stop_the_pass() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).await.unwrap());
        let index = Arc::new(MemoryIndex::new("http://x"));
        let sweeper = Sweeper::new(store.clone(), index.clone());

        // Record whose blobs were never written: sweep still removes it.
        let rec = record("phantom", Utc::now().timestamp() - 5, ImageFormat::Png);
        index.save(&rec).await.unwrap();

        let report = sweeper.run_once().await;
        assert_eq!(report, SweepReport { removed: 1, errors: 0 });
        assert!(index.get("phantom").await.unwrap_err().is_not_found());
    }
}

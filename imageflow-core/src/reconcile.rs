//! Offline reconciliation between the object store and the metadata index.
//!
//! Two orphan kinds arise in steady state: blobs whose record save failed
//! after the blob write, and records whose blob delete failed after the
//! record delete. The serving path tolerates both; this pass lists them
//! and, on request, removes the orphan side.

use crate::error::Result;
use crate::index::MetadataIndex;
use crate::model::{VARIANT_DIRS, key_stem};
use crate::storage::ObjectStore;
use futures::TryStreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Blob keys whose stem matches no live record id.
    pub orphan_blobs: Vec<String>,
    /// Record ids whose original blob is gone.
    pub broken_records: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_blobs.is_empty() && self.broken_records.is_empty()
    }
}

pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn MetadataIndex>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish()
    }
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, index: Arc<dyn MetadataIndex>) -> Self {
        Self { store, index }
    }

    /// Scan both sides and report disagreements without mutating anything.
    pub async fn scan(&self) -> Result<ReconcileReport> {
        let ids: HashSet<String> = self.index.all_ids().await?.into_iter().collect();

        let mut report = ReconcileReport::default();
        for dir in VARIANT_DIRS {
            let prefix = format!("{dir}/");
            let metas: Vec<_> = self.store.list(&prefix).try_collect().await?;
            for meta in metas {
                if !ids.contains(key_stem(&meta.key)) {
                    report.orphan_blobs.push(meta.key);
                }
            }
        }

        for id in &ids {
            let record = match self.index.get(id).await {
                Ok(record) => record,
                // Deleted between the id scan and now.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            match self.store.get(&record.paths.original).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => report.broken_records.push(id.clone()),
                Err(e) => return Err(e),
            }
        }

        report.orphan_blobs.sort();
        report.broken_records.sort();
        Ok(report)
    }

    /// Remove everything a scan reported: orphan blobs are deleted, broken
    /// records are dropped from the index.
    pub async fn apply(&self, report: &ReconcileReport) -> Result<()> {
        for key in &report.orphan_blobs {
            match self.store.delete(key).await {
                Ok(()) => info!(key, "removed orphan blob"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(key, error = %e, "failed to remove orphan blob"),
            }
        }
        for id in &report.broken_records {
            match self.index.delete(id).await {
                Ok(()) => info!(id, "removed record with missing original"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(id, error = %e, "failed to remove broken record"),
            }
        }
        Ok(())
    }
}

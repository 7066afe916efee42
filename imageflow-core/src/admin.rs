//! Admin-surface operations that span the object store and the index.

use crate::error::Result;
use crate::index::MetadataIndex;
use crate::model::{VARIANT_DIRS, key_stem};
use crate::storage::ObjectStore;
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of purging one image id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Blobs actually removed.
    pub deleted_count: usize,
    /// Per-key delete failures; the purge keeps going past them.
    pub errors: Vec<String>,
    /// Whether a metadata record existed and was removed.
    pub record_removed: bool,
}

impl PurgeOutcome {
    /// Nothing matched the id on either side.
    pub fn found_nothing(&self) -> bool {
        self.deleted_count == 0 && !self.record_removed
    }
}

/// Delete every blob whose filename stem equals `id` across all variant
/// directories, then drop the record. Blob enumeration runs first so the
/// purge also collects blobs a half-failed upload left behind.
pub async fn purge_image(
    store: &Arc<dyn ObjectStore>,
    index: &Arc<dyn MetadataIndex>,
    id: &str,
) -> Result<PurgeOutcome> {
    let mut outcome = PurgeOutcome::default();

    for dir in VARIANT_DIRS {
        let prefix = format!("{dir}/{id}.");
        let metas: Vec<_> = store.list(&prefix).try_collect().await?;
        for meta in metas {
            if key_stem(&meta.key) != id {
                continue;
            }
            match store.delete(&meta.key).await {
                Ok(()) => outcome.deleted_count += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(key = %meta.key, error = %e, "failed to delete blob during purge");
                    outcome.errors.push(format!("{}: {e}", meta.key));
                }
            }
        }
    }

    match index.delete(id).await {
        Ok(()) => outcome.record_removed = true,
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    if outcome.found_nothing() {
        info!(id, "purge found no matching image files");
    } else {
        info!(
            id,
            deleted = outcome.deleted_count,
            errors = outcome.errors.len(),
            "image purged"
        );
    }
    Ok(outcome)
}

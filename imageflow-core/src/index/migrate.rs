//! One-shot migration from file-backed metadata to the index.
//!
//! Earlier deployments kept one JSON file per record. This reads every
//! `*.json` under a directory and saves each record through the index. A
//! completion marker makes re-runs no-ops, so the migration can sit in the
//! startup path of upgraded installations.

use super::MetadataIndex;
use crate::error::Result;
use crate::model::ImageRecord;
use std::path::Path;
use tracing::{info, warn};

/// Migrate all per-record JSON files under `dir` into `index`. Returns the
/// number of records migrated (zero when the completion marker is already
/// set). Files that fail to parse are skipped with a warning.
pub async fn migrate_json_dir(dir: &Path, index: &dyn MetadataIndex) -> Result<usize> {
    if index.migration_complete().await? {
        info!("metadata migration already completed, skipping");
        return Ok(0);
    }

    let mut migrated = 0usize;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        let record: ImageRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unparseable metadata file");
                continue;
            }
        };
        index.save(&record).await?;
        migrated += 1;
    }

    index.mark_migration_complete().await?;
    info!(migrated, "metadata migration finished");
    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::model::{ImageFormat, ImageSizes, Orientation, paths_for};
    use tempfile::TempDir;

    fn record(id: &str) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            file_name: format!("{id}.jpg"),
            uploaded_at: 1_700_000_000,
            expires_at: 0,
            format: ImageFormat::Jpeg,
            orientation: Orientation::Landscape,
            tags: vec!["migrated".to_string()],
            paths: paths_for(id, Orientation::Landscape, ImageFormat::Jpeg),
            sizes: ImageSizes::default(),
        }
    }

    #[tokio::test]
    async fn migrates_json_files_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        for id in ["a", "b"] {
            let json = serde_json::to_vec(&record(id)).unwrap();
            std::fs::write(dir.path().join(format!("{id}.json")), json).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{").unwrap();

        let index = MemoryIndex::new("http://x");
        let migrated = migrate_json_dir(dir.path(), &index).await.unwrap();
        assert_eq!(migrated, 2);
        assert_eq!(index.get("a").await.unwrap().tags, ["migrated"]);
        assert_eq!(index.all_ids().await.unwrap().len(), 2);

        // Honors the completion marker.
        let again = migrate_json_dir(dir.path(), &index).await.unwrap();
        assert_eq!(again, 0);
    }
}

//! In-memory metadata index.
//!
//! Test double for [`RedisIndex`] and the reference semantics for the
//! trait contracts. Maintains the same secondary structures a production
//! deployment keeps in Redis.

use super::{MetadataIndex, PAGE_CACHE_TTL_SECS, PageFilter, PageResult, compute_page};
use crate::error::{ImageFlowError, Result};
use crate::model::ImageRecord;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::warn;

const PAGE_CACHE_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    records: HashMap<String, ImageRecord>,
    /// (uploaded_at, id); iterated in reverse for newest-first.
    primary: BTreeSet<(i64, String)>,
    /// (expires_at, id); only non-zero expiries.
    expiry: BTreeSet<(i64, String)>,
    tag_sets: HashMap<String, HashSet<String>>,
    all_tags: BTreeSet<String>,
    page_cache: HashMap<String, (Instant, PageResult)>,
    migrated: bool,
}

pub struct MemoryIndex {
    inner: RwLock<Inner>,
    url_base: String,
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("records", &self.inner.read().records.len())
            .finish()
    }
}

impl MemoryIndex {
    pub fn new(url_base: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            url_base: url_base.into(),
        }
    }
}

impl Inner {
    fn invalidate_pages(&mut self) {
        self.page_cache.clear();
    }

    fn unlink(&mut self, record: &ImageRecord) {
        self.primary.remove(&(record.uploaded_at, record.id.clone()));
        if record.expires_at > 0 {
            self.expiry.remove(&(record.expires_at, record.id.clone()));
        }
        for tag in &record.tags {
            let emptied = match self.tag_sets.get_mut(tag) {
                Some(set) => {
                    if !set.remove(&record.id) {
                        warn!(id = %record.id, tag, "record was not a member of its tag set");
                    }
                    set.is_empty()
                }
                None => {
                    warn!(id = %record.id, tag, "tag set missing during delete");
                    false
                }
            };
            if emptied {
                self.tag_sets.remove(tag);
                self.all_tags.remove(tag);
            }
        }
    }
}

#[async_trait]
impl MetadataIndex for MemoryIndex {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn save(&self, record: &ImageRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(previous) = inner.records.remove(&record.id) {
            inner.unlink(&previous);
        }
        inner.primary.insert((record.uploaded_at, record.id.clone()));
        if record.expires_at > 0 {
            inner.expiry.insert((record.expires_at, record.id.clone()));
        }
        for tag in &record.tags {
            inner.tag_sets.entry(tag.clone()).or_default().insert(record.id.clone());
            inner.all_tags.insert(tag.clone());
        }
        inner.records.insert(record.id.clone(), record.clone());
        inner.invalidate_pages();
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ImageRecord> {
        self.inner
            .read()
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| ImageFlowError::NotFound(format!("no record for id {id}")))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<ImageRecord>> {
        let inner = self.inner.read();
        Ok(ids.iter().filter_map(|id| inner.records.get(id).cloned()).collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .remove(id)
            .ok_or_else(|| ImageFlowError::NotFound(format!("no record for id {id}")))?;
        inner.unlink(&record);
        inner.invalidate_pages();
        Ok(())
    }

    async fn all_ids(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().primary.iter().rev().map(|(_, id)| id.clone()).collect())
    }

    async fn ids_with_tags(&self, tags: &[String]) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut sets = tags.iter().map(|t| inner.tag_sets.get(t));
        let Some(first) = sets.next().flatten() else {
            return Ok(Vec::new());
        };
        let mut ids: HashSet<String> = first.clone();
        for set in sets {
            match set {
                Some(set) => ids.retain(|id| set.contains(id)),
                None => return Ok(Vec::new()),
            }
        }
        Ok(ids.into_iter().collect())
    }

    async fn all_tags(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().all_tags.iter().cloned().collect())
    }

    async fn list_expired(&self, now: i64) -> Result<Vec<ImageRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .expiry
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .filter_map(|(_, id)| inner.records.get(id).cloned())
            .collect())
    }

    async fn page(&self, filter: &PageFilter) -> Result<PageResult> {
        let filter = filter.clone().normalized();
        let key = filter.cache_key();
        {
            let inner = self.inner.read();
            if let Some((stored_at, page)) = inner.page_cache.get(&key)
                && stored_at.elapsed() < Duration::from_secs(PAGE_CACHE_TTL_SECS)
            {
                return Ok(page.clone());
            }
        }

        let records: Vec<ImageRecord> = self.inner.read().records.values().cloned().collect();
        let page = compute_page(records, &filter, &self.url_base);

        let mut inner = self.inner.write();
        if inner.page_cache.len() >= PAGE_CACHE_CAPACITY {
            let now = Instant::now();
            inner
                .page_cache
                .retain(|_, (stored_at, _)| now.duration_since(*stored_at) < Duration::from_secs(PAGE_CACHE_TTL_SECS));
            if inner.page_cache.len() >= PAGE_CACHE_CAPACITY {
                inner.page_cache.clear();
            }
        }
        inner.page_cache.insert(key, (Instant::now(), page.clone()));
        Ok(page)
    }

    async fn migration_complete(&self) -> Result<bool> {
        Ok(self.inner.read().migrated)
    }

    async fn mark_migration_complete(&self) -> Result<()> {
        self.inner.write().migrated = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageFormat, ImageSizes, Orientation, paths_for};

    fn record(id: &str, uploaded_at: i64, expires_at: i64, tags: &[&str]) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            file_name: format!("{id}.jpg"),
            uploaded_at,
            expires_at,
            format: ImageFormat::Jpeg,
            orientation: Orientation::Landscape,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            paths: paths_for(id, Orientation::Landscape, ImageFormat::Jpeg),
            sizes: ImageSizes::default(),
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let index = MemoryIndex::new("http://x");
        let rec = record("a", 100, 0, &["nature"]);
        index.save(&rec).await.unwrap();
        assert_eq!(index.get("a").await.unwrap(), rec);
        assert!(index.get("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn indexes_track_membership_invariants() {
        let index = MemoryIndex::new("http://x");
        index.save(&record("a", 100, 0, &["nature", "sunset"])).await.unwrap();
        index.save(&record("b", 200, 500, &["nature", "city"])).await.unwrap();

        assert_eq!(index.all_ids().await.unwrap(), ["b", "a"]);
        assert_eq!(
            index.all_tags().await.unwrap(),
            ["city", "nature", "sunset"]
        );

        let mut both = index
            .ids_with_tags(&["nature".to_string(), "sunset".to_string()])
            .await
            .unwrap();
        both.sort();
        assert_eq!(both, ["a"]);

        let mut nature = index.ids_with_tags(&["nature".to_string()]).await.unwrap();
        nature.sort();
        assert_eq!(nature, ["a", "b"]);

        assert!(index.ids_with_tags(&["missing".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expiry_index_only_holds_nonzero_expiries_in_ascending_order() {
        let index = MemoryIndex::new("http://x");
        index.save(&record("never", 100, 0, &[])).await.unwrap();
        index.save(&record("late", 100, 900, &[])).await.unwrap();
        index.save(&record("soon", 100, 300, &[])).await.unwrap();

        let expired: Vec<_> = index
            .list_expired(1_000)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(expired, ["soon", "late"]);

        assert!(index.list_expired(200).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_and_prunes_empty_tags() {
        let index = MemoryIndex::new("http://x");
        index.save(&record("a", 100, 400, &["nature", "solo"])).await.unwrap();
        index.save(&record("b", 200, 0, &["nature"])).await.unwrap();

        index.delete("a").await.unwrap();
        assert!(index.get("a").await.unwrap_err().is_not_found());
        assert_eq!(index.all_ids().await.unwrap(), ["b"]);
        assert_eq!(index.all_tags().await.unwrap(), ["nature"]);
        assert!(index.list_expired(10_000).await.unwrap().is_empty());

        // Idempotence: the second delete reports not-found, state unchanged.
        assert!(index.delete("a").await.unwrap_err().is_not_found());
        assert_eq!(index.all_ids().await.unwrap(), ["b"]);
    }

    #[tokio::test]
    async fn page_cache_hits_until_invalidated_by_writes() {
        let index = MemoryIndex::new("http://x");
        index.save(&record("a", 100, 0, &["nature"])).await.unwrap();

        let filter = PageFilter { page: 1, limit: 12, ..Default::default() };
        let first = index.page(&filter).await.unwrap();
        assert_eq!(first.total, 1);

        // Cached result is served as-is.
        let cached = index.page(&filter).await.unwrap();
        assert_eq!(cached, first);

        // Any write clears the cache.
        index.save(&record("b", 200, 0, &[])).await.unwrap();
        let refreshed = index.page(&filter).await.unwrap();
        assert_eq!(refreshed.total, 2);

        index.delete("b").await.unwrap();
        let after_delete = index.page(&filter).await.unwrap();
        assert_eq!(after_delete.total, 1);
    }

    #[tokio::test]
    async fn migration_marker_round_trips() {
        let index = MemoryIndex::new("http://x");
        assert!(!index.migration_complete().await.unwrap());
        index.mark_migration_complete().await.unwrap();
        assert!(index.migration_complete().await.unwrap());
    }
}

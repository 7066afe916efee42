//! Metadata index: record store plus secondary indexes and a bounded,
//! wall-clock-expiring page cache.
//!
//! The index is the source of truth for existence, tags, and expiry. Redis
//! is the production backend; [`MemoryIndex`] mirrors the same contracts
//! for tests and local experimentation.

mod memory;
mod migrate;
mod redis_index;

pub use memory::MemoryIndex;
pub use migrate::migrate_json_dir;
pub use redis_index::RedisIndex;

use crate::error::Result;
use crate::model::{ImageFormat, ImageInfo, ImageRecord, Orientation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Wall-clock lifetime of a cached page.
pub const PAGE_CACHE_TTL_SECS: u64 = 5 * 60;

const DEFAULT_PAGE_LIMIT: i64 = 12;
const MAX_PAGE_LIMIT: i64 = 50;

/// Filter parameters for [`MetadataIndex::page`]. Also the page-cache key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageFilter {
    pub page: i64,
    pub limit: i64,
    pub orientation: Option<Orientation>,
    pub format: Option<ImageFormat>,
    pub tag: Option<String>,
}

impl PageFilter {
    /// Clamp paging parameters: limit above 50 is capped, zero or negative
    /// falls back to 12, pages below 1 become 1.
    pub fn normalized(mut self) -> Self {
        if self.limit <= 0 {
            self.limit = DEFAULT_PAGE_LIMIT;
        } else if self.limit > MAX_PAGE_LIMIT {
            self.limit = MAX_PAGE_LIMIT;
        }
        if self.page < 1 {
            self.page = 1;
        }
        self
    }

    /// Cache key segment, stable across deployments.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.orientation.map(|o| o.as_str()).unwrap_or("-"),
            self.format.map(|f| f.as_str()).unwrap_or("-"),
            self.tag.as_deref().unwrap_or("-"),
            self.page,
            self.limit,
        )
    }
}

/// One computed listing page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub images: Vec<ImageInfo>,
    pub total: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
    pub page: i64,
    pub limit: i64,
}

/// Record store plus secondary indexes (by upload time, by tag, by expiry).
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    /// Startup reachability check.
    async fn ping(&self) -> Result<()>;

    /// Write the record and every relevant index entry as one logical step,
    /// then clear the page cache.
    async fn save(&self, record: &ImageRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<ImageRecord>;

    /// Bulk fetch; ids without a record are skipped silently.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<ImageRecord>>;

    /// Remove the record and all its index memberships, then clear the
    /// page cache.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Every live id, newest upload first.
    async fn all_ids(&self) -> Result<Vec<String>>;

    /// Intersection (AND) of the given tag sets.
    async fn ids_with_tags(&self, tags: &[String]) -> Result<Vec<String>>;

    /// Distinct tag values, sorted.
    async fn all_tags(&self) -> Result<Vec<String>>;

    /// Records whose expiry is non-zero and `<= now`, oldest expiry first.
    async fn list_expired(&self, now: i64) -> Result<Vec<ImageRecord>>;

    /// Filtered, filename-descending listing page. Consults the page cache
    /// first and populates it on miss.
    async fn page(&self, filter: &PageFilter) -> Result<PageResult>;

    /// Whether the one-shot JSON migration has already run to completion.
    async fn migration_complete(&self) -> Result<bool>;

    async fn mark_migration_complete(&self) -> Result<()>;
}

/// Shared page computation: filter, stable filename-descending sort, slice.
/// Both backends feed their candidate records through this.
pub(crate) fn compute_page(
    mut records: Vec<ImageRecord>,
    filter: &PageFilter,
    url_base: &str,
) -> PageResult {
    records.retain(|r| {
        filter.orientation.is_none_or(|o| r.orientation == o)
            && filter.format.is_none_or(|f| r.format == f)
            && filter.tag.as_deref().is_none_or(|t| r.has_tag(t))
    });
    records.sort_by(|a, b| b.file_name.cmp(&a.file_name));

    let total = records.len() as u64;
    let total_pages = total.div_ceil(filter.limit as u64);
    let start = ((filter.page - 1) * filter.limit) as usize;
    let images = records
        .into_iter()
        .skip(start)
        .take(filter.limit as usize)
        .map(|r| image_info(&r, url_base))
        .collect();

    PageResult {
        images,
        total,
        total_pages,
        page: filter.page,
        limit: filter.limit,
    }
}

/// Flatten a record into its client-facing listing row.
pub fn image_info(record: &ImageRecord, url_base: &str) -> ImageInfo {
    let url = |key: &str| format!("{}/{}", url_base.trim_end_matches('/'), key);
    ImageInfo {
        id: record.id.clone(),
        file_name: record.file_name.clone(),
        url: url(&record.paths.original),
        url_webp: Some(url(&record.paths.webp)),
        url_avif: Some(url(&record.paths.avif)),
        orientation: record.orientation,
        format: record.format,
        tags: record.tags.clone(),
        uploaded_at: record.uploaded_at,
        expires_at: record.expires_at,
        sizes: record.sizes.clone(),
    }
}

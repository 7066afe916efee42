//! Redis-backed metadata index.
//!
//! Key schema, under the configured prefix (`imageflow:<storage>:`):
//! - `img:<id>`            record JSON
//! - `idx:uploaded`        zset, score = upload unix seconds
//! - `idx:expiry`          zset, score = expiry unix seconds (non-zero only)
//! - `tag:<tag>`           set of ids
//! - `tags`                set of distinct tag values
//! - `cache:page:<key>`    cached page JSON, EX 300
//! - `migrated`            completion marker for the JSON migration
//!
//! Every record write or delete is a single MULTI/EXEC pipeline so a crash
//! leaves either the full new state or the prior state.

use super::{MetadataIndex, PAGE_CACHE_TTL_SECS, PageFilter, PageResult, compute_page};
use crate::error::{ImageFlowError, Result};
use crate::model::ImageRecord;
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct RedisIndex {
    conn: ConnectionManager,
    prefix: String,
    url_base: String,
}

impl fmt::Debug for RedisIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisIndex").field("prefix", &self.prefix).finish()
    }
}

impl RedisIndex {
    pub async fn connect(redis_url: &str, prefix: String, url_base: String) -> Result<Self> {
        info!(prefix, "connecting to Redis metadata index");

        let client = redis::Client::open(redis_url)
            .map_err(|e| ImageFlowError::IndexUnavailable(format!("invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client).await.map_err(index_err)?;

        info!("connected to Redis metadata index");
        Ok(Self { conn, prefix, url_base })
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}img:{id}", self.prefix)
    }

    fn uploaded_key(&self) -> String {
        format!("{}idx:uploaded", self.prefix)
    }

    fn expiry_key(&self) -> String {
        format!("{}idx:expiry", self.prefix)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{tag}", self.prefix)
    }

    fn tags_key(&self) -> String {
        format!("{}tags", self.prefix)
    }

    fn page_key(&self, filter: &PageFilter) -> String {
        format!("{}cache:page:{}", self.prefix, filter.cache_key())
    }

    fn migrated_key(&self) -> String {
        format!("{}migrated", self.prefix)
    }

    /// Wholesale page-cache invalidation by prefix.
    async fn invalidate_pages(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}cache:page:*", self.prefix);
        let keys: Vec<String> = conn.keys(&pattern).await.map_err(index_err)?;
        if !keys.is_empty() {
            debug!(count = keys.len(), "clearing page cache");
            let _: () = conn.del(keys).await.map_err(index_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataIndex for RedisIndex {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(index_err)?;
        Ok(())
    }

    async fn save(&self, record: &ImageRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(self.record_key(&record.id), json).ignore();
        pipe.zadd(self.uploaded_key(), &record.id, record.uploaded_at).ignore();
        if record.expires_at > 0 {
            pipe.zadd(self.expiry_key(), &record.id, record.expires_at).ignore();
        } else {
            pipe.zrem(self.expiry_key(), &record.id).ignore();
        }
        for tag in &record.tags {
            pipe.sadd(self.tag_key(tag), &record.id).ignore();
            pipe.sadd(self.tags_key(), tag).ignore();
        }
        pipe.query_async::<()>(&mut conn).await.map_err(index_err)?;

        self.invalidate_pages().await?;
        debug!(id = %record.id, tags = record.tags.len(), "saved record");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ImageRecord> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(self.record_key(id)).await.map_err(index_err)?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(ImageFlowError::NotFound(format!("no record for id {id}"))),
        }
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<ImageRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
        let values: Vec<Option<String>> = conn.mget(keys).await.map_err(index_err)?;

        let mut records = Vec::with_capacity(values.len());
        for (id, value) in ids.iter().zip(values) {
            match value {
                Some(json) => match serde_json::from_str(&json) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(id, error = %e, "skipping undecodable record"),
                },
                None => debug!(id, "record disappeared during bulk fetch"),
            }
        }
        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let record = self.get(id).await?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(self.record_key(id)).ignore();
        pipe.zrem(self.uploaded_key(), id).ignore();
        pipe.zrem(self.expiry_key(), id).ignore();
        for tag in &record.tags {
            pipe.srem(self.tag_key(tag), id);
        }
        let removed: Vec<i64> = pipe.query_async(&mut conn).await.map_err(index_err)?;
        for (tag, count) in record.tags.iter().zip(removed) {
            if count == 0 {
                warn!(id, tag, "record was not a member of its tag set");
            }
        }

        // Prune tags whose last member just went away.
        for tag in &record.tags {
            let remaining: i64 = conn.scard(self.tag_key(tag)).await.map_err(index_err)?;
            if remaining == 0 {
                let _: () = conn.srem(self.tags_key(), tag).await.map_err(index_err)?;
            }
        }

        self.invalidate_pages().await?;
        debug!(id, "deleted record");
        Ok(())
    }

    async fn all_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.zrevrange(self.uploaded_key(), 0, -1).await.map_err(index_err)
    }

    async fn ids_with_tags(&self, tags: &[String]) -> Result<Vec<String>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = tags.iter().map(|t| self.tag_key(t)).collect();
        conn.sinter(keys).await.map_err(index_err)
    }

    async fn all_tags(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut tags: Vec<String> = conn.smembers(self.tags_key()).await.map_err(index_err)?;
        tags.sort();
        Ok(tags)
    }

    async fn list_expired(&self, now: i64) -> Result<Vec<ImageRecord>> {
        let mut conn = self.conn.clone();
        // Ascending by score; zero ("never") is excluded by the range floor.
        let ids: Vec<String> = conn
            .zrangebyscore(self.expiry_key(), 1, now)
            .await
            .map_err(index_err)?;
        self.get_many(&ids).await
    }

    async fn page(&self, filter: &PageFilter) -> Result<PageResult> {
        let filter = filter.clone().normalized();
        let cache_key = self.page_key(&filter);
        let mut conn = self.conn.clone();

        let cached: Option<String> = conn.get(&cache_key).await.map_err(index_err)?;
        if let Some(json) = cached
            && let Ok(page) = serde_json::from_str(&json)
        {
            debug!(key = %cache_key, "page cache hit");
            return Ok(page);
        }

        let ids = match &filter.tag {
            Some(tag) => self.ids_with_tags(std::slice::from_ref(tag)).await?,
            None => self.all_ids().await?,
        };
        let records = self.get_many(&ids).await?;
        let page = compute_page(records, &filter, &self.url_base);

        let json = serde_json::to_string(&page)?;
        let _: () = conn
            .set_ex(&cache_key, json, PAGE_CACHE_TTL_SECS)
            .await
            .map_err(index_err)?;
        Ok(page)
    }

    async fn migration_complete(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let marker: Option<String> = conn.get(self.migrated_key()).await.map_err(index_err)?;
        Ok(marker.is_some())
    }

    async fn mark_migration_complete(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.migrated_key(), "1").await.map_err(index_err)?;
        Ok(())
    }
}

fn index_err(err: redis::RedisError) -> ImageFlowError {
    ImageFlowError::IndexUnavailable(err.to_string())
}
